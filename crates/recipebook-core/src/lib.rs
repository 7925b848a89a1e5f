//! Core library for recipebook.
//!
//! Authentication against a password identity provider, a persisted session
//! with expiry-driven logout, guarded routes, and recipe editing.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod recipes;
pub mod routes;
pub mod storage;
pub mod utils;
