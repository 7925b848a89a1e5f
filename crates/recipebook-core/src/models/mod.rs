//! Data models for recipebook entities.
//!
//! - `Recipe`: name, description, image and ingredient list
//! - `Ingredient`: a named amount

pub mod recipe;

pub use recipe::{Ingredient, Recipe};
