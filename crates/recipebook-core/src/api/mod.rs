//! Identity provider API module.
//!
//! This module provides the `IdentityClient` for the provider's password
//! sign-up and sign-in endpoints, and the `ProviderError` type with the
//! table that turns provider error codes into user-facing messages.

pub mod client;
pub mod error;

pub use client::{IdentityClient, IdentityProvider, ProviderAuthResponse, DEFAULT_IDENTITY_ENDPOINT};
pub use error::{message_for_code, ProviderError, UNKNOWN_ERROR_MESSAGE};
