//! Authentication module for managing user sessions.
//!
//! This module provides:
//! - `SessionRecord` / `SessionStore`: the current session and its persisted blob
//! - `ExpiryTimer`: one-shot logout when the token expires
//! - `AuthOrchestrator` / `AuthHandle`: the intent-driven auth flow
//! - `AuthGuard`: entry check for protected views

pub mod guard;
pub mod orchestrator;
pub mod session;
pub mod timer;

pub use guard::AuthGuard;
pub use orchestrator::{AuthEvent, AuthHandle, AuthOrchestrator, Intent};
pub use session::{SessionRecord, SessionStore, SESSION_KEY};
pub use timer::{ExpiryCallback, ExpiryScheduler, ExpiryTimer};
