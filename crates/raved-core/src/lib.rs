//! raved-core - session and authentication lifecycle for the raved client.
//!
//! The crate owns everything between "the user typed a password" and "the UI
//! knows who is signed in": talking to the auth API, keeping the token pair
//! in secure storage, and the session state machine the UI observes.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod utils;

#[cfg(test)]
mod testing;

pub use auth::{
    CredentialStore, RefreshOutcome, RestoredSession, SessionController, SessionEvent,
    SessionService, SessionState, SessionStatus,
};
pub use config::Config;
pub use error::{SessionError, StorageError, ValidationError};
pub use models::{LoginCredentials, Profile, ProfilePatch, Registration};
