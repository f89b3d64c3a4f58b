//! Data models for the authentication API.
//!
//! - `Profile`, `ProfilePatch`: the signed-in user's identity and partial updates
//! - `LoginCredentials`, `Registration`: request bodies
//! - `AuthSession`: what a successful login or registration yields

pub mod user;

pub use user::{AuthSession, LoginCredentials, Profile, ProfilePatch, Registration};
pub(crate) use user::{AuthResponse, RefreshRequest, RefreshResponse};
