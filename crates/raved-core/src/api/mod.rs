//! REST API client module for the raved backend.
//!
//! This module provides the `Transport` seam and the reqwest-backed
//! `ApiClient` used to reach the authentication endpoints.
//!
//! Authenticated calls carry the access token as a bearer header.

pub mod client;
pub mod error;

pub use client::{ApiClient, Transport};
pub use error::ApiError;

/// Authentication endpoint paths.
pub mod paths {
    pub const LOGIN: &str = "/api/auth/login";
    pub const REGISTER: &str = "/api/auth/register";
    pub const LOGOUT: &str = "/api/auth/logout";
    pub const REFRESH: &str = "/api/auth/refresh";
}
