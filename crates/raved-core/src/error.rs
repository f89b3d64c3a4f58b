use thiserror::Error;

use crate::api::ApiError;
use crate::auth::{InvalidTransition, SessionStatus};

/// Malformed input, caught before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("Username must be 3-50 letters, digits or underscores")]
    InvalidUsername,

    #[error("Email address is not valid")]
    InvalidEmail,

    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },
}

/// Local credential persistence failed.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Stored credential is corrupt: {0}")]
    Corrupt(String),

    #[error("Credential storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Network unreachable, timeout, server failure or an unreadable response.
    #[error("Network error: {0}")]
    Transport(#[source] ApiError),

    /// The server refused the request (4xx).
    #[error("Request rejected ({status}): {message}")]
    AuthRejected { status: u16, message: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        match err.rejection_status() {
            Some(status) => SessionError::AuthRejected {
                status,
                message: err.server_message().unwrap_or_default().to_string(),
            },
            None => SessionError::Transport(err),
        }
    }
}

impl SessionError {
    /// Message suitable for showing on a login or registration form.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Validation(e) => e.to_string(),
            SessionError::AuthRejected { message, .. } if !message.trim().is_empty() => {
                message.clone()
            }
            SessionError::AuthRejected { status: 401, .. } => {
                "Invalid username or password".to_string()
            }
            SessionError::AuthRejected { status, .. } => {
                format!("Request was rejected by the server ({})", status)
            }
            SessionError::Transport(ApiError::Timeout) => {
                "Connection timed out. Please try again.".to_string()
            }
            SessionError::Transport(ApiError::RateLimited) => {
                "Too many attempts. Please wait a moment and try again.".to_string()
            }
            SessionError::Transport(_) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            SessionError::Storage(_) => {
                "Could not save your session on this device.".to_string()
            }
            SessionError::Cancelled => "Request cancelled".to_string(),
            SessionError::Transition(e) => match e.from {
                SessionStatus::Authenticated => "You are already signed in".to_string(),
                SessionStatus::Authenticating => {
                    "Another sign-in is already in progress".to_string()
                }
                SessionStatus::Anonymous | SessionStatus::Error => {
                    "That action is not available right now".to_string()
                }
            },
        }
    }
}
