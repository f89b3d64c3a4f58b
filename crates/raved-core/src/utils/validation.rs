//! Input checks run before any request leaves the device.

use crate::error::ValidationError;
use crate::models::{LoginCredentials, Registration};

/// Minimum password length accepted at registration
pub const MIN_PASSWORD_LENGTH: usize = 8;

const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;

/// Characters counted as "special" by the strength check
const SPECIAL_CHARS: &str = "!@#$%^&*()_+-=[]{}|;:,.<>?";

/// `local@domain`, where the local part uses only letters, digits and `+_.-`
/// and the domain is any non-empty text.
pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-'))
        && !domain.is_empty()
}

/// 3 to 50 ASCII letters, digits or underscores.
pub fn is_valid_username(username: &str) -> bool {
    (USERNAME_MIN..=USERNAME_MAX).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn is_valid_password(password: &str) -> bool {
    password.chars().count() >= MIN_PASSWORD_LENGTH
}

/// Long enough and mixes upper, lower, digit and special characters.
pub fn is_strong_password(password: &str) -> bool {
    is_valid_password(password)
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| SPECIAL_CHARS.contains(c))
}

pub fn validate_login(credentials: &LoginCredentials) -> Result<(), ValidationError> {
    if credentials.username_or_email.trim().is_empty() {
        return Err(ValidationError::Required("username or email"));
    }
    if credentials.password.is_empty() {
        return Err(ValidationError::Required("password"));
    }
    Ok(())
}

pub fn validate_registration(registration: &Registration) -> Result<(), ValidationError> {
    if !is_valid_username(&registration.username) {
        return Err(ValidationError::InvalidUsername);
    }
    if !is_valid_email(&registration.email) {
        return Err(ValidationError::InvalidEmail);
    }
    if !is_valid_password(&registration.password) {
        return Err(ValidationError::PasswordTooShort {
            min: MIN_PASSWORD_LENGTH,
        });
    }
    if registration.first_name.trim().is_empty() {
        return Err(ValidationError::Required("first name"));
    }
    if registration.last_name.trim().is_empty() {
        return Err(ValidationError::Required("last name"));
    }
    Ok(())
}
