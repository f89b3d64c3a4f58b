//! Login, registration, logout and token refresh against the auth API.
//!
//! `SessionService` holds no session state of its own. It reads and writes
//! the credential store and reports outcomes; turning those outcomes into
//! state changes is the caller's job (see `SessionController`).

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Duration;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::credentials::CredentialStore;
use super::snapshot::ProfileCache;
use super::token;
use crate::api::{paths, ApiError, Transport};
use crate::error::{SessionError, StorageError};
use crate::models::{
    AuthResponse, AuthSession, LoginCredentials, Profile, RefreshRequest, RefreshResponse,
    Registration,
};
use crate::utils::validation;

/// What a refresh attempt left behind.
#[derive(Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new access token was issued and stored
    Renewed(String),
    /// There is no usable session; the user has to sign in again
    NoSession,
}

impl fmt::Debug for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshOutcome::Renewed(_) => write!(f, "Renewed(<redacted>)"),
            RefreshOutcome::NoSession => write!(f, "NoSession"),
        }
    }
}

/// What startup found in local storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoredSession {
    Anonymous,
    Resumed(AuthSession),
}

pub struct SessionService {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    profiles: Option<ProfileCache>,
    expiry_leeway: Duration,
}

impl SessionService {
    pub fn new(transport: Arc<dyn Transport>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            store,
            profiles: None,
            expiry_leeway: Duration::zero(),
        }
    }

    /// Keep a profile snapshot so `restore` can resume a session.
    pub fn with_profile_cache(mut self, profiles: ProfileCache) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Treat tokens as expired this long before their `exp` claim.
    pub fn with_expiry_leeway(mut self, leeway: Duration) -> Self {
        self.expiry_leeway = leeway;
        self
    }

    /// Authenticate with username/email and password.
    ///
    /// Nothing is written locally unless the server accepts the credentials.
    pub async fn login(
        &self,
        credentials: &LoginCredentials,
        cancel: &CancellationToken,
    ) -> Result<AuthSession, SessionError> {
        validation::validate_login(credentials)?;
        debug!(identifier = %credentials.username_or_email, "Sending login request");

        let body = encode(credentials)?;
        let response = self.send(paths::LOGIN, Some(body), None, cancel).await;
        let session = match response {
            Ok(value) => self.establish(value).await,
            Err(e) => Err(e),
        };

        match &session {
            Ok(s) => info!(user_id = %s.profile.id, "Login succeeded"),
            Err(e) => warn!(error = %e, "Login failed"),
        }
        session
    }

    /// Create an account; on success the new session is persisted like a login.
    pub async fn register(
        &self,
        registration: &Registration,
        cancel: &CancellationToken,
    ) -> Result<AuthSession, SessionError> {
        validation::validate_registration(registration)?;
        debug!(username = %registration.username, "Sending registration request");

        let body = encode(registration)?;
        let response = self.send(paths::REGISTER, Some(body), None, cancel).await;
        let session = match response {
            Ok(value) => self.establish(value).await,
            Err(e) => Err(e),
        };

        match &session {
            Ok(s) => info!(user_id = %s.profile.id, "Registration succeeded"),
            Err(e) => warn!(error = %e, "Registration failed"),
        }
        session
    }

    /// Tell the server the session is over, then erase it locally.
    ///
    /// The server call is best-effort: failures, cancellation and even a
    /// panicking transport are logged and local clearing still runs. Only a
    /// failure to clear is reported.
    pub async fn logout(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let notified = AssertUnwindSafe(self.notify_logout(cancel))
            .catch_unwind()
            .await;

        let panic = match notified {
            Ok(Ok(())) => {
                debug!("Server acknowledged logout");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Logout request failed; clearing local session anyway");
                None
            }
            Err(payload) => {
                error!("Logout request panicked; clearing local session before unwinding");
                Some(payload)
            }
        };

        let cleared = self.clear_local().await;
        if let Some(payload) = panic {
            std::panic::resume_unwind(payload);
        }
        cleared?;

        info!("Logged out");
        Ok(())
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Any failure from the server ends the session: both tokens are erased
    /// and `NoSession` is returned. Cancellation leaves storage untouched.
    pub async fn refresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome, SessionError> {
        let Some(refresh_token) = self.store.get_refresh().await? else {
            debug!("No refresh token stored");
            return Ok(RefreshOutcome::NoSession);
        };

        let body = encode(&RefreshRequest {
            refresh_token: &refresh_token,
        })?;
        let renewed = match self.send(paths::REFRESH, Some(body), None, cancel).await {
            Err(SessionError::Cancelled) => return Err(SessionError::Cancelled),
            Err(e) => Err(e),
            Ok(value) => decode::<RefreshResponse>(value, "refresh").and_then(|r| {
                checked_token(&r.access_token)?;
                Ok(r)
            }),
        };

        match renewed {
            Ok(response) => {
                self.store.set_access(&response.access_token).await?;
                info!(expires_in = ?response.expires_in, "Access token refreshed");
                Ok(RefreshOutcome::Renewed(response.access_token))
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed; ending session");
                self.clear_local().await?;
                Ok(RefreshOutcome::NoSession)
            }
        }
    }

    /// Decide at startup whether stored credentials can resume a session.
    ///
    /// A stored token is only a hint. Damaged or orphaned tokens are erased;
    /// a token whose `exp` claim has passed is refreshed first; without a
    /// profile snapshot there is nothing to show, so the user starts signed
    /// out (tokens are kept and replaced on the next login).
    pub async fn restore(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RestoredSession, SessionError> {
        let Some(access_token) = self.store.get_access().await? else {
            debug!("No stored access token");
            return Ok(RestoredSession::Anonymous);
        };

        if !token::is_well_formed(&access_token) {
            warn!("Stored access token is malformed; discarding credentials");
            self.clear_local().await?;
            return Ok(RestoredSession::Anonymous);
        }

        if self.store.get_refresh().await?.is_none() {
            warn!("Access token stored without a refresh token; discarding credentials");
            self.clear_local().await?;
            return Ok(RestoredSession::Anonymous);
        }

        let Some(profile) = self.load_profile() else {
            debug!("No profile snapshot; starting signed out");
            return Ok(RestoredSession::Anonymous);
        };

        let access_token = if token::is_expired(&access_token, self.expiry_leeway) {
            info!("Stored access token has expired; refreshing");
            match self.refresh(cancel).await? {
                RefreshOutcome::Renewed(token) => token,
                RefreshOutcome::NoSession => return Ok(RestoredSession::Anonymous),
            }
        } else {
            access_token
        };

        info!(user_id = %profile.id, "Resumed stored session");
        Ok(RestoredSession::Resumed(AuthSession {
            profile,
            access_token,
        }))
    }

    /// The stored access token, for attaching to other API requests.
    pub async fn access_token(&self) -> Result<Option<String>, SessionError> {
        Ok(self.store.get_access().await?)
    }

    /// Stored credentials exist (whether or not they are still valid).
    pub async fn has_stored_session(&self) -> Result<bool, SessionError> {
        Ok(self.store.has_session_hint().await?)
    }

    // ===== Internals =====

    /// Race a request against the caller's cancellation signal.
    async fn send(
        &self,
        path: &str,
        body: Option<Value>,
        bearer: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Value, SessionError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(path = path, "Request cancelled");
                Err(SessionError::Cancelled)
            }
            result = self.transport.post(path, body.as_ref(), bearer) => {
                result.map_err(SessionError::from)
            }
        }
    }

    async fn notify_logout(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let access_token = self.store.get_access().await?;
        self.send(paths::LOGOUT, None, access_token.as_deref(), cancel)
            .await?;
        Ok(())
    }

    /// Persist the pair from a login/registration response.
    async fn establish(&self, value: Value) -> Result<AuthSession, SessionError> {
        let response: AuthResponse = decode(value, "authentication")?;
        checked_token(&response.access_token)?;
        checked_token(&response.refresh_token)?;

        self.store
            .set_pair(&response.access_token, &response.refresh_token)
            .await?;
        debug!(expires_in = ?response.expires_in, "Stored credential pair");
        self.save_profile(&response.user);

        Ok(AuthSession {
            profile: response.user,
            access_token: response.access_token,
        })
    }

    /// Erase both tokens and the profile snapshot.
    async fn clear_local(&self) -> Result<(), StorageError> {
        let cleared = self.store.clear().await;
        if let Some(profiles) = &self.profiles {
            if let Err(e) = profiles.clear() {
                warn!(error = %e, "Failed to remove profile snapshot");
            }
        }
        if let Err(e) = &cleared {
            error!(error = %e, "Failed to clear stored credentials");
        }
        cleared
    }

    fn save_profile(&self, profile: &Profile) {
        if let Some(profiles) = &self.profiles {
            if let Err(e) = profiles.save(profile) {
                warn!(error = %e, "Failed to save profile snapshot");
            }
        }
    }

    fn load_profile(&self) -> Option<Profile> {
        let profiles = self.profiles.as_ref()?;
        match profiles.load() {
            Ok(snapshot) => snapshot.map(|s| s.profile),
            Err(e) => {
                warn!(error = %e, "Failed to load profile snapshot");
                None
            }
        }
    }
}

fn encode<T: Serialize>(body: &T) -> Result<Value, SessionError> {
    serde_json::to_value(body).map_err(|e| {
        SessionError::Transport(ApiError::InvalidRequest(format!(
            "Failed to encode request: {}",
            e
        )))
    })
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, SessionError> {
    serde_json::from_value(value).map_err(|e| {
        SessionError::Transport(ApiError::InvalidResponse(format!(
            "Failed to parse {} response: {}",
            what, e
        )))
    })
}

/// Reject tokens that could not be sent back as a bearer header.
fn checked_token(token: &str) -> Result<(), SessionError> {
    if token::is_well_formed(token) {
        Ok(())
    } else {
        Err(SessionError::Transport(ApiError::InvalidResponse(
            "Server issued a malformed token".to_string(),
        )))
    }
}
