//! The in-memory session projection UIs render from.
//!
//! `SessionState::transition` is a pure reduction: it takes the current
//! value and an event and returns the next value, never touching I/O.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::models::{Profile, ProfilePatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Anonymous,
    Authenticating,
    Authenticated,
    Error,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Anonymous => write!(f, "anonymous"),
            SessionStatus::Authenticating => write!(f, "authenticating"),
            SessionStatus::Authenticated => write!(f, "authenticated"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    BeginAuth,
    AuthSucceeded { profile: Profile, access_token: String },
    AuthFailed { reason: String },
    LoggedOut,
    ClearError,
    ProfileUpdated(ProfilePatch),
    TokenRenewed { access_token: String },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::BeginAuth => "begin_auth",
            SessionEvent::AuthSucceeded { .. } => "auth_succeeded",
            SessionEvent::AuthFailed { .. } => "auth_failed",
            SessionEvent::LoggedOut => "logged_out",
            SessionEvent::ClearError => "clear_error",
            SessionEvent::ProfileUpdated(_) => "profile_updated",
            SessionEvent::TokenRenewed { .. } => "token_renewed",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot apply {event} while {from}")]
pub struct InvalidTransition {
    pub from: SessionStatus,
    pub event: &'static str,
}

/// Who is signed in, and how the last attempt went.
///
/// `access_token` and `profile` are set exactly when `status` is
/// `Authenticated`; `last_error` exactly when it is `Error`. The fields are
/// private so only `transition` can produce a value.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    status: SessionStatus,
    #[serde(skip)]
    access_token: Option<String>,
    profile: Option<Profile>,
    last_error: Option<String>,
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("status", &self.status)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("profile", &self.profile)
            .field("last_error", &self.last_error)
            .finish()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.status == SessionStatus::Authenticating
    }

    /// `Authorization` header value for authenticated API calls
    pub fn authorization_header(&self) -> Option<String> {
        self.access_token
            .as_ref()
            .map(|token| format!("Bearer {}", token))
    }

    fn authenticated(profile: Profile, access_token: String) -> Self {
        Self {
            status: SessionStatus::Authenticated,
            access_token: Some(access_token),
            profile: Some(profile),
            last_error: None,
        }
    }

    fn with_status(status: SessionStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Apply an event, returning the next state.
    ///
    /// Events that do not apply in the current state but are harmless
    /// (`ClearError` while anonymous or authenticated, `ProfileUpdated`/
    /// `TokenRenewed` while signed out, `LoggedOut` while anonymous) return
    /// the state unchanged. An attempt in progress only moves on its outcome
    /// or a logout. Everything else is rejected.
    pub fn transition(&self, event: SessionEvent) -> Result<SessionState, InvalidTransition> {
        use SessionStatus::*;

        let invalid = |event: &SessionEvent| InvalidTransition {
            from: self.status,
            event: event.name(),
        };

        match (self.status, event) {
            (Anonymous | Error, SessionEvent::BeginAuth) => Ok(Self::with_status(Authenticating)),

            (
                Authenticating | Authenticated,
                SessionEvent::AuthSucceeded {
                    profile,
                    access_token,
                },
            ) => Ok(Self::authenticated(profile, access_token)),

            (Authenticating, SessionEvent::AuthFailed { reason }) => Ok(Self {
                last_error: Some(reason),
                ..Self::with_status(Error)
            }),

            (_, SessionEvent::LoggedOut) => Ok(Self::with_status(Anonymous)),

            (Error, SessionEvent::ClearError) => Ok(Self::with_status(Anonymous)),
            (Anonymous | Authenticated, SessionEvent::ClearError) => Ok(self.clone()),

            (Authenticated, SessionEvent::ProfileUpdated(patch)) => Ok(Self {
                profile: self.profile.as_ref().map(|p| p.merged(&patch)),
                ..self.clone()
            }),

            (Authenticated, SessionEvent::TokenRenewed { access_token }) => Ok(Self {
                access_token: Some(access_token),
                ..self.clone()
            }),

            (Anonymous | Error, SessionEvent::TokenRenewed { .. }) => Ok(self.clone()),
            (Anonymous | Authenticating | Error, SessionEvent::ProfileUpdated(_)) => {
                Ok(self.clone())
            }

            (_, event) => Err(invalid(&event)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> Profile {
        Profile {
            id: id.to_string(),
            email: "stu@uni.edu".to_string(),
            username: Some("stu".to_string()),
            first_name: None,
            last_name: None,
            profile_picture_url: None,
            email_verified: None,
        }
    }

    fn succeeded(id: &str, token: &str) -> SessionEvent {
        SessionEvent::AuthSucceeded {
            profile: profile(id),
            access_token: token.to_string(),
        }
    }

    fn authenticating() -> SessionState {
        SessionState::new().transition(SessionEvent::BeginAuth).unwrap()
    }

    fn authenticated() -> SessionState {
        authenticating().transition(succeeded("1", "A1")).unwrap()
    }

    fn errored() -> SessionState {
        authenticating()
            .transition(SessionEvent::AuthFailed {
                reason: "Invalid credentials".to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_initial_state_is_anonymous() {
        let state = SessionState::new();
        assert_eq!(state.status(), SessionStatus::Anonymous);
        assert_eq!(state.access_token(), None);
        assert_eq!(state.profile(), None);
        assert_eq!(state.last_error(), None);
    }

    #[test]
    fn test_login_success_path() {
        let state = authenticating();
        assert!(state.is_loading());

        let state = state.transition(succeeded("1", "A1")).unwrap();
        assert!(state.is_authenticated());
        assert_eq!(state.access_token(), Some("A1"));
        assert_eq!(state.profile().map(|p| p.id.as_str()), Some("1"));
        assert_eq!(state.authorization_header().as_deref(), Some("Bearer A1"));
    }

    #[test]
    fn test_login_failure_then_retry() {
        let state = errored();
        assert_eq!(state.status(), SessionStatus::Error);
        assert_eq!(state.last_error(), Some("Invalid credentials"));
        assert_eq!(state.access_token(), None);

        let retry = state.transition(SessionEvent::BeginAuth).unwrap();
        assert_eq!(retry.status(), SessionStatus::Authenticating);
        assert_eq!(retry.last_error(), None);

        let cleared = state.transition(SessionEvent::ClearError).unwrap();
        assert_eq!(cleared, SessionState::new());
    }

    #[test]
    fn test_authenticating_only_accepts_outcomes() {
        let state = authenticating();

        for event in [
            SessionEvent::BeginAuth,
            SessionEvent::ClearError,
            SessionEvent::TokenRenewed {
                access_token: "A2".to_string(),
            },
        ] {
            let name = event.name();
            let err = state.transition(event).unwrap_err();
            assert_eq!(err.from, SessionStatus::Authenticating, "{}", name);
            assert_eq!(err.event, name);
        }

        // A profile edit has nothing to merge into yet
        assert_eq!(
            state
                .transition(SessionEvent::ProfileUpdated(ProfilePatch::default()))
                .unwrap(),
            state
        );
        assert_eq!(
            state.transition(succeeded("1", "A1")).unwrap().status(),
            SessionStatus::Authenticated
        );
        assert_eq!(
            state
                .transition(SessionEvent::AuthFailed { reason: "x".into() })
                .unwrap()
                .status(),
            SessionStatus::Error
        );
    }

    #[test]
    fn test_auth_succeeded_is_idempotent() {
        let once = authenticating().transition(succeeded("1", "A1")).unwrap();
        let twice = once.transition(succeeded("1", "A1")).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_logged_out_from_every_state() {
        for state in [SessionState::new(), authenticating(), authenticated(), errored()] {
            assert_eq!(
                state.transition(SessionEvent::LoggedOut).unwrap(),
                SessionState::new()
            );
        }
    }

    #[test]
    fn test_profile_updated_merges_only_when_authenticated() {
        let patch = ProfilePatch {
            first_name: Some("Ada".to_string()),
            ..ProfilePatch::default()
        };

        let state = authenticated()
            .transition(SessionEvent::ProfileUpdated(patch.clone()))
            .unwrap();
        let p = state.profile().unwrap();
        assert_eq!(p.first_name.as_deref(), Some("Ada"));
        assert_eq!(p.username.as_deref(), Some("stu"));
        assert_eq!(state.access_token(), Some("A1"));

        let anon = SessionState::new();
        assert_eq!(
            anon.transition(SessionEvent::ProfileUpdated(patch)).unwrap(),
            anon
        );
    }

    #[test]
    fn test_token_renewed_keeps_profile() {
        let state = authenticated()
            .transition(SessionEvent::TokenRenewed {
                access_token: "A2".to_string(),
            })
            .unwrap();
        assert_eq!(state.access_token(), Some("A2"));
        assert_eq!(state.profile().map(|p| p.id.as_str()), Some("1"));
    }

    #[test]
    fn test_invalid_transitions_are_rejected() {
        let err = authenticated().transition(SessionEvent::BeginAuth).unwrap_err();
        assert_eq!(err.from, SessionStatus::Authenticated);
        assert_eq!(err.event, "begin_auth");
        assert_eq!(err.to_string(), "cannot apply begin_auth while authenticated");

        assert!(SessionState::new().transition(succeeded("1", "A1")).is_err());
        assert!(SessionState::new()
            .transition(SessionEvent::AuthFailed { reason: "x".into() })
            .is_err());
        assert!(errored()
            .transition(SessionEvent::AuthFailed { reason: "x".into() })
            .is_err());
    }

    #[test]
    fn test_serialized_state_omits_token() {
        let json = serde_json::to_value(authenticated()).unwrap();
        assert_eq!(json["status"], "authenticated");
        assert_eq!(json["profile"]["id"], "1");
        assert!(json.get("accessToken").is_none());
        assert!(!format!("{:?}", authenticated()).contains("A1"));
    }
}
