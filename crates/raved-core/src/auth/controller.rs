//! The UI-facing session handle.
//!
//! `SessionController` pairs a `SessionService` with the observable
//! `SessionState`. Session-mutating operations run one at a time, so a
//! logout can never be overwritten by a refresh that finishes after it.

use std::future::Future;

use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::service::{RefreshOutcome, RestoredSession, SessionService};
use super::state::{InvalidTransition, SessionEvent, SessionState, SessionStatus};
use crate::error::SessionError;
use crate::models::{AuthSession, LoginCredentials, Profile, ProfilePatch, Registration};
use crate::utils::validation;

pub struct SessionController {
    service: SessionService,
    state: watch::Sender<SessionState>,
    in_flight: Mutex<()>,
}

/// Returns an abandoned attempt to `anonymous` if the future driving it is
/// dropped while the state still says `authenticating`.
struct AttemptGuard<'a> {
    state: &'a watch::Sender<SessionState>,
    armed: bool,
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_if_modified(|current| {
                if current.status() != SessionStatus::Authenticating {
                    return false;
                }
                debug!("Authentication attempt abandoned");
                *current = SessionState::new();
                true
            });
        }
    }
}

impl SessionController {
    pub fn new(service: SessionService) -> Self {
        let (state, _) = watch::channel(SessionState::new());
        Self {
            service,
            state,
            in_flight: Mutex::new(()),
        }
    }

    pub fn service(&self) -> &SessionService {
        &self.service
    }

    /// Receive every state change from now on.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The current state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Apply an event to the observable state.
    ///
    /// Subscribers are only woken when the state actually changes. Callers
    /// outside the crate go through the operations below, which hold the
    /// in-flight guard.
    pub(crate) fn dispatch(&self, event: SessionEvent) -> Result<(), InvalidTransition> {
        let name = event.name();
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| match current.transition(event) {
            Ok(next) => {
                let changed = next != *current;
                if changed {
                    debug!(
                        event = name,
                        from = %current.status(),
                        to = %next.status(),
                        "Session transition"
                    );
                }
                *current = next;
                changed
            }
            Err(e) => {
                warn!(error = %e, "Rejected session event");
                outcome = Err(e);
                false
            }
        });
        outcome
    }

    /// Resume a stored session at startup. Does nothing unless signed out.
    pub async fn restore(&self, cancel: &CancellationToken) -> Result<SessionState, SessionError> {
        let _op = self.in_flight.lock().await;
        if self.snapshot().status() != SessionStatus::Anonymous {
            return Ok(self.snapshot());
        }

        if let RestoredSession::Resumed(session) = self.service.restore(cancel).await? {
            self.dispatch(SessionEvent::BeginAuth)?;
            self.dispatch(SessionEvent::AuthSucceeded {
                profile: session.profile,
                access_token: session.access_token,
            })?;
        }
        Ok(self.snapshot())
    }

    pub async fn login(
        &self,
        credentials: &LoginCredentials,
        cancel: &CancellationToken,
    ) -> Result<Profile, SessionError> {
        validation::validate_login(credentials)?;
        self.authenticate(self.service.login(credentials, cancel)).await
    }

    pub async fn register(
        &self,
        registration: &Registration,
        cancel: &CancellationToken,
    ) -> Result<Profile, SessionError> {
        validation::validate_registration(registration)?;
        self.authenticate(self.service.register(registration, cancel)).await
    }

    /// Sign out. The state returns to `anonymous` once local credentials are
    /// gone; if they could not be erased the state is left as it was.
    pub async fn logout(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let _op = self.in_flight.lock().await;
        self.service.logout(cancel).await?;
        self.dispatch(SessionEvent::LoggedOut)?;
        Ok(())
    }

    /// Renew the access token. A failed refresh silently signs the user out.
    pub async fn refresh(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome, SessionError> {
        let _op = self.in_flight.lock().await;
        let outcome = self.service.refresh(cancel).await?;
        match &outcome {
            RefreshOutcome::Renewed(token) => self.dispatch(SessionEvent::TokenRenewed {
                access_token: token.clone(),
            })?,
            RefreshOutcome::NoSession => self.dispatch(SessionEvent::LoggedOut)?,
        }
        Ok(outcome)
    }

    pub fn clear_error(&self) -> Result<(), InvalidTransition> {
        self.dispatch(SessionEvent::ClearError)
    }

    pub fn update_profile(&self, patch: ProfilePatch) -> Result<(), InvalidTransition> {
        self.dispatch(SessionEvent::ProfileUpdated(patch))
    }

    /// Drive one login/registration attempt through
    /// `authenticating → authenticated | error`.
    async fn authenticate(
        &self,
        attempt: impl Future<Output = Result<AuthSession, SessionError>>,
    ) -> Result<Profile, SessionError> {
        let _op = self.in_flight.lock().await;
        self.dispatch(SessionEvent::BeginAuth)?;
        let mut guard = AttemptGuard {
            state: &self.state,
            armed: true,
        };

        let result = attempt.await;
        guard.armed = false;

        match result {
            Ok(session) => {
                self.dispatch(SessionEvent::AuthSucceeded {
                    profile: session.profile.clone(),
                    access_token: session.access_token,
                })?;
                Ok(session.profile)
            }
            Err(SessionError::Cancelled) => {
                self.dispatch(SessionEvent::LoggedOut)?;
                Err(SessionError::Cancelled)
            }
            Err(e) => {
                self.dispatch(SessionEvent::AuthFailed {
                    reason: e.user_message(),
                })?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::auth::{CredentialStore, MemoryStore};
    use crate::testing::{auth_response, FakeTransport};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::Notify;

    fn controller(
        transport: &Arc<FakeTransport>,
        store: &Arc<MemoryStore>,
    ) -> Arc<SessionController> {
        Arc::new(SessionController::new(SessionService::new(
            transport.clone(),
            store.clone(),
        )))
    }

    fn credentials() -> LoginCredentials {
        LoginCredentials::new("stu@uni.edu", "Passw0rd!")
    }

    #[tokio::test]
    async fn test_login_scenario_walks_through_authenticating() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            FakeTransport::new()
                .gate_first_call(gate.clone())
                .respond(Ok(auth_response("A1", "R1"))),
        );
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let mut rx = ctl.subscribe();
        assert_eq!(rx.borrow().status(), SessionStatus::Anonymous);

        let task = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.login(&credentials(), &CancellationToken::new()).await })
        };

        rx.wait_for(|s| s.status() == SessionStatus::Authenticating)
            .await
            .unwrap();
        gate.notify_one();

        let profile = task.await.unwrap().unwrap();
        assert_eq!(profile.id, "1");

        let state = ctl.snapshot();
        assert_eq!(state.status(), SessionStatus::Authenticated);
        assert_eq!(state.profile().map(|p| p.id.as_str()), Some("1"));
        assert_eq!(state.access_token(), Some("A1"));
        assert_eq!(store.get_access().await.unwrap().as_deref(), Some("A1"));
        assert_eq!(store.get_refresh().await.unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn test_public_events_cannot_disturb_an_attempt_in_flight() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            FakeTransport::new()
                .gate_first_call(gate.clone())
                .respond(Ok(auth_response("A1", "R1"))),
        );
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let mut rx = ctl.subscribe();

        let task = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.login(&credentials(), &CancellationToken::new()).await })
        };
        rx.wait_for(|s| s.status() == SessionStatus::Authenticating)
            .await
            .unwrap();

        let err = ctl.clear_error().unwrap_err();
        assert_eq!(err.from, SessionStatus::Authenticating);
        ctl.update_profile(ProfilePatch::default()).unwrap();
        assert_eq!(ctl.snapshot().status(), SessionStatus::Authenticating);

        gate.notify_one();
        task.await.unwrap().unwrap();

        let state = ctl.snapshot();
        assert!(state.is_authenticated());
        assert_eq!(state.access_token(), Some("A1"));
        assert_eq!(store.get_access().await.unwrap().as_deref(), Some("A1"));
    }

    #[tokio::test]
    async fn test_login_validation_error_leaves_state_anonymous() {
        let transport = Arc::new(FakeTransport::new());
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let rx = ctl.subscribe();

        let err = ctl
            .login(&LoginCredentials::new("stu@uni.edu", ""), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::Validation(_)));
        assert!(transport.calls().is_empty());
        assert_eq!(ctl.snapshot(), SessionState::new());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_login_failure_moves_to_error_with_message() {
        let transport = Arc::new(FakeTransport::new().respond(Err(ApiError::Unauthorized(
            "Invalid username or password".to_string(),
        ))));
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);

        ctl.login(&credentials(), &CancellationToken::new())
            .await
            .unwrap_err();

        let state = ctl.snapshot();
        assert_eq!(state.status(), SessionStatus::Error);
        assert_eq!(state.last_error(), Some("Invalid username or password"));

        ctl.clear_error().unwrap();
        assert_eq!(ctl.snapshot().status(), SessionStatus::Anonymous);
    }

    #[tokio::test]
    async fn test_cancelled_login_returns_to_anonymous() {
        let transport = Arc::new(FakeTransport::new());
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ctl.login(&credentials(), &cancel).await.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled));
        assert_eq!(ctl.snapshot(), SessionState::new());
    }

    #[tokio::test]
    async fn test_dropped_login_future_does_not_strand_authenticating() {
        let transport = Arc::new(
            FakeTransport::new()
                .gate_first_call(Arc::new(Notify::new()))
                .respond(Ok(auth_response("A1", "R1"))),
        );
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let mut rx = ctl.subscribe();

        let task = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.login(&credentials(), &CancellationToken::new()).await })
        };
        rx.wait_for(|s| s.status() == SessionStatus::Authenticating)
            .await
            .unwrap();
        task.abort();
        let _ = task.await;

        assert_eq!(ctl.snapshot().status(), SessionStatus::Anonymous);
        assert_eq!(store.get_access().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_while_authenticated_is_rejected() {
        let transport = Arc::new(FakeTransport::new().respond(Ok(auth_response("A1", "R1"))));
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let cancel = CancellationToken::new();

        ctl.login(&credentials(), &cancel).await.unwrap();
        let err = ctl.login(&credentials(), &cancel).await.unwrap_err();

        assert!(matches!(err, SessionError::Transition(_)));
        assert_eq!(err.user_message(), "You are already signed in");
        assert_eq!(transport.calls().len(), 1);
        assert!(ctl.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_register_authenticates() {
        let transport = Arc::new(FakeTransport::new().respond(Ok(auth_response("A1", "R1"))));
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);

        let registration = Registration {
            username: "stu".to_string(),
            email: "stu@uni.edu".to_string(),
            password: "Passw0rd!".to_string(),
            first_name: "Stu".to_string(),
            last_name: "Dent".to_string(),
        };
        ctl.register(&registration, &CancellationToken::new())
            .await
            .unwrap();
        assert!(ctl.snapshot().is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_signs_out_even_if_server_fails() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(Ok(auth_response("A1", "R1")))
                .respond(Err(ApiError::ServerError("down".to_string()))),
        );
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let cancel = CancellationToken::new();

        ctl.login(&credentials(), &cancel).await.unwrap();
        ctl.logout(&cancel).await.unwrap();

        assert_eq!(ctl.snapshot(), SessionState::new());
        assert_eq!(store.get_access().await.unwrap(), None);
        assert_eq!(store.get_refresh().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_updates_token_in_state() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(Ok(auth_response("A1", "R1")))
                .respond(Ok(json!({"accessToken": "A2"}))),
        );
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let cancel = CancellationToken::new();

        ctl.login(&credentials(), &cancel).await.unwrap();
        let outcome = ctl.refresh(&cancel).await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Renewed("A2".to_string()));
        assert_eq!(ctl.snapshot().access_token(), Some("A2"));
        assert_eq!(ctl.snapshot().authorization_header().as_deref(), Some("Bearer A2"));
    }

    #[tokio::test]
    async fn test_failed_refresh_silently_signs_out() {
        let transport = Arc::new(
            FakeTransport::new()
                .respond(Ok(auth_response("A1", "R1")))
                .respond(Err(ApiError::Unauthorized("expired".to_string()))),
        );
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);
        let cancel = CancellationToken::new();

        ctl.login(&credentials(), &cancel).await.unwrap();
        let outcome = ctl.refresh(&cancel).await.unwrap();

        assert_eq!(outcome, RefreshOutcome::NoSession);
        let state = ctl.snapshot();
        assert_eq!(state.status(), SessionStatus::Anonymous);
        assert_eq!(state.last_error(), None);
    }

    #[tokio::test]
    async fn test_logout_waits_for_in_flight_refresh() {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(
            FakeTransport::new()
                .gate_first_call(gate.clone())
                .respond(Ok(json!({"accessToken": "A2"})))
                .respond(Ok(Value::Null)),
        );
        let store = Arc::new(MemoryStore::new());
        store.set_pair("A1", "R1").await.unwrap();
        let ctl = controller(&transport, &store);

        let refresh = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.refresh(&CancellationToken::new()).await })
        };
        // Let the refresh take the guard and block in the transport
        while transport.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        let logout = {
            let ctl = ctl.clone();
            tokio::spawn(async move { ctl.logout(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;
        gate.notify_one();

        refresh.await.unwrap().unwrap();
        logout.await.unwrap().unwrap();

        assert_eq!(transport.paths(), vec!["/api/auth/refresh", "/api/auth/logout"]);
        assert_eq!(store.get_access().await.unwrap(), None);
        assert_eq!(store.get_refresh().await.unwrap(), None);
        assert_eq!(ctl.snapshot(), SessionState::new());
    }

    #[tokio::test]
    async fn test_restore_resumes_into_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(FakeTransport::new());
        let store = Arc::new(MemoryStore::new());
        store.set_pair("A1", "R1").await.unwrap();

        let profiles = crate::auth::ProfileCache::new(dir.path());
        profiles
            .save(&serde_json::from_value(json!({"id": "1", "email": "stu@uni.edu"})).unwrap())
            .unwrap();
        let ctl = SessionController::new(
            SessionService::new(transport.clone(), store.clone()).with_profile_cache(profiles),
        );

        let state = ctl.restore(&CancellationToken::new()).await.unwrap();
        assert!(state.is_authenticated());
        assert_eq!(state.access_token(), Some("A1"));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_profile_merges_into_state() {
        let transport = Arc::new(FakeTransport::new().respond(Ok(auth_response("A1", "R1"))));
        let store = Arc::new(MemoryStore::new());
        let ctl = controller(&transport, &store);

        // No-op while signed out
        ctl.update_profile(ProfilePatch::default()).unwrap();
        assert_eq!(ctl.snapshot(), SessionState::new());

        ctl.login(&credentials(), &CancellationToken::new())
            .await
            .unwrap();
        ctl.update_profile(ProfilePatch {
            username: Some("stu".to_string()),
            ..ProfilePatch::default()
        })
        .unwrap();

        let state = ctl.snapshot();
        let profile = state.profile().unwrap();
        assert_eq!(profile.username.as_deref(), Some("stu"));
        assert_eq!(profile.email, "stu@uni.edu");
    }
}
