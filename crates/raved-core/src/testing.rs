//! Hand-written fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::{ApiError, Transport};
use crate::auth::{CredentialStore, MemoryStore, TokenKey};
use crate::error::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

/// Replays scripted responses in order and records every request.
#[derive(Default)]
pub struct FakeTransport {
    responses: Mutex<VecDeque<Result<Value, ApiError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    gate: Mutex<Option<Arc<Notify>>>,
    panic_on_call: bool,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: Result<Value, ApiError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Hold the first request until `gate` is notified.
    pub fn gate_first_call(self, gate: Arc<Notify>) -> Self {
        *self.gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_call: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.path).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn post(
        &self,
        path: &str,
        body: Option<&Value>,
        bearer: Option<&str>,
    ) -> Result<Value, ApiError> {
        self.calls.lock().unwrap().push(RecordedCall {
            path: path.to_string(),
            body: body.cloned(),
            bearer: bearer.map(str::to_string),
        });
        if self.panic_on_call {
            panic!("transport exploded");
        }
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Unreachable("no scripted response".to_string())))
    }
}

/// A `MemoryStore` whose writes or removals can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_writes: AtomicBool,
    pub fail_removes: AtomicBool,
}

impl FlakyStore {
    fn failure(op: &str) -> StorageError {
        StorageError::Unavailable(format!("{} failed", op))
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn read(&self, key: TokenKey) -> Result<Option<String>, StorageError> {
        self.inner.read(key).await
    }

    async fn write(&self, key: TokenKey, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::failure("write"));
        }
        self.inner.write(key, value).await
    }

    async fn remove(&self, key: TokenKey) -> Result<(), StorageError> {
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(Self::failure("remove"));
        }
        self.inner.remove(key).await
    }
}

pub fn auth_response(access: &str, refresh: &str) -> Value {
    serde_json::json!({
        "accessToken": access,
        "refreshToken": refresh,
        "tokenType": "Bearer",
        "expiresIn": 3600,
        "user": { "id": "1", "email": "stu@uni.edu" }
    })
}
