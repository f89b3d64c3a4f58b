use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use crate::error::StorageError;

/// The two secrets a session persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKey {
    Access,
    Refresh,
}

impl TokenKey {
    /// Storage key under which the token is kept
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKey::Access => "access_token",
            TokenKey::Refresh => "refresh_token",
        }
    }
}

/// Durable storage for the access/refresh token pair.
///
/// Backends implement the per-key primitives; each must be atomic for its
/// key and durable before returning `Ok`. Reading a missing key yields
/// `Ok(None)` and removing one succeeds.
///
/// The pair is not transactional. `set_pair` writes the refresh token before
/// the access token and `clear` removes the access token first, so a crash
/// mid-way never leaves an access token without a refresh token. It can
/// still leave a new refresh token beside the previous access token.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn read(&self, key: TokenKey) -> Result<Option<String>, StorageError>;

    async fn write(&self, key: TokenKey, value: &str) -> Result<(), StorageError>;

    async fn remove(&self, key: TokenKey) -> Result<(), StorageError>;

    async fn set_pair(&self, access: &str, refresh: &str) -> Result<(), StorageError> {
        self.write(TokenKey::Refresh, refresh).await?;
        self.write(TokenKey::Access, access).await
    }

    async fn get_access(&self) -> Result<Option<String>, StorageError> {
        self.read(TokenKey::Access).await
    }

    async fn get_refresh(&self) -> Result<Option<String>, StorageError> {
        self.read(TokenKey::Refresh).await
    }

    async fn set_access(&self, access: &str) -> Result<(), StorageError> {
        self.write(TokenKey::Access, access).await
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.remove(TokenKey::Access).await?;
        self.remove(TokenKey::Refresh).await
    }

    /// A stored access token suggests an earlier login; it proves nothing.
    async fn has_session_hint(&self) -> Result<bool, StorageError> {
        Ok(self.get_access().await?.is_some())
    }
}

/// Run a blocking storage call on tokio's blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Unavailable(format!("Failed to spawn blocking task: {}", e)))?
}

// ============================================================================
// OS keychain
// ============================================================================

/// Tokens kept in the OS keychain, one entry per key under a service name.
///
/// Keychain calls block (D-Bus, Security.framework, Credential Manager), so
/// each one runs on the blocking pool.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(service: &str, key: TokenKey) -> Result<Entry, StorageError> {
        Ok(Entry::new(service, key.as_str())?)
    }

    fn read_sync(service: &str, key: TokenKey) -> Result<Option<String>, StorageError> {
        match Self::entry(service, key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store and read back through a fresh entry. A keychain that accepts
    /// the write but cannot return it is not durable storage.
    fn write_sync(service: &str, key: TokenKey, value: &str) -> Result<(), StorageError> {
        Self::entry(service, key)?.set_password(value)?;
        match Self::read_sync(service, key)? {
            Some(stored) if stored == value => Ok(()),
            _ => Err(StorageError::Unavailable(format!(
                "keychain did not retain {}",
                key.as_str()
            ))),
        }
    }

    fn remove_sync(service: &str, key: TokenKey) -> Result<(), StorageError> {
        match Self::entry(service, key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for KeyringStore {
    async fn read(&self, key: TokenKey) -> Result<Option<String>, StorageError> {
        let service = self.service.clone();
        run_blocking(move || Self::read_sync(&service, key)).await
    }

    async fn write(&self, key: TokenKey, value: &str) -> Result<(), StorageError> {
        let service = self.service.clone();
        let value = value.to_string();
        run_blocking(move || Self::write_sync(&service, key, &value)).await?;
        debug!(key = key.as_str(), "Stored token in keychain");
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<(), StorageError> {
        let service = self.service.clone();
        run_blocking(move || Self::remove_sync(&service, key)).await
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<TokenKey, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<TokenKey, String>>, StorageError> {
        self.values
            .lock()
            .map_err(|_| StorageError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn read(&self, key: TokenKey) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(&key).cloned())
    }

    async fn write(&self, key: TokenKey, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<(), StorageError> {
        self.lock()?.remove(&key);
        Ok(())
    }
}
