//! Authentication: credential storage, session operations and session state.
//!
//! This module provides:
//! - `CredentialStore`: persistence for the access/refresh token pair, backed
//!   by the OS keychain (`KeyringStore`), an encrypted file (`VaultStore`) or
//!   memory (`MemoryStore`)
//! - `SessionService`: login, registration, logout, refresh and startup restore
//! - `SessionState`: the observable session and its transition rules
//! - `SessionController`: ties the service to the observable state

pub mod controller;
pub mod credentials;
pub mod service;
pub mod snapshot;
pub mod state;
pub mod token;
pub mod vault;

use std::sync::Arc;

use anyhow::{Context, Result};

pub use controller::SessionController;
pub use credentials::{CredentialStore, KeyringStore, MemoryStore, TokenKey};
pub use service::{RefreshOutcome, RestoredSession, SessionService};
pub use snapshot::{ProfileCache, ProfileSnapshot};
pub use state::{InvalidTransition, SessionEvent, SessionState, SessionStatus};
pub use vault::VaultStore;

use crate::api::ApiClient;
use crate::config::{Config, StorageBackend};

/// Environment variable holding the vault passphrase
pub const VAULT_PASSPHRASE_VAR: &str = "RAVED_VAULT_PASSPHRASE";

/// Open the credential backend selected in the config.
pub fn open_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
    let store: Arc<dyn CredentialStore> = match config.storage {
        StorageBackend::Keyring => Arc::new(KeyringStore::new(config.keyring_service.clone())),
        StorageBackend::Vault => {
            let passphrase = std::env::var(VAULT_PASSPHRASE_VAR).with_context(|| {
                format!("{} must be set for vault storage", VAULT_PASSPHRASE_VAR)
            })?;
            Arc::new(VaultStore::new(config.data_dir()?, passphrase)?)
        }
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}

impl SessionService {
    /// Build a service talking to the configured API with the configured store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Arc::new(ApiClient::new(config)?);
        let store = open_store(config)?;
        Ok(SessionService::new(transport, store)
            .with_profile_cache(ProfileCache::new(config.data_dir()?))
            .with_expiry_leeway(config.token_expiry_leeway()))
    }
}
