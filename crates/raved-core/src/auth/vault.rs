//! Passphrase-encrypted token files for hosts without a usable keychain.
//!
//! Each token lives in its own file, `<dir>/<key>.vault`, laid out as
//! `salt (16) || nonce (12) || ciphertext`. The key is derived from the
//! passphrase with Argon2id and the token sealed with ChaCha20-Poly1305.
//!
//! Key derivation and file I/O block, so every operation runs on tokio's
//! blocking pool.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use tracing::debug;

use super::credentials::{run_blocking, CredentialStore, TokenKey};
use crate::error::StorageError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Vault file extension
const VAULT_EXT: &str = "vault";

#[derive(Clone)]
pub struct VaultStore {
    dir: PathBuf,
    passphrase: String,
    params: Params,
}

impl VaultStore {
    /// Open (or lazily create) a vault in `dir` with Argon2's default cost.
    pub fn new(
        dir: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Result<Self, StorageError> {
        Self::with_params(dir, passphrase, Params::default())
    }

    /// Open a vault with explicit Argon2 cost parameters.
    pub fn with_params(
        dir: impl Into<PathBuf>,
        passphrase: impl Into<String>,
        params: Params,
    ) -> Result<Self, StorageError> {
        let passphrase = passphrase.into();
        if passphrase.is_empty() {
            return Err(StorageError::Unavailable("vault passphrase is empty".to_string()));
        }
        Ok(Self {
            dir: dir.into(),
            passphrase,
            params,
        })
    }

    fn path(&self, key: TokenKey) -> PathBuf {
        self.dir.join(format!("{}.{}", key.as_str(), VAULT_EXT))
    }

    fn derive_key(&self, salt: &[u8]) -> Result<[u8; KEY_LEN], StorageError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .hash_password_into(self.passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| StorageError::Crypto(e.to_string()))?;
        Ok(key)
    }

    fn seal(&self, plaintext: &str) -> Result<Vec<u8>, StorageError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = self.derive_key(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| StorageError::Crypto("failed to encrypt token".to_string()))?;

        let mut sealed = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<String, StorageError> {
        if sealed.len() < SALT_LEN + NONCE_LEN {
            return Err(StorageError::Corrupt("vault file is truncated".to_string()));
        }
        let (salt, rest) = sealed.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive_key(salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                StorageError::Crypto("failed to decrypt token (wrong passphrase?)".to_string())
            })?;
        String::from_utf8(plaintext)
            .map_err(|_| StorageError::Corrupt("token is not valid UTF-8".to_string()))
    }

    /// Write to a sibling temp file, sync it, then rename over the target.
    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("{}.tmp", VAULT_EXT));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Self::sync_parent(path)
    }

    /// Persist a rename or unlink by syncing the containing directory.
    #[cfg(unix)]
    fn sync_parent(path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    /// Directory handles cannot be synced on this platform.
    #[cfg(not(unix))]
    fn sync_parent(_path: &Path) -> Result<(), StorageError> {
        Ok(())
    }

    fn read_sync(&self, key: TokenKey) -> Result<Option<String>, StorageError> {
        match fs::read(self.path(key)) {
            Ok(sealed) => self.open(&sealed).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_sync(&self, key: TokenKey, value: &str) -> Result<(), StorageError> {
        let sealed = self.seal(value)?;
        Self::write_atomic(&self.path(key), &sealed)
    }

    fn remove_sync(&self, key: TokenKey) -> Result<(), StorageError> {
        let path = self.path(key);
        match fs::remove_file(&path) {
            Ok(()) => Self::sync_parent(&path),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CredentialStore for VaultStore {
    async fn read(&self, key: TokenKey) -> Result<Option<String>, StorageError> {
        let vault = self.clone();
        run_blocking(move || vault.read_sync(key)).await
    }

    async fn write(&self, key: TokenKey, value: &str) -> Result<(), StorageError> {
        let vault = self.clone();
        let value = value.to_string();
        run_blocking(move || vault.write_sync(key, &value)).await?;
        debug!(key = key.as_str(), dir = %self.dir.display(), "Stored token in vault");
        Ok(())
    }

    async fn remove(&self, key: TokenKey) -> Result<(), StorageError> {
        let vault = self.clone();
        run_blocking(move || vault.remove_sync(key)).await
    }
}
