//! The secure store: validated keys, versioned envelopes, encryption at rest.

use std::sync::Arc;

use carelink_common::EncryptionService;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::backend::{MemoryBackend, StorageBackend};
use super::error::StoreError;

const MAX_KEY_LEN: usize = 128;
const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_KEY_PREFIX: &str = "carelink.";

/// Which storage scope an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Survives restarts.
    Durable,
    /// Lives only as long as the process (tab-lifetime).
    Session,
}

/// Metadata envelope wrapped around every stored value before encryption.
///
/// A version mismatch on read means the entry predates the current
/// encryption scheme and is treated as absent, never partially trusted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageEntry {
    pub value: serde_json::Value,
    pub value_type: String,
    pub encryption_version: u32,
    pub created_at: DateTime<Utc>,
    pub sensitive: bool,
}

/// Configuration for [`SecureStore`].
#[derive(Debug, Clone)]
pub struct SecureStoreConfig {
    pub key_prefix: String,
    pub quota_bytes: usize,
    pub encryption_version: u32,
}

impl Default for SecureStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            quota_bytes: DEFAULT_QUOTA_BYTES,
            encryption_version: 1,
        }
    }
}

impl SecureStoreConfig {
    pub fn builder() -> SecureStoreConfigBuilder {
        SecureStoreConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.quota_bytes == 0 {
            return Err(StoreError::Backend("quota_bytes must be greater than 0".to_string()));
        }
        if self.key_prefix.is_empty() {
            return Err(StoreError::Backend("key_prefix must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`SecureStoreConfig`].
#[derive(Debug, Default)]
pub struct SecureStoreConfigBuilder {
    config: SecureStoreConfig,
}

impl SecureStoreConfigBuilder {
    pub fn new() -> Self {
        Self { config: SecureStoreConfig::default() }
    }

    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.key_prefix = prefix.into();
        self
    }

    pub fn quota_bytes(mut self, quota: usize) -> Self {
        self.config.quota_bytes = quota;
        self
    }

    pub fn encryption_version(mut self, version: u32) -> Self {
        self.config.encryption_version = version;
        self
    }

    pub fn build(self) -> Result<SecureStoreConfig, StoreError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Encrypted key/value store over the two storage scopes.
pub struct SecureStore {
    config: SecureStoreConfig,
    encryption: Option<EncryptionService>,
    durable: Arc<dyn StorageBackend>,
    session: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for SecureStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStore")
            .field("config", &self.config)
            .field("has_encryption_key", &self.encryption.is_some())
            .finish()
    }
}

impl SecureStore {
    /// Create a store over the given backends.
    ///
    /// `encryption` is the pre-provisioned key material; passing `None`
    /// produces a store whose every operation fails with
    /// [`StoreError::MissingEncryptionKey`].
    pub fn new(
        config: SecureStoreConfig,
        encryption: Option<EncryptionService>,
        durable: Arc<dyn StorageBackend>,
        session: Arc<dyn StorageBackend>,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self { config, encryption, durable, session })
    }

    /// Convenience constructor with in-memory backends for both scopes.
    pub fn in_memory(
        config: SecureStoreConfig,
        encryption: Option<EncryptionService>,
    ) -> Result<Self, StoreError> {
        Self::new(
            config,
            encryption,
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
        )
    }

    fn backend(&self, scope: StorageScope) -> &dyn StorageBackend {
        match scope {
            StorageScope::Durable => self.durable.as_ref(),
            StorageScope::Session => self.session.as_ref(),
        }
    }

    fn encryption(&self) -> Result<&EncryptionService, StoreError> {
        self.encryption.as_ref().ok_or(StoreError::MissingEncryptionKey)
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    fn validate_key(key: &str) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey { reason: "key must not be empty".to_string() });
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::InvalidKey {
                reason: format!("key exceeds {MAX_KEY_LEN} characters"),
            });
        }
        if let Some(bad) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')))
        {
            return Err(StoreError::InvalidKey {
                reason: format!("character {bad:?} is outside [A-Za-z0-9._:-]"),
            });
        }
        Ok(())
    }

    /// Serialize, envelope, encrypt and persist a value.
    ///
    /// The quota is checked before the write; a write that would exceed the
    /// budget fails with [`StoreError::QuotaExceeded`] and leaves storage
    /// untouched.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        scope: StorageScope,
        sensitive: bool,
    ) -> Result<(), StoreError> {
        Self::validate_key(key)?;
        let encryption = self.encryption()?;

        let entry = StorageEntry {
            value: serde_json::to_value(value)?,
            value_type: std::any::type_name::<T>().to_string(),
            encryption_version: self.config.encryption_version,
            created_at: Utc::now(),
            sensitive,
        };
        let serialized = serde_json::to_vec(&entry)?;
        let ciphertext = encryption.encrypt_to_string(&serialized)?;

        let storage_key = self.prefixed(key);
        let backend = self.backend(scope);

        let mut used = backend.used_bytes(&self.config.key_prefix).await?;
        // Replacing an existing entry frees its current bytes first.
        if let Some(existing) = backend.read(&storage_key).await? {
            used = used.saturating_sub(storage_key.len() + existing.len());
        }
        let attempted = used + storage_key.len() + ciphertext.len();
        if attempted > self.config.quota_bytes {
            warn!(key, attempted, budget = self.config.quota_bytes, "storage quota exceeded");
            return Err(StoreError::QuotaExceeded {
                attempted,
                budget: self.config.quota_bytes,
            });
        }

        backend.write(&storage_key, ciphertext).await?;
        debug!(key, ?scope, sensitive, "stored entry");
        Ok(())
    }

    /// Read and decrypt a value.
    ///
    /// Returns `Ok(None)` if the key is absent. An entry written under a
    /// different encryption version fails with
    /// [`StoreError::IncompatibleVersion`]; callers treat that as absence
    /// and never attempt migration.
    pub async fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        scope: StorageScope,
    ) -> Result<Option<T>, StoreError> {
        Self::validate_key(key)?;
        let encryption = self.encryption()?;

        let storage_key = self.prefixed(key);
        let Some(ciphertext) = self.backend(scope).read(&storage_key).await? else {
            return Ok(None);
        };

        let plaintext = encryption.decrypt_from_string(&ciphertext)?;
        let entry: StorageEntry = serde_json::from_slice(&plaintext)?;

        if entry.encryption_version != self.config.encryption_version {
            warn!(
                key,
                found = entry.encryption_version,
                current = self.config.encryption_version,
                "entry written under incompatible encryption version"
            );
            return Err(StoreError::IncompatibleVersion {
                found: entry.encryption_version,
                current: self.config.encryption_version,
            });
        }

        Ok(Some(serde_json::from_value(entry.value)?))
    }

    /// Remove an entry, overwriting the slot with random bytes first to
    /// reduce forensic recoverability.
    pub async fn remove(&self, key: &str, scope: StorageScope) -> Result<(), StoreError> {
        Self::validate_key(key)?;
        let storage_key = self.prefixed(key);
        let backend = self.backend(scope);

        if let Some(existing) = backend.read(&storage_key).await? {
            backend.write(&storage_key, random_filler(existing.len())).await?;
            backend.delete(&storage_key).await?;
            debug!(key, ?scope, "removed entry");
        }
        Ok(())
    }

    /// Remove every entry under the store's prefix in the given scope.
    pub async fn clear_all(&self, scope: StorageScope) -> Result<(), StoreError> {
        let backend = self.backend(scope);
        let prefix = &self.config.key_prefix;

        let mut cleared = 0usize;
        for storage_key in backend.keys().await? {
            if !storage_key.starts_with(prefix.as_str()) {
                continue;
            }
            if let Some(existing) = backend.read(&storage_key).await? {
                backend.write(&storage_key, random_filler(existing.len())).await?;
            }
            backend.delete(&storage_key).await?;
            cleared += 1;
        }
        debug!(?scope, cleared, "cleared scope");
        Ok(())
    }

    /// Bytes currently stored under the prefix in the given scope.
    pub async fn used_bytes(&self, scope: StorageScope) -> Result<usize, StoreError> {
        self.backend(scope).used_bytes(&self.config.key_prefix).await
    }
}

fn random_filler(len: usize) -> String {
    let mut bytes = vec![0u8; len.max(1)];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    // Stay within printable ASCII so any backend can hold the filler.
    bytes.iter().map(|b| char::from(b'!' + (b % 94))).collect()
}
