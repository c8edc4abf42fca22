//! Secret storage abstraction.
//!
//! This module provides:
//! - [`Secret`] - A wrapper for sensitive values that prevents accidental logging
//! - [`SecretStore`] - Trait for key-value backends with atomic multi-key writes
//! - [`WriteBatch`] - A set of puts and deletes committed as one unit
//! - [`MemoryStore`] - In-memory implementation for testing
//! - [`EncryptedFileStore`] - ChaCha20-Poly1305 encrypted file backend
//! - [`KeySource`] - Where the encryption key comes from
//! - [`create_store`] - Opens the default encrypted store, failing closed
//!
//! # Storage Key Convention
//!
//! Session keys live under the `sessionkit/session/` namespace, one key per
//! persisted field (see [`crate::cache`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use sessionkit_core::store::{MemoryStore, Secret, SecretStore, WriteBatch};
//!
//! let store = MemoryStore::new();
//! let batch = WriteBatch::new()
//!     .put("sessionkit/session/id_token", Secret::new("eyJ..."))
//!     .delete("sessionkit/session/access_token");
//! store.apply(batch).await.unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

mod encrypted;
mod key;
mod memory;

pub use encrypted::EncryptedFileStore;
#[cfg(feature = "keyring-store")]
pub use key::KeyringKeySource;
pub use key::{KeySource, StaticKeySource, StorageKey};
pub use memory::MemoryStore;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value,
/// and the backing buffer is wiped when the secret is dropped.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Consume the secret and return the inner value.
    pub fn into_inner(mut self) -> String {
        std::mem::take(&mut self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error type for secret store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested secret was not found.
    #[error("secret not found: {key}")]
    NotFound { key: String },

    /// Access to the secret was denied.
    #[error("access denied to secret: {key}")]
    AccessDenied { key: String },

    /// The storage backend encountered an error.
    #[error("backend error: {message}")]
    BackendError { message: String },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Encryption key material could not be established.
    ///
    /// Stores refuse to persist anything in this state.
    #[error("encryption key unavailable: {message}")]
    KeyUnavailable { message: String },

    /// Encrypting or decrypting a value failed.
    #[error("encryption error: {message}")]
    Encryption { message: String },

    /// A record without an identity token was offered for storage.
    #[error("refusing to store a credential record without an identity token")]
    EmptyIdentityToken,

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: String, value: Secret },
    Delete { key: String },
}

impl WriteOp {
    pub fn key(&self) -> &str {
        match self {
            WriteOp::Put { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// An ordered set of mutations that a [`SecretStore`] commits atomically.
///
/// Either every operation becomes visible or none does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a put operation.
    pub fn put(mut self, key: impl Into<String>, value: Secret) -> Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value,
        });
        self
    }

    /// Add a delete operation. Deleting a missing key is not an error.
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Abstraction over secret storage backends.
///
/// Implementations include:
/// - [`MemoryStore`] - In-memory storage for testing
/// - [`EncryptedFileStore`] - Encrypted file, committed by atomic rename
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Retrieve a secret by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist.
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError>;

    /// Read every entry whose key starts with `prefix` as one consistent view.
    ///
    /// A concurrent [`apply`](SecretStore::apply) is either fully visible in
    /// the result or not at all.
    async fn snapshot(&self, prefix: &str) -> Result<HashMap<String, Secret>, StoreError>;

    /// Commit all operations in `batch` as a single unit.
    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Store a secret at the given key.
    ///
    /// Overwrites any existing value.
    async fn set(&self, key: &str, secret: &Secret) -> Result<(), StoreError> {
        self.apply(WriteBatch::new().put(key, secret.clone())).await
    }

    /// Delete a secret by key.
    ///
    /// Returns `Ok(())` even if the key didn't exist.
    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.apply(WriteBatch::new().delete(key)).await
    }
}

#[async_trait]
impl<T: SecretStore + ?Sized> SecretStore for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        (**self).get(key).await
    }

    async fn snapshot(&self, prefix: &str) -> Result<HashMap<String, Secret>, StoreError> {
        (**self).snapshot(prefix).await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        (**self).apply(batch).await
    }
}

/// Open the default persistent store at `path`.
///
/// Key material comes from the OS keyring under `keyring_service` when the
/// `keyring-store` feature is enabled. There is no plaintext or memory-only
/// fallback: if the key cannot be established the error is returned and the
/// caller gets no store at all.
pub fn create_store(path: &Path, keyring_service: &str) -> Result<EncryptedFileStore, StoreError> {
    #[cfg(feature = "keyring-store")]
    {
        let source = KeyringKeySource::new(keyring_service);
        match EncryptedFileStore::open(path, &source) {
            Ok(store) => {
                tracing::info!("Using encrypted session store at {:?}", path);
                Ok(store)
            }
            Err(e) => {
                tracing::error!(
                    "Encrypted session store unavailable ({}); credentials will not be persisted",
                    e
                );
                Err(e)
            }
        }
    }

    #[cfg(not(feature = "keyring-store"))]
    {
        let _ = path;
        tracing::error!(
            "No key source for keyring service {} (keyring-store feature disabled); \
             credentials will not be persisted",
            keyring_service
        );
        Err(StoreError::KeyUnavailable {
            message: "keyring-store feature not enabled".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let secret = Secret::new("super-secret");
        let debug = format!("{:?}", secret);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_secret_display_redacted() {
        let secret = Secret::new("super-secret");
        let display = format!("{}", secret);
        assert!(!display.contains("super-secret"));
        assert!(display.contains("REDACTED"));
    }

    #[test]
    fn test_secret_into_inner() {
        let secret = Secret::new("value");
        assert_eq!(secret.into_inner(), "value");
    }

    #[test]
    fn test_write_batch_keeps_order() {
        let batch = WriteBatch::new()
            .put("a", Secret::new("1"))
            .delete("b")
            .put("c", Secret::new("3"));

        let keys: Vec<&str> = batch.ops().iter().map(WriteOp::key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn test_arc_store_delegates() {
        let store = Arc::new(MemoryStore::new());
        store.set("k", &Secret::new("v")).await.unwrap();

        let shared = Arc::clone(&store);
        assert_eq!(shared.get("k").await.unwrap(), Some(Secret::new("v")));

        shared.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
