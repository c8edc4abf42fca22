//! Encrypted file-backed secret storage.
//!
//! The whole namespace lives in one JSON document. Each value is sealed with
//! ChaCha20-Poly1305 under a random nonce, with the entry's key name as
//! associated data so ciphertexts cannot be swapped between keys.
//!
//! # On-disk format
//!
//! ```json
//! { "version": 1, "entries": { "sessionkit/session/id_token": "<base64 nonce||ciphertext>" } }
//! ```
//!
//! Writes go to a temporary file in the same directory which is then renamed
//! over the original, so a crash mid-write leaves the previous document intact.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use super::{KeySource, Secret, SecretStore, StorageKey, StoreError, WriteBatch, WriteOp};

const NONCE_LEN: usize = 12;
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    entries: BTreeMap<String, String>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Encrypted, file-backed secret store.
///
/// Construction establishes the key first: a store that cannot encrypt
/// never exists, so there is no path that writes plaintext.
pub struct EncryptedFileStore {
    path: PathBuf,
    key: StorageKey,
    /// Serializes read-modify-write cycles within this process.
    io_lock: Mutex<()>,
}

impl EncryptedFileStore {
    /// Open (or prepare to create) the store at `path`.
    pub fn open(path: impl AsRef<Path>, keys: &dyn KeySource) -> Result<Self, StoreError> {
        let key = keys.load_or_create()?;
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Self {
            path,
            key,
            io_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new((&*self.key).into())
    }

    fn seal(&self, key: &str, value: &Secret) -> Result<String, StoreError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher()
            .encrypt(
                &nonce,
                Payload {
                    msg: value.expose().as_bytes(),
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Encryption {
                message: format!("failed to encrypt {}", key),
            })?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(nonce.as_slice());
        combined.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(combined))
    }

    fn open_value(&self, key: &str, sealed: &str) -> Result<Secret, StoreError> {
        let combined = STANDARD.decode(sealed).map_err(|e| StoreError::Encryption {
            message: format!("invalid encoding for {}: {}", key, e),
        })?;
        if combined.len() < NONCE_LEN {
            return Err(StoreError::Encryption {
                message: format!("truncated value for {}", key),
            });
        }

        let (nonce, ciphertext) = combined.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: key.as_bytes(),
                },
            )
            .map_err(|_| StoreError::Encryption {
                message: format!("failed to decrypt {} (wrong key or tampered data)", key),
            })?;

        String::from_utf8(plaintext)
            .map(Secret::new)
            .map_err(|_| StoreError::Encryption {
                message: format!("decrypted value for {} is not UTF-8", key),
            })
    }

    async fn read_document(&self) -> Result<StoreDocument, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let document: StoreDocument = serde_json::from_slice(&bytes)?;
                if document.version != FORMAT_VERSION {
                    return Err(StoreError::BackendError {
                        message: format!("unsupported store version {}", document.version),
                    });
                }
                Ok(document)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreDocument::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, document: StoreDocument) -> Result<(), StoreError> {
        let path = self.path.clone();
        let contents = serde_json::to_vec_pretty(&document)?;

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let mut temp = NamedTempFile::new_in(dir)?;
            temp.write_all(&contents)?;
            temp.as_file().sync_all()?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                temp.as_file()
                    .set_permissions(std::fs::Permissions::from_mode(0o600))?;
            }

            temp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::BackendError {
            message: format!("store writer task failed: {}", e),
        })?
    }
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SecretStore for EncryptedFileStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        let document = self.read_document().await?;
        document
            .entries
            .get(key)
            .map(|sealed| self.open_value(key, sealed))
            .transpose()
    }

    async fn snapshot(&self, prefix: &str) -> Result<HashMap<String, Secret>, StoreError> {
        let document = self.read_document().await?;
        document
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, sealed)| Ok((k.clone(), self.open_value(k, sealed)?)))
            .collect()
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let _guard = self.io_lock.lock().await;
        let mut document = self.read_document().await?;

        for op in batch.ops() {
            match op {
                WriteOp::Put { key, value } => {
                    let sealed = self.seal(key, value)?;
                    document.entries.insert(key.clone(), sealed);
                }
                WriteOp::Delete { key } => {
                    document.entries.remove(key);
                }
            }
        }

        self.write_document(document).await?;
        tracing::debug!("Committed {} store operations to {:?}", batch.len(), self.path);
        Ok(())
    }
}
