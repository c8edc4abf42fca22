//! Encryption key material for the persistent store.
//!
//! The key is a 256-bit ChaCha20-Poly1305 key. With the `keyring-store`
//! feature it lives in the platform keyring:
//! - macOS: Keychain
//! - Linux: Secret Service, cached in the kernel keyring
//! - Windows: Credential Manager

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use super::StoreError;

/// A 256-bit key that is wiped from memory on drop.
pub type StorageKey = Zeroizing<[u8; 32]>;

/// Source of the store's encryption key.
pub trait KeySource: Send + Sync {
    /// Return the key, creating and saving one on first use.
    ///
    /// Any failure here means the store must not persist.
    fn load_or_create(&self) -> Result<StorageKey, StoreError>;
}

/// Fixed key supplied by the embedding application.
pub struct StaticKeySource {
    key: StorageKey,
}

impl StaticKeySource {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Decode a base64 key, as stored by [`KeyringKeySource`].
    pub fn from_base64(encoded: &str) -> Result<Self, StoreError> {
        Ok(Self {
            key: decode_key(encoded)?,
        })
    }
}

impl std::fmt::Debug for StaticKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StaticKeySource([REDACTED])")
    }
}

impl KeySource for StaticKeySource {
    fn load_or_create(&self) -> Result<StorageKey, StoreError> {
        Ok(self.key.clone())
    }
}

fn decode_key(encoded: &str) -> Result<StorageKey, StoreError> {
    let bytes = Zeroizing::new(STANDARD.decode(encoded.trim()).map_err(|e| {
        StoreError::KeyUnavailable {
            message: format!("stored key is not valid base64: {}", e),
        }
    })?);
    if bytes.len() != 32 {
        return Err(StoreError::KeyUnavailable {
            message: format!("stored key has length {}, expected 32", bytes.len()),
        });
    }
    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&bytes);
    Ok(key)
}

#[cfg(feature = "keyring-store")]
pub use keyring_source::KeyringKeySource;

#[cfg(feature = "keyring-store")]
mod keyring_source {
    use chacha20poly1305::ChaCha20Poly1305;
    use chacha20poly1305::aead::{KeyInit, OsRng};
    use keyring::Entry;

    use super::*;

    const KEY_ENTRY_USER: &str = "storage-key";

    /// Keeps the storage key in the OS keyring.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use sessionkit_core::store::{EncryptedFileStore, KeyringKeySource};
    ///
    /// let source = KeyringKeySource::new("sessionkit");
    /// let store = EncryptedFileStore::open(&path, &source)?;
    /// ```
    #[derive(Debug, Clone)]
    pub struct KeyringKeySource {
        service_name: String,
    }

    impl KeyringKeySource {
        pub fn new(service_name: impl Into<String>) -> Self {
            Self {
                service_name: service_name.into(),
            }
        }

        pub fn service_name(&self) -> &str {
            &self.service_name
        }

        fn entry(&self) -> Result<Entry, StoreError> {
            Entry::new(&self.service_name, KEY_ENTRY_USER).map_err(|e| {
                StoreError::KeyUnavailable {
                    message: format!("keyring backend not available: {}", e),
                }
            })
        }
    }

    impl KeySource for KeyringKeySource {
        fn load_or_create(&self) -> Result<StorageKey, StoreError> {
            let entry = self.entry()?;

            match entry.get_password() {
                Ok(encoded) => return decode_key(&encoded),
                Err(keyring::Error::NoEntry) => {}
                Err(e) => {
                    return Err(StoreError::KeyUnavailable {
                        message: format!("failed to read storage key: {}", e),
                    });
                }
            }

            tracing::info!("Generating new storage key in keyring service {}", self.service_name);
            let generated = ChaCha20Poly1305::generate_key(&mut OsRng);
            let encoded = Zeroizing::new(STANDARD.encode(generated.as_slice()));
            entry
                .set_password(&encoded)
                .map_err(|e| StoreError::KeyUnavailable {
                    message: format!("failed to save storage key: {}", e),
                })?;

            // Read back through a new entry: some backends only keep the
            // value on the entry object that wrote it.
            let fresh = self.entry()?;
            verify_persisted(&encoded, || fresh.get_password())
        }
    }

    /// Confirm a freshly written key reads back unchanged.
    pub(super) fn verify_persisted(
        expected: &str,
        read: impl FnOnce() -> keyring::Result<String>,
    ) -> Result<StorageKey, StoreError> {
        match read() {
            Ok(stored) if stored == expected => decode_key(&stored),
            Ok(_) => Err(StoreError::KeyUnavailable {
                message: "storage key changed while being created".to_string(),
            }),
            Err(e) => Err(StoreError::KeyUnavailable {
                message: format!("storage key did not persist: {}", e),
            }),
        }
    }
}
