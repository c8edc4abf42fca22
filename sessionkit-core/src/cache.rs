//! Secure credential cache.
//!
//! Holds the active session in memory and mirrors it to a [`SecretStore`].
//! The persisted layout is five keys under [`NAMESPACE`]:
//!
//! | key           | value                          |
//! |---------------|--------------------------------|
//! | `id_token`    | identity token                 |
//! | `access_token`| access token (absent if none)  |
//! | `user`        | JSON-encoded [`UserProfile`]   |
//! | `expires_at`  | epoch millis (absent if none)  |
//! | `signed_in`   | `true`                         |
//!
//! All five are written, or removed, in one [`WriteBatch`].
//!
//! # Locking
//!
//! Writers are serialized by an async mutex held across the store commit.
//! The in-memory copy sits behind a separate short-lived lock that is only
//! swapped after the commit succeeds, so readers never wait on storage I/O
//! and never observe a record that is not also persisted.
//!
//! Every [`CredentialCache::clear`] advances a generation counter under the
//! writer mutex. [`CredentialCache::put_if_generation`] commits only when no
//! clear has happened since the caller read [`CredentialCache::generation`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::model::{CacheEntry, CredentialRecord, UserProfile};
use crate::store::{Secret, SecretStore, StoreError, WriteBatch};

pub const NAMESPACE: &str = "sessionkit/session/";

const FIELD_ID_TOKEN: &str = "id_token";
const FIELD_ACCESS_TOKEN: &str = "access_token";
const FIELD_USER: &str = "user";
const FIELD_EXPIRES_AT: &str = "expires_at";
const FIELD_SIGNED_IN: &str = "signed_in";

const FIELDS: [&str; 5] = [
    FIELD_ID_TOKEN,
    FIELD_ACCESS_TOKEN,
    FIELD_USER,
    FIELD_EXPIRES_AT,
    FIELD_SIGNED_IN,
];

fn key(field: &str) -> String {
    format!("{}{}", NAMESPACE, field)
}

fn encode(entry: &CacheEntry) -> Result<WriteBatch, StoreError> {
    let record = &entry.record;
    let user = serde_json::to_string(&record.user)?;

    let mut batch = WriteBatch::new()
        .put(key(FIELD_ID_TOKEN), record.id_token.clone())
        .put(key(FIELD_USER), Secret::new(user))
        .put(key(FIELD_SIGNED_IN), Secret::new(entry.signed_in.to_string()));

    batch = match &record.access_token {
        Some(token) => batch.put(key(FIELD_ACCESS_TOKEN), token.clone()),
        None => batch.delete(key(FIELD_ACCESS_TOKEN)),
    };
    batch = match record.expires_at_ms {
        Some(ms) => batch.put(key(FIELD_EXPIRES_AT), Secret::new(ms.to_string())),
        None => batch.delete(key(FIELD_EXPIRES_AT)),
    };
    Ok(batch)
}

fn delete_all() -> WriteBatch {
    FIELDS
        .iter()
        .fold(WriteBatch::new(), |batch, field| batch.delete(key(field)))
}

/// Rebuild an entry from persisted fields.
///
/// Anything short of a complete entry reads as "no session".
fn decode(mut fields: HashMap<String, Secret>) -> Option<CacheEntry> {
    let id_token = fields.remove(&key(FIELD_ID_TOKEN)).filter(|t| !t.is_empty())?;

    let user = match fields.remove(&key(FIELD_USER)) {
        Some(raw) => match serde_json::from_str::<UserProfile>(raw.expose()) {
            Ok(user) => user,
            Err(e) => {
                warn!("Persisted user profile is unreadable, ignoring session: {}", e);
                return None;
            }
        },
        None => {
            warn!("Persisted session has a token but no user profile, ignoring it");
            return None;
        }
    };

    let signed_in = match fields.remove(&key(FIELD_SIGNED_IN)) {
        Some(raw) => raw.expose() == "true",
        None => {
            warn!("Persisted session has no signed-in flag, ignoring it");
            return None;
        }
    };

    let expires_at_ms = fields
        .remove(&key(FIELD_EXPIRES_AT))
        .and_then(|raw| raw.expose().parse::<i64>().ok());

    Some(CacheEntry {
        record: CredentialRecord {
            id_token,
            access_token: fields.remove(&key(FIELD_ACCESS_TOKEN)),
            user,
            expires_at_ms,
        },
        signed_in,
    })
}

/// In-memory session with an encrypted persistent mirror.
pub struct CredentialCache<S: SecretStore> {
    store: S,
    memory: RwLock<Option<CacheEntry>>,
    /// Set once memory reflects the store (after a load or any write).
    hydrated: AtomicBool,
    /// Bumped by every clear.
    generation: AtomicU64,
    write_lock: Mutex<()>,
}

impl<S: SecretStore> CredentialCache<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            memory: RwLock::new(None),
            hydrated: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace the cached session with `record`.
    ///
    /// The record is persisted first; memory changes only if that succeeds.
    pub async fn put(&self, record: CredentialRecord) -> Result<(), StoreError> {
        self.put_checked(record, None).await.map(|_| ())
    }

    /// Number of clears so far. Pair with [`Self::put_if_generation`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Like [`Self::put`], but discards `record` if the cache was cleared
    /// after `generation` was read.
    ///
    /// Returns `false` when the record was discarded.
    pub async fn put_if_generation(
        &self,
        record: CredentialRecord,
        generation: u64,
    ) -> Result<bool, StoreError> {
        self.put_checked(record, Some(generation)).await
    }

    async fn put_checked(
        &self,
        record: CredentialRecord,
        generation: Option<u64>,
    ) -> Result<bool, StoreError> {
        if record.id_token.is_empty() {
            return Err(StoreError::EmptyIdentityToken);
        }

        let entry = CacheEntry {
            record,
            signed_in: true,
        };
        let batch = encode(&entry)?;

        let _guard = self.write_lock.lock().await;
        if generation.is_some_and(|seen| seen != self.generation()) {
            debug!("Cache cleared since the record was requested, discarding it");
            return Ok(false);
        }
        if let Err(e) = self.store.apply(batch).await {
            tracing::error!("Failed to persist session, cache left unchanged: {}", e);
            return Err(e);
        }
        *self.memory.write() = Some(entry);
        self.hydrated.store(true, Ordering::Release);

        debug!("Cached new session");
        Ok(true)
    }

    /// A copy of the cached record, loading from the store on first use.
    pub async fn get(&self) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.entry().await?.map(|entry| entry.record))
    }

    /// A copy of the full cache entry, loading from the store on first use.
    pub async fn entry(&self) -> Result<Option<CacheEntry>, StoreError> {
        let cached = self.memory.read().clone();
        if cached.is_some() || self.hydrated.load(Ordering::Acquire) {
            return Ok(cached);
        }

        let _guard = self.write_lock.lock().await;
        if self.hydrated.load(Ordering::Acquire) {
            let cached = self.memory.read().clone();
            return Ok(cached);
        }
        debug!("No session in memory, loading from persistent store");
        self.load_locked().await
    }

    /// Whether memory currently holds a signed-in session. Never touches the store.
    pub fn is_signed_in(&self) -> bool {
        self.memory
            .read()
            .as_ref()
            .is_some_and(|entry| entry.signed_in)
    }

    /// Replace memory with whatever the store holds.
    pub async fn load_from_persistent(&self) -> Result<Option<CacheEntry>, StoreError> {
        let _guard = self.write_lock.lock().await;
        self.load_locked().await
    }

    async fn load_locked(&self) -> Result<Option<CacheEntry>, StoreError> {
        let fields = self.store.snapshot(NAMESPACE).await?;
        let entry = decode(fields);
        *self.memory.write() = entry.clone();
        self.hydrated.store(true, Ordering::Release);
        Ok(entry)
    }

    /// Remove the session from memory and from the store.
    ///
    /// Memory is cleared even if the store delete fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.memory.write() = None;
        self.hydrated.store(true, Ordering::Release);
        self.store.apply(delete_all()).await?;
        debug!("Cleared cached session");
        Ok(())
    }

    /// Write the in-memory session to the store again.
    ///
    /// Returns `false` when there was nothing to flush.
    pub async fn flush_to_persistent(&self) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let cached = self.memory.read().clone();
        match cached {
            Some(entry) => {
                self.store.apply(encode(&entry)?).await?;
                debug!("Flushed session to persistent store");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<S: SecretStore + std::fmt::Debug> std::fmt::Debug for CredentialCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCache")
            .field("store", &self.store)
            .field("signed_in", &self.is_signed_in())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn record(token: &str) -> CredentialRecord {
        CredentialRecord::new(token, UserProfile::new("user-1").with_email("u@example.com"))
            .with_access_token("access")
            .with_expiry_ms(1_700_000_000_000)
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = CredentialCache::new(MemoryStore::new());
        cache.put(record("tok-1")).await.unwrap();

        assert_eq!(cache.get().await.unwrap(), Some(record("tok-1")));
        assert!(cache.is_signed_in());
    }

    #[tokio::test]
    async fn test_put_writes_every_field() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(Arc::clone(&store));
        cache.put(record("tok-1")).await.unwrap();

        let persisted = store.snapshot(NAMESPACE).await.unwrap();
        assert_eq!(persisted.len(), 5);
        assert_eq!(persisted[&key(FIELD_SIGNED_IN)].expose(), "true");
        assert_eq!(persisted[&key(FIELD_EXPIRES_AT)].expose(), "1700000000000");
    }

    #[tokio::test]
    async fn test_replacement_drops_optional_fields() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(Arc::clone(&store));
        cache.put(record("tok-1")).await.unwrap();

        let bare = CredentialRecord::new("tok-2", UserProfile::new("user-1"));
        cache.put(bare.clone()).await.unwrap();

        let persisted = store.snapshot(NAMESPACE).await.unwrap();
        assert!(!persisted.contains_key(&key(FIELD_ACCESS_TOKEN)));
        assert!(!persisted.contains_key(&key(FIELD_EXPIRES_AT)));

        let reloaded = CredentialCache::new(Arc::clone(&store));
        assert_eq!(reloaded.get().await.unwrap(), Some(bare));
    }

    #[tokio::test]
    async fn test_empty_token_rejected() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(Arc::clone(&store));

        let result = cache
            .put(CredentialRecord::new("", UserProfile::new("u")))
            .await;
        assert!(matches!(result, Err(StoreError::EmptyIdentityToken)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_lazy_load_on_first_get() {
        let store = Arc::new(MemoryStore::new());
        CredentialCache::new(Arc::clone(&store))
            .put(record("tok-1"))
            .await
            .unwrap();

        let fresh = CredentialCache::new(Arc::clone(&store));
        assert!(!fresh.is_signed_in());
        assert_eq!(fresh.get().await.unwrap(), Some(record("tok-1")));
        assert!(fresh.is_signed_in());
    }

    #[tokio::test]
    async fn test_incomplete_persisted_entry_reads_as_none() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&key(FIELD_ID_TOKEN), &Secret::new("orphan-token"))
            .await
            .unwrap();

        let cache = CredentialCache::new(Arc::clone(&store));
        assert_eq!(cache.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(Arc::clone(&store));

        cache.clear().await.unwrap();
        cache.put(record("tok-1")).await.unwrap();
        cache.clear().await.unwrap();
        cache.clear().await.unwrap();

        assert_eq!(cache.get().await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_after_clear_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(Arc::clone(&store));

        let seen = cache.generation();
        cache.clear().await.unwrap();
        assert_ne!(cache.generation(), seen);

        assert!(!cache.put_if_generation(record("late"), seen).await.unwrap());
        assert_eq!(cache.get().await.unwrap(), None);
        assert!(store.is_empty());

        let current = cache.generation();
        assert!(cache.put_if_generation(record("tok-1"), current).await.unwrap());
        assert_eq!(cache.get().await.unwrap(), Some(record("tok-1")));
    }

    #[tokio::test]
    async fn test_flush_restores_persistent_copy() {
        let store = Arc::new(MemoryStore::new());
        let cache = CredentialCache::new(Arc::clone(&store));

        assert!(!cache.flush_to_persistent().await.unwrap());

        cache.put(record("tok-1")).await.unwrap();
        // Simulate the persistent copy being lost behind the cache's back.
        store.apply(delete_all()).await.unwrap();

        assert!(cache.flush_to_persistent().await.unwrap());
        let reloaded = CredentialCache::new(Arc::clone(&store));
        assert_eq!(reloaded.get().await.unwrap(), Some(record("tok-1")));
    }
}
