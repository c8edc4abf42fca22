//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sessionkit_core::{
    BrokerCredential, BrokerError, CredentialBroker, CredentialRequest, ManualClock, MemoryStore,
    Secret, SecretStore, StoreError, WriteBatch,
};
use tokio::sync::Notify;

pub const CLIENT_ID: &str = "12345-abc.apps.example.com";

/// Build an unsigned JWT with the given claims.
pub fn jwt(claims: serde_json::Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

/// A JWT for `sub` expiring `ttl_secs` after `now`.
pub fn id_token_for(sub: &str, now: DateTime<Utc>, ttl_secs: i64) -> String {
    jwt(serde_json::json!({
        "sub": sub,
        "email": format!("{}@example.com", sub),
        "name": "Test User",
        "iat": now.timestamp(),
        "exp": now.timestamp() + ttl_secs,
    }))
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(start_time()))
}

type Scripted = Result<BrokerCredential, BrokerError>;

/// Broker that replays queued responses per request kind.
///
/// An exhausted queue answers `NoCredentialAvailable`.
#[derive(Default)]
pub struct ScriptedBroker {
    silent: Mutex<VecDeque<Scripted>>,
    interactive: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<(tokio::time::Instant, CredentialRequest)>>,
    hang_interactive: AtomicBool,
    interactive_gate: Mutex<Option<Arc<Notify>>>,
    no_ui: AtomicBool,
    fail_clear: AtomicBool,
    clear_calls: AtomicU32,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn silent(self, response: Scripted) -> Self {
        self.silent.lock().push_back(response);
        self
    }

    pub fn interactive(self, response: Scripted) -> Self {
        self.interactive.lock().push_back(response);
        self
    }

    pub fn push_silent(&self, response: Scripted) {
        self.silent.lock().push_back(response);
    }

    pub fn push_interactive(&self, response: Scripted) {
        self.interactive.lock().push_back(response);
    }

    pub fn hang_interactive(self) -> Self {
        self.hang_interactive.store(true, Ordering::SeqCst);
        self
    }

    /// Hold each interactive request until `gate` is notified.
    pub fn gate_interactive(self, gate: Arc<Notify>) -> Self {
        *self.interactive_gate.lock() = Some(gate);
        self
    }

    pub fn without_ui(self) -> Self {
        self.no_ui.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_clear(self) -> Self {
        self.fail_clear.store(true, Ordering::SeqCst);
        self
    }

    pub fn requests(&self) -> Vec<CredentialRequest> {
        self.requests.lock().iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn request_times(&self) -> Vec<tokio::time::Instant> {
        self.requests.lock().iter().map(|(at, _)| *at).collect()
    }

    pub fn silent_calls(&self) -> usize {
        self.requests().iter().filter(|r| !r.is_interactive()).count()
    }

    pub fn interactive_calls(&self) -> usize {
        self.requests().iter().filter(|r| r.is_interactive()).count()
    }

    pub fn clear_calls(&self) -> u32 {
        self.clear_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialBroker for ScriptedBroker {
    async fn get_credential(
        &self,
        request: &CredentialRequest,
    ) -> Result<BrokerCredential, BrokerError> {
        self.requests
            .lock()
            .push((tokio::time::Instant::now(), request.clone()));

        if request.is_interactive() && self.hang_interactive.load(Ordering::SeqCst) {
            return std::future::pending().await;
        }

        let gate = self.interactive_gate.lock().clone();
        if let (true, Some(gate)) = (request.is_interactive(), gate) {
            gate.notified().await;
        }

        let next = if request.is_interactive() {
            self.interactive.lock().pop_front()
        } else {
            self.silent.lock().pop_front()
        };
        next.unwrap_or_else(|| {
            Err(BrokerError::NoCredentialAvailable {
                message: "no scripted response".to_string(),
            })
        })
    }

    async fn clear_credential_state(&self) -> Result<(), BrokerError> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_clear.load(Ordering::SeqCst) {
            Err(BrokerError::unknown("broker service unavailable"))
        } else {
            Ok(())
        }
    }

    fn can_present_ui(&self) -> bool {
        !self.no_ui.load(Ordering::SeqCst)
    }
}

/// Store whose batch commits can be made to fail, as if interrupted.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    fail_apply: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_apply: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_apply.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Secret>, StoreError> {
        self.inner.get(key).await
    }

    async fn snapshot(&self, prefix: &str) -> Result<HashMap<String, Secret>, StoreError> {
        self.inner.snapshot(prefix).await
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(StoreError::BackendError {
                message: "write interrupted".to_string(),
            });
        }
        self.inner.apply(batch).await
    }
}
