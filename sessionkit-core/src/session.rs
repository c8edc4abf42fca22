//! Sign-in orchestration.
//!
//! This module provides [`SessionManager`], the default implementation of
//! [`AuthSession`]. It sequences silent and interactive acquisition
//! according to the configured [`AcquisitionMode`], routes every broker call
//! through the retry policy, and writes successful results through the
//! [`TokenLifecycle`] into the [`CredentialCache`].
//!
//! # Example
//!
//! ```rust,ignore
//! use sessionkit_core::{AuthSession, ConfigureOptions, MemoryStore, SessionManager};
//!
//! let manager = SessionManager::new(my_broker, MemoryStore::new());
//! manager
//!     .configure(ConfigureOptions::with_client_id("12345-abc.apps.example.com"))
//!     .await?;
//!
//! match manager.sign_in().await? {
//!     SignInOutcome::Success(record) => println!("hello {}", record.user.id),
//!     SignInOutcome::Cancelled { .. } => println!("maybe later"),
//!     SignInOutcome::NoCredential => println!("no account on this device"),
//! }
//! ```
//!
//! # Concurrency
//!
//! Acquisitions (sign-in, refresh) are serialized by one async mutex per
//! manager so at most one broker UI is ever presented. Reads of the cache
//! and sign-out never wait on that mutex. A sign-out that lands while an
//! acquisition is in flight invalidates it: the late credential is discarded
//! instead of committed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::broker::{BrokerCredential, CredentialBroker, CredentialRequest};
use crate::cache::CredentialCache;
use crate::config::{ConfigResolver, ConfigureOptions, SessionConfig};
use crate::error::SessionError;
use crate::model::{AcquisitionMode, CredentialRecord, SignInOutcome, Tokens, UserProfile};
use crate::retry::{RetryPolicy, with_retry};
use crate::settings::SessionSettings;
use crate::store::SecretStore;
use crate::token::{Clock, TokenLifecycle, decode_claims};

/// Which broker request is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionKind {
    Silent,
    Interactive,
}

/// How the last acquisition ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Success,
    Cancelled,
    Failed,
}

/// Sign-in state machine.
///
/// `Idle -> Acquiring(Silent) -> Acquiring(Interactive) -> Resolved(..)`.
/// Sign-out returns the machine to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignInState {
    #[default]
    Idle,
    Acquiring(AcquisitionKind),
    Resolved(Resolution),
}

/// Operations exposed to the calling application layer.
#[async_trait]
pub trait AuthSession: Send + Sync {
    /// Resolve and store the session configuration.
    ///
    /// Replaces any previous configuration wholesale. Fails with
    /// [`SessionError::AcquisitionInFlight`] while an acquisition is running.
    async fn configure(&self, options: ConfigureOptions) -> Result<SessionConfig, SessionError>;

    /// Run the sign-in state machine for the configured mode.
    async fn sign_in(&self) -> Result<SignInOutcome, SessionError>;

    /// Cached tokens if still fresh, otherwise a silent re-acquisition.
    async fn get_tokens(&self) -> Result<Tokens, SessionError>;

    /// Force a silent re-acquisition.
    async fn refresh_tokens(&self) -> Result<Tokens, SessionError>;

    /// Whether the cached identity token is expired. No session counts as expired.
    async fn is_token_expired(&self) -> Result<bool, SessionError>;

    async fn get_current_user(&self) -> Result<Option<UserProfile>, SessionError>;

    /// Clear the local session and ask the broker to forget its state.
    ///
    /// Succeeds when there is no session. Broker failures are logged only.
    async fn sign_out(&self) -> Result<(), SessionError>;

    async fn check_broker_availability(&self) -> Result<bool, SessionError>;
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Resets an abandoned acquisition to `Idle` when the future is dropped.
struct StateGuard<'a> {
    state: &'a Mutex<SignInState>,
    resolved: bool,
}

impl<'a> StateGuard<'a> {
    fn new(state: &'a Mutex<SignInState>) -> Self {
        Self {
            state,
            resolved: false,
        }
    }

    fn enter(&self, kind: AcquisitionKind) {
        *self.state.lock() = SignInState::Acquiring(kind);
    }

    fn resolve(mut self, resolution: Resolution) {
        *self.state.lock() = SignInState::Resolved(resolution);
        self.resolved = true;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        let mut state = self.state.lock();
        if matches!(*state, SignInState::Acquiring(_)) {
            debug!("Acquisition abandoned, returning to idle");
            *state = SignInState::Idle;
        }
    }
}

/// Default [`AuthSession`] backed by a [`CredentialBroker`] and a [`SecretStore`].
///
/// Construct one per application and share it by reference.
pub struct SessionManager<B: CredentialBroker, S: SecretStore> {
    broker: B,
    cache: CredentialCache<S>,
    lifecycle: TokenLifecycle,
    retry: RetryPolicy,
    resolver: ConfigResolver,
    interactive_timeout: Option<Duration>,
    config: RwLock<Option<Arc<SessionConfig>>>,
    acquisition: tokio::sync::Mutex<()>,
    state: Mutex<SignInState>,
}

impl<B: CredentialBroker, S: SecretStore> SessionManager<B, S> {
    /// Create a manager with default retry budgets, no timeout and no skew.
    pub fn new(broker: B, store: S) -> Self {
        Self {
            broker,
            cache: CredentialCache::new(store),
            lifecycle: TokenLifecycle::new(),
            retry: RetryPolicy::default(),
            resolver: ConfigResolver::default(),
            interactive_timeout: None,
            config: RwLock::new(None),
            acquisition: tokio::sync::Mutex::new(()),
            state: Mutex::new(SignInState::Idle),
        }
    }

    /// Create a manager tuned by `settings`.
    ///
    /// Fails if a setting is out of range.
    pub fn from_settings(
        broker: B,
        store: S,
        settings: &SessionSettings,
    ) -> Result<Self, SessionError> {
        let mut manager = Self::new(broker, store);
        manager.retry = settings.retry_policy();
        manager.interactive_timeout = settings.interactive_timeout();
        manager.resolver = ConfigResolver::new(settings.scope_namespace.clone());
        manager.lifecycle = TokenLifecycle::new().with_skew(settings.expiry_skew()?);
        Ok(manager)
    }

    /// Use `clock` for expiry checks, keeping the configured skew.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let skew = self.lifecycle.skew();
        self.lifecycle = TokenLifecycle::with_clock(clock).with_skew(skew);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_interactive_timeout(mut self, timeout: Duration) -> Self {
        self.interactive_timeout = Some(timeout);
        self
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn cache(&self) -> &CredentialCache<S> {
        &self.cache
    }

    pub fn lifecycle(&self) -> &TokenLifecycle {
        &self.lifecycle
    }

    pub fn state(&self) -> SignInState {
        *self.state.lock()
    }

    /// The active configuration, if `configure` has succeeded.
    pub fn config(&self) -> Option<Arc<SessionConfig>> {
        self.config.read().clone()
    }

    /// Call when the host process moves to the background.
    ///
    /// Re-writes the in-memory session to the persistent store.
    pub async fn on_background(&self) -> Result<(), SessionError> {
        if self.cache.flush_to_persistent().await? {
            debug!("Flushed session on background transition");
        }
        Ok(())
    }

    fn current_config(&self) -> Result<Arc<SessionConfig>, SessionError> {
        self.config().ok_or(SessionError::NotConfigured)
    }

    async fn acquire_silent(
        &self,
        config: &SessionConfig,
        guard: &StateGuard<'_>,
    ) -> Result<BrokerCredential, SessionError> {
        guard.enter(AcquisitionKind::Silent);
        let request = CredentialRequest::Silent {
            server_client_id: config.client_id.clone(),
            filter_to_authorized_accounts_only: true,
        };

        let broker = &self.broker;
        let request = &request;
        with_retry("silent sign-in", self.retry.silent, move || {
            broker.get_credential(request)
        })
        .await
        .map_err(SessionError::from)
    }

    async fn acquire_interactive(
        &self,
        config: &SessionConfig,
        guard: &StateGuard<'_>,
    ) -> Result<BrokerCredential, SessionError> {
        if !self.broker.can_present_ui() {
            warn!("Interactive sign-in requested with no foreground surface");
            return Err(SessionError::NoActivityContext);
        }

        guard.enter(AcquisitionKind::Interactive);
        let request = CredentialRequest::Interactive {
            server_client_id: config.client_id.clone(),
            hosted_domain: config.hosted_domain.clone(),
            scopes: config.scopes.clone(),
        };

        let broker = &self.broker;
        let request = &request;
        let attempt = with_retry("interactive sign-in", self.retry.interactive, move || {
            broker.get_credential(request)
        });

        match self.interactive_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result.map_err(SessionError::from),
                Err(_) => {
                    warn!("Interactive sign-in timed out after {:?}", limit);
                    Err(SessionError::TimedOut {
                        after_ms: saturating_millis(limit),
                    })
                }
            },
            None => attempt.await.map_err(SessionError::from),
        }
    }

    /// Turn a broker credential into a record and cache it.
    ///
    /// `generation` is the cache generation read before the broker call; if
    /// the session was signed out since, the credential is dropped and the
    /// acquisition reports as cancelled.
    async fn commit(
        &self,
        credential: BrokerCredential,
        generation: u64,
    ) -> Result<CredentialRecord, SessionError> {
        let BrokerCredential {
            id_token,
            access_token,
            profile,
        } = credential;

        if id_token.is_empty() {
            return Err(SessionError::TokenParse {
                message: "broker returned an empty identity token".to_string(),
            });
        }

        let user = match profile {
            Some(profile) => profile,
            None => decode_claims(id_token.expose())?.to_profile()?,
        };
        let expires_at_ms = self.lifecycle.record_issuance(id_token.expose());

        let record = CredentialRecord {
            id_token,
            access_token,
            user,
            expires_at_ms,
        };
        if !self.cache.put_if_generation(record.clone(), generation).await? {
            self.lifecycle.reset();
            info!("Signed out while acquiring, discarding credential for {}", record.user.id);
            return Err(SessionError::Cancelled {
                possibly_spurious: false,
            });
        }
        Ok(record)
    }

    async fn run_sign_in(
        &self,
        config: &SessionConfig,
        guard: &StateGuard<'_>,
    ) -> Result<BrokerCredential, SessionError> {
        match config.mode {
            AcquisitionMode::Silent => self.acquire_silent(config, guard).await,
            AcquisitionMode::Interactive => self.acquire_interactive(config, guard).await,
            AcquisitionMode::Auto => match self.acquire_silent(config, guard).await {
                Ok(credential) => Ok(credential),
                Err(e) => {
                    debug!("Silent sign-in failed ({}), falling back to interactive", e);
                    self.acquire_interactive(config, guard).await
                }
            },
        }
    }

    /// Silent acquisition shared by `get_tokens` and `refresh_tokens`.
    async fn refresh_silently(&self) -> Result<Tokens, SessionError> {
        let _acquiring = self.acquisition.lock().await;
        let config = self.current_config()?;
        let generation = self.cache.generation();
        let guard = StateGuard::new(&self.state);

        let result = match self.acquire_silent(&config, &guard).await {
            Ok(credential) => self.commit(credential, generation).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                guard.resolve(Resolution::Success);
                debug!("Refreshed session silently");
                Ok(record.tokens())
            }
            Err(SessionError::NoCredentialAvailable { message }) => {
                guard.resolve(Resolution::Failed);
                if self.cache.get().await?.is_none() {
                    debug!("No cached session and no silent credential: {}", message);
                    Err(SessionError::NotSignedIn)
                } else {
                    Err(SessionError::NoCredentialAvailable { message })
                }
            }
            Err(e) => {
                guard.resolve(Resolution::Failed);
                warn!("Silent refresh failed: {}", e);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<B: CredentialBroker, S: SecretStore> AuthSession for SessionManager<B, S> {
    async fn configure(&self, options: ConfigureOptions) -> Result<SessionConfig, SessionError> {
        let _idle = self.acquisition.try_lock().map_err(|_| {
            warn!("Rejecting configure while a sign-in is in flight");
            SessionError::AcquisitionInFlight
        })?;

        let config = self.resolver.resolve(options)?;
        info!(
            "Configured session for client {} (mode: {})",
            config.client_id, config.mode
        );
        *self.config.write() = Some(Arc::new(config.clone()));
        Ok(config)
    }

    async fn sign_in(&self) -> Result<SignInOutcome, SessionError> {
        let _acquiring = self.acquisition.lock().await;
        let config = self.current_config()?;
        let generation = self.cache.generation();
        let guard = StateGuard::new(&self.state);

        let result = match self.run_sign_in(&config, &guard).await {
            Ok(credential) => self.commit(credential, generation).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(record) => {
                guard.resolve(Resolution::Success);
                info!("Signed in as {}", record.user.id);
                Ok(SignInOutcome::Success(record))
            }
            Err(SessionError::Cancelled { possibly_spurious }) => {
                // Silent mode has no Cancelled terminal state.
                guard.resolve(match config.mode {
                    AcquisitionMode::Silent => Resolution::Failed,
                    _ => Resolution::Cancelled,
                });
                if possibly_spurious {
                    warn!("Sign-in cancelled with a message the broker also raises after consent");
                } else {
                    info!("Sign-in cancelled");
                }
                Ok(SignInOutcome::Cancelled { possibly_spurious })
            }
            Err(SessionError::NoCredentialAvailable { message }) => {
                guard.resolve(Resolution::Failed);
                info!("No credential available: {}", message);
                Ok(SignInOutcome::NoCredential)
            }
            Err(e) => {
                guard.resolve(Resolution::Failed);
                warn!("Sign-in failed: {}", e);
                Err(e)
            }
        }
    }

    async fn get_tokens(&self) -> Result<Tokens, SessionError> {
        if let Some(record) = self.cache.get().await? {
            if !self.lifecycle.is_expired(record.expires_at_ms) {
                return Ok(record.tokens());
            }
            debug!("Cached identity token is expired, refreshing");
        }
        self.refresh_silently().await
    }

    async fn refresh_tokens(&self) -> Result<Tokens, SessionError> {
        self.refresh_silently().await
    }

    async fn is_token_expired(&self) -> Result<bool, SessionError> {
        Ok(match self.cache.get().await? {
            Some(record) => self.lifecycle.is_expired(record.expires_at_ms),
            None => true,
        })
    }

    async fn get_current_user(&self) -> Result<Option<UserProfile>, SessionError> {
        Ok(self.cache.get().await?.map(|record| record.user))
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        let cleared = self.cache.clear().await;
        self.lifecycle.reset();
        *self.state.lock() = SignInState::Idle;

        if let Err(e) = self.broker.clear_credential_state().await {
            warn!("Broker failed to clear its credential state: {}", e);
        }

        cleared?;
        info!("Signed out");
        Ok(())
    }

    async fn check_broker_availability(&self) -> Result<bool, SessionError> {
        Ok(self.broker.is_available().await?)
    }
}

impl<B, S> std::fmt::Debug for SessionManager<B, S>
where
    B: CredentialBroker,
    S: SecretStore,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("config", &self.config())
            .field("retry", &self.retry)
            .field("interactive_timeout", &self.interactive_timeout)
            .finish_non_exhaustive()
    }
}
