//! # Sessionkit Core
//!
//! Authentication session lifecycle on top of an OS credential broker.
//!
//! This crate provides:
//! - Configuration resolution and validation for the identity-provider client
//! - A retry policy that classifies broker failures before retrying them
//! - An in-memory credential cache mirrored to encrypted key-value storage
//! - Token expiry tracking
//! - [`SessionManager`], the sign-in state machine tying these together
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sessionkit_core::{AuthSession, ConfigureOptions, SessionManager, SessionSettings, create_store};
//!
//! async fn id_token(broker: impl CredentialBroker) -> Result<String, Box<dyn std::error::Error>> {
//!     let settings = SessionSettings::load()?;
//!     let store = create_store(&settings.session_path()?, &settings.keyring_service)?;
//!     let manager = SessionManager::from_settings(broker, store, &settings)?;
//!
//!     manager
//!         .configure(ConfigureOptions::with_client_id("12345-abc.apps.example.com"))
//!         .await?;
//!     manager.sign_in().await?;
//!
//!     let tokens = manager.get_tokens().await?;
//!     Ok(tokens.id_token.expose().to_string())
//! }
//! ```

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod retry;
pub mod session;
pub mod settings;
pub mod store;
pub mod token;

// Re-export commonly used types at crate root
pub use model::{
    AcquisitionMode,
    CacheEntry,
    CredentialRecord,
    SignInOutcome,
    Tokens,
    UserProfile,
};

pub use store::{
    EncryptedFileStore,
    KeySource,
    MemoryStore,
    Secret,
    SecretStore,
    StaticKeySource,
    StoreError,
    WriteBatch,
    create_store,
};

#[cfg(feature = "keyring-store")]
pub use store::KeyringKeySource;

pub use broker::{
    BrokerCredential,
    BrokerError,
    CredentialBroker,
    CredentialRequest,
};

pub use config::{
    ConfigResolver,
    ConfigureOptions,
    DescriptorSource,
    SessionConfig,
};

pub use retry::{
    RetryBudget,
    RetryPolicy,
};

pub use token::{
    Clock,
    ManualClock,
    SystemClock,
    TokenLifecycle,
};

pub use cache::CredentialCache;

pub use session::{
    AuthSession,
    SessionManager,
    SignInState,
};

pub use settings::{
    SessionSettings,
    SettingsError,
};

pub use error::{
    ErrorKind,
    SessionError,
};
