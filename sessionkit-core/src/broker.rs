//! Boundary with the OS credential broker.
//!
//! The broker owns all account-picker UI and talks to the identity provider.
//! Platform adapters implement [`CredentialBroker`]; sessionkit only sees the
//! request/response contract below. Each callback-style platform call is
//! expected to surface as a single `async` call with one success and one
//! failure result.

use async_trait::async_trait;
use thiserror::Error;

use crate::model::UserProfile;
use crate::store::Secret;

/// Cancellation messages the broker is known to raise even after the user
/// completed consent.
const SPURIOUS_CANCEL_SIGNATURES: &[&str] = &[
    "account reauth failed",
    "[16]",
    "activity is cancelled by the user",
];

/// A credential request sent to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialRequest {
    /// No UI; restricted to accounts the user already authorized.
    Silent {
        server_client_id: String,
        filter_to_authorized_accounts_only: bool,
    },

    /// May present an account picker or consent UI.
    Interactive {
        server_client_id: String,
        hosted_domain: Option<String>,
        scopes: Vec<String>,
    },
}

impl CredentialRequest {
    pub fn server_client_id(&self) -> &str {
        match self {
            CredentialRequest::Silent {
                server_client_id, ..
            }
            | CredentialRequest::Interactive {
                server_client_id, ..
            } => server_client_id,
        }
    }

    pub fn is_interactive(&self) -> bool {
        matches!(self, CredentialRequest::Interactive { .. })
    }
}

/// An identity-token credential returned by the broker.
#[derive(Debug, Clone)]
pub struct BrokerCredential {
    pub id_token: Secret,

    /// Absent when the broker cannot mint access tokens.
    pub access_token: Option<Secret>,

    /// Profile fields reported alongside the token. When absent the profile
    /// is derived from the token's claims.
    pub profile: Option<UserProfile>,
}

impl BrokerCredential {
    pub fn new(id_token: impl Into<String>) -> Self {
        Self {
            id_token: Secret::new(id_token),
            access_token: None,
            profile: None,
        }
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(Secret::new(access_token));
        self
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }
}

/// Failures reported by the broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("user cancelled{}", cancel_detail(.message))]
    UserCancelled {
        message: Option<String>,
        possibly_spurious: bool,
    },

    #[error("no credential available: {message}")]
    NoCredentialAvailable { message: String },

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("{message}")]
    Unknown { message: String },
}

fn cancel_detail(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {}", m))
        .unwrap_or_default()
}

impl BrokerError {
    /// Build a cancellation, flagging messages that match a known broker quirk.
    pub fn cancelled(message: Option<String>) -> Self {
        let possibly_spurious = message.as_deref().is_some_and(|m| {
            let lower = m.to_ascii_lowercase();
            SPURIOUS_CANCEL_SIGNATURES.iter().any(|sig| lower.contains(sig))
        });
        BrokerError::UserCancelled {
            message,
            possibly_spurious,
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        BrokerError::Unknown {
            message: message.into(),
        }
    }
}

/// The OS-level credential broker.
///
/// Implementations must run blocking IPC or network work off the caller's
/// thread (for example with `tokio::task::spawn_blocking`).
#[async_trait]
pub trait CredentialBroker: Send + Sync {
    /// Request a credential.
    async fn get_credential(
        &self,
        request: &CredentialRequest,
    ) -> Result<BrokerCredential, BrokerError>;

    /// Clear the broker's own stored credential state.
    ///
    /// Called on sign-out; failures are logged and ignored.
    async fn clear_credential_state(&self) -> Result<(), BrokerError>;

    /// Whether the broker service is installed and usable.
    async fn is_available(&self) -> Result<bool, BrokerError> {
        Ok(true)
    }

    /// Whether a foreground surface exists to host interactive UI.
    fn can_present_ui(&self) -> bool {
        true
    }
}
