//! Top-level error types for sessionkit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::broker::BrokerError;
use crate::retry::{FailureClass, classify};
use crate::settings::SettingsError;
use crate::store::StoreError;

/// Error type for every session operation.
///
/// `Cancelled` is a terminal outcome rather than a failure; operations with
/// a tagged result (such as sign-in) report it through the tag instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation that needs a configuration ran before `configure`.
    #[error("session is not configured; call configure first")]
    NotConfigured,

    /// Client id, domain, scope or descriptor failed validation.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// No foreground surface is available to present broker UI.
    #[error("no foreground surface available for interactive sign-in")]
    NoActivityContext,

    /// The user (or the broker on the user's behalf) cancelled.
    #[error("sign-in cancelled{}", spurious_suffix(.possibly_spurious))]
    Cancelled { possibly_spurious: bool },

    /// The broker has no credential for this client.
    #[error("no credential available: {message}")]
    NoCredentialAvailable { message: String },

    /// The broker reports the identity-provider setup is wrong.
    #[error("broker configuration error: {message}")]
    BrokerConfiguration { message: String },

    /// A retryable broker failure that outlasted the retry budget.
    #[error("transient broker error: {message}")]
    TransientBroker { message: String },

    /// A broker failure that matched no known signature.
    #[error("broker failure: {message}")]
    BrokerFailure { message: String },

    /// The issued identity token could not be decoded.
    #[error("malformed identity token: {message}")]
    TokenParse { message: String },

    /// No session is cached and none could be acquired silently.
    #[error("not signed in")]
    NotSignedIn,

    /// The interactive broker call exceeded the configured timeout.
    #[error("interactive sign-in timed out after {after_ms} ms")]
    TimedOut { after_ms: u64 },

    /// `configure` was called while an acquisition was running.
    #[error("cannot reconfigure while a sign-in is in flight")]
    AcquisitionInFlight,

    /// Persisting or loading the cached session failed.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The settings file could not be read or parsed.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
}

fn spurious_suffix(possibly_spurious: &bool) -> &'static str {
    if *possibly_spurious {
        " (possibly a broker quirk after consent)"
    } else {
        ""
    }
}

/// Stable, serializable tag for each [`SessionError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConfigured,
    InvalidConfiguration,
    NoActivityContext,
    Cancelled,
    NoCredentialAvailable,
    BrokerConfigurationError,
    TransientBrokerError,
    BrokerFailure,
    TokenParseError,
    NotSignedIn,
    TimedOut,
    AcquisitionInFlight,
    Storage,
    Settings,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotConfigured => ErrorKind::NotConfigured,
            SessionError::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            SessionError::NoActivityContext => ErrorKind::NoActivityContext,
            SessionError::Cancelled { .. } => ErrorKind::Cancelled,
            SessionError::NoCredentialAvailable { .. } => ErrorKind::NoCredentialAvailable,
            SessionError::BrokerConfiguration { .. } => ErrorKind::BrokerConfigurationError,
            SessionError::TransientBroker { .. } => ErrorKind::TransientBrokerError,
            SessionError::BrokerFailure { .. } => ErrorKind::BrokerFailure,
            SessionError::TokenParse { .. } => ErrorKind::TokenParseError,
            SessionError::NotSignedIn => ErrorKind::NotSignedIn,
            SessionError::TimedOut { .. } => ErrorKind::TimedOut,
            SessionError::AcquisitionInFlight => ErrorKind::AcquisitionInFlight,
            SessionError::Storage(_) => ErrorKind::Storage,
            SessionError::Settings(_) => ErrorKind::Settings,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        SessionError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

impl From<BrokerError> for SessionError {
    fn from(err: BrokerError) -> Self {
        let class = classify(&err);
        match err {
            BrokerError::UserCancelled {
                possibly_spurious, ..
            } => SessionError::Cancelled { possibly_spurious },
            BrokerError::NoCredentialAvailable { message } => {
                SessionError::NoCredentialAvailable { message }
            }
            BrokerError::Configuration { message } => SessionError::BrokerConfiguration { message },
            BrokerError::Unknown { message } => match class {
                FailureClass::Retryable => SessionError::TransientBroker { message },
                FailureClass::Configuration => SessionError::BrokerConfiguration { message },
                FailureClass::Cancellation | FailureClass::NonRetryable => {
                    SessionError::BrokerFailure { message }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_errors_map_to_kinds() {
        let cases = [
            (BrokerError::cancelled(None), ErrorKind::Cancelled),
            (
                BrokerError::NoCredentialAvailable {
                    message: "none".into(),
                },
                ErrorKind::NoCredentialAvailable,
            ),
            (
                BrokerError::Configuration {
                    message: "bad sha".into(),
                },
                ErrorKind::BrokerConfigurationError,
            ),
            (
                BrokerError::Unknown {
                    message: "Network unreachable".into(),
                },
                ErrorKind::TransientBrokerError,
            ),
            (
                BrokerError::Unknown {
                    message: "something odd".into(),
                },
                ErrorKind::BrokerFailure,
            ),
        ];

        for (broker, kind) in cases {
            assert_eq!(SessionError::from(broker).kind(), kind);
        }
    }

    #[test]
    fn test_cancelled_message_mentions_quirk() {
        let err = SessionError::Cancelled {
            possibly_spurious: true,
        };
        assert!(err.to_string().contains("broker quirk"));

        let err = SessionError::Cancelled {
            possibly_spurious: false,
        };
        assert_eq!(err.to_string(), "sign-in cancelled");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TokenParseError).unwrap();
        assert_eq!(json, "\"token_parse_error\"");
    }
}
