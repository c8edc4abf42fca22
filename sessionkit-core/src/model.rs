//! Domain model types for sessionkit.
//!
//! This module defines the core types used throughout sessionkit:
//! - [`AcquisitionMode`] - Silent, interactive, or silent-then-interactive
//! - [`UserProfile`] - Snapshot of the signed-in user
//! - [`CredentialRecord`] - Everything issued by one successful acquisition
//! - [`CacheEntry`] - A record plus the signed-in flag
//! - [`Tokens`] - The token subset handed to callers
//! - [`SignInOutcome`] - Tagged result of a sign-in

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::store::Secret;

/// How the orchestrator acquires credentials.
///
/// # Examples
///
/// ```
/// use sessionkit_core::AcquisitionMode;
///
/// let mode: AcquisitionMode = "silent".parse().unwrap();
/// assert_eq!(mode, AcquisitionMode::Silent);
/// assert_eq!(AcquisitionMode::default(), AcquisitionMode::Auto);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Only already-authorized accounts, no UI.
    Silent,
    /// Always present the broker UI.
    Interactive,
    /// Silent first, interactive on any silent failure.
    #[default]
    Auto,
}

impl AcquisitionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Silent => "silent",
            AcquisitionMode::Interactive => "interactive",
            AcquisitionMode::Auto => "auto",
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "silent" => Ok(AcquisitionMode::Silent),
            "interactive" => Ok(AcquisitionMode::Interactive),
            "auto" => Ok(AcquisitionMode::Auto),
            other => Err(format!("unknown acquisition mode: {}", other)),
        }
    }
}

/// Snapshot of the authenticated user.
///
/// Only the opaque identifier is guaranteed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Opaque, stable user identifier (the token's `sub`).
    pub id: String,

    pub display_name: Option<String>,

    pub email: Option<String>,

    pub photo_url: Option<String>,

    pub given_name: Option<String>,

    pub family_name: Option<String>,
}

impl UserProfile {
    /// Create a profile with only the identifier set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            photo_url: None,
            given_name: None,
            family_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Credentials issued by one successful acquisition.
///
/// Records are replaced wholesale, never patched field by field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Signed identity token.
    pub id_token: Secret,

    /// Bearer access token, when the broker provides one.
    pub access_token: Option<Secret>,

    pub user: UserProfile,

    /// Expiry in epoch milliseconds, from the identity token's `exp` claim.
    pub expires_at_ms: Option<i64>,
}

impl CredentialRecord {
    pub fn new(id_token: impl Into<String>, user: UserProfile) -> Self {
        Self {
            id_token: Secret::new(id_token),
            access_token: None,
            user,
            expires_at_ms: None,
        }
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(Secret::new(access_token));
        self
    }

    pub fn with_expiry_ms(mut self, expires_at_ms: i64) -> Self {
        self.expires_at_ms = Some(expires_at_ms);
        self
    }

    /// Expiry as a timestamp, if known.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at_ms.and_then(DateTime::from_timestamp_millis)
    }

    pub fn tokens(&self) -> Tokens {
        Tokens {
            id_token: self.id_token.clone(),
            access_token: self.access_token.clone(),
            expires_at_ms: self.expires_at_ms,
        }
    }
}

/// A cached session: the record plus the signed-in flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub record: CredentialRecord,
    pub signed_in: bool,
}

/// Tokens returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    pub id_token: Secret,
    pub access_token: Option<Secret>,
    pub expires_at_ms: Option<i64>,
}

/// Tagged result of a sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// A new record was written to the cache.
    Success(CredentialRecord),

    /// The interaction was cancelled; the cache is unchanged.
    ///
    /// `possibly_spurious` is set when the broker raised a cancellation that
    /// it is known to raise even after the user completed consent.
    Cancelled { possibly_spurious: bool },

    /// The broker had no credential to offer; the cache is unchanged.
    NoCredential,
}

impl SignInOutcome {
    /// Stable tag for bridges that report results as strings.
    pub fn tag(&self) -> &'static str {
        match self {
            SignInOutcome::Success(_) => "success",
            SignInOutcome::Cancelled { .. } => "cancelled",
            SignInOutcome::NoCredential => "no_credential",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SignInOutcome::Success(_))
    }
}
