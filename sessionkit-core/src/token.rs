//! Token lifecycle tracking.
//!
//! This module provides:
//! - [`Clock`] - Wall-clock source, swappable in tests ([`ManualClock`])
//! - [`IdTokenClaims`] - The identity-token payload fields sessionkit reads
//! - [`decode_claims`] - Strict payload decoding
//! - [`TokenLifecycle`] - Expiry extraction and expiry checks

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::SessionError;
use crate::model::UserProfile;

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Claims read from an identity token payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct IdTokenClaims {
    pub sub: Option<String>,
    /// Expiry, seconds since the epoch.
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    /// Hosted domain of the account.
    pub hd: Option<String>,
}

impl IdTokenClaims {
    /// Build a profile from the claims. Requires `sub`.
    pub fn to_profile(&self) -> Result<UserProfile, SessionError> {
        let id = self
            .sub
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SessionError::TokenParse {
                message: "identity token has no subject".to_string(),
            })?;

        Ok(UserProfile {
            id,
            display_name: self.name.clone(),
            email: self.email.clone(),
            photo_url: self.picture.clone(),
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
        })
    }
}

/// Decode the payload segment of a JWT.
///
/// The signature is not verified; that is the relying party's job.
pub fn decode_claims(token: &str) -> Result<IdTokenClaims, SessionError> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(SessionError::TokenParse {
                message: "expected three dot-separated segments".to_string(),
            });
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| SessionError::TokenParse {
            message: format!("payload is not base64url: {}", e),
        })?;

    serde_json::from_slice(&bytes).map_err(|e| SessionError::TokenParse {
        message: format!("payload is not a JSON claims object: {}", e),
    })
}

#[derive(Debug, Clone, Copy)]
struct Issuance {
    issued_at: DateTime<Utc>,
    expires_at_ms: Option<i64>,
}

/// Tracks issued tokens and answers expiry questions.
///
/// A missing expiry is always treated as expired.
#[derive(Debug)]
pub struct TokenLifecycle {
    clock: Arc<dyn Clock>,
    /// Tokens are treated as expired this long before their `exp`.
    skew: Duration,
    last: Mutex<Option<Issuance>>,
}

impl TokenLifecycle {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            skew: Duration::zero(),
            last: Mutex::new(None),
        }
    }

    pub fn with_skew(mut self, skew: Duration) -> Self {
        self.skew = skew;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// Record a newly issued identity token and return its expiry in epoch
    /// milliseconds, if the token carries one.
    ///
    /// Malformed or non-JWT tokens yield `None`; this never fails.
    pub fn record_issuance(&self, id_token: &str) -> Option<i64> {
        let expires_at_ms = match decode_claims(id_token) {
            Ok(claims) => claims.exp.and_then(|exp| exp.checked_mul(1000)),
            Err(e) => {
                tracing::debug!("Issued token has no readable expiry: {}", e);
                None
            }
        };

        *self.last.lock() = Some(Issuance {
            issued_at: self.clock.now(),
            expires_at_ms,
        });
        expires_at_ms
    }

    /// `now + skew`, or `None` if that leaves chrono's range.
    fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.clock.now().checked_add_signed(self.skew)
    }

    /// Whether a token with this expiry should no longer be used.
    ///
    /// A skew that pushes the cutoff out of range counts as expired.
    pub fn is_expired(&self, expires_at_ms: Option<i64>) -> bool {
        match (expires_at_ms, self.cutoff()) {
            (Some(exp), Some(cutoff)) => cutoff.timestamp_millis() >= exp,
            _ => true,
        }
    }

    /// Time left before expiry, or `None` if expired or unknown.
    pub fn remaining(&self, expires_at_ms: Option<i64>) -> Option<Duration> {
        let exp = DateTime::from_timestamp_millis(expires_at_ms?)?;
        let left = exp.signed_duration_since(self.cutoff()?);
        (left > Duration::zero()).then_some(left)
    }

    /// Expiry of the most recently recorded token.
    pub fn last_expiry(&self) -> Option<i64> {
        self.last.lock().and_then(|i| i.expires_at_ms)
    }

    /// When the most recently recorded token was seen.
    pub fn last_issued_at(&self) -> Option<DateTime<Utc>> {
        self.last.lock().map(|i| i.issued_at)
    }

    /// Forget the last issuance (sign-out).
    pub fn reset(&self) {
        *self.last.lock() = None;
    }
}

impl Default for TokenLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
