//! Command implementations.
//!
//! Each command renders its output to a `String` so `main` only decides
//! where it goes.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sessionkit_core::{
    ConfigResolver, ConfigureOptions, CredentialCache, SecretStore, TokenLifecycle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// What `status` reports about the persisted session.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub signed_in: bool,
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

pub fn check_config(
    resolver: &ConfigResolver,
    options: ConfigureOptions,
    format: OutputFormat,
) -> Result<String> {
    let config = resolver
        .resolve(options)
        .context("configuration is not valid")?;

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&config)?),
        OutputFormat::Text => {
            let mut out = format!("Client ID: {}\nMode: {}", config.client_id, config.mode);
            if let Some(domain) = &config.hosted_domain {
                out.push_str(&format!("\nHosted domain: {}", domain));
            }
            if !config.scopes.is_empty() {
                out.push_str(&format!("\nScopes: {}", config.scopes.join(" ")));
            }
            Ok(out)
        }
    }
}

pub async fn status<S: SecretStore>(
    cache: &CredentialCache<S>,
    lifecycle: &TokenLifecycle,
    format: OutputFormat,
) -> Result<String> {
    let entry = cache
        .entry()
        .await
        .context("failed to load the persisted session")?;

    let report = match entry {
        Some(entry) => StatusReport {
            signed_in: entry.signed_in,
            expired: lifecycle.is_expired(entry.record.expires_at_ms),
            expires_at: entry.record.expires_at(),
            user_id: Some(entry.record.user.id),
            email: entry.record.user.email,
            display_name: entry.record.user.display_name,
        },
        None => StatusReport {
            signed_in: false,
            user_id: None,
            email: None,
            display_name: None,
            expires_at: None,
            expired: true,
        },
    };

    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => Ok(render_status(&report)),
    }
}

fn render_status(report: &StatusReport) -> String {
    let Some(user_id) = &report.user_id else {
        return "Not signed in".to_string();
    };

    let mut out = format!("Signed in: {}\nUser: {}", report.signed_in, user_id);
    if let Some(email) = &report.email {
        out.push_str(&format!(" <{}>", email));
    }
    match report.expires_at {
        Some(at) if report.expired => out.push_str(&format!("\nExpired at: {}", at.to_rfc3339())),
        Some(at) => out.push_str(&format!("\nExpires at: {}", at.to_rfc3339())),
        None => out.push_str("\nExpiry: unknown (treated as expired)"),
    }
    out
}

/// The cached identity token, if one is present and fresh.
pub async fn token<S: SecretStore>(
    cache: &CredentialCache<S>,
    lifecycle: &TokenLifecycle,
) -> Result<String> {
    let record = cache
        .get()
        .await
        .context("failed to load the persisted session")?;

    match record {
        Some(record) if !lifecycle.is_expired(record.expires_at_ms) => {
            Ok(record.id_token.expose().to_string())
        }
        Some(_) => bail!("cached identity token is expired; sign in again from the application"),
        None => bail!("not signed in"),
    }
}

pub async fn clear<S: SecretStore>(cache: &CredentialCache<S>) -> Result<String> {
    let had_session = cache.entry().await?.is_some();
    cache
        .clear()
        .await
        .context("failed to remove the persisted session")?;

    Ok(if had_session {
        "Session cleared".to_string()
    } else {
        "No session to clear".to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessionkit_core::{CredentialRecord, ManualClock, MemoryStore, UserProfile};
    use std::sync::Arc;

    fn lifecycle() -> TokenLifecycle {
        TokenLifecycle::with_clock(Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        )))
    }

    async fn signed_in_cache(expires_at_ms: i64) -> CredentialCache<MemoryStore> {
        let user = UserProfile::new("user-1").with_email("u@example.com");
        let cache = CredentialCache::new(MemoryStore::new());
        cache
            .put(CredentialRecord::new("id-token", user).with_expiry_ms(expires_at_ms))
            .await
            .unwrap();
        cache
    }

    #[test]
    fn test_check_config_text() {
        let options = ConfigureOptions::with_client_id("12345-abc.apps.example.com")
            .hosted_domain("example.com");
        let out = check_config(&ConfigResolver::default(), options, OutputFormat::Text).unwrap();

        assert!(out.contains("Client ID: 12345-abc.apps.example.com"));
        assert!(out.contains("Mode: auto"));
        assert!(out.contains("Hosted domain: example.com"));
    }

    #[test]
    fn test_check_config_rejects_bad_id() {
        let err = check_config(
            &ConfigResolver::default(),
            ConfigureOptions::with_client_id("not-a-client"),
            OutputFormat::Text,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("invalid configuration"));
    }

    #[tokio::test]
    async fn test_status_json() {
        let cache = signed_in_cache(1_700_003_600_000).await;
        let out = status(&cache, &lifecycle(), OutputFormat::Json).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(json["signed_in"], true);
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["expired"], false);
        assert!(!out.contains("id-token"));
    }

    #[tokio::test]
    async fn test_status_not_signed_in() {
        let cache = CredentialCache::new(MemoryStore::new());
        let out = status(&cache, &lifecycle(), OutputFormat::Text).await.unwrap();
        assert_eq!(out, "Not signed in");
    }

    #[tokio::test]
    async fn test_token_fresh_and_expired() {
        let fresh = signed_in_cache(1_700_003_600_000).await;
        assert_eq!(token(&fresh, &lifecycle()).await.unwrap(), "id-token");

        let stale = signed_in_cache(1_699_999_000_000).await;
        let err = token(&stale, &lifecycle()).await.unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn test_clear_twice() {
        let cache = signed_in_cache(1_700_003_600_000).await;
        assert_eq!(clear(&cache).await.unwrap(), "Session cleared");
        assert_eq!(clear(&cache).await.unwrap(), "No session to clear");
    }
}
