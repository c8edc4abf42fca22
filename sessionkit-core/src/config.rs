//! Session configuration resolution.
//!
//! [`ConfigResolver::resolve`] turns caller-supplied [`ConfigureOptions`] into
//! an immutable [`SessionConfig`]. The client id comes from, in order:
//! 1. the explicitly supplied identifier
//! 2. the web client entry of a bundled provider descriptor
//!
//! and resolution fails if neither yields one.
//!
//! # Descriptor format
//!
//! ```json
//! {
//!   "client": [
//!     { "oauth_client": [ { "client_id": "123-abc.apps.googleusercontent.com", "client_type": 3 } ] }
//!   ]
//! }
//! ```

use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::model::AcquisitionMode;

/// `client_type` of the web (server) OAuth client in a descriptor.
const WEB_CLIENT_TYPE: u32 = 3;

/// Scopes accepted without a namespace.
const OPENID_SCOPES: &[&str] = &["openid", "email", "profile"];

pub const DEFAULT_SCOPE_NAMESPACE: &str = "https://www.googleapis.com/auth/";

static CLIENT_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]+-[A-Za-z0-9_]+\.apps\.[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)+$")
        .expect("client id pattern is valid")
});

static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
    )
    .expect("domain pattern is valid")
});

/// Where to look for a bundled provider descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorSource {
    Path(PathBuf),
    Json(String),
}

/// Options passed to `configure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureOptions {
    pub client_id: Option<String>,
    pub descriptor: Option<DescriptorSource>,
    pub hosted_domain: Option<String>,
    pub scopes: Vec<String>,
    pub mode: AcquisitionMode,
}

impl ConfigureOptions {
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    pub fn with_descriptor(descriptor: DescriptorSource) -> Self {
        Self {
            descriptor: Some(descriptor),
            ..Self::default()
        }
    }

    pub fn mode(mut self, mode: AcquisitionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn hosted_domain(mut self, domain: impl Into<String>) -> Self {
        self.hosted_domain = Some(domain.into());
        self
    }

    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

/// Resolved, validated session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub client_id: String,
    pub hosted_domain: Option<String>,
    pub scopes: Vec<String>,
    pub mode: AcquisitionMode,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    #[serde(default)]
    client: Vec<DescriptorClient>,
}

#[derive(Debug, Deserialize)]
struct DescriptorClient {
    #[serde(default)]
    oauth_client: Vec<OAuthClientEntry>,
}

#[derive(Debug, Deserialize)]
struct OAuthClientEntry {
    client_id: Option<String>,
    client_type: Option<u32>,
}

/// Validates options and resolves the client id.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    scope_namespace: String,
}

impl ConfigResolver {
    pub fn new(scope_namespace: impl Into<String>) -> Self {
        Self {
            scope_namespace: scope_namespace.into(),
        }
    }

    pub fn scope_namespace(&self) -> &str {
        &self.scope_namespace
    }

    /// Resolve `options` into a configuration. Never contacts the broker.
    pub fn resolve(&self, options: ConfigureOptions) -> Result<SessionConfig, SessionError> {
        let client_id = match options.client_id.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => {
                validate_client_id(&id)?;
                id
            }
            _ => {
                let discovered = match &options.descriptor {
                    Some(source) => discover_client_id(source)?,
                    None => None,
                };
                let id = discovered.ok_or_else(|| {
                    SessionError::invalid(
                        "no client id supplied and none found in a provider descriptor",
                    )
                })?;
                validate_client_id(&id)?;
                tracing::debug!("Discovered client id from provider descriptor");
                id
            }
        };

        let hosted_domain = match options.hosted_domain.map(|d| d.trim().to_string()) {
            Some(domain) if !domain.is_empty() => {
                validate_domain(&domain)?;
                Some(domain)
            }
            _ => None,
        };

        for scope in &options.scopes {
            self.validate_scope(scope)?;
        }

        Ok(SessionConfig {
            client_id,
            hosted_domain,
            scopes: options.scopes,
            mode: options.mode,
        })
    }

    pub fn validate_scope(&self, scope: &str) -> Result<(), SessionError> {
        if OPENID_SCOPES.contains(&scope) {
            return Ok(());
        }
        match scope.strip_prefix(self.scope_namespace.as_str()) {
            Some(rest) if !rest.is_empty() && !rest.contains(char::is_whitespace) => Ok(()),
            _ => Err(SessionError::invalid(format!(
                "scope {:?} is neither an OpenID scope nor under {}",
                scope, self.scope_namespace
            ))),
        }
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new(DEFAULT_SCOPE_NAMESPACE)
    }
}

pub fn validate_client_id(client_id: &str) -> Result<(), SessionError> {
    if CLIENT_ID_PATTERN.is_match(client_id) {
        Ok(())
    } else {
        Err(SessionError::invalid(format!(
            "client id {:?} does not match <project>-<id>.apps.<domain>",
            client_id
        )))
    }
}

pub fn validate_domain(domain: &str) -> Result<(), SessionError> {
    if DOMAIN_PATTERN.is_match(domain) {
        Ok(())
    } else {
        Err(SessionError::invalid(format!(
            "hosted domain {:?} is not a valid hostname",
            domain
        )))
    }
}

/// Read the web client id from a provider descriptor.
///
/// A descriptor path that does not exist yields `Ok(None)`; a descriptor
/// that exists but cannot be parsed is an error.
pub fn discover_client_id(source: &DescriptorSource) -> Result<Option<String>, SessionError> {
    let contents = match source {
        DescriptorSource::Json(json) => json.clone(),
        DescriptorSource::Path(path) => match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No provider descriptor at {:?}", path);
                return Ok(None);
            }
            Err(e) => {
                return Err(SessionError::invalid(format!(
                    "failed to read provider descriptor {:?}: {}",
                    path, e
                )));
            }
        },
    };

    let descriptor: Descriptor = serde_json::from_str(&contents)
        .map_err(|e| SessionError::invalid(format!("malformed provider descriptor: {}", e)))?;

    Ok(descriptor
        .client
        .into_iter()
        .flat_map(|c| c.oauth_client)
        .find(|entry| entry.client_type == Some(WEB_CLIENT_TYPE))
        .and_then(|entry| entry.client_id)
        .filter(|id| !id.is_empty()))
}
