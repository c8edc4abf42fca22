//! Tuning settings loaded from `settings.toml`.
//!
//! Settings cover retry budgets, timeouts, expiry skew and where the
//! encrypted session lives. The session configuration itself (client id,
//! mode, ...) is runtime input to `configure` and is not read from here.
//!
//! # Example
//!
//! ```toml
//! silent_max_retries = 2
//! silent_backoff_ms = 500
//! interactive_timeout_ms = 120000
//! expiry_skew_secs = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::DEFAULT_SCOPE_NAMESPACE;
use crate::retry::{RetryBudget, RetryPolicy};

const SETTINGS_FILE: &str = "settings.toml";
const SESSION_FILE: &str = "session.enc";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings from {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("no home directory available for default paths")]
    DirectoriesUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub silent_max_retries: u32,
    pub interactive_max_retries: u32,

    /// Base backoff for silent retries; retry `n` waits `n * silent_backoff_ms`.
    pub silent_backoff_ms: u64,
    pub interactive_backoff_ms: u64,

    /// Upper bound on one interactive acquisition, retries included.
    pub interactive_timeout_ms: Option<u64>,

    /// Treat tokens as expired this many seconds before `exp`.
    pub expiry_skew_secs: i64,

    /// Directory for the encrypted session file. Defaults to the platform
    /// data directory.
    pub storage_dir: Option<PathBuf>,

    /// Keyring service holding the storage key.
    pub keyring_service: String,

    pub scope_namespace: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            silent_max_retries: retry.silent.max_retries,
            interactive_max_retries: retry.interactive.max_retries,
            silent_backoff_ms: retry.silent.base_delay.as_millis() as u64,
            interactive_backoff_ms: retry.interactive.base_delay.as_millis() as u64,
            interactive_timeout_ms: None,
            expiry_skew_secs: 0,
            storage_dir: None,
            keyring_service: "sessionkit".to_string(),
            scope_namespace: DEFAULT_SCOPE_NAMESPACE.to_string(),
        }
    }
}

impl SessionSettings {
    /// Load from the default location, or defaults if the file is absent.
    pub fn load() -> Result<Self, SettingsError> {
        let path = default_settings_path()?;
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            tracing::debug!("No settings at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Self = toml::from_str(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.expiry_skew().map(|_| ())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            RetryBudget::new(
                self.silent_max_retries,
                Duration::from_millis(self.silent_backoff_ms),
            ),
            RetryBudget::new(
                self.interactive_max_retries,
                Duration::from_millis(self.interactive_backoff_ms),
            ),
        )
    }

    pub fn interactive_timeout(&self) -> Option<Duration> {
        self.interactive_timeout_ms.map(Duration::from_millis)
    }

    pub fn expiry_skew(&self) -> Result<chrono::Duration, SettingsError> {
        chrono::Duration::try_seconds(self.expiry_skew_secs).ok_or_else(|| {
            SettingsError::Invalid {
                field: "expiry_skew_secs",
                message: format!("{} seconds is out of range", self.expiry_skew_secs),
            }
        })
    }

    /// Path of the encrypted session file.
    pub fn session_path(&self) -> Result<PathBuf, SettingsError> {
        let dir = match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => project_dirs()
                .ok_or(SettingsError::DirectoriesUnavailable)?
                .data_dir()
                .to_path_buf(),
        };
        Ok(dir.join(SESSION_FILE))
    }
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    project_dirs()
        .map(|d| d.config_dir().join(SETTINGS_FILE))
        .ok_or(SettingsError::DirectoriesUnavailable)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "sessionkit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_retry_policy() {
        let settings = SessionSettings::default();
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert_eq!(settings.interactive_timeout(), None);
        assert_eq!(settings.expiry_skew().unwrap(), chrono::Duration::zero());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "interactive_timeout_ms = 30000\nstorage_dir = \"/var/lib/app\"\n",
        )
        .unwrap();

        let settings = SessionSettings::load_from_path(&path).unwrap();
        assert_eq!(settings.interactive_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(settings.silent_max_retries, 2);
        assert_eq!(
            settings.session_path().unwrap(),
            PathBuf::from("/var/lib/app/session.enc")
        );
    }

    #[test]
    fn test_parse_error_names_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "silent_max_retries = \"lots\"").unwrap();

        let err = SessionSettings::load_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains("settings.toml"));
    }

    #[test]
    fn test_out_of_range_skew_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "expiry_skew_secs = 9223372036854775807").unwrap();

        let err = SessionSettings::load_from_path(&path).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Invalid {
                field: "expiry_skew_secs",
                ..
            }
        ));

        let settings = SessionSettings {
            expiry_skew_secs: i64::MIN,
            ..SessionSettings::default()
        };
        assert!(settings.expiry_skew().is_err());
    }

    #[test]
    fn test_skew_in_range() {
        let settings = SessionSettings {
            expiry_skew_secs: 30,
            ..SessionSettings::default()
        };
        assert_eq!(settings.expiry_skew().unwrap(), chrono::Duration::seconds(30));
    }
}
