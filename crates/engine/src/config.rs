//! Changelog configuration
//!
//! | Key | Default | Meaning |
//! |-----|---------|---------|
//! | `data_dir` | none | Directory of the state journal, replica logs and index; none keeps everything in memory |
//! | `purge_delay_ms` | 3 days | Minimum age before a record may be purged; 0 disables purging |
//! | `compute_change_number` | true | Maintain the global change-number index |
//! | `max_purge_sleep_ms` | 500 | Upper bound of the purger's sleep between cycles |
//!
//! ```toml
//! data_dir = "/var/lib/changelog"
//! purge_delay_ms = 86400000
//! compute_change_number = false
//! ```

use changelog_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default purge delay: 3 days
pub const DEFAULT_PURGE_DELAY_MS: u64 = 3 * 24 * 60 * 60 * 1000;

/// Default upper bound of the purger's sleep
pub const DEFAULT_MAX_PURGE_SLEEP_MS: u64 = 500;

/// Largest accepted purge delay: 10 years
pub const MAX_PURGE_DELAY_MS: u64 = 10 * 365 * 24 * 60 * 60 * 1000;

/// Largest accepted purger sleep: 1 hour
pub const MAX_PURGE_SLEEP_MS: u64 = 60 * 60 * 1000;

/// Changelog configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChangelogConfig {
    /// Directory of the state journal, replica logs and index; `None` keeps
    /// everything in memory
    pub data_dir: Option<PathBuf>,
    /// Minimum age in milliseconds before a record may be purged
    pub purge_delay_ms: u64,
    /// Whether the global change-number index is maintained
    pub compute_change_number: bool,
    /// Upper bound of the purger's sleep in milliseconds
    pub max_purge_sleep_ms: u64,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            purge_delay_ms: DEFAULT_PURGE_DELAY_MS,
            compute_change_number: true,
            max_purge_sleep_ms: DEFAULT_MAX_PURGE_SLEEP_MS,
        }
    }
}

impl ChangelogConfig {
    /// Configuration keeping everything in memory
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Configuration persisting state under `dir`
    pub fn at(dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document
    ///
    /// Missing keys take their default value.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: ChangelogConfig = toml::from_str(input)
            .map_err(|e| Error::ConfigurationRejected(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Check every value is in range
    ///
    /// # Errors
    ///
    /// `ConfigurationRejected` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        validate_purge_delay(self.purge_delay_ms)?;
        if self.max_purge_sleep_ms == 0 || self.max_purge_sleep_ms > MAX_PURGE_SLEEP_MS {
            return Err(Error::ConfigurationRejected(format!(
                "max_purge_sleep_ms must be between 1 and {}, got {}",
                MAX_PURGE_SLEEP_MS, self.max_purge_sleep_ms
            )));
        }
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(Error::ConfigurationRejected(
                    "data_dir must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Purge delay as a duration
    pub fn purge_delay(&self) -> Duration {
        Duration::from_millis(self.purge_delay_ms)
    }

    /// Upper bound of the purger's sleep as a duration
    pub fn max_purge_sleep(&self) -> Duration {
        Duration::from_millis(self.max_purge_sleep_ms)
    }
}

/// Check a purge delay in milliseconds
pub(crate) fn validate_purge_delay(purge_delay_ms: u64) -> Result<()> {
    if purge_delay_ms > MAX_PURGE_DELAY_MS {
        return Err(Error::ConfigurationRejected(format!(
            "purge delay must not exceed {} ms, got {}",
            MAX_PURGE_DELAY_MS, purge_delay_ms
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChangelogConfig::default();
        assert!(config.data_dir.is_none());
        assert_eq!(config.purge_delay(), Duration::from_secs(3 * 24 * 3600));
        assert!(config.compute_change_number);
        assert_eq!(config.max_purge_sleep(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ChangelogConfig::from_toml_str(
            r#"
            data_dir = "/tmp/changelog"
            purge_delay_ms = 1000
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/changelog")));
        assert_eq!(config.purge_delay_ms, 1000);
        assert!(config.compute_change_number);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ChangelogConfig {
            data_dir: Some(PathBuf::from("/data")),
            purge_delay_ms: 0,
            compute_change_number: false,
            max_purge_sleep_ms: 20,
        };
        let text = config.to_toml_string().unwrap();
        assert_eq!(ChangelogConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_rejects_zero_max_sleep() {
        let err = ChangelogConfig::from_toml_str("max_purge_sleep_ms = 0").unwrap_err();
        assert!(matches!(err, Error::ConfigurationRejected(_)));
    }

    #[test]
    fn test_rejects_unknown_key() {
        let err = ChangelogConfig::from_toml_str("purge_delay = 5").unwrap_err();
        assert!(matches!(err, Error::ConfigurationRejected(_)));
    }

    #[test]
    fn test_rejects_huge_purge_delay() {
        let config = ChangelogConfig {
            purge_delay_ms: MAX_PURGE_DELAY_MS + 1,
            ..ChangelogConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
