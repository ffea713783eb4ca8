//! Config loading, validation, and persistence.

use super::model::Config;
use crate::error::{RepoError, Result};
use crate::fs::atomic_write_file;
use std::path::Path;

impl Config {
    /// Load config from a YAML file, falling back to defaults if the file
    /// does not exist yet.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            RepoError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    ///
    /// Unknown fields are silently ignored for forward compatibility.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| RepoError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| RepoError::UserError(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Write config to disk atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        atomic_write_file(path, &self.to_yaml()?)
    }

    /// Validate config values.
    ///
    /// Validation rules:
    /// - `registry` must be non-empty and contain no path separators
    /// - `session_expiry_secs` must be positive and larger than the refresh
    ///   interval, otherwise live sessions would be reaped
    /// - `lock_retry_attempts` must be positive
    pub fn validate(&self) -> Result<()> {
        if self.registry.is_empty() {
            return Err(RepoError::UserError(
                "config validation failed: registry must be non-empty".to_string(),
            ));
        }
        if self.registry.contains('/') || self.registry.contains('\\') {
            return Err(RepoError::UserError(format!(
                "config validation failed: registry must not contain path separators (found '{}')",
                self.registry
            )));
        }

        if self.session_expiry_secs == 0 {
            return Err(RepoError::UserError(
                "config validation failed: session_expiry_secs must be greater than 0".to_string(),
            ));
        }

        if self.refresh_interval_secs >= self.session_expiry_secs {
            return Err(RepoError::UserError(format!(
                "config validation failed: refresh_interval_secs ({}) must be smaller than session_expiry_secs ({})",
                self.refresh_interval_secs, self.session_expiry_secs
            )));
        }

        if self.lock_retry_attempts == 0 {
            return Err(RepoError::UserError(
                "config validation failed: lock_retry_attempts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
