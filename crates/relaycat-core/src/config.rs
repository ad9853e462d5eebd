//! Configuration resolution for relaycat.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Settings file (explicit path, else the global `settings.json`)
//! 3. CLI arguments and their environment variables (applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default read batch size in bytes.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Default drain window after the first direction reaches end-of-stream.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 500;

/// Relay session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Largest chunk pulled from a reader in one read call.
    pub batch_size: usize,
    /// Milliseconds the surviving direction may keep draining once the
    /// other direction has reached end-of-stream.
    pub grace_period_ms: u64,
    /// Put TCP sockets in non-blocking mode so readable data can be drained
    /// in several batches per readiness notification.
    pub nonblocking_sockets: bool,
    /// Put stdin in non-blocking mode.
    pub nonblocking_stdin: bool,
    /// Shut down the write side of a link's destination once its source
    /// reaches end-of-stream.
    pub propagate_eof: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            nonblocking_sockets: true,
            nonblocking_stdin: false,
            propagate_eof: false,
        }
    }
}

impl RelayConfig {
    /// Drain window as a `Duration`.
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Set the read batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the drain window.
    #[must_use]
    pub const fn with_grace_period_ms(mut self, ms: u64) -> Self {
        self.grace_period_ms = ms;
        self
    }

    /// Toggle non-blocking mode for sockets.
    #[must_use]
    pub const fn with_nonblocking_sockets(mut self, enabled: bool) -> Self {
        self.nonblocking_sockets = enabled;
        self
    }

    /// Toggle non-blocking mode for stdin.
    #[must_use]
    pub const fn with_nonblocking_stdin(mut self, enabled: bool) -> Self {
        self.nonblocking_stdin = enabled;
        self
    }

    /// Toggle write-side shutdown on end-of-stream.
    #[must_use]
    pub const fn with_propagate_eof(mut self, enabled: bool) -> Self {
        self.propagate_eof = enabled;
        self
    }

    /// Reject values the relay engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` must exist; the global settings file is optional.
pub fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    let config = match path {
        Some(path) => load_config_file(path)?,
        None => match global_config_path() {
            Some(global) if global.exists() => load_config_file(&global)?,
            _ => RelayConfig::default(),
        },
    };
    config.validate()?;
    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/relaycat/settings.json"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("relaycat").join("settings.json"))
    }
}

fn load_config_file(path: &Path) -> Result<RelayConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_relay_constants() {
        let config = RelayConfig::default();
        assert_eq!(config.batch_size, 4096);
        assert_eq!(config.grace_period(), Duration::from_millis(500));
        assert!(config.nonblocking_sockets);
        assert!(!config.nonblocking_stdin);
        assert!(!config.propagate_eof);
    }

    #[test]
    fn zero_batch_size_rejected() {
        let config = RelayConfig::default().with_batch_size(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn partial_settings_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"grace_period_ms": 1500}}"#).unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.grace_period_ms, 1500);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn malformed_settings_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_config(Some(file.path())).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn missing_explicit_settings_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(load_config(Some(&missing)).is_err());
    }
}
