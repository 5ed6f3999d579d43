//! Engine configuration, loadable from a JSON document with either a root
//! `SqliteConfiguration` object or the fields inlined at top level. A
//! missing or blank file tolerantly falls back to defaults rather than
//! failing startup.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::RetryPolicy;

/// SQLite journal strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum JournalMode {
    Delete,
    Wal,
    Memory,
    Truncate,
    Persist,
    Off,
}

impl JournalMode {
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Wal => "WAL",
            Self::Memory => "MEMORY",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Off => "OFF",
        }
    }
}

impl Default for JournalMode {
    fn default() -> Self {
        Self::Wal
    }
}

/// SQLite fsync policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum SynchronousMode {
    Off,
    #[default]
    Normal,
    Full,
}

impl SynchronousMode {
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
        }
    }
}

/// Retry tuning, the JSON-friendly mirror of [`RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Build the runtime [`RetryPolicy`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::EngineError`] if `backoff_multiplier < 1.0`
    /// or `max_attempts == 0`.
    pub fn to_policy(self) -> Result<RetryPolicy> {
        let mut policy = RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_multiplier,
        )?;
        policy.enabled = self.enabled;
        Ok(policy)
    }
}

/// Every configuration option recognized for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Page cache size in pages (negative means KB, per SQLite's own
    /// `PRAGMA cache_size` convention).
    pub cache_size: Option<i64>,
    pub page_size: Option<u32>,
    pub journal_mode: JournalMode,
    pub synchronous_mode: SynchronousMode,
    pub busy_timeout_ms: u64,
    pub command_timeout_secs: u64,
    pub enable_foreign_keys: bool,
    pub retry_policy: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_size: None,
            page_size: None,
            journal_mode: JournalMode::default(),
            synchronous_mode: SynchronousMode::default(),
            busy_timeout_ms: 5000,
            command_timeout_secs: 30,
            enable_foreign_keys: true,
            retry_policy: RetryConfig::default(),
        }
    }
}

/// Wrapper accepting a `{"SqliteConfiguration": {...}}` document; used only
/// to detect that shape before falling back to top-level fields.
#[derive(Debug, Deserialize)]
struct Wrapped {
    #[serde(rename = "SqliteConfiguration")]
    sqlite_configuration: Option<EngineConfig>,
}

impl EngineConfig {
    /// Load configuration from a JSON document at `path`, accepting either
    /// a root `SqliteConfiguration` key or the fields at top level. A
    /// missing file yields the default configuration rather than an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but is not valid JSON in either
    /// accepted shape.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parse configuration from a JSON string in either accepted shape.
    ///
    /// # Errors
    ///
    /// Returns an error if `contents` is not valid JSON in either shape.
    pub fn from_json_str(contents: &str) -> Result<Self> {
        if let Ok(wrapped) = serde_json::from_str::<Wrapped>(contents) {
            if let Some(config) = wrapped.sqlite_configuration {
                return Ok(config);
            }
        }
        Ok(serde_json::from_str(contents)?)
    }

    /// Apply this configuration's pragmas to an open connection.
    ///
    /// # Errors
    ///
    /// Returns an error if any `PRAGMA` fails.
    pub fn apply_pragmas(&self, conn: &rusqlite::Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", self.journal_mode.pragma_value())?;
        conn.pragma_update(None, "synchronous", self.synchronous_mode.pragma_value())?;
        conn.pragma_update(None, "foreign_keys", i64::from(self.enable_foreign_keys))?;
        conn.busy_timeout(Duration::from_millis(self.busy_timeout_ms))?;
        if let Some(cache_size) = self.cache_size {
            conn.pragma_update(None, "cache_size", cache_size)?;
        }
        if let Some(page_size) = self.page_size {
            conn.pragma_update(None, "page_size", i64::from(page_size))?;
        }
        Ok(())
    }

    /// Effective upper bound on how long a caller may wait on a locked
    /// database: `busy_timeout_ms` plus the retry layer's worst-case
    /// cumulative backoff. Both mechanisms apply in parallel rather than
    /// one superseding the other, so this is their sum, not their max.
    #[must_use]
    pub fn effective_max_wait(&self) -> Duration {
        let busy = Duration::from_millis(self.busy_timeout_ms);
        let retry_worst_case = self
            .retry_policy
            .to_policy()
            .map(|p| p.worst_case_total_delay())
            .unwrap_or_default();
        busy + retry_worst_case
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = EngineConfig::load(Path::new("/nonexistent/path/config.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn parses_wrapped_root_object() {
        let json = r#"{"SqliteConfiguration": {"busyTimeoutMs": 9000, "journalMode": "Wal"}}"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.busy_timeout_ms, 9000);
    }

    #[test]
    fn parses_top_level_fields() {
        let json = r#"{"busyTimeoutMs": 1234, "enableForeignKeys": false}"#;
        let config = EngineConfig::from_json_str(json).unwrap();
        assert_eq!(config.busy_timeout_ms, 1234);
        assert!(!config.enable_foreign_keys);
    }

    #[test]
    fn effective_max_wait_sums_busy_timeout_and_retry_backoff() {
        let config = EngineConfig {
            busy_timeout_ms: 5000,
            ..EngineConfig::default()
        };
        let wait = config.effective_max_wait();
        assert!(wait >= Duration::from_millis(5000));
    }
}
