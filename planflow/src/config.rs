//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::errors::EngineError;

/// Tunables of the orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often a sync dispatch polls the transport for its response.
    #[serde(default = "default_poll_interval")]
    pub sync_task_poll_interval_ms: u64,
    /// Timeout applied to async nodes and tasks that declare none.
    #[serde(default = "default_task_timeout")]
    pub default_task_timeout_secs: u64,
    /// How long a best-effort task abort waits for the transport.
    #[serde(default = "default_abort_ack_timeout")]
    pub abort_ack_timeout_ms: u64,
    /// Period of the expiry monitor.
    #[serde(default = "default_expiry_check_interval")]
    pub expiry_check_interval_ms: u64,
    /// Cap on concurrently started children of one node; `None` is unbounded.
    #[serde(default)]
    pub default_max_concurrency: Option<usize>,
    /// Cache generated graphs.
    #[serde(default = "default_true")]
    pub graph_cache_enabled: bool,
    /// Reuse plans built from identical definitions.
    #[serde(default = "default_true")]
    pub plan_cache_enabled: bool,
}

fn default_poll_interval() -> u64 {
    100
}

fn default_task_timeout() -> u64 {
    600
}

fn default_abort_ack_timeout() -> u64 {
    2_000
}

fn default_expiry_check_interval() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_task_poll_interval_ms: default_poll_interval(),
            default_task_timeout_secs: default_task_timeout(),
            abort_ack_timeout_ms: default_abort_ack_timeout(),
            expiry_check_interval_ms: default_expiry_check_interval(),
            default_max_concurrency: None,
            graph_cache_enabled: true,
            plan_cache_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Rejects zero intervals and a zero concurrency cap.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sync_task_poll_interval_ms == 0 {
            return Err(EngineError::Config(
                "sync_task_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.expiry_check_interval_ms == 0 {
            return Err(EngineError::Config(
                "expiry_check_interval_ms must be positive".to_string(),
            ));
        }
        if self.default_max_concurrency == Some(0) {
            return Err(EngineError::Config(
                "default_max_concurrency must be positive when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the sync poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.sync_task_poll_interval_ms = ms;
        self
    }

    /// Sets the default task timeout.
    #[must_use]
    pub fn with_default_task_timeout_secs(mut self, secs: u64) -> Self {
        self.default_task_timeout_secs = secs;
        self
    }

    /// Sets the abort acknowledgement timeout.
    #[must_use]
    pub fn with_abort_ack_timeout_ms(mut self, ms: u64) -> Self {
        self.abort_ack_timeout_ms = ms;
        self
    }

    /// Sets the expiry monitor period.
    #[must_use]
    pub fn with_expiry_check_interval_ms(mut self, ms: u64) -> Self {
        self.expiry_check_interval_ms = ms;
        self
    }

    /// Sets the default child concurrency cap.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.default_max_concurrency = Some(max);
        self
    }

    /// Enables or disables the graph cache.
    #[must_use]
    pub fn with_graph_cache(mut self, enabled: bool) -> Self {
        self.graph_cache_enabled = enabled;
        self
    }

    /// Enables or disables the plan cache.
    #[must_use]
    pub fn with_plan_cache(mut self, enabled: bool) -> Self {
        self.plan_cache_enabled = enabled;
        self
    }

    /// Poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sync_task_poll_interval_ms)
    }

    /// Default task timeout as a Duration.
    #[must_use]
    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }

    /// Abort acknowledgement timeout as a Duration.
    #[must_use]
    pub fn abort_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.abort_ack_timeout_ms)
    }

    /// Expiry monitor period as a Duration.
    #[must_use]
    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_check_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.sync_task_poll_interval_ms, 100);
        assert_eq!(config.default_task_timeout(), Duration::from_secs(600));
        assert_eq!(config.abort_ack_timeout_ms, 2_000);
        assert_eq!(config.expiry_check_interval_ms, 1_000);
        assert!(config.default_max_concurrency.is_none());
        assert!(config.graph_cache_enabled && config.plan_cache_enabled);
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            EngineConfig::from_json_str(r#"{"default_max_concurrency": 4, "plan_cache_enabled": false}"#)
                .unwrap();
        assert_eq!(config.default_max_concurrency, Some(4));
        assert!(!config.plan_cache_enabled);
        assert_eq!(config.sync_task_poll_interval_ms, 100);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"sync_task_poll_interval_ms": 0}"#),
            Err(EngineError::Config(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str("not json"),
            Err(EngineError::Serialization(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"abort_ack_timeout_ms": 50}}"#).unwrap();
        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.abort_ack_timeout(), Duration::from_millis(50));
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_poll_interval_ms(5)
            .with_max_concurrency(2)
            .with_graph_cache(false);
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.default_max_concurrency, Some(2));
        assert!(!config.graph_cache_enabled);
    }
}
