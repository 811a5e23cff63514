//! RunConfig and its sections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::parser::model::LogType;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub ingest: IngestConfig,
    pub routing: RoutingConfig,
    pub plugins: PluginsConfig,
    pub writer: WriterConfig,
    pub summary: SummaryConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub file_concurrency: usize,
    /// A file fails once its bad line count goes past this. `None` never fails.
    pub max_bad_lines: Option<u64>,
    /// Records committed to the store per batch.
    pub batch_size: usize,
    /// Path segment regex naming the worker a file came from.
    pub worker_pattern: String,
}

/// Routing rules in priority order. Empty means the built-in table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    pub log_type: LogType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Built-in plugins to register. Empty registers all of them.
    pub enabled: Vec<String>,
    pub plugin_concurrency: usize,
    pub max_bad_documents: Option<u64>,
    pub cancel_grace_ms: u64,
    pub slow_request_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    pub batch_size: usize,
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
    /// Directory for `.jsonl` event output. Disabled when unset.
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    pub database: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Pretty,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            file_concurrency: 4,
            max_bad_lines: None,
            batch_size: 1_000,
            worker_pattern: r"^(worker|node)\d+$".to_string(),
        }
    }
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            enabled: Vec::new(),
            plugin_concurrency: 4,
            max_bad_documents: Some(1_000),
            cancel_grace_ms: 5_000,
            slow_request_ms: 10_000,
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            write_retries: 3,
            retry_backoff_ms: 100,
            output_dir: None,
        }
    }
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("logsift.db"),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: OutputFormat::Pretty,
        }
    }
}

impl RunConfig {
    /// Check value ranges. Patterns are compiled later by their owners.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest.file_concurrency == 0 {
            return Err(ConfigError::Invalid("ingest.file_concurrency must be > 0".into()));
        }
        if self.ingest.batch_size == 0 {
            return Err(ConfigError::Invalid("ingest.batch_size must be > 0".into()));
        }
        if self.ingest.worker_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid("ingest.worker_pattern must not be empty".into()));
        }
        if self.plugins.plugin_concurrency == 0 {
            return Err(ConfigError::Invalid("plugins.plugin_concurrency must be > 0".into()));
        }
        if self.writer.batch_size == 0 {
            return Err(ConfigError::Invalid("writer.batch_size must be > 0".into()));
        }
        if self.status.interval_ms == 0 {
            return Err(ConfigError::Invalid("status.interval_ms must be > 0".into()));
        }
        if self.summary.database.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("summary.database must not be empty".into()));
        }
        for rule in &self.routing.rules {
            if rule.pattern.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "routing rule for {} has an empty pattern",
                    rule.log_type.as_str()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = RunConfig::default();
        config.plugins.plugin_concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_rule_pattern_rejected() {
        let mut config = RunConfig::default();
        config.routing.rules.push(RuleConfig {
            pattern: String::new(),
            log_type: LogType::Backgrounder,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let raw = r#"
            [ingest]
            file_concurrency = 8

            [[routing.rules]]
            pattern = "^backgrounder.*"
            log_type = "backgrounder"

            [plugins]
            enabled = ["httpd", "slow_requests"]
            slow_request_ms = 250

            [logging]
            format = "json"
        "#;
        let config: RunConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.ingest.file_concurrency, 8);
        assert_eq!(config.ingest.batch_size, 1_000);
        assert_eq!(config.routing.rules[0].log_type, LogType::Backgrounder);
        assert_eq!(config.plugins.enabled, vec!["httpd", "slow_requests"]);
        assert_eq!(config.plugins.slow_request_ms, 250);
        assert_eq!(config.logging.format, OutputFormat::Json);
    }
}
