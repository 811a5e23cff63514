//! Run-level error taxonomy and process exit codes.

use std::path::PathBuf;

use thiserror::Error;

use crate::writer::SinkError;

/// Problems detected before any file is touched. Every variant aborts the run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid routing pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid worker pattern '{pattern}': {reason}")]
    InvalidWorkerPattern { pattern: String, reason: String },

    #[error("Plugin name must not be empty")]
    EmptyPluginName,

    #[error("Plugin '{0}' is registered more than once")]
    DuplicatePlugin(String),

    #[error("Plugin '{plugin}' depends on unregistered plugin '{missing}'")]
    MissingDependency { plugin: String, missing: String },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Plugin '{plugin}' declares no input collections")]
    NoInputs { plugin: String },

    #[error("Plugin '{plugin}' does not declare a {missing}")]
    IncompleteQuery { plugin: String, missing: &'static str },

    #[error("Plugin '{plugin}' has an invalid query: {reason}")]
    InvalidQuery { plugin: String, reason: String },

    #[error("Plugin '{plugin}' reads unknown collection '{collection}'")]
    UnknownCollection { plugin: String, collection: String },

    #[error("Plugin '{plugin}' reads '{collection}' produced by '{producer}' without depending on it")]
    UndeclaredDependency {
        plugin: String,
        collection: String,
        producer: String,
    },

    #[error("Output collection '{collection}' of plugin '{plugin}' collides with {owner}")]
    CollectionConflict {
        plugin: String,
        collection: String,
        owner: String,
    },

    #[error("Unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors that end a run before a report can be produced.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Log set '{}' is not readable: {source}", path.display())]
    LogSet {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output sink unavailable: {0}")]
    Output(#[source] SinkError),

    #[error("Summary write failed: {0}")]
    Summary(#[from] SinkError),
}

impl RunError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            RunError::Config(_) => ExitStatus::ConfigError,
            RunError::LogSet { .. } => ExitStatus::PermanentFailure,
            RunError::Output(e) | RunError::Summary(e) if e.is_transient() => {
                ExitStatus::TransientFailure
            }
            RunError::Output(_) | RunError::Summary(_) => ExitStatus::PermanentFailure,
        }
    }
}

/// Process exit codes. The numeric values follow the BSD `sysexits` convention
/// where one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    ConfigError,
    CompletedWithFailures,
    PermanentFailure,
    TransientFailure,
    Cancelled,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::ConfigError => 2,
            ExitStatus::CompletedWithFailures => 3,
            ExitStatus::PermanentFailure => 70,
            ExitStatus::TransientFailure => 75,
            ExitStatus::Cancelled => 130,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Success => "success",
            ExitStatus::ConfigError => "config_error",
            ExitStatus::CompletedWithFailures => "completed_with_failures",
            ExitStatus::PermanentFailure => "permanent_failure",
            ExitStatus::TransientFailure => "transient_failure",
            ExitStatus::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::ConfigError.code(), 2);
        assert_eq!(ExitStatus::CompletedWithFailures.code(), 3);
        assert_eq!(ExitStatus::PermanentFailure.code(), 70);
        assert_eq!(ExitStatus::TransientFailure.code(), 75);
        assert_eq!(ExitStatus::Cancelled.code(), 130);
    }

    #[test]
    fn test_cycle_message_lists_path() {
        let err = ConfigError::DependencyCycle(vec!["a".into(), "b".into(), "a".into()]);
        assert_eq!(err.to_string(), "Dependency cycle detected: a -> b -> a");
    }

    #[test]
    fn test_run_error_exit_status() {
        let err = RunError::from(ConfigError::UnknownPlugin("nope".into()));
        assert_eq!(err.exit_status(), ExitStatus::ConfigError);

        let err = RunError::Summary(SinkError::Transient("locked".into()));
        assert_eq!(err.exit_status(), ExitStatus::TransientFailure);

        let err = RunError::Summary(SinkError::Permanent("disk full".into()));
        assert_eq!(err.exit_status(), ExitStatus::PermanentFailure);
    }
}
