//! Dependency resolution and concurrent plugin execution.
//!
//! Plugin names are resolved to node ids once, in [`Schedule::resolve`].
//! Execution only ever consumes the validated schedule.

mod resolve;
mod run;

pub use resolve::{PluginNode, Schedule};
pub use run::{Scheduler, SchedulerOptions};

use serde::Serialize;

use crate::error::ConfigError;
use crate::plugin::{Plugin, PluginReport};

/// Lifecycle of one plugin within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PluginState {
    Pending,
    Ready,
    Running,
    Completed,
    Failed { reason: String },
    /// Skipped because a (transitive) dependency failed.
    DependencyFailed { dependency: String },
    Cancelled,
}

impl PluginState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed { .. } | Self::DependencyFailed { .. } | Self::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::DependencyFailed { .. } => "dependency_failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Final state of one plugin, in registration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginOutcome {
    pub name: String,
    pub output: String,
    pub workbook: Option<String>,
    #[serde(flatten)]
    pub state: PluginState,
    pub report: Option<PluginReport>,
    pub elapsed_ms: u64,
}

/// A validated schedule together with the plugin instances it runs.
/// Instance `i` belongs to node `i`.
pub struct ResolvedPlan {
    schedule: Schedule,
    plugins: Vec<Box<dyn Plugin>>,
}

impl ResolvedPlan {
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub(crate) fn into_parts(self) -> (Schedule, Vec<Box<dyn Plugin>>) {
        (self.schedule, self.plugins)
    }
}

impl std::fmt::Debug for ResolvedPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedPlan")
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

/// Validate the registered plugins. Nothing runs if this fails.
pub fn resolve(plugins: Vec<Box<dyn Plugin>>) -> Result<ResolvedPlan, ConfigError> {
    let descriptors: Vec<_> = plugins.iter().map(|p| p.descriptor()).collect();
    let schedule = Schedule::resolve(&descriptors)?;
    Ok(ResolvedPlan { schedule, plugins })
}
