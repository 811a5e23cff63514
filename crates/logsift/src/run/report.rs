use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ExitStatus;
use crate::ingest::{FileOutcome, FileState};
use crate::publish::PublishResult;
use crate::schedule::{PluginOutcome, PluginState};
use crate::status::StatusSnapshot;
use crate::store::CollectionCount;
use crate::writer::SinkError;

/// Everything a finished (or cancelled) run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub log_set_location: String,
    pub files: Vec<FileOutcome>,
    pub plugins: Vec<PluginOutcome>,
    pub publications: Vec<PublishResult>,
    pub collections: Vec<CollectionCount>,
    pub status: StatusSnapshot,
    pub cancelled: bool,
    pub summary_written: bool,
    pub summary_error: Option<SinkError>,
}

impl RunReport {
    pub fn failed_files(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files
            .iter()
            .filter(|f| matches!(f.state, FileState::Failed { .. }))
    }

    pub fn skipped_files(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.state == FileState::Skipped)
            .count()
    }

    pub fn plugin(&self, name: &str) -> Option<&PluginOutcome> {
        self.plugins.iter().find(|p| p.name == name)
    }

    /// Plugins that ended in `Failed` or `DependencyFailed`.
    pub fn failed_plugins(&self) -> impl Iterator<Item = &PluginOutcome> {
        self.plugins.iter().filter(|p| {
            matches!(
                p.state,
                PluginState::Failed { .. } | PluginState::DependencyFailed { .. }
            )
        })
    }

    pub fn exit_status(&self) -> ExitStatus {
        if let Some(e) = &self.summary_error {
            return if e.is_transient() {
                ExitStatus::TransientFailure
            } else {
                ExitStatus::PermanentFailure
            };
        }
        if self.cancelled {
            return ExitStatus::Cancelled;
        }
        if self.failed_files().next().is_some() || self.failed_plugins().next().is_some() {
            return ExitStatus::CompletedWithFailures;
        }
        ExitStatus::Success
    }
}
