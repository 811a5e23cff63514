//! Runs one plugin: query inputs, transform, write, flush.

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::Plugin;
use crate::schedule::PluginNode;
use crate::status::RunStatus;
use crate::store::IntermediateStore;
use crate::writer::{BulkWriter, SinkError};

/// Bad document reports logged per plugin before going quiet.
const LOGGED_BAD_DOCUMENTS: u64 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct HarnessLimits {
    /// Fail once bad documents go past this. `None` never fails.
    pub max_bad_documents: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginReport {
    pub documents_read: u64,
    pub bad_documents: u64,
    pub events_written: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PluginError {
    #[error("{bad} bad documents exceeds the limit of {limit}")]
    TooManyBadDocuments { bad: u64, limit: u64 },

    #[error("Write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Plugin panicked: {0}")]
    Panicked(String),

    #[error("Interrupted by cancellation")]
    Interrupted,
}

/// Execute `plugin` against the store. Blocking; run it off the async
/// runtime. `interrupt` is polled between documents.
pub fn execute(
    plugin: &mut dyn Plugin,
    node: &PluginNode,
    store: &IntermediateStore,
    writer: &mut BulkWriter,
    limits: HarnessLimits,
    status: &RunStatus,
    interrupt: &CancellationToken,
) -> Result<PluginReport, PluginError> {
    let mut report = PluginReport::default();

    for collection in &node.inputs {
        let cursor = store.query(collection, &node.query);
        debug!(
            plugin = %node.name,
            collection = %collection,
            snapshot = cursor.snapshot_len(),
            "Querying input collection"
        );

        for doc in cursor {
            if interrupt.is_cancelled() {
                return Err(PluginError::Interrupted);
            }
            report.documents_read += 1;

            match plugin.transform(collection, &doc) {
                Ok(events) => {
                    let emitted = events.len() as u64;
                    writer.extend(events)?;
                    status.record_events(emitted);
                }
                Err(e) => {
                    report.bad_documents += 1;
                    if report.bad_documents <= LOGGED_BAD_DOCUMENTS {
                        warn!(
                            plugin = %node.name,
                            collection = %collection,
                            error = %e,
                            "Skipping document"
                        );
                    }
                    if let Some(limit) = limits.max_bad_documents {
                        if report.bad_documents > limit {
                            return Err(PluginError::TooManyBadDocuments {
                                bad: report.bad_documents,
                                limit,
                            });
                        }
                    }
                }
            }
        }
    }

    let tail = plugin.finish();
    let emitted = tail.len() as u64;
    writer.extend(tail)?;
    status.record_events(emitted);

    report.events_written = writer.flush()?;
    Ok(report)
}
