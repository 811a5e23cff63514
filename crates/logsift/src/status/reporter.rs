use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{RunStatus, StatusSnapshot};
use crate::writer::SinkError;

/// Destination for status snapshots.
#[cfg_attr(test, mockall::automock)]
pub trait StatusSink: Send + Sync {
    fn write_status(&self, snapshot: &StatusSnapshot) -> Result<(), SinkError>;
}

/// Emits each snapshot as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn write_status(&self, s: &StatusSnapshot) -> Result<(), SinkError> {
        info!(
            files_discovered = s.files_discovered,
            files_processed = s.files_processed,
            files_failed = s.files_failed,
            files_skipped = s.files_skipped,
            lines_read = s.lines_read,
            records_stored = s.records_stored,
            parse_errors = s.parse_errors,
            plugins_running = s.plugins.running,
            plugins_completed = s.plugins.completed,
            plugins_failed = s.plugins.failed + s.plugins.dependency_failed,
            events_written = s.events_written,
            elapsed_ms = s.elapsed_ms,
            "Run status"
        );
        Ok(())
    }
}

/// Background task writing a snapshot every `interval`.
///
/// `stop` halts the timer and emits a final snapshot. Dropping the reporter
/// without stopping it aborts the task.
pub struct StatusReporter {
    status: Arc<RunStatus>,
    sink: Arc<dyn StatusSink>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl StatusReporter {
    /// Must be called from within a Tokio runtime.
    pub fn start(status: Arc<RunStatus>, sink: Arc<dyn StatusSink>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let task = {
            let status = Arc::clone(&status);
            let sink = Arc::clone(&sink);
            tokio::spawn(async move {
                let mut ticker = time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                debug!(interval_ms = period.as_millis() as u64, "Status reporter started");

                loop {
                    tokio::select! {
                        _ = ticker.tick() => emit(&status, sink.as_ref()),
                        changed = shutdown_rx.changed() => {
                            if changed.is_err() || *shutdown_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!("Status reporter stopped");
            })
        };

        Self {
            status,
            sink,
            shutdown_tx,
            task: Some(task),
        }
    }

    /// Emit one snapshot now, independent of the timer.
    pub fn write_status(&self) {
        emit(&self.status, self.sink.as_ref());
    }

    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Status reporter task ended abnormally");
            }
        }
        self.write_status();
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn emit(status: &RunStatus, sink: &dyn StatusSink) {
    if let Err(e) = sink.write_status(&status.snapshot()) {
        warn!(error = %e, "Failed to write status");
    }
}
