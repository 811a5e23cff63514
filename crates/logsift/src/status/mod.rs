//! Live run counters and the periodic status reporter.

mod reporter;

pub use reporter::{StatusReporter, StatusSink, TracingStatusSink};

#[cfg(test)]
pub use reporter::MockStatusSink;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::schedule::PluginState;

/// Forces the wrapped counters onto their own cache line so ingestion
/// workers and plugin tasks do not invalidate each other.
#[repr(align(64))]
#[derive(Debug, Default)]
struct CacheAligned<T>(T);

#[derive(Debug, Default)]
struct FileCounters {
    discovered: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

/// Hot path: bumped once per committed batch.
#[derive(Debug, Default)]
struct LineCounters {
    lines_read: AtomicU64,
    records_stored: AtomicU64,
    parse_errors: AtomicU64,
}

#[derive(Debug, Default)]
struct PluginGauges {
    pending: AtomicI64,
    ready: AtomicI64,
    running: AtomicI64,
    completed: AtomicI64,
    failed: AtomicI64,
    dependency_failed: AtomicI64,
    cancelled: AtomicI64,
    events_written: AtomicU64,
}

impl PluginGauges {
    fn gauge(&self, state: &PluginState) -> &AtomicI64 {
        match state {
            PluginState::Pending => &self.pending,
            PluginState::Ready => &self.ready,
            PluginState::Running => &self.running,
            PluginState::Completed => &self.completed,
            PluginState::Failed { .. } => &self.failed,
            PluginState::DependencyFailed { .. } => &self.dependency_failed,
            PluginState::Cancelled => &self.cancelled,
        }
    }
}

/// Counters shared by the pipeline (writers) and the reporter (reader).
/// Every counter only moves forward except the per-state plugin gauges.
#[derive(Debug)]
pub struct RunStatus {
    started: Instant,
    files: CacheAligned<FileCounters>,
    lines: CacheAligned<LineCounters>,
    plugins: CacheAligned<PluginGauges>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatus {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            files: CacheAligned::default(),
            lines: CacheAligned::default(),
            plugins: CacheAligned::default(),
        }
    }

    pub fn record_discovered(&self, n: u64) {
        self.files.0.discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_file_processed(&self) {
        self.files.0.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_failed(&self) {
        self.files.0.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file_skipped(&self) {
        self.files.0.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lines(&self, lines: u64, records: u64, parse_errors: u64) {
        let c = &self.lines.0;
        c.lines_read.fetch_add(lines, Ordering::Relaxed);
        c.records_stored.fetch_add(records, Ordering::Relaxed);
        c.parse_errors.fetch_add(parse_errors, Ordering::Relaxed);
    }

    pub fn record_events(&self, n: u64) {
        if n > 0 {
            self.plugins.0.events_written.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Register `n` plugins in the `Pending` state.
    pub fn record_plugins(&self, n: usize) {
        self.plugins.0.pending.fetch_add(n as i64, Ordering::Relaxed);
    }

    pub fn plugin_transition(&self, from: &PluginState, to: &PluginState) {
        let g = &self.plugins.0;
        g.gauge(from).fetch_sub(1, Ordering::Relaxed);
        g.gauge(to).fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let f = &self.files.0;
        let l = &self.lines.0;
        let p = &self.plugins.0;
        let gauge = |a: &AtomicI64| a.load(Ordering::Relaxed).max(0) as u64;

        StatusSnapshot {
            files_discovered: f.discovered.load(Ordering::Relaxed),
            files_processed: f.processed.load(Ordering::Relaxed),
            files_failed: f.failed.load(Ordering::Relaxed),
            files_skipped: f.skipped.load(Ordering::Relaxed),
            lines_read: l.lines_read.load(Ordering::Relaxed),
            records_stored: l.records_stored.load(Ordering::Relaxed),
            parse_errors: l.parse_errors.load(Ordering::Relaxed),
            plugins: PluginCounts {
                pending: gauge(&p.pending),
                ready: gauge(&p.ready),
                running: gauge(&p.running),
                completed: gauge(&p.completed),
                failed: gauge(&p.failed),
                dependency_failed: gauge(&p.dependency_failed),
                cancelled: gauge(&p.cancelled),
            },
            events_written: p.events_written.load(Ordering::Relaxed),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PluginCounts {
    pub pending: u64,
    pub ready: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub dependency_failed: u64,
    pub cancelled: u64,
}

/// Point-in-time copy of [`RunStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub files_discovered: u64,
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub lines_read: u64,
    pub records_stored: u64,
    pub parse_errors: u64,
    pub plugins: PluginCounts,
    pub events_written: u64,
    pub elapsed_ms: u64,
}
