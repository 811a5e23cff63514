//! Event and summary writers.
//!
//! - `bulk.rs`: batching `BulkWriter` over one or more `EventSink`s
//! - `sinks.rs`: store-backed and JSON-lines sinks
//! - `summary.rs`: the run summary table

mod bulk;
mod sinks;
mod summary;

use std::io;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

pub use bulk::BulkWriter;
pub use sinks::{JsonLinesSink, StoreSink};
pub use summary::{RunSummary, SqliteSummarySink, SummarySink};

#[cfg(test)]
pub use summary::MockSummarySink;

use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SinkError {
    /// Worth retrying (lock contention, interrupted I/O).
    #[error("Transient sink failure: {0}")]
    Transient(String),

    #[error("Sink failure: {0}")]
    Permanent(String),
}

impl SinkError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => SinkError::Transient(e.to_string()),
            _ => SinkError::Permanent(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for SinkError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                SinkError::Transient(e.to_string())
            }
            _ => SinkError::Permanent(e.to_string()),
        }
    }
}

/// Destination for batches of plugin events.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn write_batch(&self, collection: &str, events: &[Event]) -> Result<(), SinkError>;

    fn flush(&self) -> Result<(), SinkError>;
}

/// Bounded exponential backoff for transient sink errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base: Duration,
}

impl RetryPolicy {
    const MAX_DELAY: Duration = Duration::from_secs(60);

    pub fn new(max_retries: u32, base: Duration) -> Self {
        Self { max_retries, base }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Exponential backoff: base * 2^(attempt-1), capped at 60s
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(5))
            .min(Self::MAX_DELAY)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    /// Blocks the calling thread between attempts.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, SinkError>,
    ) -> Result<T, SinkError> {
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!(
                        sink = what,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying write"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(4), Duration::from_millis(800));
        assert_eq!(policy.delay(9), Duration::from_millis(3_200));

        let slow = RetryPolicy::new(10, Duration::from_secs(5));
        assert_eq!(slow.delay(6), Duration::from_secs(60));
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let out = policy.run("test", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SinkError::Transient("busy".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(out, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_exhaustion_returns_last_error() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let out: Result<(), _> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(SinkError::Transient("busy".into()))
        });
        assert!(out.unwrap_err().is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_permanent_not_retried() {
        let calls = Cell::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let out: Result<(), _> = policy.run("test", || {
            calls.set(calls.get() + 1);
            Err(SinkError::Permanent("disk full".into()))
        });
        assert_eq!(out, Err(SinkError::Permanent("disk full".into())));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_io_error_classification() {
        let e: SinkError = io::Error::new(io::ErrorKind::Interrupted, "x").into();
        assert!(e.is_transient());
        let e: SinkError = io::Error::new(io::ErrorKind::PermissionDenied, "x").into();
        assert!(!e.is_transient());
    }
}
