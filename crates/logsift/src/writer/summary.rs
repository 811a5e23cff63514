use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use super::SinkError;
use crate::parser::model::format_timestamp;

/// One row per run, created at start and written once at the end.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub log_set_location: String,
}

impl RunSummary {
    pub fn begin(log_set: &Path) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            start_timestamp: Utc::now(),
            log_set_location: log_set.display().to_string(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait SummarySink: Send + Sync {
    fn write_summary(&self, summary: &RunSummary) -> Result<(), SinkError>;
}

pub struct SqliteSummarySink {
    conn: Mutex<Connection>,
}

impl SqliteSummarySink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SinkError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_summary (
                run_id TEXT PRIMARY KEY,
                start_timestamp TEXT NOT NULL,
                log_set_location TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn fetch(&self, run_id: &str) -> Result<Option<RunSummary>, SinkError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT run_id, start_timestamp, log_set_location FROM run_summary WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(run_id, start, log_set_location)| {
            let start_timestamp = DateTime::parse_from_rfc3339(&start)
                .map_err(|e| SinkError::Permanent(format!("corrupt start_timestamp: {e}")))?
                .with_timezone(&Utc);
            Ok(RunSummary {
                run_id,
                start_timestamp,
                log_set_location,
            })
        })
        .transpose()
    }

    pub fn count(&self) -> Result<u64, SinkError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM run_summary", [], |row| row.get(0))?;
        Ok(n as u64)
    }
}

impl SummarySink for SqliteSummarySink {
    fn write_summary(&self, summary: &RunSummary) -> Result<(), SinkError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO run_summary (run_id, start_timestamp, log_set_location) VALUES (?1, ?2, ?3)",
            params![
                summary.run_id,
                format_timestamp(&summary.start_timestamp),
                summary.log_set_location
            ],
        )?;
        Ok(())
    }
}
