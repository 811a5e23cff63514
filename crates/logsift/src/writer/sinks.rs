use std::collections::hash_map::{Entry, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{EventSink, SinkError};
use crate::event::Event;
use crate::store::IntermediateStore;

/// Writes events back into the intermediate store, where dependent plugins
/// read them.
pub struct StoreSink {
    store: Arc<IntermediateStore>,
}

impl StoreSink {
    pub fn new(store: Arc<IntermediateStore>) -> Self {
        Self { store }
    }
}

impl EventSink for StoreSink {
    fn write_batch(&self, collection: &str, events: &[Event]) -> Result<(), SinkError> {
        self.store
            .insert_batch(collection, events.iter().map(Event::to_document).collect());
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Appends one JSON object per event to `<dir>/<collection>.jsonl`.
pub struct JsonLinesSink {
    dir: PathBuf,
    files: Mutex<HashMap<String, BufWriter<File>>>,
}

impl JsonLinesSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.jsonl"))
    }

    fn open(path: &Path) -> Result<BufWriter<File>, SinkError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(BufWriter::new(file))
    }
}

impl EventSink for JsonLinesSink {
    fn write_batch(&self, collection: &str, events: &[Event]) -> Result<(), SinkError> {
        let mut files = self.files.lock();
        let writer = match files.entry(collection.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Self::open(&self.path_for(collection))?),
        };

        let mut payload = Vec::with_capacity(events.len() * 256);
        for event in events {
            serde_json::to_writer(&mut payload, event)
                .map_err(|e| SinkError::Permanent(format!("serialize event: {e}")))?;
            payload.push(b'\n');
        }
        append(writer, &payload, collection)
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut files = self.files.lock();
        for writer in files.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// A failed append may have left part of the batch on disk, so retrying it
/// would duplicate lines. Every write error is permanent here.
fn append(writer: &mut impl Write, payload: &[u8], collection: &str) -> Result<(), SinkError> {
    writer
        .write_all(payload)
        .map_err(|e| SinkError::Permanent(format!("append to {collection}.jsonl: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BaseEvent;
    use chrono::Utc;

    fn event(n: u64) -> Event {
        Event::new(
            "slow_request",
            BaseEvent {
                file_name: "access.log".into(),
                file_path: "worker1/access.log".into(),
                line_number: n,
                timestamp: Utc::now(),
                worker: "worker1".into(),
            },
        )
        .with("elapsed_ms", 1500)
    }

    #[test]
    fn test_store_sink() {
        let store = Arc::new(IntermediateStore::new());
        let sink = StoreSink::new(Arc::clone(&store));
        sink.write_batch("slow_requests", &[event(1), event(2)]).unwrap();
        assert_eq!(store.count("slow_requests"), 2);
    }

    /// Accepts `room` bytes, then times out.
    struct ShortWriter {
        written: Vec<u8>,
        room: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.room == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "disk stalled"));
            }
            let n = buf.len().min(self.room);
            self.written.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_append_not_retryable() {
        let mut writer = ShortWriter {
            written: Vec::new(),
            room: 10,
        };
        let err = append(&mut writer, b"{\"a\":1}\n{\"a\":2}\n", "slow_requests").unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(writer.written.len(), 10);

        let mut attempts = 0;
        let retried = crate::writer::RetryPolicy::new(3, std::time::Duration::from_millis(1)).run(
            "jsonl",
            || {
                attempts += 1;
                append(&mut writer, b"{}\n", "slow_requests")
            },
        );
        assert!(retried.is_err());
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_jsonl_append_and_flush() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path().join("out")).unwrap();
        sink.write_batch("slow_requests", &[event(1)]).unwrap();
        sink.write_batch("slow_requests", &[event(2), event(3)]).unwrap();
        sink.flush().unwrap();

        let raw = std::fs::read_to_string(sink.path_for("slow_requests")).unwrap();
        let lines: Vec<serde_json::Value> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2]["line_number"], 3);
        assert_eq!(lines[0]["event_type"], "slow_request");
        assert_eq!(lines[0]["elapsed_ms"], 1500);
    }
}
