use std::sync::Arc;

use tracing::debug;

use super::{EventSink, RetryPolicy, SinkError};
use crate::event::Event;

/// Buffers events for one output collection and writes them to every sink
/// in batches. Events are never merged or deduplicated.
pub struct BulkWriter {
    collection: String,
    sinks: Vec<Arc<dyn EventSink>>,
    batch_size: usize,
    retry: RetryPolicy,
    buffer: Vec<Event>,
    written: u64,
}

impl BulkWriter {
    pub fn new(
        collection: impl Into<String>,
        sinks: Vec<Arc<dyn EventSink>>,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            collection: collection.into(),
            sinks,
            batch_size,
            retry,
            buffer: Vec::with_capacity(batch_size),
            written: 0,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Events handed to the sinks so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn push(&mut self, event: Event) -> Result<(), SinkError> {
        self.buffer.push(event);
        if self.buffer.len() >= self.batch_size {
            self.write_buffer()?;
        }
        Ok(())
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) -> Result<(), SinkError> {
        for event in events {
            self.push(event)?;
        }
        Ok(())
    }

    /// Write what is buffered and flush every sink. Returns the total written.
    pub fn flush(&mut self) -> Result<u64, SinkError> {
        self.write_buffer()?;
        for sink in &self.sinks {
            self.retry.run(&self.collection, || sink.flush())?;
        }
        Ok(self.written)
    }

    fn write_buffer(&mut self) -> Result<(), SinkError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        // Each sink retries on its own so one that already took the batch is
        // not written twice.
        for sink in &self.sinks {
            self.retry
                .run(&self.collection, || sink.write_batch(&self.collection, &self.buffer))?;
        }
        self.written += self.buffer.len() as u64;
        debug!(
            collection = %self.collection,
            batch = self.buffer.len(),
            total = self.written,
            "Wrote event batch"
        );
        self.buffer.clear();
        Ok(())
    }
}
