pub use super::model::{LogFormat, ParseError, TypedLogRecord};
use crate::reader::LineRecord;

pub trait LogParser: Send {
    /// Parse one physical line. `Ok(None)` means the line was consumed
    /// without completing a record (blank line, buffered continuation).
    fn parse(&mut self, line: &LineRecord) -> Result<Option<TypedLogRecord>, ParseError>;

    /// Flush a buffered multi-line record at end of stream.
    fn finish(&mut self) -> Option<TypedLogRecord> {
        None
    }

    fn format(&self) -> LogFormat;
}
