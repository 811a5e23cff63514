//! Log parsing and normalization module
//!
//! Turns `LineRecord`s into `TypedLogRecord`s, one parser instance per file.
//!
//! # Architecture
//!
//! - `traits.rs`: The `LogParser` trait
//! - `model.rs`: Formats, log types, collection names and the record type
//! - `timestamp.rs`: Timestamp grammars shared by the formats
//! - `formats/`: Individual format parser implementations
//!
//! Parsers never fabricate timestamps: a line whose time cannot be read is
//! a `ParseError::Timestamp`.

pub mod formats;
pub mod model;
pub mod timestamp;
pub mod traits;

pub use model::{LogFormat, LogType, ParseError, TypedLogRecord};
pub use traits::LogParser;

use formats::{HttpAccessParser, JsonParser, Log4jParser, PlainTextParser};

/// Create a fresh parser for one file.
pub fn parser_for(format: LogFormat) -> Box<dyn LogParser> {
    match format {
        LogFormat::Json => Box::new(JsonParser),
        LogFormat::Log4j => Box::new(Log4jParser::default()),
        LogFormat::HttpAccess => Box::new(HttpAccessParser),
        LogFormat::PlainText => Box::new(PlainTextParser),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_for_every_log_type() {
        for log_type in LogType::ALL {
            let parser = parser_for(log_type.format());
            assert_eq!(parser.format(), log_type.format());
        }
    }
}
