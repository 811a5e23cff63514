use serde_json::Value;

use crate::parser::timestamp::{parse_log4j, starts_with_date};
use crate::parser::traits::{LogFormat, LogParser, ParseError, TypedLogRecord};
use crate::reader::LineRecord;

/// Continuation lines attached to one record before the rest are dropped.
pub const MAX_CONTINUATION_LINES: usize = 500;

/// `YYYY-MM-DD HH:MM:SS.fff ±zzzz`
const HEADER_TIME_LEN: usize = 29;

/// Parser for log4j style java logs:
///
/// ```text
/// 2024-03-01 10:00:00.123 -0800 (Default,alice,S1,R9) pool-2-thread-1 backgrounder: ERROR com.example.Job - Job failed
/// java.lang.IllegalStateException: boom
///     at com.example.Job.run(Job.java:42)
/// ```
///
/// Lines without a header are continuations of the pending record. A record
/// is emitted when the next header arrives or at `finish()`.
#[derive(Default)]
pub struct Log4jParser {
    pending: Option<Pending>,
}

struct Pending {
    record: TypedLogRecord,
    continuation: Vec<String>,
    dropped: usize,
}

impl Pending {
    fn into_record(self) -> TypedLogRecord {
        let mut record = self.record;
        if !self.continuation.is_empty() {
            let message = record
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let trace = self.continuation.join("\n");
            record.set("message", format!("{message}\n{trace}"));
            record.set("stack_trace", trace);
        }
        if self.dropped > 0 {
            record.set("truncated_lines", self.dropped as u64);
        }
        record
    }
}

impl LogParser for Log4jParser {
    fn parse(&mut self, line: &LineRecord) -> Result<Option<TypedLogRecord>, ParseError> {
        if !starts_with_date(&line.text) {
            return match self.pending.as_mut() {
                Some(pending) => {
                    if pending.continuation.len() < MAX_CONTINUATION_LINES {
                        pending.continuation.push(line.text.trim_end().to_string());
                    } else {
                        pending.dropped += 1;
                    }
                    Ok(None)
                }
                None if line.text.trim().is_empty() => Ok(None),
                None => Err(ParseError::NoMatch(LogFormat::Log4j)),
            };
        }

        // A malformed header leaves the pending record open.
        let record = parse_header(line)?;
        let previous = self.pending.replace(Pending {
            record,
            continuation: Vec::new(),
            dropped: 0,
        });
        Ok(previous.map(Pending::into_record))
    }

    fn finish(&mut self) -> Option<TypedLogRecord> {
        self.pending.take().map(Pending::into_record)
    }

    fn format(&self) -> LogFormat {
        LogFormat::Log4j
    }
}

fn parse_header(line: &LineRecord) -> Result<TypedLogRecord, ParseError> {
    let text = line.text.trim_end();
    let time = text
        .get(..HEADER_TIME_LEN)
        .ok_or_else(|| ParseError::Timestamp(text.to_string()))?;
    let timestamp = parse_log4j(time)?;
    let mut record = TypedLogRecord::new(line, timestamp);

    let mut rest = text[HEADER_TIME_LEN..].trim_start();

    if let Some(context) = rest.strip_prefix('(') {
        let close = context
            .find(')')
            .ok_or_else(|| ParseError::InvalidFormat("unterminated context block".into()))?;
        let mut parts = context[..close].split(',').map(str::trim);
        record.set_opt("site", parts.next());
        record.set_opt("username", parts.next());
        record.set_opt("session_id", parts.next());
        record.set_opt("request_id", parts.next());
        rest = context[close + 1..].trim_start();
    }

    let (thread, after_thread) = split_token(rest)
        .ok_or_else(|| ParseError::InvalidFormat("missing thread".into()))?;
    record.set("thread", thread);

    let (service, after_service) = split_token(after_thread)
        .ok_or_else(|| ParseError::InvalidFormat("missing service".into()))?;
    // `service:` or `service :`
    let after_service = after_service.trim_start();
    let after_service = after_service.strip_prefix(':').unwrap_or(after_service);
    record.set("service", service.trim_end_matches(':'));

    let (level, after_level) = split_token(after_service)
        .ok_or_else(|| ParseError::InvalidFormat("missing level".into()))?;
    record.set("severity", level.to_ascii_lowercase());

    let (logger, after_logger) = split_token(after_level).unwrap_or((after_level.trim(), ""));
    if !logger.is_empty() {
        record.set("logger", logger);
    }

    let message = after_logger.trim_start();
    let message = message.strip_prefix('-').unwrap_or(message).trim();
    record.set("message", message);

    Ok(record)
}

/// Next whitespace-delimited token and the remainder after it.
fn split_token(text: &str) -> Option<(&str, &str)> {
    let text = text.trim_start();
    if text.is_empty() {
        return None;
    }
    match text.find(char::is_whitespace) {
        Some(end) => Some((&text[..end], &text[end..])),
        None => Some((text, "")),
    }
}
