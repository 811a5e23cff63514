use serde_json::{Map, Value};

use crate::parser::timestamp::parse_iso;
use crate::parser::traits::{LogFormat, LogParser, ParseError, TypedLogRecord};
use crate::reader::LineRecord;

/// Short keys of the JSON log layout and the field names they are stored under.
const KEY_MAP: &[(&str, &str)] = &[
    ("pid", "process_id"),
    ("tid", "thread_id"),
    ("sev", "severity"),
    ("req", "request_id"),
    ("sess", "session_id"),
    ("site", "site"),
    ("user", "username"),
    ("k", "key"),
    ("v", "value"),
];

/// Parser for one-object-per-line JSON logs (data engine, desktop).
///
/// `ts` is mandatory. Known short keys are renamed, `-` placeholders are
/// dropped, and any other key is kept verbatim.
pub struct JsonParser;

impl LogParser for JsonParser {
    fn parse(&mut self, line: &LineRecord) -> Result<Option<TypedLogRecord>, ParseError> {
        let text = line.text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if !text.starts_with('{') {
            return Err(ParseError::NoMatch(LogFormat::Json));
        }

        let mut object: Map<String, Value> = serde_json::from_str(text)
            .map_err(|e| ParseError::InvalidFormat(format!("invalid JSON: {e}")))?;

        let timestamp = match object.remove("ts") {
            Some(Value::String(ts)) => parse_iso(&ts)?,
            Some(other) => return Err(ParseError::Timestamp(other.to_string())),
            None => return Err(ParseError::InvalidFormat("missing 'ts' field".into())),
        };

        let mut record = TypedLogRecord::new(line, timestamp);
        for (short, long) in KEY_MAP {
            if let Some(value) = object.remove(*short) {
                if !is_placeholder(&value) {
                    record.set(long, value);
                }
            }
        }
        for (key, value) in object {
            if !is_placeholder(&value) {
                record.fields.insert(key, value);
            }
        }

        if let Some(Value::String(sev)) = record.fields.get_mut("severity") {
            sev.make_ascii_lowercase();
        }

        Ok(Some(record))
    }

    fn format(&self) -> LogFormat {
        LogFormat::Json
    }
}

fn is_placeholder(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "-",
        _ => false,
    }
}
