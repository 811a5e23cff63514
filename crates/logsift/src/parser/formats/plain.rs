use crate::parser::timestamp::{parse_iso, starts_with_date};
use crate::parser::traits::{LogFormat, LogParser, ParseError, TypedLogRecord};
use crate::reader::LineRecord;

/// Parser for timestamped free text. The line must open with a date; the
/// time is the second token, optionally followed by a zone token.
pub struct PlainTextParser;

impl LogParser for PlainTextParser {
    fn parse(&mut self, line: &LineRecord) -> Result<Option<TypedLogRecord>, ParseError> {
        let text = line.text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if !starts_with_date(text) {
            let head = text.split_whitespace().next().unwrap_or(text);
            return Err(ParseError::Timestamp(head.to_string()));
        }

        let (timestamp, message) = split_timestamp(text)?;
        let mut record = TypedLogRecord::new(line, timestamp);
        record.set("message", message);
        Ok(Some(record))
    }

    fn format(&self) -> LogFormat {
        LogFormat::PlainText
    }
}

/// Try the longest prefix first: three tokens, then two, then one.
fn split_timestamp(text: &str) -> Result<(chrono::DateTime<chrono::Utc>, &str), ParseError> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .filter(|(_, c)| c.is_whitespace())
        .map(|(i, _)| i)
        .take(3)
        .collect();

    for count in (0..=boundaries.len().min(2)).rev() {
        let end = boundaries.get(count).copied().unwrap_or(text.len());
        let candidate = &text[..end];
        if let Ok(ts) = parse_iso(&zulu(candidate)) {
            return Ok((ts, text[end..].trim()));
        }
    }

    let head = text.split_whitespace().next().unwrap_or(text);
    Err(ParseError::Timestamp(head.to_string()))
}

/// `2024-03-01 10:00:00 UTC` is common in text logs; rewrite the zone name
/// so the ISO grammar accepts it.
fn zulu(candidate: &str) -> String {
    match candidate.strip_suffix(" UTC").or_else(|| candidate.strip_suffix(" GMT")) {
        Some(stripped) => format!("{stripped}Z").replacen(' ', "T", 1),
        None => candidate.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::formats::test_support::line;
    use chrono::Timelike;
    use serde_json::Value;

    #[test]
    fn test_iso_prefix() {
        let mut parser = PlainTextParser;
        let record = parser
            .parse(&line(1, "2024-03-01T10:00:00Z tcp 0 0 10.0.0.1:443 ESTABLISHED"))
            .unwrap()
            .unwrap();
        assert_eq!(record.timestamp.hour(), 10);
        assert_eq!(
            record.get("message"),
            Some(&Value::from("tcp 0 0 10.0.0.1:443 ESTABLISHED"))
        );
    }

    #[test]
    fn test_space_separated_with_zone() {
        let mut parser = PlainTextParser;
        let record = parser
            .parse(&line(1, "2024-03-01 10:00:00.500 UTC [412] LOG: checkpoint"))
            .unwrap()
            .unwrap();
        assert_eq!(record.timestamp.timestamp_subsec_millis(), 500);
        assert_eq!(record.get("message"), Some(&Value::from("[412] LOG: checkpoint")));

        let record = parser
            .parse(&line(2, "2024-03-01 10:00:00 +0200 listening"))
            .unwrap()
            .unwrap();
        assert_eq!(record.timestamp.hour(), 8);
        assert_eq!(record.get("message"), Some(&Value::from("listening")));
    }

    #[test]
    fn test_missing_timestamp_is_error() {
        let mut parser = PlainTextParser;
        assert_eq!(
            parser.parse(&line(1, "Active Internet connections")),
            Err(ParseError::Timestamp("Active".into()))
        );
        assert!(parser.parse(&line(2, "2024-99-99 nope")).unwrap_err().is_timestamp());
    }

    #[test]
    fn test_blank_line() {
        let mut parser = PlainTextParser;
        assert_eq!(parser.parse(&line(1, "")).unwrap(), None);
    }
}
