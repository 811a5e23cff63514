use crate::parser::timestamp::parse_clf;
use crate::parser::traits::{LogFormat, LogParser, ParseError, TypedLogRecord};
use crate::reader::LineRecord;

/// Parser for HTTP access logs (Common Log Format and Combined Log Format).
///
/// Extracts remote host, user, timestamp, method, path, protocol, status
/// code, response size, referrer and user-agent. Two optional trailing
/// fields follow the combined layout: elapsed microseconds (numeric) and a
/// request id.
pub struct HttpAccessParser;

impl LogParser for HttpAccessParser {
    fn parse(&mut self, line: &LineRecord) -> Result<Option<TypedLogRecord>, ParseError> {
        let text = line.text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        // host ident authuser [date] "request" status bytes ["referrer" "user-agent"] [elapsed_us] [request_id]
        let open_bracket = text
            .find('[')
            .ok_or(ParseError::NoMatch(LogFormat::HttpAccess))?;
        let close_bracket = text[open_bracket..]
            .find(']')
            .map(|i| open_bracket + i)
            .ok_or_else(|| ParseError::InvalidFormat("Unterminated timestamp bracket".into()))?;

        let timestamp = parse_clf(&text[open_bracket + 1..close_bracket])?;
        let mut record = TypedLogRecord::new(line, timestamp);

        let prefix: Vec<&str> = text[..open_bracket].split_whitespace().collect();
        record.set_opt("remote_addr", prefix.first().copied());
        record.set_opt("user", prefix.get(2).copied());

        let after_bracket = text[close_bracket + 1..].trim_start();
        let request_str = after_bracket
            .strip_prefix('"')
            .ok_or_else(|| ParseError::InvalidFormat("Missing request line".into()))?;
        let quote_end = request_str
            .find('"')
            .ok_or_else(|| ParseError::InvalidFormat("Unterminated request line".into()))?;

        let mut request = request_str[..quote_end].splitn(3, ' ');
        record.set_opt("method", request.next());
        record.set_opt("path", request.next());
        record.set_opt("protocol", request.next());

        let mut rest = request_str[quote_end + 1..].trim_start();
        let (status, after_status) = next_token(rest);
        let status_code: u16 = status
            .parse()
            .map_err(|_| ParseError::InvalidFormat(format!("Invalid status code '{status}'")))?;
        record.set("status_code", status_code);

        let (size, after_size) = next_token(after_status);
        if let Ok(bytes) = size.parse::<u64>() {
            record.set("response_size", bytes);
        }
        rest = after_size;

        let mut chars = rest.chars();
        let referrer = extract_next_quoted(&mut chars);
        let user_agent = extract_next_quoted(&mut chars);
        record.set_opt("referrer", referrer.as_deref());
        record.set_opt("user_agent", user_agent.as_deref());
        let trailer: String = if referrer.is_some() { chars.collect() } else { rest.to_string() };

        for token in trailer.split_whitespace() {
            if let Ok(micros) = token.parse::<u64>() {
                if record.get("elapsed_ms").is_none() {
                    record.set("elapsed_us", micros);
                    record.set("elapsed_ms", micros / 1_000);
                    continue;
                }
            }
            if token != "-" && record.get("request_id").is_none() {
                record.set("request_id", token);
            }
        }

        Ok(Some(record))
    }

    fn format(&self) -> LogFormat {
        LogFormat::HttpAccess
    }
}

fn next_token(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(end) => (&text[..end], &text[end..]),
        None => (text, ""),
    }
}

/// Extract the next quoted string from a char iterator.
fn extract_next_quoted(chars: &mut std::str::Chars<'_>) -> Option<String> {
    // Skip whitespace; anything else means there is no quoted field here
    loop {
        match chars.clone().next() {
            Some('"') => {
                chars.next();
                break;
            }
            Some(c) if c.is_whitespace() => {
                chars.next();
            }
            _ => return None,
        }
    }
    let mut val = String::new();
    let mut escaped = false;
    for c in chars.by_ref() {
        if escaped {
            val.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Some(val);
        } else {
            val.push(c);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::formats::test_support::line;
    use serde_json::Value;

    #[test]
    fn test_parse_common_log_format() {
        let mut parser = HttpAccessParser;
        let raw = "127.0.0.1 - frank [10/Oct/2000:13:55:36 -0700] \"GET /apache_pb.gif HTTP/1.0\" 200 2326";
        let record = parser.parse(&line(1, raw)).unwrap().unwrap();
        assert_eq!(record.get("method"), Some(&Value::from("GET")));
        assert_eq!(record.get("path"), Some(&Value::from("/apache_pb.gif")));
        assert_eq!(record.get("protocol"), Some(&Value::from("HTTP/1.0")));
        assert_eq!(record.get("status_code"), Some(&Value::from(200)));
        assert_eq!(record.get("response_size"), Some(&Value::from(2326)));
        assert_eq!(record.get("remote_addr"), Some(&Value::from("127.0.0.1")));
        assert_eq!(record.get("user"), Some(&Value::from("frank")));
        assert!(record.get("elapsed_ms").is_none());
    }

    #[test]
    fn test_parse_combined_with_trailer() {
        let mut parser = HttpAccessParser;
        let raw = "10.0.0.5 - - [01/Mar/2024:10:00:00 +0000] \"POST /vizql/bootstrap HTTP/1.1\" 200 1024 \"https://example.com\" \"curl/7.68.0\" 15250000 ZeH3kQ";
        let record = parser.parse(&line(9, raw)).unwrap().unwrap();
        assert_eq!(record.get("referrer"), Some(&Value::from("https://example.com")));
        assert_eq!(record.get("user_agent"), Some(&Value::from("curl/7.68.0")));
        assert_eq!(record.get("elapsed_us"), Some(&Value::from(15_250_000u64)));
        assert_eq!(record.get("elapsed_ms"), Some(&Value::from(15_250u64)));
        assert_eq!(record.get("request_id"), Some(&Value::from("ZeH3kQ")));
        assert!(record.get("user").is_none());
    }

    #[test]
    fn test_dash_size_and_trailer_without_quotes() {
        let mut parser = HttpAccessParser;
        let raw = "10.0.0.1 - - [01/Feb/2024:12:00:00 +0000] \"GET /missing HTTP/1.1\" 404 - 1500 req-1";
        let record = parser.parse(&line(1, raw)).unwrap().unwrap();
        assert_eq!(record.get("status_code"), Some(&Value::from(404)));
        assert!(record.get("response_size").is_none());
        assert_eq!(record.get("elapsed_ms"), Some(&Value::from(1u64)));
        assert_eq!(record.get("request_id"), Some(&Value::from("req-1")));
    }

    #[test]
    fn test_parse_no_bracket() {
        let mut parser = HttpAccessParser;
        assert_eq!(
            parser.parse(&line(1, "Just some random text without brackets")),
            Err(ParseError::NoMatch(LogFormat::HttpAccess))
        );
    }

    #[test]
    fn test_bad_date() {
        let mut parser = HttpAccessParser;
        let raw = "10.0.0.1 - - [yesterday] \"GET / HTTP/1.1\" 200 1";
        assert!(parser.parse(&line(1, raw)).unwrap_err().is_timestamp());
    }

    #[test]
    fn test_bad_status() {
        let mut parser = HttpAccessParser;
        let raw = "10.0.0.1 - - [01/Feb/2024:12:00:00 +0000] \"GET / HTTP/1.1\" abc 1";
        assert!(matches!(
            parser.parse(&line(1, raw)),
            Err(ParseError::InvalidFormat(_))
        ));
    }
}
