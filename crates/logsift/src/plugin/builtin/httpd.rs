use crate::event::{BaseEvent, Event, TransformError};
use crate::parser::model::collections;
use crate::plugin::{Plugin, PluginDescriptor};
use crate::store::{Document, Filter, Projection};

pub const NAME: &str = "httpd";
pub const OUTPUT: &str = "httpd_requests";

const FIELDS: &[&str] = &[
    "remote_addr",
    "user",
    "method",
    "path",
    "protocol",
    "status_code",
    "response_size",
    "referrer",
    "user_agent",
    "request_id",
    "elapsed_ms",
];

/// One `http_request` event per access log line.
pub struct HttpdPlugin;

impl Plugin for HttpdPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(NAME, OUTPUT)
            .reads(collections::PROTOCOL_SERVER)
            .filter(Filter::exists("status_code"))
            .projection(Projection::include(FIELDS.iter().copied()))
            .workbook("Apache")
    }

    fn transform(&mut self, _: &str, doc: &Document) -> Result<Vec<Event>, TransformError> {
        let base = BaseEvent::from_document(doc)?;
        let event = FIELDS
            .iter()
            .fold(Event::new("http_request", base), |event, field| {
                event.with_copied(doc, field, field)
            });
        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_transform_copies_request_fields() {
        let doc = match json!({
            "file_name": "access.log", "file_path": "access.log", "line_number": 1,
            "worker": "worker0", "timestamp": "2024-03-01T10:00:00.000Z",
            "method": "GET", "path": "/", "status_code": 200, "elapsed_ms": 12,
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let events = HttpdPlugin.transform(collections::PROTOCOL_SERVER, &doc).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "http_request");
        assert_eq!(events[0].get("elapsed_ms"), Some(&json!(12)));
        assert!(events[0].get("referrer").is_none());
    }
}
