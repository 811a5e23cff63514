use crate::event::{BaseEvent, Event, TransformError};
use crate::parser::model::{collections, LogType};
use crate::plugin::{Plugin, PluginDescriptor};
use crate::store::{Document, Filter, Projection};

pub const NAME: &str = "errors";
pub const OUTPUT: &str = "error_events";

const SOURCES: &[&str] = &[
    collections::BACKGROUNDER,
    collections::CONTROLLER,
    collections::DATA_ENGINE,
    collections::DESKTOP,
];

/// Error and fatal entries across the java and JSON logs.
pub struct ErrorsPlugin;

impl Plugin for ErrorsPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        SOURCES
            .iter()
            .fold(PluginDescriptor::new(NAME, OUTPUT), |d, c| d.reads(c))
            .filter(Filter::matches("severity", "^(error|fatal)$"))
            .projection(Projection::include([
                "severity",
                "message",
                "logger",
                "service",
                "key",
                "stack_trace",
            ]))
            .workbook("Errors")
    }

    fn transform(&mut self, collection: &str, doc: &Document) -> Result<Vec<Event>, TransformError> {
        let base = BaseEvent::from_document(doc)?;
        let log_type = LogType::for_collection(collection)
            .map(|t| t.as_str())
            .unwrap_or(collection);

        Ok(vec![Event::new("error", base)
            .with("log_type", log_type)
            .with_copied(doc, "severity", "severity")
            .with_copied(doc, "message", "message")
            .with_copied(doc, "logger", "logger")
            .with_copied(doc, "service", "service")
            .with_copied(doc, "key", "key")
            .with_copied(doc, "stack_trace", "stack_trace")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Query;
    use serde_json::{json, Value};

    fn doc(severity: &str) -> Document {
        match json!({
            "file_name": "backgrounder_1.log", "file_path": "backgrounder_1.log", "line_number": 9,
            "worker": "worker1", "timestamp": "2024-03-01T10:00:00.000Z",
            "severity": severity, "message": "Job failed", "logger": "com.example.Job",
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_filter_selects_errors() {
        let d = ErrorsPlugin.descriptor();
        let query = Query::new(d.filter.unwrap(), d.projection.unwrap()).unwrap();
        assert!(query.matches(&doc("error")));
        assert!(query.matches(&doc("FATAL")));
        assert!(!query.matches(&doc("info")));
        assert!(!query.matches(&doc("error-ish")));
    }

    #[test]
    fn test_event_names_log_type() {
        let events = ErrorsPlugin.transform(collections::BACKGROUNDER, &doc("error")).unwrap();
        assert_eq!(events[0].event_type, "error");
        assert_eq!(events[0].get("log_type"), Some(&json!("backgrounder")));
        assert_eq!(events[0].get("message"), Some(&json!("Job failed")));
    }
}
