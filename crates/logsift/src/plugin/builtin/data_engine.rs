use serde_json::Value;

use crate::event::{BaseEvent, Event, TransformError};
use crate::parser::model::collections;
use crate::plugin::{Plugin, PluginDescriptor};
use crate::store::{Document, Filter, Projection};

pub const NAME: &str = "data_engine";
pub const OUTPUT: &str = "data_engine_events";

const QUERY_END: &str = "query-end";
const CONNECTION_OPEN: &str = "connection-open";

/// Query completions and new connections from the data engine log.
pub struct DataEnginePlugin;

impl Plugin for DataEnginePlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(NAME, OUTPUT)
            .reads(collections::DATA_ENGINE)
            .filter(Filter::any_of("key", [QUERY_END, CONNECTION_OPEN]))
            .projection(Projection::include([
                "key",
                "value",
                "process_id",
                "session_id",
                "username",
            ]))
    }

    fn transform(&mut self, _: &str, doc: &Document) -> Result<Vec<Event>, TransformError> {
        let base = BaseEvent::from_document(doc)?;
        let key = doc.get("key").and_then(Value::as_str).unwrap_or_default();
        let value = doc.get("value").and_then(Value::as_object);

        let event = match key {
            QUERY_END => {
                let value = value.ok_or_else(|| TransformError::MissingField("value".into()))?;
                let elapsed = value.get("elapsed").and_then(Value::as_f64).ok_or_else(|| {
                    TransformError::InvalidField {
                        field: "value.elapsed".into(),
                        reason: "expected seconds as a number".into(),
                    }
                })?;
                let mut event =
                    Event::new("query_end", base).with("elapsed_ms", (elapsed * 1_000.0).round());
                for name in ["rows", "query", "protocol-id", "cols"] {
                    if let Some(v) = value.get(name) {
                        event = event.with(&name.replace('-', "_"), v.clone());
                    }
                }
                event
            }
            CONNECTION_OPEN => {
                let mut event = Event::new("connection", base);
                if let Some(value) = value {
                    for name in ["client-type", "client-host", "db-name"] {
                        if let Some(v) = value.get(name) {
                            event = event.with(&name.replace('-', "_"), v.clone());
                        }
                    }
                }
                event
            }
            other => {
                return Err(TransformError::InvalidField {
                    field: "key".into(),
                    reason: format!("unexpected key '{other}'"),
                })
            }
        };

        Ok(vec![event
            .with_copied(doc, "process_id", "process_id")
            .with_copied(doc, "session_id", "session_id")
            .with_copied(doc, "username", "username")])
    }
}
