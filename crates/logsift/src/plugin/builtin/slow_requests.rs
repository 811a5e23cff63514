use super::httpd;
use crate::event::{f64_field, BaseEvent, Event, TransformError};
use crate::plugin::{Plugin, PluginDescriptor};
use crate::store::{Document, Filter, Projection};

pub const NAME: &str = "slow_requests";
pub const OUTPUT: &str = "slow_requests";

/// Requests at or above a latency threshold, read from the `httpd` output.
pub struct SlowRequestsPlugin {
    threshold_ms: u64,
}

impl SlowRequestsPlugin {
    pub fn new(threshold_ms: u64) -> Self {
        Self { threshold_ms }
    }
}

impl Plugin for SlowRequestsPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(NAME, OUTPUT)
            .reads(httpd::OUTPUT)
            .depends_on(httpd::NAME)
            .filter(Filter::gte("elapsed_ms", self.threshold_ms as f64))
            .projection(Projection::include([
                "method",
                "path",
                "status_code",
                "elapsed_ms",
                "request_id",
            ]))
            .workbook("SlowRequests")
    }

    fn transform(&mut self, _: &str, doc: &Document) -> Result<Vec<Event>, TransformError> {
        let elapsed = f64_field(doc, "elapsed_ms")?;
        let base = BaseEvent::from_document(doc)?;
        Ok(vec![Event::new("slow_request", base)
            .with("elapsed_ms", elapsed)
            .with("threshold_ms", self.threshold_ms)
            .with_copied(doc, "method", "method")
            .with_copied(doc, "path", "path")
            .with_copied(doc, "status_code", "status_code")
            .with_copied(doc, "request_id", "request_id")])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Query;
    use serde_json::{json, Value};

    fn doc(elapsed: u64) -> Document {
        match json!({
            "file_name": "access.log", "file_path": "access.log", "line_number": 2,
            "worker": "worker0", "timestamp": "2024-03-01T10:00:00.000Z",
            "event_type": "http_request", "path": "/views", "elapsed_ms": elapsed,
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_threshold_inclusive() {
        let d = SlowRequestsPlugin::new(1_000).descriptor();
        let query = Query::new(d.filter.unwrap(), d.projection.unwrap()).unwrap();
        assert!(query.matches(&doc(1_000)));
        assert!(query.matches(&doc(5_000)));
        assert!(!query.matches(&doc(999)));
    }

    #[test]
    fn test_transform() {
        let events = SlowRequestsPlugin::new(1_000)
            .transform(httpd::OUTPUT, &doc(2_500))
            .unwrap();
        assert_eq!(events[0].event_type, "slow_request");
        assert_eq!(events[0].get("elapsed_ms"), Some(&json!(2500.0)));
        assert_eq!(events[0].get("path"), Some(&json!("/views")));
    }
}
