use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::errors;
use crate::event::{str_field, BaseEvent, Event, TransformError};
use crate::parser::model::format_timestamp;
use crate::plugin::{Plugin, PluginDescriptor};
use crate::store::{Document, Filter, Projection};

pub const NAME: &str = "error_summary";
pub const OUTPUT: &str = "error_summary";

struct Tally {
    count: u64,
    first: BaseEvent,
    last_seen: DateTime<Utc>,
}

/// Error counts per worker and log type, emitted once in `finish`.
#[derive(Default)]
pub struct ErrorSummaryPlugin {
    tallies: BTreeMap<(String, String), Tally>,
}

impl Plugin for ErrorSummaryPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        PluginDescriptor::new(NAME, OUTPUT)
            .reads(errors::OUTPUT)
            .depends_on(errors::NAME)
            .filter(Filter::exists("log_type"))
            .projection(Projection::include(["log_type"]))
    }

    fn transform(&mut self, _: &str, doc: &Document) -> Result<Vec<Event>, TransformError> {
        let base = BaseEvent::from_document(doc)?;
        let log_type = str_field(doc, "log_type")?.to_string();
        let key = (base.worker.clone(), log_type);

        match self.tallies.get_mut(&key) {
            Some(tally) => {
                tally.count += 1;
                if base.timestamp < tally.first.timestamp {
                    tally.first = base;
                } else if base.timestamp > tally.last_seen {
                    tally.last_seen = base.timestamp;
                }
            }
            None => {
                let last_seen = base.timestamp;
                self.tallies.insert(key, Tally { count: 1, first: base, last_seen });
            }
        }
        Ok(Vec::new())
    }

    fn finish(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.tallies)
            .into_iter()
            .map(|((_, log_type), tally)| {
                let first_seen = format_timestamp(&tally.first.timestamp);
                Event::new("error_summary", tally.first)
                    .with("log_type", log_type)
                    .with("count", tally.count)
                    .with("first_seen", first_seen)
                    .with("last_seen", format_timestamp(&tally.last_seen))
            })
            .collect()
    }
}
