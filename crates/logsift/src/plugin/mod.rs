//! Analysis plugins.
//!
//! A plugin declares what it reads (input collections plus a filter and a
//! projection), what it depends on, and where its events go. The scheduler
//! owns each instance and runs it at most once.

pub mod builtin;
pub mod harness;

use serde::Serialize;

use crate::event::{Event, TransformError};
use crate::store::{Document, Filter, Projection};

pub use harness::{execute, HarnessLimits, PluginError, PluginReport};

/// Static description of a plugin. Immutable after registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub inputs: Vec<String>,
    pub dependencies: Vec<String>,
    pub filter: Option<Filter>,
    pub projection: Option<Projection>,
    pub output: String,
    /// Workbook published from the output once the plugin completes.
    pub workbook: Option<String>,
}

impl PluginDescriptor {
    pub fn new(name: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: Vec::new(),
            dependencies: Vec::new(),
            filter: None,
            projection: None,
            output: output.to_string(),
            workbook: None,
        }
    }

    pub fn reads(mut self, collection: &str) -> Self {
        self.inputs.push(collection.to_string());
        self
    }

    pub fn depends_on(mut self, plugin: &str) -> Self {
        self.dependencies.push(plugin.to_string());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn workbook(mut self, name: &str) -> Self {
        self.workbook = Some(name.to_string());
        self
    }
}

pub trait Plugin: Send {
    fn descriptor(&self) -> PluginDescriptor;

    /// Turn one projected document from `collection` into events.
    fn transform(&mut self, collection: &str, doc: &Document) -> Result<Vec<Event>, TransformError>;

    /// Called once after the last document. Aggregating plugins emit here.
    fn finish(&mut self) -> Vec<Event> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let d = PluginDescriptor::new("slow", "slow_out")
            .reads("httpd_requests")
            .depends_on("httpd")
            .filter(Filter::gte("elapsed_ms", 10.0))
            .projection(Projection::include(["elapsed_ms"]))
            .workbook("Slow Requests");

        assert_eq!(d.inputs, vec!["httpd_requests"]);
        assert_eq!(d.dependencies, vec!["httpd"]);
        assert_eq!(d.output, "slow_out");
        assert_eq!(d.workbook.as_deref(), Some("Slow Requests"));
        assert!(d.filter.is_some() && d.projection.is_some());
    }
}
