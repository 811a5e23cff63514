//! Typed events emitted by plugins.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::parser::model::{fields, format_timestamp};
use crate::store::{lookup, Document};

/// Why a plugin could not turn a document into events.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Missing field '{0}'")]
    MissingField(String),

    #[error("Field '{field}' is invalid: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Provenance shared by every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BaseEvent {
    pub file_name: String,
    pub file_path: String,
    pub line_number: u64,
    pub timestamp: DateTime<Utc>,
    pub worker: String,
}

impl BaseEvent {
    /// Lift provenance off a store document.
    pub fn from_document(doc: &Document) -> Result<Self, TransformError> {
        let raw_ts = str_field(doc, fields::TIMESTAMP)?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts)
            .map_err(|e| TransformError::InvalidField {
                field: fields::TIMESTAMP.to_string(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            file_name: str_field(doc, fields::FILE_NAME)?.to_string(),
            file_path: str_field(doc, fields::FILE_PATH)?.to_string(),
            line_number: u64_field(doc, fields::LINE_NUMBER)?,
            timestamp,
            worker: str_field(doc, fields::WORKER)?.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub event_type: String,
    #[serde(flatten)]
    pub base: BaseEvent,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, base: BaseEvent) -> Self {
        Self {
            event_type: event_type.into(),
            base,
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Copy `key` from `doc` when present.
    pub fn with_copied(mut self, doc: &Document, key: &str, as_name: &str) -> Self {
        if let Some(value) = lookup(doc, key).filter(|v| !v.is_null()) {
            self.fields.insert(as_name.to_string(), value.clone());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Store form: plugin fields, then `event_type` and provenance on top.
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert("event_type".into(), Value::String(self.event_type.clone()));
        doc.insert(fields::FILE_NAME.into(), Value::String(self.base.file_name.clone()));
        doc.insert(fields::FILE_PATH.into(), Value::String(self.base.file_path.clone()));
        doc.insert(fields::LINE_NUMBER.into(), Value::from(self.base.line_number));
        doc.insert(fields::WORKER.into(), Value::String(self.base.worker.clone()));
        doc.insert(
            fields::TIMESTAMP.into(),
            Value::String(format_timestamp(&self.base.timestamp)),
        );
        doc
    }
}

pub fn str_field<'a>(doc: &'a Document, key: &str) -> Result<&'a str, TransformError> {
    lookup(doc, key)
        .ok_or_else(|| TransformError::MissingField(key.to_string()))?
        .as_str()
        .ok_or_else(|| TransformError::InvalidField {
            field: key.to_string(),
            reason: "expected a string".into(),
        })
}

pub fn u64_field(doc: &Document, key: &str) -> Result<u64, TransformError> {
    lookup(doc, key)
        .ok_or_else(|| TransformError::MissingField(key.to_string()))?
        .as_u64()
        .ok_or_else(|| TransformError::InvalidField {
            field: key.to_string(),
            reason: "expected an unsigned integer".into(),
        })
}

pub fn f64_field(doc: &Document, key: &str) -> Result<f64, TransformError> {
    lookup(doc, key)
        .ok_or_else(|| TransformError::MissingField(key.to_string()))?
        .as_f64()
        .ok_or_else(|| TransformError::InvalidField {
            field: key.to_string(),
            reason: "expected a number".into(),
        })
}
