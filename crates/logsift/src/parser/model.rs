use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::reader::LineRecord;
use crate::store::Document;

/// Collection names shared by parsers and plugins.
pub mod collections {
    pub const DATA_ENGINE: &str = "hyper";
    pub const DESKTOP: &str = "desktop";
    pub const PROTOCOL_SERVER: &str = "httpd";
    pub const BACKGROUNDER: &str = "backgrounder";
    pub const CONTROLLER: &str = "controller";
    pub const NETSTAT: &str = "netstat";
}

/// Provenance field names carried by every stored record and every event.
pub mod fields {
    pub const FILE_NAME: &str = "file_name";
    pub const FILE_PATH: &str = "file_path";
    pub const LINE_NUMBER: &str = "line_number";
    pub const WORKER: &str = "worker";
    pub const TIMESTAMP: &str = "timestamp";

    pub const PROVENANCE: [&str; 5] = [FILE_NAME, FILE_PATH, LINE_NUMBER, WORKER, TIMESTAMP];

    pub fn is_provenance(field: &str) -> bool {
        PROVENANCE.contains(&field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Java log4j layout, multi-line stack traces
    Log4j,
    /// Apache/httpd access logs
    HttpAccess,
    /// Timestamped free text
    PlainText,
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Log4j => "log4j",
            LogFormat::HttpAccess => "http_access",
            LogFormat::PlainText => "plain_text",
        }
    }
}

/// Kind of log file. Each one has exactly one format and one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    DataEngine,
    Desktop,
    ProtocolServer,
    Backgrounder,
    Controller,
    Netstat,
}

impl LogType {
    pub const ALL: [LogType; 6] = [
        LogType::DataEngine,
        LogType::Desktop,
        LogType::ProtocolServer,
        LogType::Backgrounder,
        LogType::Controller,
        LogType::Netstat,
    ];

    pub fn format(&self) -> LogFormat {
        match self {
            LogType::DataEngine | LogType::Desktop => LogFormat::Json,
            LogType::ProtocolServer => LogFormat::HttpAccess,
            LogType::Backgrounder | LogType::Controller => LogFormat::Log4j,
            LogType::Netstat => LogFormat::PlainText,
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            LogType::DataEngine => collections::DATA_ENGINE,
            LogType::Desktop => collections::DESKTOP,
            LogType::ProtocolServer => collections::PROTOCOL_SERVER,
            LogType::Backgrounder => collections::BACKGROUNDER,
            LogType::Controller => collections::CONTROLLER,
            LogType::Netstat => collections::NETSTAT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::DataEngine => "data_engine",
            LogType::Desktop => "desktop",
            LogType::ProtocolServer => "protocol_server",
            LogType::Backgrounder => "backgrounder",
            LogType::Controller => "controller",
            LogType::Netstat => "netstat",
        }
    }

    /// Log type owning a collection, if it is a log-type collection at all.
    pub fn for_collection(collection: &str) -> Option<LogType> {
        LogType::ALL.into_iter().find(|t| t.collection() == collection)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Line does not match the {} format", .0.as_str())]
    NoMatch(LogFormat),

    #[error("Unparseable timestamp '{0}'")]
    Timestamp(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl ParseError {
    pub fn is_timestamp(&self) -> bool {
        matches!(self, ParseError::Timestamp(_))
    }
}

/// One parsed log entry with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypedLogRecord {
    pub file_name: String,
    pub file_path: String,
    pub line_number: u64,
    pub worker: String,
    pub timestamp: DateTime<Utc>,
    /// Format-specific fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TypedLogRecord {
    pub fn new(line: &LineRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            file_name: line.file.file_name.clone(),
            file_path: line.file.file_path.clone(),
            line_number: line.line_number,
            worker: line.file.worker.clone(),
            timestamp,
            fields: Map::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.fields.insert(key.to_string(), value.into());
    }

    /// Set `key` only when there is a meaningful value (`-` counts as absent).
    pub fn set_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !v.is_empty() && *v != "-") {
            self.set(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Flatten into a store document. Provenance wins over a format field of
    /// the same name.
    pub fn into_document(self) -> Document {
        let mut doc = self.fields;
        doc.insert(fields::FILE_NAME.into(), Value::String(self.file_name));
        doc.insert(fields::FILE_PATH.into(), Value::String(self.file_path));
        doc.insert(fields::LINE_NUMBER.into(), Value::from(self.line_number));
        doc.insert(fields::WORKER.into(), Value::String(self.worker));
        doc.insert(
            fields::TIMESTAMP.into(),
            Value::String(format_timestamp(&self.timestamp)),
        );
        doc
    }
}

/// Canonical text form used for stored timestamps.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
