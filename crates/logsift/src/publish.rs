//! Workbook publication for plugins that declare one.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkbookRequest {
    pub run_id: String,
    pub plugin: String,
    pub workbook: String,
    /// Collection the workbook is built from.
    pub collection: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishResult {
    pub workbook: String,
    pub workbook_id: Option<String>,
    pub uri: Option<String>,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub publish_date: DateTime<Utc>,
}

impl PublishResult {
    pub fn failed(request: &WorkbookRequest, error: impl Into<String>) -> Self {
        Self {
            workbook: request.workbook.clone(),
            workbook_id: None,
            uri: None,
            is_successful: false,
            error_message: Some(error.into()),
            publish_date: Utc::now(),
        }
    }
}

/// Publishes derived workbooks. Failures are returned in the result, never
/// raised.
#[cfg_attr(test, mockall::automock)]
pub trait WorkbookPublisher: Send + Sync {
    fn is_enabled(&self) -> bool {
        true
    }

    fn publish(&self, request: &WorkbookRequest) -> PublishResult;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledPublisher;

impl WorkbookPublisher for DisabledPublisher {
    fn is_enabled(&self) -> bool {
        false
    }

    fn publish(&self, request: &WorkbookRequest) -> PublishResult {
        PublishResult::failed(request, "publishing disabled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_publisher() {
        let request = WorkbookRequest {
            run_id: "r1".into(),
            plugin: "errors".into(),
            workbook: "Errors".into(),
            collection: "error_events".into(),
        };
        let result = DisabledPublisher.publish(&request);
        assert!(!DisabledPublisher.is_enabled());
        assert!(!result.is_successful);
        assert_eq!(result.workbook, "Errors");
        assert_eq!(result.error_message.as_deref(), Some("publishing disabled"));
    }
}
