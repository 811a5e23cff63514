//! One end-to-end run over a log set.
//!
//! Order: validate config and plugins, open the summary sink, enumerate and
//! ingest files, run plugins, publish workbooks, write the summary row.
//! Nothing is read from disk before configuration and plugin resolution
//! succeed.

mod report;

pub use report::RunReport;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifact::{self, WorkerMatcher};
use crate::conf::RunConfig;
use crate::error::RunError;
use crate::ingest::{self, IngestOptions};
use crate::plugin::{builtin, HarnessLimits, Plugin};
use crate::publish::{DisabledPublisher, PublishResult, WorkbookPublisher, WorkbookRequest};
use crate::router::PatternRouter;
use crate::schedule::{self, PluginOutcome, PluginState, Scheduler, SchedulerOptions};
use crate::status::{RunStatus, StatusReporter, StatusSink, TracingStatusSink};
use crate::store::IntermediateStore;
use crate::writer::{
    EventSink, JsonLinesSink, RetryPolicy, RunSummary, SinkError, SqliteSummarySink, StoreSink,
    SummarySink,
};

pub struct Pipeline {
    config: RunConfig,
    plugins: Option<Vec<Box<dyn Plugin>>>,
    summary: Option<Arc<dyn SummarySink>>,
    status_sink: Arc<dyn StatusSink>,
    publisher: Arc<dyn WorkbookPublisher>,
    event_sinks: Vec<Arc<dyn EventSink>>,
}

impl Pipeline {
    /// Built-in plugins, SQLite summary at `summary.database`, status to
    /// `tracing`, publishing disabled.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            plugins: None,
            summary: None,
            status_sink: Arc::new(TracingStatusSink),
            publisher: Arc::new(DisabledPublisher),
            event_sinks: Vec::new(),
        }
    }

    /// Replace the built-in plugin set.
    pub fn with_plugins(mut self, plugins: Vec<Box<dyn Plugin>>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn with_summary_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.summary = Some(sink);
        self
    }

    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.status_sink = sink;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn WorkbookPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Extra sink receiving every plugin event.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sinks.push(sink);
        self
    }

    pub async fn run(self, log_set: &Path, cancel: &CancellationToken) -> Result<RunReport, RunError> {
        let Pipeline {
            config,
            plugins,
            summary,
            status_sink,
            publisher,
            event_sinks,
        } = self;

        config.validate()?;
        let router = PatternRouter::from_config(&config.routing)?;
        let workers = WorkerMatcher::new(&config.ingest.worker_pattern)?;
        let plugins = match plugins {
            Some(plugins) => plugins,
            None => builtin::from_config(&config.plugins)?,
        };
        let plan = schedule::resolve(plugins)?;
        debug!(plugins = plan.schedule().len(), rules = router.len(), "Configuration resolved");

        let summary_sink = match summary {
            Some(sink) => sink,
            None => open_summary(&config).await?,
        };
        let retry = RetryPolicy::new(
            config.writer.write_retries,
            Duration::from_millis(config.writer.retry_backoff_ms),
        );

        let store = Arc::new(IntermediateStore::new());
        let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(StoreSink::new(Arc::clone(&store)))];
        if let Some(dir) = &config.writer.output_dir {
            sinks.push(Arc::new(JsonLinesSink::new(dir).map_err(RunError::Output)?));
        }
        sinks.extend(event_sinks);

        let summary = RunSummary::begin(log_set);
        info!(run_id = %summary.run_id, log_set = %log_set.display(), "Run started");

        let root = log_set.to_path_buf();
        let enumeration = tokio::task::spawn_blocking(move || artifact::enumerate(&root, &workers))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))
            .and_then(|r| r)
            .map_err(|source| RunError::LogSet {
                path: log_set.to_path_buf(),
                source,
            })?;
        info!(
            files = enumeration.files.len(),
            unreadable = enumeration.errors.len(),
            "Log set enumerated"
        );

        let status = Arc::new(RunStatus::new());
        let reporter = StatusReporter::start(
            Arc::clone(&status),
            status_sink,
            Duration::from_millis(config.status.interval_ms),
        );

        let unreadable = ingest::record_unreadable(&enumeration.errors, &status);
        let mut files = ingest::ingest_files(
            enumeration.files,
            log_set,
            &router,
            Arc::clone(&store),
            Arc::clone(&status),
            IngestOptions {
                file_concurrency: config.ingest.file_concurrency,
                max_bad_lines: config.ingest.max_bad_lines,
                batch_size: config.ingest.batch_size,
            },
            cancel,
        )
        .await;
        files.extend(unreadable);

        let scheduler = Scheduler::new(
            SchedulerOptions {
                plugin_concurrency: config.plugins.plugin_concurrency,
                limits: HarnessLimits {
                    max_bad_documents: config.plugins.max_bad_documents,
                },
                cancel_grace: Duration::from_millis(config.plugins.cancel_grace_ms),
                sinks,
                batch_size: config.writer.batch_size,
                retry,
            },
            Arc::clone(&store),
            Arc::clone(&status),
        );
        let plugins = scheduler.run(plan, cancel).await;

        let publications = if cancel.is_cancelled() {
            Vec::new()
        } else {
            publish_workbooks(&publisher, &summary.run_id, &plugins).await
        };

        reporter.stop().await;

        let cancelled = cancel.is_cancelled();
        let summary_error = if cancelled {
            warn!(run_id = %summary.run_id, "Run cancelled, summary not written");
            None
        } else {
            write_summary(summary_sink, summary.clone(), retry).await.err()
        };

        let report = RunReport {
            run_id: summary.run_id,
            start_timestamp: summary.start_timestamp,
            log_set_location: summary.log_set_location,
            files,
            plugins,
            publications,
            collections: store.collections(),
            status: status.snapshot(),
            cancelled,
            summary_written: !cancelled && summary_error.is_none(),
            summary_error,
        };

        info!(
            run_id = %report.run_id,
            exit_status = report.exit_status().as_str(),
            files = report.files.len(),
            failed_files = report.failed_files().count(),
            failed_plugins = report.failed_plugins().count(),
            "Run finished"
        );
        Ok(report)
    }
}

async fn open_summary(config: &RunConfig) -> Result<Arc<dyn SummarySink>, RunError> {
    let path = config.summary.database.clone();
    let sink = tokio::task::spawn_blocking(move || SqliteSummarySink::open(&path))
        .await
        .map_err(|e| SinkError::Permanent(e.to_string()))??;
    Ok(Arc::new(sink))
}

async fn write_summary(
    sink: Arc<dyn SummarySink>,
    summary: RunSummary,
    retry: RetryPolicy,
) -> Result<(), SinkError> {
    let result = tokio::task::spawn_blocking(move || {
        retry.run("run_summary", || sink.write_summary(&summary))
    })
    .await
    .map_err(|e| SinkError::Permanent(e.to_string()))
    .and_then(|r| r);

    if let Err(e) = &result {
        error!(error = %e, "Failed to write run summary");
    }
    result
}

/// Publish the workbook of every completed plugin that declares one.
async fn publish_workbooks(
    publisher: &Arc<dyn WorkbookPublisher>,
    run_id: &str,
    plugins: &[PluginOutcome],
) -> Vec<PublishResult> {
    if !publisher.is_enabled() {
        debug!("Workbook publishing disabled");
        return Vec::new();
    }

    let requests: Vec<WorkbookRequest> = plugins
        .iter()
        .filter(|p| p.state == PluginState::Completed)
        .filter_map(|p| {
            p.workbook.as_ref().map(|workbook| WorkbookRequest {
                run_id: run_id.to_string(),
                plugin: p.name.clone(),
                workbook: workbook.clone(),
                collection: p.output.clone(),
            })
        })
        .collect();

    let publisher = Arc::clone(publisher);
    let results = tokio::task::spawn_blocking(move || {
        requests
            .iter()
            .map(|request| {
                let result = publisher.publish(request);
                if result.is_successful {
                    info!(workbook = %request.workbook, uri = ?result.uri, "Workbook published");
                } else {
                    warn!(
                        workbook = %request.workbook,
                        error = result.error_message.as_deref().unwrap_or("unknown"),
                        "Workbook publication failed"
                    );
                }
                result
            })
            .collect::<Vec<_>>()
    })
    .await;

    results.unwrap_or_else(|e| {
        warn!(error = %e, "Workbook publishing task failed");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExitStatus;
    use crate::publish::MockWorkbookPublisher;
    use crate::writer::MockSummarySink;
    use std::fs;

    fn config() -> RunConfig {
        let mut config = RunConfig::default();
        config.status.interval_ms = 3_600_000;
        config.writer.retry_backoff_ms = 1;
        config
    }

    fn log_set() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("worker1")).unwrap();
        fs::write(
            dir.path().join("worker1/access.2024-03-01.log"),
            "10.0.0.1 - - [01/Mar/2024:10:00:00 +0000] \"GET /views HTTP/1.1\" 200 512 \"-\" \"curl\" req-1 20000000\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn test_summary_written_once_on_success() {
        let dir = log_set();
        let mut summary = MockSummarySink::new();
        summary.expect_write_summary().times(1).returning(|_| Ok(()));

        let report = Pipeline::new(config())
            .with_summary_sink(Arc::new(summary))
            .run(dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.summary_written);
        assert_eq!(report.exit_status(), ExitStatus::Success);
        assert_eq!(report.plugin("httpd").unwrap().state, PluginState::Completed);
        assert_eq!(report.plugin("slow_requests").unwrap().state, PluginState::Completed);
    }

    #[tokio::test]
    async fn test_transient_summary_failure_retried_then_fatal() {
        let dir = log_set();
        let mut summary = MockSummarySink::new();
        summary
            .expect_write_summary()
            .times(4)
            .returning(|_| Err(SinkError::Transient("database is locked".into())));

        let report = Pipeline::new(config())
            .with_summary_sink(Arc::new(summary))
            .run(dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!report.summary_written);
        assert_eq!(report.exit_status(), ExitStatus::TransientFailure);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_summary() {
        let dir = log_set();
        let mut summary = MockSummarySink::new();
        summary.expect_write_summary().never();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = Pipeline::new(config())
            .with_summary_sink(Arc::new(summary))
            .run(dir.path(), &cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(!report.summary_written);
        assert!(report.plugins.iter().all(|p| p.state == PluginState::Cancelled));
        assert_eq!(report.exit_status(), ExitStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_config_error_before_any_work() {
        let mut config = config();
        config.plugins.enabled = vec!["slow_requests".into()];
        let mut summary = MockSummarySink::new();
        summary.expect_write_summary().never();

        let err = Pipeline::new(config)
            .with_summary_sink(Arc::new(summary))
            .run(Path::new("/definitely/not/here"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.exit_status(), ExitStatus::ConfigError);
    }

    #[tokio::test]
    async fn test_missing_log_set() {
        let mut summary = MockSummarySink::new();
        summary.expect_write_summary().never();
        let err = Pipeline::new(config())
            .with_summary_sink(Arc::new(summary))
            .run(Path::new("/definitely/not/here"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::LogSet { .. }));
    }

    #[tokio::test]
    async fn test_workbooks_published_for_completed_plugins() {
        let dir = log_set();
        let mut summary = MockSummarySink::new();
        summary.expect_write_summary().returning(|_| Ok(()));
        let mut publisher = MockWorkbookPublisher::new();
        publisher.expect_is_enabled().return_const(true);
        publisher.expect_publish().returning(|request| PublishResult {
            workbook: request.workbook.clone(),
            workbook_id: Some(format!("wb-{}", request.plugin)),
            uri: None,
            is_successful: request.plugin != "errors",
            error_message: None,
            publish_date: chrono::Utc::now(),
        });

        let report = Pipeline::new(config())
            .with_summary_sink(Arc::new(summary))
            .with_publisher(Arc::new(publisher))
            .run(dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        let mut published: Vec<_> = report.publications.iter().map(|p| p.workbook.as_str()).collect();
        published.sort();
        assert_eq!(published, vec!["Apache", "Errors", "SlowRequests"]);
        // A failed publication is reported, not fatal.
        assert_eq!(report.exit_status(), ExitStatus::Success);
    }
}
