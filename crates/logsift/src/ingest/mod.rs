//! Concurrent file ingestion: route, read, parse, commit.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::artifact::{EnumerationError, FileDescriptor};
use crate::parser::model::LogType;
use crate::parser::parser_for;
use crate::reader::LineReader;
use crate::router::PatternRouter;
use crate::status::RunStatus;
use crate::store::{Document, IntermediateStore};

/// Parse errors logged per file before going quiet.
const LOGGED_PARSE_ERRORS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileState {
    Processed,
    /// No routing rule matched the file name.
    Skipped,
    /// Batches committed before the failure stay in the store and are
    /// counted in `records_stored`.
    Failed { reason: String },
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    pub file_path: String,
    pub worker: String,
    pub log_type: Option<LogType>,
    #[serde(flatten)]
    pub state: FileState,
    pub lines_read: u64,
    /// Records committed to the store, including those from a file that
    /// later failed.
    pub records_stored: u64,
    pub parse_errors: u64,
    /// Subset of `parse_errors` caused by unparseable timestamps.
    pub timestamp_errors: u64,
    pub lossy_lines: u64,
    pub truncated_lines: u64,
}

impl FileOutcome {
    fn new(file: &FileDescriptor, log_type: Option<LogType>, state: FileState) -> Self {
        Self {
            file_path: file.file_path.clone(),
            worker: file.worker.clone(),
            log_type,
            state,
            lines_read: 0,
            records_stored: 0,
            parse_errors: 0,
            timestamp_errors: 0,
            lossy_lines: 0,
            truncated_lines: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub file_concurrency: usize,
    /// Fail a file once bad lines go past this. `None` never fails.
    pub max_bad_lines: Option<u64>,
    /// Complete records committed to the store per batch.
    pub batch_size: usize,
}

/// Failed outcomes for entries the walk could not read. They count as
/// discovered files.
pub fn record_unreadable(errors: &[EnumerationError], status: &RunStatus) -> Vec<FileOutcome> {
    status.record_discovered(errors.len() as u64);
    errors
        .iter()
        .map(|e| {
            status.record_file_failed();
            let file_name = e.file_path.rsplit('/').next().unwrap_or_default();
            let file = FileDescriptor::new(file_name, e.file_path.as_str(), e.worker.as_str());
            FileOutcome::new(
                &file,
                None,
                FileState::Failed {
                    reason: format!("unreadable entry: {}", e.reason),
                },
            )
        })
        .collect()
}

/// Ingest every file under `root`. Routing happens up front, in enumeration
/// order; reading and parsing run on the blocking pool, `file_concurrency`
/// files at a time. Outcomes keep the order of `files`.
pub async fn ingest_files(
    files: Vec<FileDescriptor>,
    root: &Path,
    router: &PatternRouter,
    store: Arc<IntermediateStore>,
    status: Arc<RunStatus>,
    options: IngestOptions,
    cancel: &CancellationToken,
) -> Vec<FileOutcome> {
    status.record_discovered(files.len() as u64);
    let mut outcomes: Vec<Option<FileOutcome>> = vec![None; files.len()];
    let semaphore = Arc::new(Semaphore::new(options.file_concurrency.max(1)));
    let root: Arc<PathBuf> = Arc::new(root.to_path_buf());
    let mut tasks = JoinSet::new();
    let mut task_files = HashMap::new();

    for (idx, file) in files.into_iter().enumerate() {
        let Some(log_type) = router.resolve(&file.file_name) else {
            debug!(file = %file.file_path, "No routing rule matched, skipping");
            status.record_file_skipped();
            outcomes[idx] = Some(FileOutcome::new(&file, None, FileState::Skipped));
            continue;
        };

        let file = Arc::new(file);
        let semaphore = Arc::clone(&semaphore);
        let root = Arc::clone(&root);
        let store = Arc::clone(&store);
        let status = Arc::clone(&status);
        let cancel = cancel.clone();
        let task_file = Arc::clone(&file);

        let handle = tasks.spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit.ok(),
                _ = cancel.cancelled() => None,
            };
            let Some(permit) = permit else {
                return (idx, FileOutcome::new(&file, Some(log_type), FileState::Cancelled));
            };

            let blocking_file = Arc::clone(&file);
            let outcome = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                ingest_file(blocking_file, log_type, &root, &store, &status, options, &cancel)
            })
            .await
            .unwrap_or_else(|e| {
                FileOutcome::new(
                    &file,
                    Some(log_type),
                    FileState::Failed {
                        reason: format!("ingest task failed: {e}"),
                    },
                )
            });
            (idx, outcome)
        });
        task_files.insert(handle.id(), (idx, task_file, log_type));
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        match joined {
            Ok((_, (idx, outcome))) => outcomes[idx] = Some(outcome),
            Err(e) => {
                if let Some((idx, file, log_type)) = task_files.remove(&e.id()) {
                    status.record_file_failed();
                    outcomes[idx] = Some(FileOutcome::new(
                        &file,
                        Some(log_type),
                        FileState::Failed {
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }
    }

    outcomes.into_iter().flatten().collect()
}

/// Read and parse one file sequentially with a single parser instance.
/// Blocking.
pub fn ingest_file(
    file: Arc<FileDescriptor>,
    log_type: LogType,
    root: &Path,
    store: &IntermediateStore,
    status: &RunStatus,
    options: IngestOptions,
    cancel: &CancellationToken,
) -> FileOutcome {
    let mut outcome = FileOutcome::new(&file, Some(log_type), FileState::Processed);
    let collection = log_type.collection();

    let mut reader = match LineReader::open(Arc::clone(&file), root) {
        Ok(reader) => reader,
        Err(e) => {
            warn!(file = %file.file_path, error = %e, "Cannot open file");
            status.record_file_failed();
            outcome.state = FileState::Failed {
                reason: format!("open failed: {e}"),
            };
            return outcome;
        }
    };

    let mut parser = parser_for(log_type.format());
    let batch_size = options.batch_size.max(1);
    let mut batch: Vec<Document> = Vec::with_capacity(batch_size);
    // Counted but not yet reported to `status`.
    let mut unreported = (0u64, 0u64);

    let commit = |batch: &mut Vec<Document>, outcome: &mut FileOutcome, unreported: &mut (u64, u64)| {
        let records = batch.len() as u64;
        store.insert_batch(collection, std::mem::take(batch));
        outcome.records_stored += records;
        status.record_lines(unreported.0, records, unreported.1);
        *unreported = (0, 0);
    };

    for line in reader.by_ref() {
        if cancel.is_cancelled() {
            status.record_lines(unreported.0, 0, unreported.1);
            outcome.state = FileState::Cancelled;
            debug!(file = %file.file_path, line = line.line_number, "Ingestion cancelled");
            return outcome;
        }
        outcome.lines_read += 1;
        unreported.0 += 1;

        match parser.parse(&line) {
            Ok(Some(record)) => {
                batch.push(record.into_document());
                if batch.len() >= batch_size {
                    commit(&mut batch, &mut outcome, &mut unreported);
                }
            }
            Ok(None) => {}
            Err(e) => {
                outcome.parse_errors += 1;
                unreported.1 += 1;
                if e.is_timestamp() {
                    outcome.timestamp_errors += 1;
                }
                if outcome.parse_errors <= LOGGED_PARSE_ERRORS {
                    debug!(
                        file = %file.file_path,
                        line = line.line_number,
                        format = parser.format().as_str(),
                        error = %e,
                        "Unparseable line"
                    );
                }
                if let Some(limit) = options.max_bad_lines {
                    if outcome.parse_errors > limit {
                        status.record_lines(unreported.0, 0, unreported.1);
                        warn!(
                            file = %file.file_path,
                            bad_lines = outcome.parse_errors,
                            limit,
                            "Too many bad lines, abandoning file"
                        );
                        status.record_file_failed();
                        outcome.state = FileState::Failed {
                            reason: format!(
                                "{} bad lines exceeds the limit of {limit}",
                                outcome.parse_errors
                            ),
                        };
                        return outcome;
                    }
                }
            }
        }
    }

    outcome.lossy_lines = reader.lossy_lines();
    outcome.truncated_lines = reader.truncated_lines();

    if let Some(e) = reader.take_error() {
        status.record_lines(unreported.0, 0, unreported.1);
        warn!(file = %file.file_path, line = outcome.lines_read, error = %e, "Read failed mid-file");
        status.record_file_failed();
        outcome.state = FileState::Failed {
            reason: format!("read failed after line {}: {e}", outcome.lines_read),
        };
        return outcome;
    }

    if let Some(record) = parser.finish() {
        batch.push(record.into_document());
    }
    commit(&mut batch, &mut outcome, &mut unreported);
    status.record_file_processed();

    info!(
        file = %file.file_path,
        log_type = log_type.as_str(),
        lines = outcome.lines_read,
        records = outcome.records_stored,
        parse_errors = outcome.parse_errors,
        "File ingested"
    );
    outcome
}
