//! Log set enumeration: one `FileDescriptor` per regular file under the root.

use std::path::{Component, Path};

use grep_matcher::Matcher;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::ConfigError;

/// Worker assigned to files outside any worker directory.
pub const DEFAULT_WORKER: &str = "worker0";

/// Immutable provenance of one file in the log set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileDescriptor {
    pub file_name: String,
    /// Relative to the log set root, `/` separated.
    pub file_path: String,
    pub worker: String,
}

impl FileDescriptor {
    pub fn new(
        file_name: impl Into<String>,
        file_path: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_path: file_path.into(),
            worker: worker.into(),
        }
    }
}

/// Picks the worker name out of a relative path.
pub struct WorkerMatcher {
    matcher: RegexMatcher,
}

impl WorkerMatcher {
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let matcher = RegexMatcherBuilder::new()
            .case_insensitive(true)
            .build(pattern)
            .map_err(|e| ConfigError::InvalidWorkerPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { matcher })
    }

    /// First directory segment matching the pattern, else `worker0`.
    pub fn worker_for(&self, relative: &str) -> String {
        let mut segments: Vec<&str> = relative.split('/').collect();
        segments.pop();
        segments
            .into_iter()
            .find(|segment| self.matcher.is_match(segment.as_bytes()).unwrap_or(false))
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_WORKER.to_string())
    }
}

/// An entry the walk could not read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumerationError {
    /// Relative to the log set root. Empty when the walk gave no path.
    pub file_path: String,
    pub worker: String,
    pub reason: String,
}

/// Result of walking a log set.
#[derive(Debug, Default)]
pub struct Enumeration {
    pub files: Vec<FileDescriptor>,
    /// Unreadable entries. They fail individually, never the run.
    pub errors: Vec<EnumerationError>,
}

/// Walk `root` in a stable (name-sorted) order.
pub fn enumerate(root: &Path, workers: &WorkerMatcher) -> std::io::Result<Enumeration> {
    let metadata = std::fs::metadata(root)?;
    if !metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "log set root is not a directory",
        ));
    }

    let mut enumeration = Enumeration::default();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable log set entry");
                let file_path = e
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(to_slash_path)
                    .unwrap_or_default();
                enumeration.errors.push(EnumerationError {
                    worker: workers.worker_for(&file_path),
                    file_path,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let file_path = to_slash_path(relative);
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let worker = workers.worker_for(&file_path);
        debug!(file = %file_path, worker = %worker, "Discovered file");
        enumeration
            .files
            .push(FileDescriptor::new(file_name, file_path, worker));
    }
    Ok(enumeration)
}

fn to_slash_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
