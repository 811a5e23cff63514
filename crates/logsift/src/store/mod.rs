//! Intermediate document store shared by ingestion and plugins.
//!
//! Collections are append-only within a run. Each one has its own lock, so
//! writers to different collections never contend.

mod query;

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

pub use query::{lookup, Filter, Projection, Query, QueryError};

pub type Document = Map<String, Value>;

/// Documents copied out of a collection per read lock.
const CURSOR_CHUNK: usize = 256;

#[derive(Debug, Default)]
struct Collection {
    docs: RwLock<Vec<Arc<Document>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionCount {
    pub name: String,
    pub documents: usize,
}

#[derive(Debug, Default)]
pub struct IntermediateStore {
    collections: DashMap<String, Arc<Collection>>,
}

impl IntermediateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(existing) = self.collections.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(self.collections.entry(name.to_string()).or_default().value())
    }

    pub fn insert(&self, collection: &str, doc: Document) {
        self.collection(collection).docs.write().push(Arc::new(doc));
    }

    /// Append a batch under a single lock acquisition.
    pub fn insert_batch(&self, collection: &str, docs: Vec<Document>) {
        if docs.is_empty() {
            return;
        }
        let target = self.collection(collection);
        let mut guard = target.docs.write();
        guard.extend(docs.into_iter().map(Arc::new));
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .get(collection)
            .map(|c| c.docs.read().len())
            .unwrap_or(0)
    }

    /// All collections with their sizes, sorted by name.
    pub fn collections(&self) -> Vec<CollectionCount> {
        let mut counts: Vec<_> = self
            .collections
            .iter()
            .map(|entry| CollectionCount {
                name: entry.key().clone(),
                documents: entry.value().docs.read().len(),
            })
            .collect();
        counts.sort_by(|a, b| a.name.cmp(&b.name));
        counts
    }

    /// Lazily filter and project a collection. Only documents present when
    /// the query starts are visible. An unknown collection yields nothing.
    pub fn query<'q>(&self, collection: &str, query: &'q Query) -> Cursor<'q> {
        let source = self.collections.get(collection).map(|c| Arc::clone(c.value()));
        let end = source.as_ref().map(|c| c.docs.read().len()).unwrap_or(0);
        Cursor {
            source,
            query,
            position: 0,
            end,
            buffer: VecDeque::new(),
            scanned: 0,
        }
    }
}

/// Snapshot-at-start iterator over projected documents.
pub struct Cursor<'q> {
    source: Option<Arc<Collection>>,
    query: &'q Query,
    position: usize,
    end: usize,
    buffer: VecDeque<Arc<Document>>,
    scanned: u64,
}

impl Cursor<'_> {
    /// Documents examined so far, matching or not.
    pub fn scanned(&self) -> u64 {
        self.scanned
    }

    /// Size of the snapshot this cursor walks.
    pub fn snapshot_len(&self) -> usize {
        self.end
    }

    fn refill(&mut self) -> bool {
        let Some(source) = self.source.as_ref() else {
            return false;
        };
        if self.position >= self.end {
            return false;
        }
        let stop = (self.position + CURSOR_CHUNK).min(self.end);
        {
            let docs = source.docs.read();
            self.buffer.extend(docs[self.position..stop].iter().cloned());
        }
        self.position = stop;
        true
    }
}

impl Iterator for Cursor<'_> {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        loop {
            if self.buffer.is_empty() && !self.refill() {
                return None;
            }
            while let Some(doc) = self.buffer.pop_front() {
                self.scanned += 1;
                if self.query.matches(&doc) {
                    return Some(self.query.project(&doc));
                }
            }
        }
    }
}
