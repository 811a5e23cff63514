//! Declarative filter + projection queries over store documents.

use std::collections::HashSet;

use grep_matcher::Matcher;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::Document;
use crate::parser::model::fields;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Projection lists no fields")]
    EmptyProjection,

    #[error("Empty field name")]
    EmptyField,

    #[error("Field '{0}' is listed twice in the projection")]
    DuplicateField(String),

    #[error("Provenance field '{0}' cannot be excluded")]
    ExcludesProvenance(String),

    #[error("'{0}' needs at least one operand")]
    EmptyOperands(&'static str),
}

/// Document predicate. Field names may be dotted paths into nested objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    All,
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Exists(String),
    /// Case-insensitive regex over the string form of the field.
    Matches { field: String, pattern: String },
    FileName(String),
    Gte { field: String, number: f64 },
    Lte { field: String, number: f64 },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn any_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(field: &str) -> Self {
        Filter::Exists(field.to_string())
    }

    pub fn matches(field: &str, pattern: &str) -> Self {
        Filter::Matches {
            field: field.to_string(),
            pattern: pattern.to_string(),
        }
    }

    pub fn gte(field: &str, number: f64) -> Self {
        Filter::Gte {
            field: field.to_string(),
            number,
        }
    }

    pub fn lte(field: &str, number: f64) -> Self {
        Filter::Lte {
            field: field.to_string(),
            number,
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Filter::And(mut all) => {
                all.push(other);
                Filter::And(all)
            }
            first => Filter::And(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Filter::Not(Box::new(self))
    }
}

/// Which fields of a matching document reach the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Projection {
    /// Listed fields plus provenance.
    Include(Vec<String>),
    /// Everything but the listed fields.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Projection::Include(names.into_iter().map(Into::into).collect())
    }

    pub fn exclude<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Projection::Exclude(names.into_iter().map(Into::into).collect())
    }

    fn validate(&self) -> Result<(), QueryError> {
        let (names, excluding) = match self {
            Projection::Include(names) => (names, false),
            Projection::Exclude(names) => (names, true),
        };
        if names.is_empty() {
            return Err(QueryError::EmptyProjection);
        }
        let mut seen = HashSet::new();
        for name in names {
            if name.is_empty() || name.split('.').any(str::is_empty) {
                return Err(QueryError::EmptyField);
            }
            if !seen.insert(name.as_str()) {
                return Err(QueryError::DuplicateField(name.clone()));
            }
            if excluding && fields::is_provenance(name) {
                return Err(QueryError::ExcludesProvenance(name.clone()));
            }
        }
        Ok(())
    }

    pub fn apply(&self, doc: &Document) -> Document {
        match self {
            Projection::Include(names) => {
                let mut out = Map::new();
                for name in fields::PROVENANCE {
                    if let Some(value) = doc.get(name) {
                        out.insert(name.to_string(), value.clone());
                    }
                }
                for name in names {
                    if let Some(value) = lookup(doc, name) {
                        insert_path(&mut out, name, value.clone());
                    }
                }
                out
            }
            Projection::Exclude(names) => {
                let mut out = doc.clone();
                for name in names {
                    remove_path(&mut out, name);
                }
                out
            }
        }
    }
}

enum Compiled {
    All,
    Eq(String, Value),
    Ne(String, Value),
    In(String, Vec<Value>),
    Exists(String),
    Matches(String, RegexMatcher),
    FileName(RegexMatcher),
    Gte(String, f64),
    Lte(String, f64),
    And(Vec<Compiled>),
    Or(Vec<Compiled>),
    Not(Box<Compiled>),
}

impl Compiled {
    fn build(filter: &Filter) -> Result<Self, QueryError> {
        Ok(match filter {
            Filter::All => Compiled::All,
            Filter::Eq { field, value } => Compiled::Eq(check_field(field)?, value.clone()),
            Filter::Ne { field, value } => Compiled::Ne(check_field(field)?, value.clone()),
            Filter::In { field, values } => Compiled::In(check_field(field)?, values.clone()),
            Filter::Exists(field) => Compiled::Exists(check_field(field)?),
            Filter::Matches { field, pattern } => {
                Compiled::Matches(check_field(field)?, compile(pattern)?)
            }
            Filter::FileName(pattern) => Compiled::FileName(compile(pattern)?),
            Filter::Gte { field, number } => Compiled::Gte(check_field(field)?, *number),
            Filter::Lte { field, number } => Compiled::Lte(check_field(field)?, *number),
            Filter::And(all) if all.is_empty() => return Err(QueryError::EmptyOperands("and")),
            Filter::Or(any) if any.is_empty() => return Err(QueryError::EmptyOperands("or")),
            Filter::And(all) => Compiled::And(all.iter().map(Self::build).collect::<Result<_, _>>()?),
            Filter::Or(any) => Compiled::Or(any.iter().map(Self::build).collect::<Result<_, _>>()?),
            Filter::Not(inner) => Compiled::Not(Box::new(Self::build(inner)?)),
        })
    }

    fn eval(&self, doc: &Document) -> bool {
        match self {
            Compiled::All => true,
            Compiled::Eq(field, value) => lookup(doc, field) == Some(value),
            Compiled::Ne(field, value) => lookup(doc, field) != Some(value),
            Compiled::In(field, values) => {
                lookup(doc, field).is_some_and(|found| values.contains(found))
            }
            Compiled::Exists(field) => lookup(doc, field).is_some_and(|v| !v.is_null()),
            Compiled::Matches(field, matcher) => lookup(doc, field)
                .is_some_and(|v| regex_match(matcher, &value_text(v))),
            Compiled::FileName(matcher) => doc
                .get(fields::FILE_NAME)
                .and_then(Value::as_str)
                .is_some_and(|name| regex_match(matcher, name)),
            Compiled::Gte(field, number) => {
                lookup(doc, field).and_then(Value::as_f64).is_some_and(|n| n >= *number)
            }
            Compiled::Lte(field, number) => {
                lookup(doc, field).and_then(Value::as_f64).is_some_and(|n| n <= *number)
            }
            Compiled::And(all) => all.iter().all(|c| c.eval(doc)),
            Compiled::Or(any) => any.iter().any(|c| c.eval(doc)),
            Compiled::Not(inner) => !inner.eval(doc),
        }
    }
}

/// A validated, compiled query. Built once at plugin registration.
pub struct Query {
    filter: Filter,
    projection: Projection,
    compiled: Compiled,
}

impl Query {
    pub fn new(filter: Filter, projection: Projection) -> Result<Self, QueryError> {
        let compiled = Self::validate(&filter, &projection)?;
        Ok(Self {
            filter,
            projection,
            compiled,
        })
    }

    /// Check a filter/projection pair without keeping the result.
    pub fn check(filter: &Filter, projection: &Projection) -> Result<(), QueryError> {
        Self::validate(filter, projection).map(|_| ())
    }

    fn validate(filter: &Filter, projection: &Projection) -> Result<Compiled, QueryError> {
        projection.validate()?;
        Compiled::build(filter)
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.compiled.eval(doc)
    }

    pub fn project(&self, doc: &Document) -> Document {
        self.projection.apply(doc)
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("filter", &self.filter)
            .field("projection", &self.projection)
            .finish()
    }
}

fn check_field(field: &str) -> Result<String, QueryError> {
    if field.is_empty() || field.split('.').any(str::is_empty) {
        return Err(QueryError::EmptyField);
    }
    Ok(field.to_string())
}

fn compile(pattern: &str) -> Result<RegexMatcher, QueryError> {
    RegexMatcherBuilder::new()
        .case_insensitive(true)
        .build(pattern)
        .map_err(|e| QueryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

fn regex_match(matcher: &RegexMatcher, text: &str) -> bool {
    matcher.is_match(text.as_bytes()).unwrap_or(false)
}

fn value_text(value: &Value) -> std::borrow::Cow<'_, str> {
    match value {
        Value::String(s) => std::borrow::Cow::Borrowed(s),
        other => std::borrow::Cow::Owned(other.to_string()),
    }
}

/// Resolve a dotted path. A top-level key containing dots wins over nesting.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    if let Some(value) = doc.get(path) {
        return Some(value);
    }
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn insert_path(out: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            out.insert(path.to_string(), value);
        }
        Some((head, tail)) => {
            let slot = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                insert_path(child, tail, value);
            }
        }
    }
}

fn remove_path(doc: &mut Document, path: &str) {
    if doc.remove(path).is_some() {
        return;
    }
    if let Some((head, tail)) = path.split_once('.') {
        if let Some(Value::Object(child)) = doc.get_mut(head) {
            remove_path(child, tail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn sample() -> Document {
        doc(json!({
            "file_name": "hyper_0.log",
            "file_path": "worker1/hyper_0.log",
            "line_number": 12,
            "worker": "worker1",
            "timestamp": "2024-03-01T10:00:00.000Z",
            "severity": "error",
            "key": "query-end",
            "value": { "elapsed": 2.5, "rows": 10 },
            "username": "alice"
        }))
    }

    fn query(filter: Filter) -> Query {
        Query::new(filter, Projection::include(["key"])).unwrap()
    }

    #[test]
    fn test_basic_predicates() {
        let d = sample();
        assert!(query(Filter::All).matches(&d));
        assert!(query(Filter::eq("key", "query-end")).matches(&d));
        assert!(!query(Filter::eq("key", "query-begin")).matches(&d));
        assert!(query(Filter::ne("key", "query-begin")).matches(&d));
        assert!(query(Filter::any_of("severity", ["error", "fatal"])).matches(&d));
        assert!(query(Filter::exists("username")).matches(&d));
        assert!(!query(Filter::exists("missing")).matches(&d));
        assert!(query(Filter::matches("username", "^ALI")).matches(&d));
        assert!(query(Filter::FileName(r"^hyper_\d+".into())).matches(&d));
    }

    #[test]
    fn test_nested_numeric_range() {
        let d = sample();
        assert!(query(Filter::gte("value.elapsed", 2.5)).matches(&d));
        assert!(!query(Filter::gte("value.elapsed", 2.6)).matches(&d));
        assert!(query(Filter::lte("value.rows", 10.0)).matches(&d));
        assert!(!query(Filter::gte("username", 0.0)).matches(&d));
    }

    #[test]
    fn test_combinators() {
        let d = sample();
        let f = Filter::eq("key", "query-end").and(Filter::gte("value.elapsed", 1.0));
        assert!(query(f).matches(&d));
        let f = Filter::Or(vec![Filter::eq("key", "nope"), Filter::exists("severity")]);
        assert!(query(f).matches(&d));
        assert!(!query(Filter::All.negate()).matches(&d));
    }

    #[test]
    fn test_include_keeps_provenance() {
        let q = Query::new(Filter::All, Projection::include(["key", "value.elapsed"])).unwrap();
        let out = q.project(&sample());
        assert_eq!(out["key"], "query-end");
        assert_eq!(out["value"], json!({ "elapsed": 2.5 }));
        assert_eq!(out["worker"], "worker1");
        assert_eq!(out["line_number"], 12);
        assert!(!out.contains_key("username"));
    }

    #[test]
    fn test_exclude() {
        let q = Query::new(Filter::All, Projection::exclude(["username", "value.rows"])).unwrap();
        let out = q.project(&sample());
        assert!(!out.contains_key("username"));
        assert_eq!(out["value"], json!({ "elapsed": 2.5 }));
        assert_eq!(out["severity"], "error");
    }

    #[test]
    fn test_projection_is_idempotent() {
        for projection in [
            Projection::include(["key", "value.elapsed"]),
            Projection::exclude(["severity"]),
        ] {
            let once = projection.apply(&sample());
            let twice = projection.apply(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_malformed_projection() {
        let check = |p: Projection| Query::new(Filter::All, p).unwrap_err();
        assert_eq!(check(Projection::Include(vec![])), QueryError::EmptyProjection);
        assert_eq!(check(Projection::include([""])), QueryError::EmptyField);
        assert_eq!(check(Projection::include(["a."])), QueryError::EmptyField);
        assert_eq!(
            check(Projection::include(["a", "a"])),
            QueryError::DuplicateField("a".into())
        );
        assert_eq!(
            check(Projection::exclude(["worker"])),
            QueryError::ExcludesProvenance("worker".into())
        );
    }

    #[test]
    fn test_invalid_filter() {
        let err = Query::new(Filter::matches("x", "(["), Projection::include(["x"])).unwrap_err();
        assert!(matches!(err, QueryError::InvalidPattern { .. }));
        let err = Query::new(Filter::And(vec![]), Projection::include(["x"])).unwrap_err();
        assert_eq!(err, QueryError::EmptyOperands("and"));
        let err = Query::new(Filter::exists(""), Projection::include(["x"])).unwrap_err();
        assert_eq!(err, QueryError::EmptyField);
    }
}
