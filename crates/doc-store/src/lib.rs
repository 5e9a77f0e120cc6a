//! Live-query interface to the remote document store.
//!
//! The store itself is an external collaborator. This crate only names the surface the sync
//! layer consumes (`listen`, `get_once`, `query`, `count`) plus [`LocalStore`], an in-memory
//! implementation for tests and local wiring.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

mod local;

pub use local::LocalStore;

/// Membership operators (`in`, document-id `in`) accept at most this many values.
pub const MAX_MEMBERSHIP_VALUES: usize = 30;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid resource path {0:?}")]
    InvalidPath(String),
    #[error("document body must be a JSON object")]
    InvalidDocument,
    #[error("membership filter on {field} has {len} values (max {MAX_MEMBERSHIP_VALUES})")]
    MembershipLimit { field: String, len: usize },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Slash-separated `collection/doc[/collection/doc...]` path naming one document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn new(raw: &str) -> StoreResult<Self> {
        let trimmed = raw.trim().trim_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();
        if trimmed.is_empty() || segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty())
        {
            return Err(StoreError::InvalidPath(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parent collection path (everything but the last segment).
    pub fn collection(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((collection, _)) => collection,
            None => &self.0,
        }
    }

    pub fn document_id(&self) -> &str {
        match self.0.rsplit_once('/') {
            Some((_, id)) => id,
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as delivered by the store: an id plus untyped fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// Scalar a predicate compares against. Kept hashable so queries can key a listener table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl FieldValue {
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (FieldValue::Str(expected), Value::String(actual)) => expected == actual,
            (FieldValue::Int(expected), Value::Number(actual)) => {
                actual.as_i64() == Some(*expected)
            }
            (FieldValue::Bool(expected), Value::Bool(actual)) => expected == actual,
            _ => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Predicate {
    Eq { field: String, value: FieldValue },
    /// Field value is one of `values`.
    In { field: String, values: Vec<FieldValue> },
    /// Document id is one of `ids`.
    IdIn(Vec<String>),
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn one_of<V: Into<FieldValue>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn id_in(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Predicate::IdIn(ids.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Eq { field, value } => doc.get(field).is_some_and(|v| value.matches(v)),
            Predicate::In { field, values } => doc
                .get(field)
                .is_some_and(|v| values.iter().any(|candidate| candidate.matches(v))),
            Predicate::IdIn(ids) => ids.iter().any(|id| *id == doc.id),
        }
    }

    fn validate(&self) -> StoreResult<()> {
        let (field, len) = match self {
            Predicate::Eq { .. } => return Ok(()),
            Predicate::In { field, values } => (field.as_str(), values.len()),
            Predicate::IdIn(ids) => ("__name__", ids.len()),
        };
        if len > MAX_MEMBERSHIP_VALUES {
            return Err(StoreError::MembershipLimit {
                field: field.to_string(),
                len,
            });
        }
        Ok(())
    }
}

/// Collection scan with AND-combined predicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Query {
    pub collection: String,
    pub predicates: Vec<Predicate>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicates: Vec::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.predicates.iter().all(|p| p.matches(doc))
    }

    pub fn validate(&self) -> StoreResult<()> {
        self.predicates.iter().try_for_each(Predicate::validate)
    }
}

/// What a live listener is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    Document(ResourcePath),
    Query(Query),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Document(path) => write!(f, "doc:{path}"),
            Target::Query(query) => write!(
                f,
                "query:{}[{} predicates]",
                query.collection,
                query.predicates.len()
            ),
        }
    }
}

/// Current state of a target as pushed by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    /// The document does not exist. Distinct from "not loaded yet".
    Absent,
    Document(Document),
    Documents(Vec<Document>),
}

pub type SnapshotCallback = Arc<dyn Fn(Snapshot) + Send + Sync>;

/// Releases a live listener. Teardown runs exactly once, on `unsubscribe` or drop.
pub struct ListenerHandle {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerHandle {
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("live", &self.teardown.is_some())
            .finish()
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Attach a live listener. The callback receives the current state first and then every
    /// change, in the order the store applies them.
    fn listen(&self, target: &Target, on_snapshot: SnapshotCallback)
        -> StoreResult<ListenerHandle>;

    async fn get_once(&self, path: &ResourcePath) -> StoreResult<Option<Document>>;

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>>;

    /// Number of documents matching `query`. Defaults to counting the full result set;
    /// backends with server-side aggregation should override.
    async fn count(&self, query: &Query) -> StoreResult<u64> {
        Ok(self.query(query).await?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> Document {
        match fields {
            Value::Object(map) => Document::new(id, map),
            _ => panic!("fields must be an object"),
        }
    }

    #[test]
    fn resource_path_requires_document_segments() {
        let path = ResourcePath::new("chats/abc/messages/m1").expect("valid path");
        assert_eq!(path.collection(), "chats/abc/messages");
        assert_eq!(path.document_id(), "m1");
        assert!(ResourcePath::new("chats").is_err());
        assert!(ResourcePath::new("").is_err());
        assert!(ResourcePath::new("chats//x").is_err());
    }

    #[test]
    fn membership_predicates_are_or_combined() {
        let pred = Predicate::one_of("status", ["pending", "accepted"]);
        assert!(pred.matches(&doc("a", json!({"status": "accepted"}))));
        assert!(!pred.matches(&doc("b", json!({"status": "rejected"}))));
        assert!(!pred.matches(&doc("c", json!({}))));
    }

    #[test]
    fn membership_limit_is_rejected() {
        let ids: Vec<String> = (0..31).map(|i| format!("u{i}")).collect();
        let query = Query::new("users").filter(Predicate::id_in(ids));
        assert_eq!(
            query.validate(),
            Err(StoreError::MembershipLimit {
                field: "__name__".into(),
                len: 31
            })
        );
    }

    #[test]
    fn listener_handle_tears_down_once() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handle = {
            let count = count.clone();
            ListenerHandle::new(move || {
                count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
        };
        handle.unsubscribe();
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
