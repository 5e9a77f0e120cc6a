use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    Document, DocumentStore, ListenerHandle, Query, ResourcePath, Snapshot, SnapshotCallback,
    StoreError, StoreResult, Target,
};

/// In-memory store for tests and non-networked contexts.
///
/// Writes re-deliver snapshots synchronously to every affected listener. Listener setups and
/// teardowns are counted so callers can check that nothing leaks.
#[derive(Default)]
pub struct LocalStore {
    inner: Arc<RwLock<Inner>>,
    stats: Arc<ListenerStats>,
    offline: AtomicBool,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    listeners: HashMap<u64, Listener>,
    next_listener: u64,
}

struct Listener {
    target: Target,
    callback: SnapshotCallback,
}

#[derive(Default)]
struct ListenerStats {
    setups: AtomicUsize,
    teardowns: AtomicUsize,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the document at `path`.
    pub fn set(&self, path: &str, fields: Value) -> StoreResult<()> {
        let path = ResourcePath::new(path)?;
        let Value::Object(fields) = fields else {
            return Err(StoreError::InvalidDocument);
        };
        let deliveries = {
            let mut inner = self.inner.write();
            inner
                .collections
                .entry(path.collection().to_string())
                .or_default()
                .insert(path.document_id().to_string(), fields);
            inner.affected_by(&path)
        };
        deliver(deliveries);
        Ok(())
    }

    pub fn delete(&self, path: &str) -> StoreResult<()> {
        let path = ResourcePath::new(path)?;
        let deliveries = {
            let mut inner = self.inner.write();
            if let Some(collection) = inner.collections.get_mut(path.collection()) {
                collection.remove(path.document_id());
            }
            inner.affected_by(&path)
        };
        deliver(deliveries);
        Ok(())
    }

    /// Simulate losing the connection: reads and new listeners fail until reset.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn listen_calls(&self) -> usize {
        self.stats.setups.load(Ordering::SeqCst)
    }

    pub fn teardown_calls(&self) -> usize {
        self.stats.teardowns.load(Ordering::SeqCst)
    }

    pub fn active_listeners(&self) -> usize {
        self.inner.read().listeners.len()
    }

    fn ensure_online(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("local store is offline".into()))
        } else {
            Ok(())
        }
    }
}

impl Inner {
    fn document(&self, path: &ResourcePath) -> Option<Document> {
        self.collections
            .get(path.collection())
            .and_then(|docs| docs.get(path.document_id()))
            .map(|fields| Document::new(path.document_id(), fields.clone()))
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        self.collections
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .filter(|doc| query.matches(doc))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot(&self, target: &Target) -> Snapshot {
        match target {
            Target::Document(path) => self
                .document(path)
                .map(Snapshot::Document)
                .unwrap_or(Snapshot::Absent),
            Target::Query(query) => Snapshot::Documents(self.run_query(query)),
        }
    }

    fn affected_by(&self, path: &ResourcePath) -> Vec<(SnapshotCallback, Snapshot)> {
        let mut ids: Vec<&u64> = self.listeners.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| {
                let listener = &self.listeners[id];
                let affected = match &listener.target {
                    Target::Document(watched) => watched == path,
                    Target::Query(query) => query.collection == path.collection(),
                };
                affected.then(|| (listener.callback.clone(), self.snapshot(&listener.target)))
            })
            .collect()
    }
}

// Callbacks run outside the lock so they may re-enter the store.
fn deliver(deliveries: Vec<(SnapshotCallback, Snapshot)>) {
    for (callback, snapshot) in deliveries {
        callback(snapshot);
    }
}

fn remove_listener(inner: &Weak<RwLock<Inner>>, stats: &ListenerStats, id: u64) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.write().listeners.remove(&id).is_some() {
        stats.teardowns.fetch_add(1, Ordering::SeqCst);
        debug!(target = "store.local", listener = id, "listener removed");
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn listen(
        &self,
        target: &Target,
        on_snapshot: SnapshotCallback,
    ) -> StoreResult<ListenerHandle> {
        self.ensure_online()?;
        if let Target::Query(query) = target {
            query.validate()?;
        }
        let (id, initial) = {
            let mut inner = self.inner.write();
            let id = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.insert(
                id,
                Listener {
                    target: target.clone(),
                    callback: on_snapshot.clone(),
                },
            );
            (id, inner.snapshot(target))
        };
        self.stats.setups.fetch_add(1, Ordering::SeqCst);
        debug!(target = "store.local", listener = id, watched = %target, "listener added");
        on_snapshot(initial);

        let inner = Arc::downgrade(&self.inner);
        let stats = self.stats.clone();
        Ok(ListenerHandle::new(move || {
            remove_listener(&inner, &stats, id)
        }))
    }

    async fn get_once(&self, path: &ResourcePath) -> StoreResult<Option<Document>> {
        self.ensure_online()?;
        Ok(self.inner.read().document(path))
    }

    async fn query(&self, query: &Query) -> StoreResult<Vec<Document>> {
        self.ensure_online()?;
        query.validate()?;
        Ok(self.inner.read().run_query(query))
    }
}
