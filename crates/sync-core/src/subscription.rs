use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use doc_store::{DocumentStore, ListenerHandle, ResourcePath, Snapshot, SnapshotCallback, Target};
use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::entity::{project_live, FromDocument};
use crate::{Live, SyncResult};

struct Entry {
    id: u64,
    refs: usize,
    sender: Arc<watch::Sender<Live<Snapshot>>>,
    _listener: ListenerHandle,
}

/// Owns every live store listener. One listener per distinct [`Target`]; further requests for
/// the same target share it through reference-counted [`Subscription`] handles.
pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    entries: Mutex<HashMap<Target, Entry>>,
    next_entry: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            entries: Mutex::new(HashMap::new()),
            next_entry: AtomicU64::new(0),
        })
    }

    /// Subscribe to a document path. A missing or blank path yields `None` without touching
    /// the store.
    pub fn subscribe_path(
        self: &Arc<Self>,
        path: Option<&str>,
    ) -> SyncResult<Option<Subscription>> {
        let Some(raw) = path.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        let path = ResourcePath::new(raw)?;
        self.subscribe(Target::Document(path)).map(Some)
    }

    pub fn subscribe(self: &Arc<Self>, target: Target) -> SyncResult<Subscription> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&target) {
            entry.refs += 1;
            debug!(
                target = "sync.subscription",
                watched = %target,
                refs = entry.refs,
                "reusing live listener"
            );
            return Ok(Subscription {
                manager: Arc::downgrade(self),
                entry_id: entry.id,
                receiver: entry.sender.subscribe(),
                target,
            });
        }

        let (sender, mut receiver) = watch::channel(Live::Loading);
        let sender = Arc::new(sender);
        let on_snapshot: SnapshotCallback = {
            let sender = sender.clone();
            Arc::new(move |snapshot| {
                sender.send_replace(Live::from(snapshot));
            })
        };
        let listener = self.store.listen(&target, on_snapshot)?;
        // The initial snapshot is the current value, not a change.
        drop(receiver.borrow_and_update());
        let id = self.next_entry.fetch_add(1, Ordering::Relaxed);
        debug!(target = "sync.subscription", watched = %target, entry = id, "opened live listener");
        entries.insert(
            target.clone(),
            Entry {
                id,
                refs: 1,
                sender,
                _listener: listener,
            },
        );
        Ok(Subscription {
            manager: Arc::downgrade(self),
            entry_id: id,
            receiver,
            target,
        })
    }

    /// Tear down the listener for `target` regardless of how many handles share it. Existing
    /// handles see their stream end.
    pub fn unsubscribe(&self, target: &Target) -> bool {
        let removed = self.entries.lock().remove(target);
        if removed.is_some() {
            debug!(
                target = "sync.subscription",
                watched = %target,
                "listener closed by unsubscribe"
            );
        }
        removed.is_some()
    }

    /// Close every listener. Also runs when the manager is dropped.
    pub fn shutdown(&self) {
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, entry)| entry).collect();
        if !drained.is_empty() {
            debug!(target = "sync.subscription", closed = drained.len(), "closing all listeners");
        }
    }

    pub fn active_listeners(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_active(&self, target: &Target) -> bool {
        self.entries.lock().contains_key(target)
    }

    fn holds(&self, target: &Target, entry_id: u64) -> bool {
        self.entries
            .lock()
            .get(target)
            .is_some_and(|entry| entry.id == entry_id)
    }

    fn release(&self, target: &Target, entry_id: u64) {
        let removed = {
            let mut entries = self.entries.lock();
            match entries.get_mut(target) {
                Some(entry) if entry.id == entry_id => {
                    entry.refs -= 1;
                    if entry.refs == 0 {
                        entries.remove(target)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };
        if removed.is_some() {
            debug!(
                target = "sync.subscription",
                watched = %target,
                "last handle released, listener closed"
            );
        }
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One consumer's share of a live listener. Dropping it releases the share.
pub struct Subscription {
    manager: Weak<SubscriptionManager>,
    target: Target,
    entry_id: u64,
    receiver: watch::Receiver<Live<Snapshot>>,
}

impl Subscription {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn current(&self) -> Live<Snapshot> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next snapshot. `None` once the listener has been closed.
    pub async fn changed(&mut self) -> Option<Live<Snapshot>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    pub fn watch(&self) -> watch::Receiver<Live<Snapshot>> {
        self.receiver.clone()
    }

    /// False once the listener behind this handle has been closed by `unsubscribe` or
    /// `shutdown`.
    pub fn is_open(&self) -> bool {
        self.manager
            .upgrade()
            .is_some_and(|manager| manager.holds(&self.target, self.entry_id))
    }

    /// Current value first, then every change until the listener closes.
    pub fn into_stream(self) -> impl Stream<Item = Live<Snapshot>> + Send {
        futures::stream::unfold((self, true), |(mut sub, first)| async move {
            if first {
                let current = sub.receiver.borrow_and_update().clone();
                return Some((current, (sub, false)));
            }
            let next = sub.changed().await?;
            Some((next, (sub, false)))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.release(&self.target, self.entry_id);
        }
    }
}

type Projector<T> = Arc<dyn Fn(&Live<Snapshot>) -> Live<T> + Send + Sync>;

struct Attached {
    target: Target,
    subscription: Subscription,
    pump: JoinHandle<()>,
}

/// A consumer's local state slot fed by at most one subscription.
///
/// Every write is tagged with the generation that was current when the subscription was
/// attached; detaching or re-targeting bumps the generation, so snapshots still in flight for
/// the old target are discarded.
pub struct Binding<T> {
    manager: Arc<SubscriptionManager>,
    project: Projector<T>,
    generation: Arc<Mutex<u64>>,
    state: Arc<watch::Sender<Live<T>>>,
    attached: Option<Attached>,
}

impl<T: FromDocument + Clone + Send + Sync + 'static> Binding<T> {
    /// Binding that projects single-document snapshots through `T::from_document`.
    pub fn document(manager: Arc<SubscriptionManager>) -> Self {
        Self::new(manager, project_live::<T>)
    }
}

impl<T: Clone + Send + Sync + 'static> Binding<T> {
    pub fn new<F>(manager: Arc<SubscriptionManager>, project: F) -> Self
    where
        F: Fn(&Live<Snapshot>) -> Live<T> + Send + Sync + 'static,
    {
        let (state, _) = watch::channel(Live::Loading);
        Self {
            manager,
            project: Arc::new(project),
            generation: Arc::new(Mutex::new(0)),
            state: Arc::new(state),
            attached: None,
        }
    }

    pub fn get(&self) -> Live<T> {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Live<T>> {
        self.state.subscribe()
    }

    /// The target this binding is listening to. `None` when detached or when the listener was
    /// closed underneath it.
    pub fn target(&self) -> Option<&Target> {
        self.attached
            .as_ref()
            .filter(|attached| attached.subscription.is_open())
            .map(|attached| &attached.target)
    }

    /// Point the binding at a document path; `None` or blank detaches.
    pub fn attach_path(&mut self, path: Option<&str>) -> SyncResult<()> {
        let target = match path.map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(Target::Document(ResourcePath::new(raw)?)),
            None => None,
        };
        self.attach(target);
        Ok(())
    }

    /// Point the binding at `target`. The same live target is a no-op; a different one
    /// releases the current subscription before the new one is opened. A target whose listener
    /// was closed underneath the binding is re-opened. Store failures are logged and leave the
    /// slot `Absent`.
    pub fn attach(&mut self, target: Option<Target>) {
        if self.target() == target.as_ref() {
            return;
        }
        self.detach();
        let Some(target) = target else {
            return;
        };

        let generation = {
            let current = self.generation.lock();
            self.state.send_replace(Live::Loading);
            *current
        };

        let subscription = match self.manager.subscribe(target.clone()) {
            Ok(subscription) => subscription,
            Err(err) => {
                warn!(
                    target = "sync.subscription",
                    watched = %target,
                    error = %err,
                    "subscribe failed"
                );
                apply(&self.generation, generation, &self.state, Live::Absent);
                return;
            }
        };

        let pump = self.start_pump(&subscription, generation);
        self.attached = Some(Attached {
            target,
            subscription,
            pump,
        });
    }

    pub(crate) fn set_projector<F>(&mut self, project: F)
    where
        F: Fn(&Live<Snapshot>) -> Live<T> + Send + Sync + 'static,
    {
        self.project = Arc::new(project);
    }

    /// Swap the projection and re-project the current snapshot without touching the listener.
    pub(crate) fn reproject<F>(&mut self, project: F)
    where
        F: Fn(&Live<Snapshot>) -> Live<T> + Send + Sync + 'static,
    {
        self.project = Arc::new(project);
        let generation = {
            let mut current = self.generation.lock();
            *current += 1;
            *current
        };
        let Some(attached) = self.attached.as_mut() else {
            return;
        };
        attached.pump.abort();
        let subscription = &attached.subscription;
        let pump = spawn_pump(
            subscription,
            self.project.clone(),
            self.generation.clone(),
            self.state.clone(),
            generation,
        );
        attached.pump = pump;
    }

    fn start_pump(&self, subscription: &Subscription, generation: u64) -> JoinHandle<()> {
        spawn_pump(
            subscription,
            self.project.clone(),
            self.generation.clone(),
            self.state.clone(),
            generation,
        )
    }

    /// Release the current subscription synchronously. The exposed state keeps its last value.
    pub fn detach(&mut self) {
        *self.generation.lock() += 1;
        if let Some(attached) = self.attached.take() {
            attached.pump.abort();
            debug!(target = "sync.subscription", watched = %attached.target, "consumer detached");
        }
    }
}

// Copies snapshots into the binding until the listener closes. A close that the binding did not
// ask for leaves the slot `Absent`.
fn spawn_pump<T: Send + Sync + 'static>(
    subscription: &Subscription,
    project: Projector<T>,
    guard: Arc<Mutex<u64>>,
    state: Arc<watch::Sender<Live<T>>>,
    generation: u64,
) -> JoinHandle<()> {
    let mut receiver = subscription.watch();
    let target = subscription.target().clone();
    tokio::spawn(async move {
        loop {
            let value = {
                let current = receiver.borrow_and_update();
                project(&*current)
            };
            if !apply(&guard, generation, &state, value) {
                return;
            }
            if receiver.changed().await.is_err() {
                break;
            }
        }
        if apply(&guard, generation, &state, Live::Absent) {
            debug!(
                target = "sync.subscription",
                watched = %target,
                "listener closed under consumer"
            );
        }
    })
}

impl<T> Drop for Binding<T> {
    fn drop(&mut self) {
        *self.generation.lock() += 1;
        if let Some(attached) = self.attached.take() {
            attached.pump.abort();
        }
    }
}

fn apply<T>(
    guard: &Mutex<u64>,
    generation: u64,
    state: &watch::Sender<Live<T>>,
    value: Live<T>,
) -> bool {
    let current = guard.lock();
    if *current != generation {
        debug!(
            target = "sync.subscription",
            stale = generation,
            current = *current,
            "discarding stale snapshot"
        );
        return false;
    }
    state.send_replace(value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_store::{Document, LocalStore};
    use futures::StreamExt;
    use serde_json::json;

    fn setup() -> (Arc<LocalStore>, Arc<SubscriptionManager>) {
        let store = Arc::new(LocalStore::new());
        let manager = SubscriptionManager::new(store.clone());
        (store, manager)
    }

    fn doc_target(path: &str) -> Target {
        Target::Document(ResourcePath::new(path).unwrap())
    }

    #[tokio::test]
    async fn blank_path_creates_no_listener() {
        let (store, manager) = setup();
        assert!(manager.subscribe_path(None).unwrap().is_none());
        assert!(manager.subscribe_path(Some("  ")).unwrap().is_none());
        assert_eq!(store.listen_calls(), 0);
    }

    #[tokio::test]
    async fn repeated_subscribe_shares_one_listener() {
        let (store, manager) = setup();
        let first = manager.subscribe_path(Some("chats/c1")).unwrap().unwrap();
        let second = manager.subscribe_path(Some("chats/c1")).unwrap().unwrap();
        let third = manager.subscribe(doc_target("chats/c1")).unwrap();
        assert_eq!(store.listen_calls(), 1);
        assert_eq!(manager.active_listeners(), 1);

        drop(first);
        drop(second);
        assert_eq!(store.teardown_calls(), 0);
        drop(third);
        assert_eq!(store.listen_calls(), 1);
        assert_eq!(store.teardown_calls(), 1);
        assert_eq!(store.active_listeners(), 0);
    }

    #[tokio::test]
    async fn missing_document_is_reported_as_absent() {
        let (store, manager) = setup();
        let sub = manager.subscribe_path(Some("chats/nope")).unwrap().unwrap();
        assert_eq!(sub.current(), Live::Absent);

        let mut stream = Box::pin(sub.into_stream());
        assert_eq!(stream.next().await, Some(Live::Absent));
        store.set("chats/nope", json!({"title": "now here"})).unwrap();
        match stream.next().await {
            Some(Live::Ready(Snapshot::Document(doc))) => assert_eq!(doc.id, "nope"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsubscribe_ends_streams_and_ignores_stale_handles() {
        let (store, manager) = setup();
        let target = doc_target("chats/c1");
        let mut old = manager.subscribe(target.clone()).unwrap();
        assert!(manager.unsubscribe(&target));
        assert_eq!(store.teardown_calls(), 1);
        assert_eq!(old.changed().await, None);

        let fresh = manager.subscribe(target.clone()).unwrap();
        drop(old);
        assert!(manager.is_active(&target));
        drop(fresh);
        assert!(!manager.is_active(&target));
        assert_eq!(store.listen_calls(), 2);
        assert_eq!(store.teardown_calls(), 2);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let (store, manager) = setup();
        let _a = manager.subscribe_path(Some("chats/a")).unwrap();
        let _b = manager.subscribe_path(Some("chats/b")).unwrap();
        manager.shutdown();
        assert_eq!(store.active_listeners(), 0);
        assert_eq!(store.teardown_calls(), 2);
    }

    #[tokio::test]
    async fn binding_follows_path_changes() {
        let (store, manager) = setup();
        store.set("chats/a", json!({"title": "a"})).unwrap();
        store.set("chats/b", json!({"title": "b"})).unwrap();

        let mut binding: Binding<Document> = Binding::document(manager.clone());
        let mut rx = binding.watch();
        binding.attach_path(Some("chats/a")).unwrap();
        rx.wait_for(|live| live.ready().is_some()).await.unwrap();
        assert_eq!(binding.get().ready().map(|d| d.id.clone()), Some("a".into()));

        binding.attach_path(Some("chats/a")).unwrap();
        assert_eq!(store.listen_calls(), 1);

        binding.attach_path(Some("chats/b")).unwrap();
        assert_eq!(store.teardown_calls(), 1);
        assert_eq!(store.active_listeners(), 1);
        rx.wait_for(|live| live.ready().is_some_and(|d| d.id == "b"))
            .await
            .unwrap();

        binding.attach_path(None).unwrap();
        assert_eq!(store.active_listeners(), 0);
    }

    #[tokio::test]
    async fn detached_binding_ignores_in_flight_snapshots() {
        let (store, manager) = setup();
        store.set("chats/a", json!({"title": "before"})).unwrap();
        let mut binding: Binding<Document> = Binding::document(manager.clone());
        let mut rx = binding.watch();
        binding.attach_path(Some("chats/a")).unwrap();
        rx.wait_for(|live| live.ready().is_some()).await.unwrap();

        // The write lands in the shared channel but the pump has not run yet.
        store.set("chats/a", json!({"title": "after"})).unwrap();
        binding.detach();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        let title = binding
            .get()
            .ready()
            .and_then(|doc| doc.get("title").cloned());
        assert_eq!(title, Some(json!("before")));
        assert_eq!(store.active_listeners(), 0);
    }

    #[tokio::test]
    async fn binding_recovers_after_its_listener_is_unsubscribed() {
        let (store, manager) = setup();
        store.set("chats/a", json!({"title": "before"})).unwrap();
        let mut binding: Binding<Document> = Binding::document(manager.clone());
        let mut rx = binding.watch();
        binding.attach_path(Some("chats/a")).unwrap();
        rx.wait_for(|live| live.ready().is_some()).await.unwrap();

        assert!(manager.unsubscribe(&doc_target("chats/a")));
        rx.wait_for(|live| *live == Live::Absent).await.unwrap();
        assert!(binding.target().is_none());
        assert_eq!(store.active_listeners(), 0);

        binding.attach_path(Some("chats/a")).unwrap();
        assert_eq!(binding.target(), Some(&doc_target("chats/a")));
        assert_eq!(store.listen_calls(), 2);
        assert_eq!(store.active_listeners(), 1);

        store.set("chats/a", json!({"title": "after"})).unwrap();
        let is_after = |doc: &Document| doc.get("title") == Some(&json!("after"));
        rx.wait_for(|live| live.ready().is_some_and(is_after))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn binding_degrades_when_store_is_offline() {
        let (store, manager) = setup();
        store.set_offline(true);
        let mut binding: Binding<Document> = Binding::document(manager);
        binding.attach_path(Some("chats/a")).unwrap();
        assert_eq!(binding.get(), Live::Absent);
        assert!(binding.target().is_none());
    }

    #[test]
    fn stale_generation_never_writes() {
        let guard = Mutex::new(3);
        let (state, _rx) = watch::channel(Live::<u32>::Loading);
        assert!(!apply(&guard, 2, &state, Live::Ready(7)));
        assert_eq!(*state.borrow(), Live::Loading);
        assert!(apply(&guard, 3, &state, Live::Ready(7)));
        assert_eq!(*state.borrow(), Live::Ready(7));
    }
}
