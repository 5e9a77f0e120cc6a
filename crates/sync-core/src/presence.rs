use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use doc_store::{Document, Predicate, Query, Snapshot, Target, MAX_MEMBERSHIP_VALUES};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::subscription::{Binding, SubscriptionManager};
use crate::{Live, SyncError, SyncResult};

/// Largest id set one presence query may watch.
pub const MAX_TRACKED_IDS: usize = MAX_MEMBERSHIP_VALUES;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    pub online: bool,
}

/// Which side of the dashboard is asking. Each side watches the other side's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Vendor,
    Agent,
}

#[derive(Debug, Clone)]
pub struct PresenceCollections {
    pub vendor_view: String,
    pub agent_view: String,
    pub online_field: String,
}

impl Default for PresenceCollections {
    fn default() -> Self {
        Self {
            vendor_view: "agents".to_string(),
            agent_view: "vendors".to_string(),
            online_field: "online".to_string(),
        }
    }
}

impl PresenceCollections {
    pub fn collection_for(&self, viewer: Viewer) -> &str {
        match viewer {
            Viewer::Vendor => &self.vendor_view,
            Viewer::Agent => &self.agent_view,
        }
    }
}

pub struct PresenceTracker {
    manager: Arc<SubscriptionManager>,
    collections: PresenceCollections,
}

impl PresenceTracker {
    pub fn new(manager: Arc<SubscriptionManager>) -> Self {
        Self::with_collections(manager, PresenceCollections::default())
    }

    pub fn with_collections(
        manager: Arc<SubscriptionManager>,
        collections: PresenceCollections,
    ) -> Self {
        Self {
            manager,
            collections,
        }
    }

    /// Start tracking `user_ids`. The binding emits one record per distinct id on every
    /// snapshot. An empty id set opens no listener.
    pub fn track<S: AsRef<str>>(
        &self,
        user_ids: &[S],
        viewer: Viewer,
    ) -> SyncResult<Binding<Vec<PresenceRecord>>> {
        let mut binding = Binding::new(self.manager.clone(), |_: &Live<Snapshot>| Live::Loading);
        self.retrack(&mut binding, user_ids, viewer)?;
        Ok(binding)
    }

    /// Point an existing binding at a new id set or viewer. The previous listener is released
    /// before the new one opens; an unchanged request keeps the current listener.
    pub fn retrack<S: AsRef<str>>(
        &self,
        binding: &mut Binding<Vec<PresenceRecord>>,
        user_ids: &[S],
        viewer: Viewer,
    ) -> SyncResult<()> {
        let ids = distinct_ids(user_ids);
        if ids.len() > MAX_TRACKED_IDS {
            return Err(SyncError::TooManyIds {
                requested: ids.len(),
                max: MAX_TRACKED_IDS,
            });
        }
        if ids.is_empty() {
            binding.attach(None);
            return Ok(());
        }

        let mut sorted = ids.clone();
        sorted.sort();
        let target = Target::Query(
            Query::new(self.collections.collection_for(viewer)).filter(Predicate::id_in(sorted)),
        );
        let tracked = ids.len();
        let field = self.collections.online_field.clone();
        let project = move |live: &Live<Snapshot>| match live {
            Live::Loading => Live::Loading,
            Live::Ready(Snapshot::Documents(docs)) => Live::Ready(rebuild(&ids, docs, &field)),
            Live::Absent | Live::Ready(_) => Live::Ready(rebuild(&ids, &[], &field)),
        };

        // Same id set in a new order: keep the listener, re-emit in the requested order.
        if binding.target() == Some(&target) {
            binding.reproject(project);
            return Ok(());
        }

        debug!(
            target = "sync.presence",
            viewer = ?viewer,
            ids = tracked,
            "tracking presence"
        );
        binding.detach();
        binding.set_projector(project);
        binding.attach(Some(target));
        Ok(())
    }
}

/// Build the full presence list for `ids` from a snapshot. Ids without a document, or whose
/// document lacks a boolean presence field, are offline.
pub fn rebuild(ids: &[String], docs: &[Document], online_field: &str) -> Vec<PresenceRecord> {
    let online: HashMap<&str, bool> = docs
        .iter()
        .map(|doc| {
            let flag = doc
                .get(online_field)
                .and_then(|value| value.as_bool())
                .unwrap_or(false);
            (doc.id.as_str(), flag)
        })
        .collect();
    ids.iter()
        .map(|id| PresenceRecord {
            user_id: id.clone(),
            online: online.get(id.as_str()).copied().unwrap_or(false),
        })
        .collect()
}

fn distinct_ids<S: AsRef<str>>(user_ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    user_ids
        .iter()
        .map(|id| id.as_ref().trim())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_store::LocalStore;
    use serde_json::json;

    fn setup() -> (Arc<LocalStore>, PresenceTracker) {
        let store = Arc::new(LocalStore::new());
        let manager = SubscriptionManager::new(store.clone());
        (store, PresenceTracker::new(manager))
    }

    #[test]
    fn rebuild_defaults_missing_presence_to_offline() {
        let docs = vec![
            Document::new("a", json!({"online": true}).as_object().cloned().unwrap()),
            Document::new("b", json!({"online": "yes"}).as_object().cloned().unwrap()),
        ];
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let records = rebuild(&ids, &docs, "online");
        assert_eq!(records.len(), 3);
        assert!(records[0].online);
        assert!(!records[1].online);
        assert!(!records[2].online);
    }

    #[tokio::test]
    async fn emits_one_record_per_requested_id() {
        let (store, tracker) = setup();
        store.set("agents/a1", json!({"online": true})).unwrap();
        let binding = tracker
            .track(&["a1", "a2", "a1"], Viewer::Vendor)
            .unwrap();
        let mut rx = binding.watch();
        let records = rx
            .wait_for(|live| live.ready().is_some())
            .await
            .unwrap()
            .ready()
            .cloned()
            .unwrap();
        assert_eq!(
            records,
            vec![
                PresenceRecord {
                    user_id: "a1".into(),
                    online: true
                },
                PresenceRecord {
                    user_id: "a2".into(),
                    online: false
                },
            ]
        );

        store.set("agents/a2", json!({"online": true})).unwrap();
        rx.wait_for(|live| live.ready().is_some_and(|r| r.iter().all(|p| p.online)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn viewer_selects_collection() {
        let (store, tracker) = setup();
        store.set("vendors/v1", json!({"online": true})).unwrap();
        let binding = tracker.track(&["v1"], Viewer::Agent).unwrap();
        let mut rx = binding.watch();
        rx.wait_for(|live| live.ready().is_some_and(|r| r[0].online))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejects_more_than_thirty_ids() {
        let (store, tracker) = setup();
        let ids: Vec<String> = (0..31).map(|i| format!("u{i}")).collect();
        let err = tracker.track(&ids, Viewer::Vendor).err().expect("too many ids");
        assert!(matches!(
            err,
            SyncError::TooManyIds {
                requested: 31,
                max: 30
            }
        ));
        assert_eq!(store.listen_calls(), 0);

        let thirty: Vec<String> = ids.into_iter().take(30).collect();
        let binding = tracker.track(&thirty, Viewer::Vendor).unwrap();
        let mut rx = binding.watch();
        let len = rx
            .wait_for(|live| live.ready().is_some())
            .await
            .unwrap()
            .ready()
            .map(Vec::len);
        assert_eq!(len, Some(30));
    }

    #[tokio::test]
    async fn reordered_ids_keep_the_listener_and_follow_the_new_order() {
        let (store, tracker) = setup();
        store.set("agents/a", json!({"online": true})).unwrap();
        let mut binding = tracker.track(&["a", "b"], Viewer::Vendor).unwrap();
        let mut rx = binding.watch();
        rx.wait_for(|live| live.ready().is_some()).await.unwrap();

        tracker
            .retrack(&mut binding, &["b", "a"], Viewer::Vendor)
            .unwrap();
        let order: Vec<String> = rx
            .wait_for(|live| live.ready().is_some_and(|r| r[0].user_id == "b"))
            .await
            .unwrap()
            .ready()
            .map(|records| records.iter().map(|r| r.user_id.clone()).collect())
            .unwrap();
        assert_eq!(order, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(store.listen_calls(), 1);
        assert_eq!(store.teardown_calls(), 0);
    }

    #[tokio::test]
    async fn offline_store_leaves_presence_absent() {
        let (store, tracker) = setup();
        store.set_offline(true);
        let binding = tracker.track(&["a1", "a2"], Viewer::Vendor).unwrap();
        assert!(!binding.get().is_loading());
        assert_eq!(binding.get(), Live::Absent);
        assert!(binding.target().is_none());
        assert_eq!(store.listen_calls(), 0);
        assert_eq!(store.active_listeners(), 0);
    }

    #[tokio::test]
    async fn retrack_releases_previous_listener() {
        let (store, tracker) = setup();
        let mut binding = tracker.track(&["a1"], Viewer::Vendor).unwrap();
        tracker
            .retrack(&mut binding, &["a1"], Viewer::Vendor)
            .unwrap();
        assert_eq!(store.listen_calls(), 1);

        tracker
            .retrack(&mut binding, &["a1", "a2"], Viewer::Vendor)
            .unwrap();
        assert_eq!(store.listen_calls(), 2);
        assert_eq!(store.teardown_calls(), 1);

        tracker
            .retrack(&mut binding, &Vec::<String>::new(), Viewer::Vendor)
            .unwrap();
        assert_eq!(store.active_listeners(), 0);
    }
}
