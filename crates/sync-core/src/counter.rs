use std::sync::Arc;

use doc_store::{DocumentStore, Predicate, Query};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Field every countable resource keeps its lifecycle status in.
pub const STATUS_FIELD: &str = "status";

/// `owner_field == owner_id AND status IN statuses` over one collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountQuery {
    pub resource: String,
    pub owner_field: String,
    pub owner_id: String,
    pub statuses: Vec<String>,
}

impl CountQuery {
    pub fn new<S: Into<String>>(
        resource: impl Into<String>,
        owner_field: impl Into<String>,
        owner_id: impl Into<String>,
        statuses: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            resource: resource.into(),
            owner_field: owner_field.into(),
            owner_id: owner_id.into(),
            statuses: statuses.into_iter().map(Into::into).collect(),
        }
    }

    /// Store query for this count, or `None` when nothing can match.
    fn to_query(&self) -> Option<Query> {
        if self.owner_id.trim().is_empty() || self.statuses.is_empty() {
            return None;
        }
        Some(
            Query::new(self.resource.clone())
                .filter(Predicate::eq(self.owner_field.clone(), self.owner_id.clone()))
                .filter(Predicate::one_of(STATUS_FIELD, self.statuses.iter().cloned())),
        )
    }
}

/// Point-in-time filtered counts. Never surfaces store errors: failures log and count as 0.
#[derive(Clone)]
pub struct AggregateCounter {
    store: Arc<dyn DocumentStore>,
}

impl AggregateCounter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn count(&self, query: &CountQuery) -> u64 {
        let Some(store_query) = query.to_query() else {
            return 0;
        };
        match self.store.count(&store_query).await {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    target = "sync.counter",
                    resource = %query.resource,
                    owner = %query.owner_id,
                    error = %err,
                    "count query failed; reporting 0"
                );
                0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountState {
    pub loading: bool,
    pub value: u64,
}

/// A count bound to one resource and status set, re-evaluated when the owner changes.
pub struct CountCell {
    counter: AggregateCounter,
    resource: String,
    owner_field: String,
    statuses: Vec<String>,
    evaluated: Option<CountQuery>,
    state: watch::Sender<CountState>,
}

impl CountCell {
    pub fn new<S: Into<String>>(
        counter: AggregateCounter,
        resource: impl Into<String>,
        owner_field: impl Into<String>,
        statuses: impl IntoIterator<Item = S>,
    ) -> Self {
        let (state, _) = watch::channel(CountState {
            loading: true,
            value: 0,
        });
        Self {
            counter,
            resource: resource.into(),
            owner_field: owner_field.into(),
            statuses: statuses.into_iter().map(Into::into).collect(),
            evaluated: None,
            state,
        }
    }

    pub fn state(&self) -> CountState {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<CountState> {
        self.state.subscribe()
    }

    /// Evaluate for `owner_id`. Repeating the last evaluated inputs returns the cached state
    /// without another query.
    pub async fn evaluate(&mut self, owner_id: &str) -> CountState {
        let query = CountQuery::new(
            self.resource.clone(),
            self.owner_field.clone(),
            owner_id,
            self.statuses.iter().cloned(),
        );
        if self.evaluated.as_ref() == Some(&query) {
            return self.state();
        }

        let previous = self.state().value;
        self.state.send_replace(CountState {
            loading: true,
            value: previous,
        });
        let value = self.counter.count(&query).await;
        debug!(
            target = "sync.counter",
            resource = %query.resource,
            owner = %query.owner_id,
            value,
            "count evaluated"
        );
        self.evaluated = Some(query);
        let state = CountState {
            loading: false,
            value,
        };
        self.state.send_replace(state);
        state
    }

    pub fn set_statuses<S: Into<String>>(&mut self, statuses: impl IntoIterator<Item = S>) {
        self.statuses = statuses.into_iter().map(Into::into).collect();
    }

    /// Force the next `evaluate` to query the store, e.g. after a known write.
    pub fn invalidate(&mut self) {
        self.evaluated = None;
    }
}
