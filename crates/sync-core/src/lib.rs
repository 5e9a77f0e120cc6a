//! Real-time sync core shared by dashboard clients.
//!
//! Responsibilities:
//! - keeping one live listener per store target and fanning it out to consumers
//! - projecting untyped store documents into typed entities at the subscription boundary
//! - deriving presence lists and filtered counts from the store
//! - holding explicitly scoped per-session UI state (request id, dialog id, payment flag)

use doc_store::{Snapshot, StoreError};
use thiserror::Error;

pub mod context;
pub mod counter;
pub mod entity;
pub mod presence;
pub mod subscription;

pub use context::{Accessor, ContextError, Provider, SessionContext};
pub use counter::{AggregateCounter, CountCell, CountQuery, CountState};
pub use entity::{FromDocument, ProjectionError};
pub use presence::{PresenceCollections, PresenceRecord, PresenceTracker, Viewer};
pub use subscription::{Binding, Subscription, SubscriptionManager};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("presence tracking accepts at most {max} ids, got {requested}")]
    TooManyIds { requested: usize, max: usize },
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Consumer-visible state of a live value.
#[derive(Debug, Clone, PartialEq)]
pub enum Live<T> {
    /// No snapshot has arrived yet.
    Loading,
    /// The store reported the target as missing, or loading ended without data.
    Absent,
    Ready(T),
}

impl<T> Live<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Live::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Live::Ready(value) => Some(value),
            _ => None,
        }
    }
}

impl From<Snapshot> for Live<Snapshot> {
    fn from(snapshot: Snapshot) -> Self {
        match snapshot {
            Snapshot::Absent => Live::Absent,
            other => Live::Ready(other),
        }
    }
}
