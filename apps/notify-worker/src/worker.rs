use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::display::{DisplayError, Notification, NotificationDisplay};
use crate::metrics;
use crate::payload::NotificationPayload;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid push payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Display(#[from] DisplayError),
    #[error("no active notification with tag {0}")]
    UnknownTag(String),
}

/// One inbound message for the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Push(Bytes),
    Click { tag: String },
}

#[derive(Default)]
struct ActiveSet {
    order: VecDeque<String>,
    by_tag: HashMap<String, Notification>,
}

impl ActiveSet {
    /// Insert or replace by tag; returns tags evicted to stay within `cap`.
    fn insert(&mut self, notification: Notification, cap: usize) -> Vec<String> {
        let tag = notification.tag.clone();
        if self.by_tag.insert(tag.clone(), notification).is_some() {
            self.order.retain(|existing| *existing != tag);
        }
        self.order.push_back(tag);

        let mut evicted = Vec::new();
        while self.order.len() > cap.max(1) {
            if let Some(oldest) = self.order.pop_front() {
                self.by_tag.remove(&oldest);
                evicted.push(oldest);
            }
        }
        evicted
    }

    fn remove(&mut self, tag: &str) -> Option<Notification> {
        let removed = self.by_tag.remove(tag)?;
        self.order.retain(|existing| existing != tag);
        Some(removed)
    }
}

/// Turns push messages into displayed notifications. Keeps no state beyond the set of
/// notifications currently on screen, capped at `max_active`.
pub struct NotificationWorker<D> {
    display: Arc<D>,
    active: Mutex<ActiveSet>,
    max_active: usize,
}

impl<D: NotificationDisplay + 'static> NotificationWorker<D> {
    pub fn new(display: Arc<D>, max_active: usize) -> Self {
        Self {
            display,
            active: Mutex::new(ActiveSet::default()),
            max_active,
        }
    }

    pub fn handle_push(&self, raw: &[u8]) -> Result<Notification, WorkerError> {
        let payload = NotificationPayload::parse(raw)?;
        let notification = Notification::from_payload(&payload, OffsetDateTime::now_utc());
        self.display.show(&notification)?;

        let evicted = self
            .active
            .lock()
            .insert(notification.clone(), self.max_active);
        for tag in evicted {
            debug!(target = "notify.worker", %tag, "closing oldest notification");
            self.display.close(&tag);
            metrics::EVICTED.inc();
        }
        Ok(notification)
    }

    /// Close the clicked notification and open its URL. Returns the opened URL, if any.
    pub fn handle_click(&self, tag: &str) -> Result<Option<String>, WorkerError> {
        let notification = self
            .active
            .lock()
            .remove(tag)
            .ok_or_else(|| WorkerError::UnknownTag(tag.to_string()))?;
        self.display.close(tag);
        match notification.url {
            Some(url) => {
                self.display.open_url(&url)?;
                Ok(Some(url))
            }
            None => Ok(None),
        }
    }

    pub fn active(&self) -> Vec<Notification> {
        let active = self.active.lock();
        active
            .order
            .iter()
            .filter_map(|tag| active.by_tag.get(tag).cloned())
            .collect()
    }

    /// Handle one event; failures are logged and counted, never propagated.
    pub fn process(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Push(raw) => match self.handle_push(&raw) {
                Ok(notification) => {
                    metrics::PUSH_EVENTS.with_label_values(&["shown"]).inc();
                    debug!(target = "notify.worker", tag = %notification.tag, "notification shown");
                }
                Err(err) => {
                    let label = match err {
                        WorkerError::Payload(_) => "invalid",
                        _ => "failed",
                    };
                    metrics::PUSH_EVENTS.with_label_values(&[label]).inc();
                    warn!(target = "notify.worker", error = %err, "dropping push event");
                }
            },
            WorkerEvent::Click { tag } => match self.handle_click(&tag) {
                Ok(url) => {
                    metrics::CLICKS.with_label_values(&["ok"]).inc();
                    debug!(target = "notify.worker", %tag, url = ?url, "notification clicked");
                }
                Err(err) => {
                    metrics::CLICKS.with_label_values(&["failed"]).inc();
                    warn!(target = "notify.worker", %tag, error = %err, "click not handled");
                }
            },
        }
    }

    /// Consume events until every sender is gone.
    pub fn spawn(self: Arc<Self>, mut events: mpsc::Receiver<WorkerEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.process(event);
            }
            debug!(target = "notify.worker", "event channel closed; worker stopping");
        })
    }
}
