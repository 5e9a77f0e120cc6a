use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;

use crate::payload::NotificationPayload;
use crate::tag::tag_for;

/// A notification as handed to the host for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub tag: String,
    pub title: String,
    pub body: String,
    pub icon: String,
    pub url: Option<String>,
    /// Alert again when this replaces a notification with the same tag.
    pub renotify: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub received_at: OffsetDateTime,
}

impl Notification {
    pub fn from_payload(payload: &NotificationPayload, received_at: OffsetDateTime) -> Self {
        Self {
            tag: tag_for(payload),
            title: payload.title.clone(),
            body: payload.body.clone(),
            icon: payload.icon.clone(),
            url: payload.click_url().map(str::to_string),
            renotify: true,
            received_at,
        }
    }
}

#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("notification display unavailable: {0}")]
    Unavailable(String),
    #[error("cannot open {url}: {reason}")]
    Open { url: String, reason: String },
}

/// Host notification surface.
pub trait NotificationDisplay: Send + Sync {
    fn show(&self, notification: &Notification) -> Result<(), DisplayError>;

    fn close(&self, tag: &str);

    fn open_url(&self, url: &str) -> Result<(), DisplayError>;
}

/// Display that writes notifications to the log. Used by the standalone binary.
#[derive(Debug, Default)]
pub struct TracingDisplay;

impl NotificationDisplay for TracingDisplay {
    fn show(&self, notification: &Notification) -> Result<(), DisplayError> {
        info!(
            target = "notify.display",
            tag = %notification.tag,
            title = %notification.title,
            body = %notification.body,
            icon = %notification.icon,
            url = notification.url.as_deref().unwrap_or("-"),
            "show notification"
        );
        Ok(())
    }

    fn close(&self, tag: &str) {
        info!(target = "notify.display", tag, "close notification");
    }

    fn open_url(&self, url: &str) -> Result<(), DisplayError> {
        info!(target = "notify.display", url, "open window");
        Ok(())
    }
}

/// In-memory display for tests and early wiring.
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    shown: Mutex<Vec<Notification>>,
    closed: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
    fail_next_show: AtomicBool,
}

impl RecordingDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        self.shown.lock().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    /// Make the next `show` call fail.
    pub fn fail_next_show(&self) {
        self.fail_next_show.store(true, Ordering::SeqCst);
    }
}

impl NotificationDisplay for RecordingDisplay {
    fn show(&self, notification: &Notification) -> Result<(), DisplayError> {
        if self.fail_next_show.swap(false, Ordering::SeqCst) {
            return Err(DisplayError::Unavailable("display rejected notification".into()));
        }
        self.shown.lock().push(notification.clone());
        Ok(())
    }

    fn close(&self, tag: &str) {
        self.closed.lock().push(tag.to_string());
    }

    fn open_url(&self, url: &str) -> Result<(), DisplayError> {
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}
