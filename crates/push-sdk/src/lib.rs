//! Push notification registration for dashboard sessions.
//!
//! Runs once per authenticated session: asks the platform for notification permission,
//! registers the background worker, creates a push subscription with the application server
//! key, and hands the resulting subscription to the backend (`POST {API_BASE_URL}/subscribe`).

use thiserror::Error;

pub mod backend;
pub mod config;
pub mod key;
pub mod platform;
pub mod registration;

pub use backend::{HttpBackend, PushSubscriptionRecord, SubscriptionBackend};
pub use config::PushConfig;
pub use key::ApplicationServerKey;
pub use platform::{
    Permission, PushPlatform, PushSubscription, SubscriptionKeys, WorkerRegistration,
};
pub use registration::{PushRegistrationClient, RegistrationState, RetryPolicy};

#[derive(Debug, Error)]
pub enum PushError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid api base url {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("invalid application server key: {0}")]
    InvalidKey(String),
    #[error("platform error: {0}")]
    Platform(String),
}

pub type PushResult<T> = Result<T, PushError>;
