use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ApplicationServerKey, PushResult};

/// Outcome of a notification permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// The prompt was closed without a decision.
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRegistration {
    pub script_url: String,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// Platform-issued push credential. Opaque to this crate; forwarded to the backend as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

/// The host's background-worker and push stack.
#[async_trait]
pub trait PushPlatform: Send + Sync {
    fn supports_workers(&self) -> bool;

    fn supports_push(&self) -> bool;

    async fn request_permission(&self) -> PushResult<Permission>;

    async fn register_worker(&self, script_url: &str) -> PushResult<WorkerRegistration>;

    async fn subscribe(
        &self,
        registration: &WorkerRegistration,
        application_server_key: &ApplicationServerKey,
    ) -> PushResult<PushSubscription>;
}
