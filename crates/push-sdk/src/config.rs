use std::env;
use std::time::Duration;

use crate::RetryPolicy;

#[derive(Debug, Clone)]
pub struct PushConfig {
    pub api_base_url: String,
    /// Base64url application server key. Registration cannot start without it.
    pub application_server_key: Option<String>,
    pub worker_script: String,
    pub retry: RetryPolicy,
}

impl PushConfig {
    pub fn from_env() -> Self {
        let max_attempts = env::var("PUSH_REGISTRATION_MAX_ATTEMPTS")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(1);
        let backoff_ms = env::var("PUSH_REGISTRATION_BACKOFF_MS")
            .ok()
            .and_then(|val| val.parse().ok())
            .unwrap_or(500);

        Self {
            api_base_url: env::var("API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            application_server_key: env::var("PUSH_APPLICATION_SERVER_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
            worker_script: env::var("PUSH_WORKER_SCRIPT").unwrap_or_else(|_| "/sw.js".to_string()),
            retry: RetryPolicy::bounded(max_attempts, Duration::from_millis(backoff_ms)),
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            application_server_key: None,
            worker_script: "/sw.js".to_string(),
            retry: RetryPolicy::none(),
        }
    }
}
