use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{PushError, PushResult, PushSubscription};

/// Body of `POST /subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscriptionRecord {
    pub user_id: String,
    pub subscription: PushSubscription,
}

#[async_trait]
pub trait SubscriptionBackend: Send + Sync {
    async fn register(&self, record: &PushSubscriptionRecord) -> PushResult<()>;
}

/// Registers push subscriptions with the dashboard API over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    subscribe_url: Url,
}

impl HttpBackend {
    pub fn new(api_base_url: &str) -> PushResult<Self> {
        let raw = format!("{}/subscribe", api_base_url.trim().trim_end_matches('/'));
        let subscribe_url = Url::parse(&raw).map_err(|err| PushError::InvalidBaseUrl {
            url: api_base_url.to_string(),
            reason: err.to_string(),
        })?;
        if !matches!(subscribe_url.scheme(), "http" | "https") {
            return Err(PushError::InvalidBaseUrl {
                url: api_base_url.to_string(),
                reason: format!("unsupported scheme {}", subscribe_url.scheme()),
            });
        }
        Ok(Self {
            http: Client::new(),
            subscribe_url,
        })
    }

    pub fn subscribe_url(&self) -> &Url {
        &self.subscribe_url
    }
}

#[async_trait]
impl SubscriptionBackend for HttpBackend {
    async fn register(&self, record: &PushSubscriptionRecord) -> PushResult<()> {
        let res = self
            .http
            .post(self.subscribe_url.clone())
            .json(record)
            .send()
            .await?;

        if res.status().is_success() {
            Ok(())
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(PushError::UnexpectedStatus { status, body })
        }
    }
}
