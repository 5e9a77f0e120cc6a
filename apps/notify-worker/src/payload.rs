use serde::{Deserialize, Serialize};

/// Push message body as sent by the dashboard backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    #[serde(default)]
    pub data: NotificationData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(default)]
    pub url: Option<String>,
}

impl NotificationPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    /// Click-through target, if the message carries a non-blank one.
    pub fn click_url(&self) -> Option<&str> {
        self.data
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}
