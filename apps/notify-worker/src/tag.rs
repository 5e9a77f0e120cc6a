use sha2::{Digest, Sha256};

use crate::payload::NotificationPayload;

pub const TAG_PREFIX: &str = "notify-";

/// Content-derived notification tag. Identical messages share a tag and replace each other;
/// different messages never collapse.
pub fn tag_for(payload: &NotificationPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.title.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.body.as_bytes());
    hasher.update([0u8]);
    hasher.update(payload.click_url().unwrap_or_default().as_bytes());
    let digest = hasher.finalize();
    let mut tag = String::with_capacity(TAG_PREFIX.len() + 16);
    tag.push_str(TAG_PREFIX);
    for byte in &digest[..8] {
        tag.push_str(&format!("{byte:02x}"));
    }
    tag
}
