use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::{PushError, PushResult};

/// Uncompressed P-256 public key: `0x04 || X || Y`.
pub const UNCOMPRESSED_P256_LEN: usize = 65;

/// Public application server (VAPID) key used when creating push subscriptions.
#[derive(Clone, PartialEq, Eq)]
pub struct ApplicationServerKey(Vec<u8>);

impl ApplicationServerKey {
    /// Decode a base64url key. Padding and the standard alphabet are tolerated.
    pub fn from_base64url(raw: &str) -> PushResult<Self> {
        let normalized: String = raw
            .trim()
            .trim_end_matches('=')
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();
        let bytes = URL_SAFE_NO_PAD
            .decode(normalized.as_bytes())
            .map_err(|err| PushError::InvalidKey(err.to_string()))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> PushResult<Self> {
        if bytes.len() != UNCOMPRESSED_P256_LEN || bytes[0] != 0x04 {
            return Err(PushError::InvalidKey(format!(
                "expected {UNCOMPRESSED_P256_LEN}-byte uncompressed P-256 point, got {} bytes",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl fmt::Debug for ApplicationServerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApplicationServerKey")
            .field(&self.to_base64url())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_point() -> Vec<u8> {
        let mut bytes = vec![0x04];
        bytes.extend((1..=64).map(|b| b as u8));
        bytes
    }

    #[test]
    fn decodes_base64url_with_or_without_padding() {
        let encoded = URL_SAFE_NO_PAD.encode(sample_point());
        let key = ApplicationServerKey::from_base64url(&encoded).expect("valid key");
        assert_eq!(key.as_bytes(), sample_point().as_slice());

        let padded = format!("{encoded}=");
        assert_eq!(ApplicationServerKey::from_base64url(&padded).unwrap(), key);
    }

    #[test]
    fn rejects_wrong_length_or_prefix() {
        let short = URL_SAFE_NO_PAD.encode([0x04u8; 10]);
        assert!(matches!(
            ApplicationServerKey::from_base64url(&short),
            Err(PushError::InvalidKey(_))
        ));

        let mut compressed = sample_point();
        compressed[0] = 0x02;
        assert!(ApplicationServerKey::from_bytes(compressed).is_err());
        assert!(ApplicationServerKey::from_base64url("not base64!").is_err());
    }
}
