//! Request envelope stamping.
//!
//! `SecureMessageSigner` adds a timestamp, a random nonce and a SHA-256 digest
//! over `payload || timestamp || nonce` to every outbound message. The page
//! context holds no key material, so the digest is tamper evidence for the
//! relay only. It does NOT authenticate the sender: any script in the page can
//! compute the same digest.

use rand::RngCore;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::core::errors::{ProviderError, ProviderResult};

pub const FIELD_TYPE: &str = "type";
pub const FIELD_TIMESTAMP: &str = "timestamp";
pub const FIELD_NONCE: &str = "nonce";
pub const FIELD_SIGNATURE: &str = "signature";

const ENVELOPE_FIELDS: [&str; 4] = [FIELD_TYPE, FIELD_TIMESTAMP, FIELD_NONCE, FIELD_SIGNATURE];

const NONCE_LEN: usize = 16;

/// Stamps outbound messages; stateless apart from its clock.
#[derive(Debug, Clone, Default)]
pub struct SecureMessageSigner {
    clock: Clock,
}

#[derive(Debug, Clone, Copy, Default)]
enum Clock {
    #[default]
    System,
    #[cfg(test)]
    Fixed(i64),
}

impl Clock {
    fn now_ms(&self) -> i64 {
        match self {
            Clock::System => chrono::Utc::now().timestamp_millis(),
            #[cfg(test)]
            Clock::Fixed(ts) => *ts,
        }
    }
}

impl SecureMessageSigner {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_fixed_clock(ts: i64) -> Self {
        Self { clock: Clock::Fixed(ts) }
    }

    /// Wraps `data` into `{...data, type, timestamp, nonce, signature}`.
    ///
    /// Envelope keys present in `data` are overwritten; the digest covers `data`
    /// as supplied, minus those keys.
    pub fn wrap(&self, message_type: &str, data: Map<String, Value>) -> ProviderResult<Value> {
        let mut payload = data;
        for field in ENVELOPE_FIELDS {
            payload.remove(field);
        }

        let timestamp = self.clock.now_ms();
        let nonce = generate_nonce();
        let signature = digest(&payload, timestamp, &nonce)?;

        let mut envelope = payload;
        envelope.insert(FIELD_TYPE.into(), Value::String(message_type.to_string()));
        envelope.insert(FIELD_TIMESTAMP.into(), Value::from(timestamp));
        envelope.insert(FIELD_NONCE.into(), Value::String(nonce));
        envelope.insert(FIELD_SIGNATURE.into(), Value::String(signature));
        Ok(Value::Object(envelope))
    }

    /// Recomputes the digest of a wrapped envelope.
    ///
    /// Returns `false` for anything that is not a well-formed envelope or whose
    /// payload changed after wrapping.
    pub fn verify(envelope: &Value) -> bool {
        let Some(obj) = envelope.as_object() else {
            return false;
        };
        let (Some(timestamp), Some(nonce), Some(signature)) = (
            obj.get(FIELD_TIMESTAMP).and_then(Value::as_i64),
            obj.get(FIELD_NONCE).and_then(Value::as_str),
            obj.get(FIELD_SIGNATURE).and_then(Value::as_str),
        ) else {
            return false;
        };

        let mut payload = obj.clone();
        for field in ENVELOPE_FIELDS {
            payload.remove(field);
        }
        match digest(&payload, timestamp, nonce) {
            Ok(expected) => expected == signature,
            Err(_) => false,
        }
    }
}

fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// serde_json's default Map is ordered by key, so the serialization is stable.
fn digest(payload: &Map<String, Value>, timestamp: i64, nonce: &str) -> ProviderResult<String> {
    let serialized = serde_json::to_string(payload)
        .map_err(|e| ProviderError::Internal(format!("envelope serialization: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(nonce.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}
