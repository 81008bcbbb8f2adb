use crate::conversation::EngineError;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AdapterError {
    /// The payload cannot be turned into an inbound event. Redelivery won't help.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The turn could not be persisted. The vendor should redeliver.
    #[error("persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl From<EngineError> for AdapterError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(msg) => Self::Malformed(msg),
            EngineError::Persistence(e) => Self::Persistence(e),
        }
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}

/// A vendor channel: turns webhook deliveries into engine turns and renders
/// the replies back in the vendor's format.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Path segment under `/webhooks/`.
    fn name(&self) -> &'static str;

    /// Header carrying the hex HMAC-SHA256 of the raw body.
    fn signature_header(&self) -> &'static str;

    /// Shared webhook secret. Empty disables signature checks.
    fn webhook_secret(&self) -> &str;

    /// Handle one delivery. The returned JSON is the HTTP response body.
    async fn handle_webhook(&self, body: &[u8]) -> Result<Value, AdapterError>;
}

/// Hex HMAC-SHA256 check, constant time. Accepts an optional `sha256=` prefix.
pub fn validate_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());
    let sig = signature.trim();
    let sig = sig.strip_prefix("sha256=").unwrap_or(sig);
    expected.as_bytes().ct_eq(sig.as_bytes()).into()
}

/// Hex HMAC-SHA256 of `body`, as vendors send it.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// FIFO gate per external identity: two events from the same customer are
/// handled one after the other, in the order they acquired the gate.
#[derive(Default)]
pub struct IdentityGate {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            // Drop idle entries; only the map holds a reference to them
            locks.retain(|key, l| key == identity || Arc::strong_count(l) > 1);
            locks.entry(identity.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map_or(0, |l| l.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Split a message into chunks respecting UTF-8 character boundaries.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while remaining.len() > limit {
        let mut split_at = limit;
        while split_at > 0 && !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        if split_at == 0 {
            // Single character wider than limit
            split_at = remaining
                .char_indices()
                .nth(1)
                .map_or(remaining.len(), |(i, _)| i);
        }

        if let Some(idx) = remaining[..split_at].rfind("\n\n") {
            chunks.push(remaining[..idx].trim().to_string());
            remaining = &remaining[idx + 2..];
            continue;
        }
        if let Some(idx) = remaining[..split_at].rfind('\n') {
            chunks.push(remaining[..idx].trim().to_string());
            remaining = &remaining[idx + 1..];
            continue;
        }

        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }

    if !remaining.is_empty() {
        chunks.push(remaining.trim().to_string());
    }

    chunks.into_iter().filter(|c| !c.is_empty()).collect()
}
