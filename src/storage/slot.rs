//! Slot payloads and their serialized form.

use serde::{Deserialize, Serialize};

/// Expiration instant meaning "never expires".
pub const NEVER_EXPIRES: u64 = u64::MAX;

/// Payload stored in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotValue {
    Counter(i64),
    Flag(bool),
}

impl SlotValue {
    pub fn as_counter(&self) -> Option<i64> {
        match self {
            SlotValue::Counter(n) => Some(*n),
            SlotValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            SlotValue::Flag(b) => Some(*b),
            SlotValue::Counter(_) => None,
        }
    }
}

/// The `(payload, expiration-instant)` pair held by one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub value: SlotValue,
    /// Unix seconds. [`NEVER_EXPIRES`] for no expiration.
    pub expires_at: u64,
}

impl Slot {
    /// Build a slot expiring `ttl_secs` after `now`. A zero TTL never expires.
    pub fn new(value: SlotValue, now: u64, ttl_secs: u64) -> Self {
        let expires_at = if ttl_secs == 0 {
            NEVER_EXPIRES
        } else {
            now.saturating_add(ttl_secs)
        };
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
