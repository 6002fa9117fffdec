//! Storage error definitions.

use thiserror::Error;

/// Errors surfaced by the substrate and the stores built on it.
///
/// Missing, expired and malformed slots are never errors; they read as absent.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The substrate could not be opened. Fatal at construction.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// Every slot of the shared region holds another key's value.
    #[error("shared region full: all {slot_count} slots are live")]
    RegionFull { slot_count: u32 },

    /// A shared-region lock stayed with a running process past the deadline.
    #[error("{lock} lock still held by process {holder}")]
    LockTimeout { lock: String, holder: u32 },

    /// Key exceeds the substrate's addressing limit.
    #[error("key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLong { len: usize, max: usize },

    /// Serialized value does not fit in a slot.
    #[error("value of {len} bytes exceeds the {max} byte slot capacity")]
    ValueTooLarge { len: usize, max: usize },

    /// Slot serialization failed.
    #[error("failed to encode slot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        StoreError::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
