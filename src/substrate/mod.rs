//! Raw key-value substrate.
//!
//! # Data Flow
//! ```text
//! SlotStore (serialized (payload, expires_at) pairs)
//!     → SlotBackend trait (opaque bytes per key)
//!         → memory.rs (DashMap, one process)
//!         → region.rs (memory-mapped file, many processes)
//! ```
//!
//! # Design Decisions
//! - Backends know nothing about payloads or expiration; they move bytes
//! - Every operation is atomic per key; there are no multi-key operations
//! - `add`, `compare_and_swap` and `delete_if` are the only conditional writes,
//!   and everything above this layer is composed from them
//! - `sweep` lets the layer above reclaim expired values nobody reads again
//! - Construction fails loudly when the substrate cannot be opened

pub mod memory;
pub mod region;

use std::sync::Arc;

use crate::config::schema::{BackendConfig, BackendKind};
use crate::error::StoreResult;

pub use memory::MemoryBackend;
pub use region::{RegionStats, SharedRegion};

/// Byte-level capability set of a shared key-value substrate.
pub trait SlotBackend: Send + Sync {
    /// Short backend name for logs and errors.
    fn name(&self) -> &'static str;

    /// Longest key this substrate can address.
    fn max_key_len(&self) -> usize;

    /// Largest value a single slot can hold.
    fn max_value_len(&self) -> usize;

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Create or overwrite unconditionally.
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Create only if no value is stored. Returns whether this call created it.
    fn add(&self, key: &str, value: &[u8]) -> StoreResult<bool>;

    /// Replace the stored value only if it still equals `current`.
    fn compare_and_swap(&self, key: &str, current: &[u8], new: &[u8]) -> StoreResult<bool>;

    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Delete only if the stored value still equals `current`.
    fn delete_if(&self, key: &str, current: &[u8]) -> StoreResult<bool>;

    /// Delete every value `is_stale` accepts, each atomically with its check.
    /// Returns how many were deleted.
    fn sweep(&self, is_stale: &dyn Fn(&[u8]) -> bool) -> StoreResult<usize>;
}

/// Open the backend described by the configuration.
pub fn open_backend(config: &BackendConfig) -> StoreResult<Arc<dyn SlotBackend>> {
    let backend: Arc<dyn SlotBackend> = match config.kind {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::SharedRegion => Arc::new(SharedRegion::open(&config.region)?),
    };

    tracing::info!(backend = backend.name(), "State backend opened");
    Ok(backend)
}

pub(crate) fn check_sizes(
    backend: &dyn SlotBackend,
    key: &str,
    value: Option<&[u8]>,
) -> StoreResult<()> {
    use crate::error::StoreError;

    if key.len() > backend.max_key_len() {
        return Err(StoreError::KeyTooLong {
            len: key.len(),
            max: backend.max_key_len(),
        });
    }
    if let Some(value) = value {
        if value.len() > backend.max_value_len() {
            return Err(StoreError::ValueTooLarge {
                len: value.len(),
                max: backend.max_value_len(),
            });
        }
    }
    Ok(())
}
