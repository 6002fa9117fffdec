//! Shared circuit-breaker state store.
//!
//! Per-command bucket counters and open/closed/half-open circuit flags, kept in a
//! key-value substrate that many threads or processes share without a
//! coordinator. Correctness rests on the substrate's per-key atomic primitives;
//! expiration is managed lazily by readers.

pub mod circuit;
pub mod clock;
pub mod config;
pub mod error;
pub mod observability;
pub mod storage;
pub mod substrate;

pub use circuit::{CircuitPhase, CircuitSnapshot, CircuitStateStore, MetricType, StateStorage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::StateConfig;
pub use error::{StoreError, StoreResult};
pub use storage::{SlotStore, SlotValue};
pub use substrate::{MemoryBackend, SharedRegion, SlotBackend};
