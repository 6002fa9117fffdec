//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! substrate, storage, circuit:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters via the `metrics` facade)
//!
//! Consumers:
//!     → whatever subscriber / recorder the embedding process installs
//!     → the circuit-state CLI installs a fmt subscriber
//! ```
//!
//! # Design Decisions
//! - The library never installs a global recorder or subscriber itself
//! - Metrics are cheap (atomic increments), safe on the hot path
//! - Hot-path events log at trace; transitions at debug; corruption at warn

pub mod logging;
pub mod metrics;
