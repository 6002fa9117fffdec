//! Circuit-breaker state store.
//!
//! # States
//! - Closed: `opened` flag absent or false
//! - Open: `opened` true, sleep-window gate present
//! - Half-Open: the one caller granted by `allow_single_test` is probing
//!
//! # State Transitions
//! ```text
//! Closed → Open: open_circuit (sets opened, seeds the gate)
//! Open → Half-Open: gate expired AND allow_single_test grants this caller
//! Half-Open → Closed: close_circuit
//! Half-Open → Open: open_circuit
//! ```
//!
//! # Design Decisions
//! - The store only persists state; deciding when to trip lives with the caller
//! - The gate is seeded with create-if-absent, so a racing open never extends a
//!   running sleep window
//! - Gate presence means "no probe"; its expiry is what re-arms probing
//! - Buckets carry a fixed TTL so abandoned commands clean themselves up

pub mod metric;
pub mod state;

pub use metric::MetricType;
pub use state::{
    sleep_window_ttl_secs, CircuitPhase, CircuitSnapshot, CircuitStateStore, StateStorage,
};
