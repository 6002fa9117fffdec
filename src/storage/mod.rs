//! Slot storage layered on the substrate.
//!
//! # Data Flow
//! ```text
//! CircuitStateStore
//!     → atomic.rs (increment_or_create, read_counter, read_flag, reset_if_live)
//!     → store.rs (read / write / create_if_absent / delete, lazy expiry)
//!     → keys.rs (logical name → physical key)
//!     → slot.rs (SlotValue + expiration, JSON encoded)
//!     → SlotBackend
//! ```
//!
//! # Design Decisions
//! - Expiration is checked on read; expired slots are deleted by the reader that
//!   finds them, with a compare-and-delete so a fresh write is never lost
//! - Malformed bytes behave like an expired slot
//! - Payloads are a closed tagged enum, so a counter read of a flag is a default,
//!   never a misinterpretation

pub mod atomic;
pub mod keys;
pub mod slot;
pub mod store;

pub use slot::{Slot, SlotValue, NEVER_EXPIRES};
pub use store::SlotStore;
