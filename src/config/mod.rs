//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → StateConfig (validated, immutable)
//!     → substrate::open_backend + CircuitStateStore
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; every process sharing a region must agree
//!   on its geometry and key prefix
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{BackendConfig, BackendKind, ObservabilityConfig, RegionConfig, StateConfig, StoreConfig};
