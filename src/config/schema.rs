//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the state store.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StateConfig {
    /// Key namespace and bucket lifetime.
    pub store: StoreConfig,

    /// Which substrate holds the slots.
    pub backend: BackendConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Slot store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Prefix for every physical key. Only `[A-Za-z0-9._-]`.
    pub key_prefix: String,

    /// Lifetime of a bucket counter in seconds. Must exceed the longest
    /// rolling window so buckets never vanish mid-window.
    pub bucket_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cb_".to_string(),
            bucket_ttl_secs: 120,
        }
    }
}

/// Substrate selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// In-process map; state is visible to threads of one process only.
    Memory,
    /// Memory-mapped file shared by every process that opens it.
    #[default]
    SharedRegion,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Used when `kind = "shared_region"`.
    pub region: RegionConfig,
}

/// Shared region geometry and location.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Path of the region file, ideally on a tmpfs such as /dev/shm.
    pub path: String,

    /// Number of slots. Each distinct key permanently binds one slot.
    pub slot_count: u32,

    /// Bytes per slot (multiple of 8, at least 256).
    pub slot_size: u32,

    /// Create the region file if it does not exist.
    pub create: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            path: "/dev/shm/circuit-state.region".to_string(),
            slot_count: 4096,
            slot_size: 256,
            create: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
