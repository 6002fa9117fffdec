//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (TTL > 0, region geometry)
//! - Reject key prefixes the substrate cannot address unescaped
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: StateConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{BackendKind, StateConfig};
use crate::storage::keys::is_valid_prefix;
use crate::substrate::region::{KEY_CAPACITY, MAX_SLOT_SIZE, MIN_SLOT_SIZE};

/// Longest accepted prefix; leaves room for a hashed name in a region key.
pub const MAX_PREFIX_LEN: usize = KEY_CAPACITY - 33;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("store.key_prefix {0:?} may only contain [A-Za-z0-9._-]")]
    InvalidPrefix(String),

    #[error("store.key_prefix is {len} bytes, at most {max} allowed")]
    PrefixTooLong { len: usize, max: usize },

    #[error("store.bucket_ttl_secs must be > 0")]
    ZeroBucketTtl,

    #[error("backend.region.path must not be empty")]
    EmptyRegionPath,

    #[error("backend.region.slot_count must be > 0")]
    ZeroSlotCount,

    #[error(
        "backend.region.slot_size {0} must be a multiple of 8 between {min} and {max}",
        min = MIN_SLOT_SIZE,
        max = MAX_SLOT_SIZE
    )]
    InvalidSlotSize(u32),

    #[error("observability.log_level {0:?} is not one of trace, debug, info, warn, error")]
    InvalidLogLevel(String),
}

pub fn validate_config(config: &StateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let prefix = &config.store.key_prefix;
    if !is_valid_prefix(prefix) {
        errors.push(ValidationError::InvalidPrefix(prefix.clone()));
    }
    if prefix.len() > MAX_PREFIX_LEN {
        errors.push(ValidationError::PrefixTooLong {
            len: prefix.len(),
            max: MAX_PREFIX_LEN,
        });
    }
    if config.store.bucket_ttl_secs == 0 {
        errors.push(ValidationError::ZeroBucketTtl);
    }

    if config.backend.kind == BackendKind::SharedRegion {
        let region = &config.backend.region;
        if region.path.trim().is_empty() {
            errors.push(ValidationError::EmptyRegionPath);
        }
        if region.slot_count == 0 {
            errors.push(ValidationError::ZeroSlotCount);
        }
        if !(MIN_SLOT_SIZE..=MAX_SLOT_SIZE).contains(&region.slot_size) || region.slot_size % 8 != 0 {
            errors.push(ValidationError::InvalidSlotSize(region.slot_size));
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
