//! Shared utilities for integration tests.

use std::sync::Arc;

use circuit_state::config::{RegionConfig, StoreConfig};
use circuit_state::{CircuitStateStore, Clock, ManualClock, MemoryBackend, SharedRegion, SystemClock};
use tempfile::TempDir;

/// Epoch the manual clock starts from in every harness.
pub const START_SECS: u64 = 1_700_000_000;

/// One or more stores over the same substrate, plus the clock they share.
#[allow(dead_code)]
pub struct Harness {
    pub name: &'static str,
    pub stores: Vec<CircuitStateStore>,
    pub clock: ManualClock,
    _dir: Option<TempDir>,
}

#[allow(dead_code)]
impl Harness {
    pub fn store(&self) -> &CircuitStateStore {
        &self.stores[0]
    }
}

/// Store over an in-process map.
#[allow(dead_code)]
pub fn memory_harness() -> Harness {
    let clock = ManualClock::new(START_SECS);
    let store = CircuitStateStore::with_backend(
        Arc::new(MemoryBackend::new()),
        Arc::new(clock.clone()),
        &StoreConfig::default(),
    );
    Harness {
        name: "memory",
        stores: vec![store],
        clock,
        _dir: None,
    }
}

/// `handles` independent mappings of one region file, as separate processes
/// would have.
#[allow(dead_code)]
pub fn region_harness(handles: usize) -> Harness {
    let clock = ManualClock::new(START_SECS);
    let (dir, config) = temp_region(1024);
    let stores = (0..handles)
        .map(|_| region_store(&config, Arc::new(clock.clone())))
        .collect();
    Harness {
        name: "shared_region",
        stores,
        clock,
        _dir: Some(dir),
    }
}

/// A memory harness and a single-handle region harness.
#[allow(dead_code)]
pub fn all_harnesses() -> Vec<Harness> {
    vec![memory_harness(), region_harness(1)]
}

pub fn temp_region(slot_count: u32) -> (TempDir, RegionConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = RegionConfig {
        path: dir.path().join("circuit.region").display().to_string(),
        slot_count,
        ..RegionConfig::default()
    };
    (dir, config)
}

pub fn region_store(config: &RegionConfig, clock: Arc<dyn Clock>) -> CircuitStateStore {
    let region = SharedRegion::open(config).unwrap();
    CircuitStateStore::with_backend(Arc::new(region), clock, &StoreConfig::default())
}

#[allow(dead_code)]
pub fn wall_clock_region_store(config: &RegionConfig) -> CircuitStateStore {
    region_store(config, Arc::new(SystemClock))
}
