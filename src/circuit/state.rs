//! Circuit-breaker state over the slot store.

use std::sync::Arc;

use serde::Serialize;

use crate::circuit::metric::MetricType;
use crate::clock::{Clock, SystemClock};
use crate::config::schema::{StateConfig, StoreConfig};
use crate::error::StoreResult;
use crate::observability::metrics;
use crate::storage::keys::{compose, is_valid_prefix};
use crate::storage::{SlotStore, SlotValue};
use crate::substrate::{open_backend, SlotBackend};

/// Storage contract consumed by the circuit-breaker decision engine.
///
/// Absent, expired and malformed state never errors: counters read as 0 and
/// circuits read as closed. Errors come only from the substrate itself.
pub trait StateStorage: Send + Sync {
    /// Count for one bucket of a command's rolling window.
    fn get_bucket(&self, command_key: &str, metric: MetricType, index: u64) -> StoreResult<i64>;

    /// Record one event in a bucket, creating it if needed.
    fn increment_bucket(&self, command_key: &str, metric: MetricType, index: u64) -> StoreResult<()>;

    /// Zero a live bucket. A bucket that does not exist stays absent.
    fn reset_bucket(&self, command_key: &str, metric: MetricType, index: u64) -> StoreResult<()>;

    fn is_circuit_open(&self, command_key: &str) -> StoreResult<bool>;

    /// Trip the circuit and start the sleep window unless one is running.
    fn open_circuit(&self, command_key: &str, sleep_window_ms: u64) -> StoreResult<()>;

    /// Whether this caller may send the half-open probe.
    ///
    /// At most one caller per sleep window is told `true`.
    fn allow_single_test(&self, command_key: &str, sleep_window_ms: u64) -> StoreResult<bool>;

    /// Close the circuit. The sleep-window gate is left as is.
    fn close_circuit(&self, command_key: &str) -> StoreResult<()>;
}

/// Sleep windows are stored with whole-second TTLs, rounded up, never zero.
pub fn sleep_window_ttl_secs(sleep_window_ms: u64) -> u64 {
    sleep_window_ms.div_ceil(1000).max(1)
}

/// Phase of a circuit as seen through its stored flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    /// Open, and the sleep window is running or a probe is in flight.
    Open,
    /// Open, and the next `allow_single_test` caller will be granted the probe.
    ProbeAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    pub opened: bool,
    pub gate_armed: bool,
    pub phase: CircuitPhase,
}

/// [`StateStorage`] built entirely from slot-store primitives.
#[derive(Clone)]
pub struct CircuitStateStore {
    slots: SlotStore,
    bucket_ttl_secs: u64,
}

impl CircuitStateStore {
    /// `bucket_ttl_secs` must be non-zero; a zero TTL would never expire.
    pub fn new(slots: SlotStore, bucket_ttl_secs: u64) -> Self {
        debug_assert!(bucket_ttl_secs > 0, "bucket_ttl_secs must be > 0");
        debug_assert!(
            is_valid_prefix(slots.prefix()),
            "key prefix {:?} is not addressable unescaped",
            slots.prefix()
        );
        Self {
            slots,
            bucket_ttl_secs,
        }
    }

    /// Build over an existing backend and clock.
    ///
    /// `config` is expected to have passed `validate_config`.
    pub fn with_backend(
        backend: Arc<dyn SlotBackend>,
        clock: Arc<dyn Clock>,
        config: &StoreConfig,
    ) -> Self {
        Self::new(
            SlotStore::new(backend, clock, config.key_prefix.clone()),
            config.bucket_ttl_secs,
        )
    }

    /// Open the configured backend with the system clock.
    ///
    /// Fails if the backend is unavailable.
    pub fn from_config(config: &StateConfig) -> StoreResult<Self> {
        let backend = open_backend(&config.backend)?;
        Ok(Self::with_backend(backend, Arc::new(SystemClock), &config.store))
    }

    pub fn slots(&self) -> &SlotStore {
        &self.slots
    }

    pub fn bucket_ttl_secs(&self) -> u64 {
        self.bucket_ttl_secs
    }

    /// Current flags of a command's circuit.
    pub fn snapshot(&self, command_key: &str) -> StoreResult<CircuitSnapshot> {
        let opened = self.slots.read_flag(&opened_name(command_key))?;
        let gate_armed = self.slots.read(&gate_name(command_key))?.is_some();
        let phase = match (opened, gate_armed) {
            (false, _) => CircuitPhase::Closed,
            (true, true) => CircuitPhase::Open,
            (true, false) => CircuitPhase::ProbeAvailable,
        };
        Ok(CircuitSnapshot {
            opened,
            gate_armed,
            phase,
        })
    }
}

impl StateStorage for CircuitStateStore {
    fn get_bucket(&self, command_key: &str, metric: MetricType, index: u64) -> StoreResult<i64> {
        self.slots.read_counter(&bucket_name(command_key, metric, index))
    }

    fn increment_bucket(&self, command_key: &str, metric: MetricType, index: u64) -> StoreResult<()> {
        let count = self
            .slots
            .increment_or_create(&bucket_name(command_key, metric, index), self.bucket_ttl_secs)?;
        tracing::trace!(command_key = %command_key, %metric, index, count, "Bucket incremented");
        Ok(())
    }

    fn reset_bucket(&self, command_key: &str, metric: MetricType, index: u64) -> StoreResult<()> {
        let reset = self.slots.reset_if_live(
            &bucket_name(command_key, metric, index),
            SlotValue::Counter(0),
            self.bucket_ttl_secs,
        )?;
        tracing::trace!(command_key = %command_key, %metric, index, reset, "Bucket reset");
        Ok(())
    }

    fn is_circuit_open(&self, command_key: &str) -> StoreResult<bool> {
        self.slots.read_flag(&opened_name(command_key))
    }

    fn open_circuit(&self, command_key: &str, sleep_window_ms: u64) -> StoreResult<()> {
        self.slots
            .write(&opened_name(command_key), SlotValue::Flag(true), 0)?;

        let ttl = sleep_window_ttl_secs(sleep_window_ms);
        let seeded = self
            .slots
            .create_if_absent(&gate_name(command_key), SlotValue::Flag(true), ttl)?;

        metrics::record_circuit_transition("open");
        tracing::debug!(
            command_key = %command_key,
            sleep_window_secs = ttl,
            gate_seeded = seeded,
            "Circuit opened"
        );
        Ok(())
    }

    fn allow_single_test(&self, command_key: &str, sleep_window_ms: u64) -> StoreResult<bool> {
        let granted = self.slots.create_if_absent(
            &gate_name(command_key),
            SlotValue::Flag(true),
            sleep_window_ttl_secs(sleep_window_ms),
        )?;

        metrics::record_probe_decision(granted);
        if granted {
            tracing::debug!(command_key = %command_key, "Single test granted");
        }
        Ok(granted)
    }

    fn close_circuit(&self, command_key: &str) -> StoreResult<()> {
        self.slots
            .write(&opened_name(command_key), SlotValue::Flag(false), 0)?;

        metrics::record_circuit_transition("close");
        tracing::debug!(command_key = %command_key, "Circuit closed");
        Ok(())
    }
}

fn bucket_name(command_key: &str, metric: MetricType, index: u64) -> String {
    compose(&["bucket", command_key, metric.as_str(), &index.to_string()])
}

fn opened_name(command_key: &str) -> String {
    compose(&["opened", command_key])
}

fn gate_name(command_key: &str) -> String {
    compose(&["single_test", command_key])
}
