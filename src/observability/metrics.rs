//! Metrics collection.
//!
//! # Metrics
//! - `circuit_state_slot_expired_total` (counter): stale slots evicted, replaced or swept
//! - `circuit_state_slot_corrupt_total` (counter): malformed slots read as absent
//! - `circuit_state_cas_conflicts_total` (counter): lost compare-and-swap races
//! - `circuit_state_lock_takeovers_total` (counter): region locks taken from exited processes
//! - `circuit_state_lock_timeouts_total` (counter): region locks not acquired in time
//! - `circuit_state_circuit_transitions_total` (counter): by `transition` (open, close)
//! - `circuit_state_probe_decisions_total` (counter): by `granted` (true, false)
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; no-ops until a recorder is installed
//! - Label values are static strings to keep updates allocation-free

pub fn record_slot_expired() {
    ::metrics::counter!("circuit_state_slot_expired_total").increment(1);
}

pub fn record_slots_swept(count: u64) {
    ::metrics::counter!("circuit_state_slot_expired_total").increment(count);
}

pub fn record_slot_corrupt() {
    ::metrics::counter!("circuit_state_slot_corrupt_total").increment(1);
}

pub fn record_cas_conflict() {
    ::metrics::counter!("circuit_state_cas_conflicts_total").increment(1);
}

pub fn record_lock_takeover() {
    ::metrics::counter!("circuit_state_lock_takeovers_total").increment(1);
}

pub fn record_lock_timeout() {
    ::metrics::counter!("circuit_state_lock_timeouts_total").increment(1);
}

pub fn record_circuit_transition(transition: &'static str) {
    ::metrics::counter!("circuit_state_circuit_transitions_total", "transition" => transition)
        .increment(1);
}

pub fn record_probe_decision(granted: bool) {
    let granted = if granted { "true" } else { "false" };
    ::metrics::counter!("circuit_state_probe_decisions_total", "granted" => granted).increment(1);
}
