//! Behaviour of the circuit state store against every substrate.

use std::time::Duration;

use circuit_state::{CircuitPhase, MetricType, StateStorage};

mod common;

#[test]
fn test_unwritten_commands_read_closed_and_zero() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        assert!(!store.is_circuit_open("never-seen").unwrap(), "{}", harness.name);
        for metric in MetricType::ALL {
            for index in [0, 1, 9, u64::MAX] {
                assert_eq!(
                    store.get_bucket("never-seen", metric, index).unwrap(),
                    0,
                    "{}",
                    harness.name
                );
            }
        }
    }
}

#[test]
fn test_bucket_counts_accumulate_per_triple() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        for _ in 0..3 {
            store.increment_bucket("orders", MetricType::Success, 5).unwrap();
        }
        store.increment_bucket("orders", MetricType::Failure, 5).unwrap();

        assert_eq!(store.get_bucket("orders", MetricType::Success, 5).unwrap(), 3);
        assert_eq!(store.get_bucket("orders", MetricType::Failure, 5).unwrap(), 1);
        assert_eq!(store.get_bucket("orders", MetricType::Success, 6).unwrap(), 0);
    }
}

#[test]
fn test_colliding_concatenations_stay_separate() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.increment_bucket("ab", MetricType::Success, 1).unwrap();
        store.increment_bucket("a:b", MetricType::Success, 1).unwrap();
        store.increment_bucket("a:b", MetricType::Success, 1).unwrap();

        assert_eq!(store.get_bucket("ab", MetricType::Success, 1).unwrap(), 1);
        assert_eq!(store.get_bucket("a:b", MetricType::Success, 1).unwrap(), 2);
        assert_eq!(store.get_bucket("a", MetricType::Success, 1).unwrap(), 0);
    }
}

#[test]
fn test_long_command_keys_are_addressable() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        let long_key = "service.endpoint/".repeat(20);

        store.increment_bucket(&long_key, MetricType::Timeout, 2).unwrap();
        store.open_circuit(&long_key, 1000).unwrap();

        assert_eq!(store.get_bucket(&long_key, MetricType::Timeout, 2).unwrap(), 1);
        assert!(store.is_circuit_open(&long_key).unwrap());
    }
}

#[test]
fn test_reset_of_never_incremented_bucket_is_noop() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.reset_bucket("orders", MetricType::Timeout, 3).unwrap();
        assert_eq!(store.get_bucket("orders", MetricType::Timeout, 3).unwrap(), 0);

        // A fabricated slot would still be alive just before the bucket TTL.
        harness.clock.advance(store.bucket_ttl_secs() - 1);
        store.increment_bucket("orders", MetricType::Timeout, 3).unwrap();
        harness.clock.advance(1);
        assert_eq!(
            store.get_bucket("orders", MetricType::Timeout, 3).unwrap(),
            1,
            "{}: reset created a slot",
            harness.name
        );
    }
}

#[test]
fn test_reset_zeroes_live_bucket() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.increment_bucket("orders", MetricType::Failure, 0).unwrap();
        store.increment_bucket("orders", MetricType::Failure, 0).unwrap();

        store.reset_bucket("orders", MetricType::Failure, 0).unwrap();
        assert_eq!(store.get_bucket("orders", MetricType::Failure, 0).unwrap(), 0);

        store.increment_bucket("orders", MetricType::Failure, 0).unwrap();
        assert_eq!(store.get_bucket("orders", MetricType::Failure, 0).unwrap(), 1);
    }
}

#[test]
fn test_open_persists_past_sleep_window_until_closed() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.open_circuit("orders", 1000).unwrap();
        assert!(store.is_circuit_open("orders").unwrap());

        harness.clock.advance(3600);
        assert!(store.is_circuit_open("orders").unwrap());

        store.close_circuit("orders").unwrap();
        assert!(!store.is_circuit_open("orders").unwrap());
    }
}

#[test]
fn test_single_test_gate_cycle() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.open_circuit("orders", 1000).unwrap();

        assert!(!store.allow_single_test("orders", 1000).unwrap(), "{}", harness.name);

        harness.clock.advance(1);
        assert!(store.allow_single_test("orders", 1000).unwrap());
        assert!(!store.allow_single_test("orders", 1000).unwrap());

        harness.clock.advance(1);
        assert!(store.allow_single_test("orders", 1000).unwrap());
    }
}

#[test]
fn test_sub_second_window_rounds_up() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.open_circuit("orders", 1).unwrap();
        assert!(!store.allow_single_test("orders", 1).unwrap());

        harness.clock.advance(1);
        assert!(store.allow_single_test("orders", 1).unwrap());
    }
}

#[test]
fn test_close_leaves_gate_running() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.open_circuit("orders", 3000).unwrap();
        harness.clock.advance(1);

        store.close_circuit("orders").unwrap();
        assert!(!store.is_circuit_open("orders").unwrap());
        assert!(store.snapshot("orders").unwrap().gate_armed);

        harness.clock.advance(1);
        assert!(!store.allow_single_test("orders", 3000).unwrap());
        harness.clock.advance(1);
        assert!(store.allow_single_test("orders", 3000).unwrap());
    }
}

#[test]
fn test_half_open_round_trip() {
    for harness in common::all_harnesses() {
        let store = harness.store();
        store.open_circuit("orders", 2000).unwrap();
        assert_eq!(store.snapshot("orders").unwrap().phase, CircuitPhase::Open);

        harness.clock.advance(2);
        assert_eq!(store.snapshot("orders").unwrap().phase, CircuitPhase::ProbeAvailable);
        assert!(store.allow_single_test("orders", 2000).unwrap());

        // Probe failed: reopen keeps the fresh gate from the probe grant.
        store.open_circuit("orders", 2000).unwrap();
        assert!(store.is_circuit_open("orders").unwrap());
        assert!(!store.allow_single_test("orders", 2000).unwrap());

        harness.clock.advance(2);
        assert!(store.allow_single_test("orders", 2000).unwrap());
        store.close_circuit("orders").unwrap();
        assert_eq!(store.snapshot("orders").unwrap().phase, CircuitPhase::Closed);
    }
}

#[test]
fn test_handles_on_one_region_share_state() {
    let harness = common::region_harness(2);
    let (first, second) = (&harness.stores[0], &harness.stores[1]);

    first.increment_bucket("orders", MetricType::Success, 1).unwrap();
    second.increment_bucket("orders", MetricType::Success, 1).unwrap();
    assert_eq!(first.get_bucket("orders", MetricType::Success, 1).unwrap(), 2);

    second.open_circuit("orders", 1000).unwrap();
    assert!(first.is_circuit_open("orders").unwrap());
    assert!(!first.allow_single_test("orders", 1000).unwrap());

    first.close_circuit("orders").unwrap();
    assert!(!second.is_circuit_open("orders").unwrap());
}

#[test]
fn test_gate_rearms_on_wall_clock() {
    let (_dir, config) = common::temp_region(64);
    let store = common::wall_clock_region_store(&config);

    store.open_circuit("orders", 500).unwrap();
    assert!(!store.allow_single_test("orders", 500).unwrap());

    std::thread::sleep(Duration::from_millis(2100));
    assert!(store.allow_single_test("orders", 500).unwrap());
    assert!(store.is_circuit_open("orders").unwrap());
}
