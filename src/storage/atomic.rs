//! Counter and flag primitives composed from the slot store.
//!
//! Increments and resets are compare-and-swap loops against the substrate, so
//! every call lands exactly once no matter how many callers race on a key.

use crate::error::StoreResult;
use crate::observability::metrics;
use crate::storage::slot::{Slot, SlotValue};
use crate::storage::store::{Observed, SlotStore};

impl SlotStore {
    /// Add one to the counter at `name`, creating it at 1 with `ttl_secs` if absent.
    ///
    /// Increments keep the slot's original expiration. Returns the new value.
    pub fn increment_or_create(&self, name: &str, ttl_secs: u64) -> StoreResult<i64> {
        if self.create_if_absent(name, SlotValue::Counter(1), ttl_secs)? {
            return Ok(1);
        }

        let key = self.key_for(name);
        loop {
            let (raw, next) = match self.observe(&key)? {
                Observed::Live { raw, slot } => match slot.value {
                    SlotValue::Counter(n) => {
                        let bumped = Slot {
                            value: SlotValue::Counter(n.saturating_add(1)),
                            expires_at: slot.expires_at,
                        };
                        (raw, bumped)
                    }
                    SlotValue::Flag(_) => {
                        tracing::warn!(key = %key, "Counter slot held a flag; restarting count");
                        (raw, Slot::new(SlotValue::Counter(1), self.now(), ttl_secs))
                    }
                },
                Observed::Stale(raw) => (raw, Slot::new(SlotValue::Counter(1), self.now(), ttl_secs)),
                Observed::Absent => {
                    let fresh = Slot::new(SlotValue::Counter(1), self.now(), ttl_secs).encode()?;
                    if self.with_room(|| self.backend().add(&key, &fresh))? {
                        return Ok(1);
                    }
                    continue;
                }
            };

            if self.backend().compare_and_swap(&key, &raw, &next.encode()?)? {
                return Ok(next.value.as_counter().unwrap_or(1));
            }
            metrics::record_cas_conflict();
        }
    }

    /// Counter value at `name`; 0 when absent, expired or not a counter.
    pub fn read_counter(&self, name: &str) -> StoreResult<i64> {
        Ok(self
            .read(name)?
            .and_then(|value| value.as_counter())
            .unwrap_or(0))
    }

    /// Flag value at `name`; `false` when absent, expired or not a flag.
    pub fn read_flag(&self, name: &str) -> StoreResult<bool> {
        Ok(self
            .read(name)?
            .and_then(|value| value.as_flag())
            .unwrap_or(false))
    }

    /// Overwrite `name` with `value` and a fresh TTL, only if it is live.
    ///
    /// Never creates a slot. Returns whether a live slot was overwritten.
    pub fn reset_if_live(&self, name: &str, value: SlotValue, ttl_secs: u64) -> StoreResult<bool> {
        let key = self.key_for(name);
        let replacement = Slot::new(value, self.now(), ttl_secs).encode()?;

        loop {
            match self.observe(&key)? {
                Observed::Live { raw, .. } => {
                    if self.backend().compare_and_swap(&key, &raw, &replacement)? {
                        return Ok(true);
                    }
                    metrics::record_cas_conflict();
                }
                Observed::Stale(raw) => {
                    if self.backend().delete_if(&key, &raw)? {
                        metrics::record_slot_expired();
                    }
                    return Ok(false);
                }
                Observed::Absent => return Ok(false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use crate::clock::ManualClock;
    use crate::storage::slot::SlotValue;
    use crate::storage::store::SlotStore;
    use crate::substrate::{MemoryBackend, SlotBackend};

    fn store() -> (SlotStore, Arc<MemoryBackend>, ManualClock) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = ManualClock::new(500);
        let store = SlotStore::new(backend.clone(), Arc::new(clock.clone()), "a_");
        (store, backend, clock)
    }

    #[test]
    fn test_increment_creates_then_counts() {
        let (store, _, _) = store();

        assert_eq!(store.read_counter("c").unwrap(), 0);
        assert_eq!(store.increment_or_create("c", 10).unwrap(), 1);
        assert_eq!(store.increment_or_create("c", 10).unwrap(), 2);
        assert_eq!(store.read_counter("c").unwrap(), 2);
    }

    #[test]
    fn test_increment_keeps_original_expiry() {
        let (store, _, clock) = store();
        store.increment_or_create("c", 10).unwrap();

        clock.advance(9);
        store.increment_or_create("c", 10).unwrap();
        assert_eq!(store.read_counter("c").unwrap(), 2);

        clock.advance(1);
        assert_eq!(store.read_counter("c").unwrap(), 0);
    }

    #[test]
    fn test_increment_restarts_expired_counter() {
        let (store, _, clock) = store();
        store.increment_or_create("c", 2).unwrap();
        store.increment_or_create("c", 2).unwrap();

        clock.advance(2);
        assert_eq!(store.increment_or_create("c", 2).unwrap(), 1);
    }

    #[test]
    fn test_increment_over_flag_restarts_count() {
        let (store, _, _) = store();
        store.write("c", SlotValue::Flag(true), 0).unwrap();

        assert_eq!(store.read_counter("c").unwrap(), 0);
        assert_eq!(store.increment_or_create("c", 5).unwrap(), 1);
        assert_eq!(store.read_counter("c").unwrap(), 1);
    }

    #[test]
    fn test_read_flag_defaults() {
        let (store, _, _) = store();
        assert!(!store.read_flag("f").unwrap());

        store.write("f", SlotValue::Counter(3), 0).unwrap();
        assert!(!store.read_flag("f").unwrap());

        store.write("f", SlotValue::Flag(true), 0).unwrap();
        assert!(store.read_flag("f").unwrap());
    }

    #[test]
    fn test_reset_if_live_never_creates() {
        let (store, backend, _) = store();

        assert!(!store.reset_if_live("c", SlotValue::Counter(0), 10).unwrap());
        assert!(backend.is_empty());

        store.increment_or_create("c", 10).unwrap();
        assert!(store.reset_if_live("c", SlotValue::Counter(0), 10).unwrap());
        assert_eq!(store.read_counter("c").unwrap(), 0);
        assert!(backend.get("a_c").unwrap().is_some());
    }

    #[test]
    fn test_reset_of_expired_slot_evicts_it() {
        let (store, backend, clock) = store();
        store.increment_or_create("c", 1).unwrap();

        clock.advance(1);
        assert!(!store.reset_if_live("c", SlotValue::Counter(0), 10).unwrap());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let (store, _, _) = store();
        let threads = 64;
        let per_thread = 50;
        let barrier = Arc::new(Barrier::new(threads));

        let workers: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..per_thread {
                        store.increment_or_create("hot", 60).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(store.read_counter("hot").unwrap(), (threads * per_thread) as i64);
    }
}
