//! Raw slot store: one `(payload, expiration)` pair per logical name, with
//! lazy expiration on top of a byte-level substrate.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};
use crate::observability::metrics;
use crate::storage::keys;
use crate::storage::slot::{Slot, SlotValue};
use crate::substrate::SlotBackend;

/// What a raw read of one key turned up.
pub(crate) enum Observed {
    Absent,
    /// Present but expired or malformed. Carries the bytes seen.
    Stale(Vec<u8>),
    Live { raw: Vec<u8>, slot: Slot },
}

/// Key-value store over a [`SlotBackend`] with self-managed TTLs.
///
/// Expired slots are never returned; the first read that finds one deletes it.
#[derive(Clone)]
pub struct SlotStore {
    backend: Arc<dyn SlotBackend>,
    clock: Arc<dyn Clock>,
    prefix: String,
}

impl SlotStore {
    pub fn new(backend: Arc<dyn SlotBackend>, clock: Arc<dyn Clock>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            clock,
            prefix: prefix.into(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn SlotBackend> {
        &self.backend
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now_secs()
    }

    /// Physical key for a logical name.
    pub fn key_for(&self, name: &str) -> String {
        keys::physical_key(&self.prefix, name, self.backend.max_key_len())
    }

    /// Live payload for `name`, or `None` if absent, expired or malformed.
    pub fn read(&self, name: &str) -> StoreResult<Option<SlotValue>> {
        let key = self.key_for(name);
        match self.observe(&key)? {
            Observed::Live { slot, .. } => Ok(Some(slot.value)),
            Observed::Stale(raw) => {
                self.evict(&key, &raw)?;
                Ok(None)
            }
            Observed::Absent => Ok(None),
        }
    }

    /// Create or overwrite `name`. A zero TTL never expires.
    pub fn write(&self, name: &str, value: SlotValue, ttl_secs: u64) -> StoreResult<()> {
        let key = self.key_for(name);
        let bytes = Slot::new(value, self.now(), ttl_secs).encode()?;
        tracing::trace!(key = %key, ?value, ttl_secs, "Slot write");
        self.with_room(|| self.backend.set(&key, &bytes))
    }

    /// Create `name` only if no live slot exists.
    ///
    /// Returns `true` to exactly one caller among any number racing on the same
    /// absent or expired key.
    pub fn create_if_absent(&self, name: &str, value: SlotValue, ttl_secs: u64) -> StoreResult<bool> {
        let key = self.key_for(name);
        let bytes = Slot::new(value, self.now(), ttl_secs).encode()?;

        loop {
            if self.with_room(|| self.backend.add(&key, &bytes))? {
                return Ok(true);
            }
            match self.observe(&key)? {
                Observed::Live { .. } => return Ok(false),
                Observed::Stale(raw) => {
                    if self.backend.compare_and_swap(&key, &raw, &bytes)? {
                        metrics::record_slot_expired();
                        return Ok(true);
                    }
                    metrics::record_cas_conflict();
                }
                // Deleted between `add` and the read; try again.
                Observed::Absent => {}
            }
        }
    }

    pub fn delete(&self, name: &str) -> StoreResult<()> {
        self.backend.delete(&self.key_for(name))
    }

    /// Delete every expired or malformed slot, including ones no caller will
    /// read again. Returns how many were deleted.
    pub fn sweep_expired(&self) -> StoreResult<usize> {
        let now = self.now();
        let swept = self
            .backend
            .sweep(&|raw: &[u8]| Slot::decode(raw).map_or(true, |slot| slot.is_expired(now)))?;
        metrics::record_slots_swept(swept as u64);
        tracing::debug!(backend = self.backend.name(), swept, "Expired slots swept");
        Ok(swept)
    }

    /// Run a write that may need a new slot, sweeping once if the substrate is full.
    pub(crate) fn with_room<T>(&self, write: impl Fn() -> StoreResult<T>) -> StoreResult<T> {
        match write() {
            Err(StoreError::RegionFull { slot_count }) => {
                if self.sweep_expired()? == 0 {
                    return Err(StoreError::RegionFull { slot_count });
                }
                write()
            }
            other => other,
        }
    }

    /// Read and classify the raw bytes under `key`.
    ///
    /// A slot whose lock cannot be taken reads as absent; writes still fail.
    pub(crate) fn observe(&self, key: &str) -> StoreResult<Observed> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(Observed::Absent),
            Err(StoreError::LockTimeout { lock, holder }) => {
                tracing::warn!(key = %key, lock = %lock, holder, "Slot lock busy; read treated as absent");
                return Ok(Observed::Absent);
            }
            Err(e) => return Err(e),
        };
        match Slot::decode(&raw) {
            Ok(slot) if slot.is_expired(self.now()) => Ok(Observed::Stale(raw)),
            Ok(slot) => Ok(Observed::Live { raw, slot }),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Malformed slot treated as absent");
                metrics::record_slot_corrupt();
                Ok(Observed::Stale(raw))
            }
        }
    }

    /// Delete a stale slot unless someone replaced it since it was observed.
    fn evict(&self, key: &str, raw: &[u8]) -> StoreResult<()> {
        if self.backend.delete_if(key, raw)? {
            tracing::trace!(key = %key, "Stale slot evicted");
            metrics::record_slot_expired();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::substrate::MemoryBackend;

    fn store() -> (SlotStore, Arc<MemoryBackend>, ManualClock) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = ManualClock::new(1_000);
        let store = SlotStore::new(backend.clone(), Arc::new(clock.clone()), "t_");
        (store, backend, clock)
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let (store, _, _) = store();

        for value in [
            SlotValue::Counter(0),
            SlotValue::Counter(-5),
            SlotValue::Counter(i64::MAX),
            SlotValue::Flag(true),
            SlotValue::Flag(false),
        ] {
            store.write("k", value, 10).unwrap();
            assert_eq!(store.read("k").unwrap(), Some(value));
        }
    }

    #[test]
    fn test_expired_read_deletes_slot() {
        let (store, backend, clock) = store();
        store.write("k", SlotValue::Counter(1), 5).unwrap();

        clock.advance(4);
        assert_eq!(store.read("k").unwrap(), Some(SlotValue::Counter(1)));
        assert!(backend.contains_key("t_k"));

        clock.advance(1);
        assert_eq!(store.read("k").unwrap(), None);
        assert!(!backend.contains_key("t_k"));
    }

    #[test]
    fn test_zero_ttl_outlives_any_clock() {
        let (store, _, clock) = store();
        store.write("k", SlotValue::Flag(true), 0).unwrap();

        clock.set(u64::MAX - 1);
        assert_eq!(store.read("k").unwrap(), Some(SlotValue::Flag(true)));
    }

    #[test]
    fn test_create_if_absent_first_wins() {
        let (store, _, _) = store();

        assert!(store.create_if_absent("k", SlotValue::Flag(true), 5).unwrap());
        assert!(!store.create_if_absent("k", SlotValue::Flag(false), 5).unwrap());
        assert_eq!(store.read("k").unwrap(), Some(SlotValue::Flag(true)));
    }

    #[test]
    fn test_create_if_absent_replaces_expired_slot() {
        let (store, _, clock) = store();
        store.write("k", SlotValue::Counter(9), 1).unwrap();

        clock.advance(1);
        assert!(store.create_if_absent("k", SlotValue::Counter(1), 1).unwrap());
        assert_eq!(store.read("k").unwrap(), Some(SlotValue::Counter(1)));
    }

    #[test]
    fn test_malformed_slot_reads_as_absent() {
        let (store, backend, _) = store();
        backend.set("t_k", b"not json").unwrap();

        assert_eq!(store.read("k").unwrap(), None);
        assert!(!backend.contains_key("t_k"));

        backend.set("t_k", b"{").unwrap();
        assert!(store.create_if_absent("k", SlotValue::Flag(true), 0).unwrap());
    }

    #[test]
    fn test_delete() {
        let (store, _, _) = store();
        store.write("k", SlotValue::Flag(true), 0).unwrap();
        store.delete("k").unwrap();
        assert_eq!(store.read("k").unwrap(), None);
    }

    #[test]
    fn test_sweep_removes_expired_and_malformed_slots() {
        let (store, backend, clock) = store();
        store.write("short", SlotValue::Counter(1), 5).unwrap();
        store.write("forever", SlotValue::Flag(true), 0).unwrap();
        store.write("long", SlotValue::Counter(2), 60).unwrap();
        backend.set("t_garbage", b"{").unwrap();

        clock.advance(5);
        assert_eq!(store.sweep_expired().unwrap(), 2);
        assert_eq!(backend.len(), 2);
        assert_eq!(store.read("long").unwrap(), Some(SlotValue::Counter(2)));
        assert_eq!(store.read("forever").unwrap(), Some(SlotValue::Flag(true)));
    }
}
