//! In-process substrate backed by a sharded concurrent map.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::StoreResult;
use crate::substrate::SlotBackend;

/// Substrate for threads of a single process.
///
/// Per-key atomicity comes from DashMap's shard locks.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slots: DashMap<String, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Number of stored slots, expired ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }
}

impl SlotBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn max_key_len(&self) -> usize {
        usize::MAX
    }

    fn max_value_len(&self) -> usize {
        usize::MAX
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.slots.get(key).map(|r| r.value().clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.slots.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn add(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(value.to_vec());
                Ok(true)
            }
        }
    }

    fn compare_and_swap(&self, key: &str, current: &[u8], new: &[u8]) -> StoreResult<bool> {
        match self.slots.get_mut(key) {
            Some(mut stored) if stored.as_slice() == current => {
                *stored = new.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.slots.remove(key);
        Ok(())
    }

    fn delete_if(&self, key: &str, current: &[u8]) -> StoreResult<bool> {
        Ok(self
            .slots
            .remove_if(key, |_, stored| stored.as_slice() == current)
            .is_some())
    }

    fn sweep(&self, is_stale: &dyn Fn(&[u8]) -> bool) -> StoreResult<usize> {
        let mut removed = 0;
        self.slots.retain(|_, stored| {
            let stale = is_stale(stored.as_slice());
            removed += usize::from(stale);
            !stale
        });
        Ok(removed)
    }
}
