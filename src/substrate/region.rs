//! Shared memory-mapped region substrate.
//!
//! # Layout
//! ```text
//! ┌──────────────────────── header (64 bytes) ────────────────────────┐
//! │ magic "CBSTATE\0" │ version u32 │ slot_count u32 │ slot_size u32 │
//! │ pad (12) │ claim lock u32 @32 │ pad                               │
//! └───────────────────────────────────────────────────────────────────┘
//! ┌──────────────────────── slot (slot_size bytes) ───────────────────┐
//! │ lock u32 │ state u32 │ key hash u64 │ key len u16 │ value len u16 │
//! │ pad (4) │ key [96] │ value [slot_size - 120]                      │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Addressing
//! - Open addressing, linear probing from `xxh3(key) % slot_count`
//! - A slot is vacant (never used since the run was last reclaimed), live (bound
//!   to a key, holding its value) or freed (its key was deleted)
//! - Lookups skip freed slots and stop at the first vacant one
//! - A key is bound to a slot only under the region-wide claim lock, after a walk
//!   of its whole probe chain, so a key is live in at most one slot; the first
//!   freed or vacant slot on the chain is taken
//! - A freed run directly followed by a vacant slot reverts to vacant, so chains
//!   stay short under churn
//!
//! # Locking
//! - Lock words live in the mapped memory and hold the owner's pid
//! - Order: claim lock first, then one slot lock at a time
//! - A lock whose owner process is gone is taken over; a lock still held by a
//!   live process after [`LOCK_DEADLINE`] fails with `StoreError::LockTimeout`
//! - A takeover may expose a half-written value; it fails to decode and the slot
//!   store treats it as absent

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use memmap2::{MmapMut, MmapOptions};
use serde::Serialize;
use xxhash_rust::xxh3::xxh3_64;

use crate::config::schema::RegionConfig;
use crate::error::{StoreError, StoreResult};
use crate::observability::metrics;
use crate::substrate::{check_sizes, SlotBackend};

const BACKEND_NAME: &str = "shared_region";

const MAGIC: [u8; 8] = *b"CBSTATE\0";
const FORMAT_VERSION: u32 = 2;
const HEADER_LEN: usize = 64;
const CLAIM_LOCK_OFFSET: usize = 32;

/// Longest key a slot can hold.
pub const KEY_CAPACITY: usize = 96;
/// Smallest accepted slot size.
pub const MIN_SLOT_SIZE: u32 = 256;
/// Largest accepted slot size; value lengths are stored as `u16`.
pub const MAX_SLOT_SIZE: u32 = (u16::MAX as u32 + VALUE_OFFSET as u32) & !7;

/// How long a lock held by a live process is waited for.
pub const LOCK_DEADLINE: Duration = Duration::from_millis(500);

const LOCK_OFFSET: usize = 0;
const STATE_OFFSET: usize = 4;
const HASH_OFFSET: usize = 8;
const KEY_LEN_OFFSET: usize = 16;
const VALUE_LEN_OFFSET: usize = 18;
const KEY_OFFSET: usize = 24;
const VALUE_OFFSET: usize = KEY_OFFSET + KEY_CAPACITY;

/// Terminates probe sequences.
const VACANT: u32 = 0;
/// Reusable, but probing continues past it.
const FREED: u32 = 1;
/// Bound to a key, holds a value.
const LIVE: u32 = 2;

const UNLOCKED: u32 = 0;
const SPINS_BEFORE_YIELD: u32 = 64;

/// Occupancy report for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegionStats {
    pub slot_count: u32,
    pub slot_size: u32,
    /// Slots holding a value, expired ones included.
    pub live: u32,
    /// Slots emptied by a delete and not yet reverted to vacant.
    pub freed: u32,
}

/// Fixed-size slot table in a memory-mapped file, shareable across processes.
pub struct SharedRegion {
    path: PathBuf,
    base: *mut u8,
    slot_count: u32,
    slot_size: usize,
    _map: MmapMut,
}

// SAFETY: `base` points into `_map`, which lives as long as the region. All
// mutation of slot memory happens under the slot's lock word; the lock and state
// words are only touched through atomics.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("path", &self.path)
            .field("slot_count", &self.slot_count)
            .field("slot_size", &self.slot_size)
            .finish()
    }
}

impl SharedRegion {
    /// Open the region at `config.path`, creating it first if allowed.
    ///
    /// The file's header must match the configured geometry.
    pub fn open(config: &RegionConfig) -> StoreResult<Self> {
        check_geometry(config.slot_count, config.slot_size)?;

        let path = PathBuf::from(&config.path);
        if !path.exists() {
            if !config.create {
                return Err(StoreError::unavailable(
                    BACKEND_NAME,
                    format!("region file {} does not exist", path.display()),
                ));
            }
            create_region_file(&path, config.slot_count, config.slot_size)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| io_unavailable(&path, e))?;
        let actual_len = file
            .metadata()
            .map_err(|e| io_unavailable(&path, e))?
            .len();
        let expected_len = region_len(config.slot_count, config.slot_size);
        if actual_len != expected_len {
            return Err(StoreError::unavailable(
                BACKEND_NAME,
                format!(
                    "region file {} is {} bytes, expected {}",
                    path.display(),
                    actual_len,
                    expected_len
                ),
            ));
        }

        // SAFETY: the file is only ever modified through mappings that follow the
        // locking protocol in this module.
        let mut map = unsafe { MmapOptions::new().map_mut(&file) }
            .map_err(|e| io_unavailable(&path, e))?;

        verify_header(&map[..HEADER_LEN], config.slot_count, config.slot_size)?;

        let base = map.as_mut_ptr();
        tracing::info!(
            path = %path.display(),
            slot_count = config.slot_count,
            slot_size = config.slot_size,
            "Shared region mapped"
        );

        Ok(Self {
            path,
            base,
            slot_count: config.slot_count,
            slot_size: config.slot_size as usize,
            _map: map,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Count live and freed slots without taking any lock.
    pub fn stats(&self) -> RegionStats {
        let mut live = 0;
        let mut freed = 0;
        for index in 0..self.slot_count {
            match self.slot(index).state_word().load(Ordering::Relaxed) {
                LIVE => live += 1,
                FREED => freed += 1,
                _ => {}
            }
        }
        RegionStats {
            slot_count: self.slot_count,
            slot_size: self.slot_size as u32,
            live,
            freed,
        }
    }

    fn slot(&self, index: u32) -> SlotRef<'_> {
        debug_assert!(index < self.slot_count);
        let offset = HEADER_LEN + index as usize * self.slot_size;
        SlotRef {
            // SAFETY: offset + slot_size is within the mapping, checked at open.
            ptr: unsafe { self.base.add(offset) },
            index,
            value_capacity: self.slot_size - VALUE_OFFSET,
            _region: PhantomData,
        }
    }

    fn claim_word(&self) -> &AtomicU32 {
        // SAFETY: the header is mapped and page aligned; the word is only used atomically.
        unsafe { &*(self.base.add(CLAIM_LOCK_OFFSET) as *const AtomicU32) }
    }

    fn lock_claims(&self) -> StoreResult<ClaimGuard<'_>> {
        let word = self.claim_word();
        acquire(word, || "claim".to_string())?;
        Ok(ClaimGuard { word })
    }

    fn probe_chain(&self, hash: u64) -> impl Iterator<Item = u32> {
        let count = u64::from(self.slot_count);
        let start = hash % count;
        (0..count).map(move |step| ((start + step) % count) as u32)
    }

    /// The live slot bound to `key`, locked.
    fn find(&self, key: &[u8], hash: u64) -> StoreResult<Option<SlotGuard<'_>>> {
        for index in self.probe_chain(hash) {
            let guard = self.slot(index).lock()?;
            match guard.state() {
                VACANT => return Ok(None),
                LIVE if guard.is_bound_to(hash, key) => return Ok(Some(guard)),
                _ => {}
            }
        }
        Ok(None)
    }

    /// The slot for `key`, locked. A key with no live slot is bound to the first
    /// free slot on its chain; the caller must store a value before releasing it.
    fn find_or_bind(&self, key: &[u8], hash: u64) -> StoreResult<SlotGuard<'_>> {
        if let Some(guard) = self.find(key, hash)? {
            return Ok(guard);
        }

        let _claims = self.lock_claims()?;
        let mut free = None;
        for index in self.probe_chain(hash) {
            let guard = self.slot(index).lock()?;
            match guard.state() {
                LIVE if guard.is_bound_to(hash, key) => return Ok(guard),
                LIVE => {}
                VACANT => {
                    free = free.or(Some(index));
                    break;
                }
                _ => free = free.or(Some(index)),
            }
        }

        let index = free.ok_or(StoreError::RegionFull {
            slot_count: self.slot_count,
        })?;
        // Free slots only turn live under the claim lock, so this one is still free.
        let guard = self.slot(index).lock()?;
        guard.bind(hash, key);
        Ok(guard)
    }

    /// Empty `slot`, then revert the freed run ending at it to vacant if the
    /// next slot is vacant.
    fn release(&self, slot: SlotGuard<'_>) {
        let index = slot.free();
        if let Err(e) = self.reclaim_run(index) {
            tracing::debug!(index, error = %e, "Freed run left in place");
        }
    }

    fn reclaim_run(&self, index: u32) -> StoreResult<()> {
        let next = (index + 1) % self.slot_count;
        if next == index || self.slot(next).state_word().load(Ordering::Relaxed) != VACANT {
            return Ok(());
        }

        // Slots only turn vacant or live under the claim lock.
        let _claims = self.lock_claims()?;
        if self.slot(next).lock()?.state() != VACANT {
            return Ok(());
        }
        let mut cursor = index;
        for _ in 0..self.slot_count {
            let guard = self.slot(cursor).lock()?;
            if guard.state() != FREED {
                break;
            }
            guard.set_state(VACANT);
            cursor = cursor.checked_sub(1).unwrap_or(self.slot_count - 1);
        }
        Ok(())
    }
}

impl SlotBackend for SharedRegion {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn max_key_len(&self) -> usize {
        KEY_CAPACITY
    }

    fn max_value_len(&self) -> usize {
        self.slot_size - VALUE_OFFSET
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        check_sizes(self, key, None)?;
        let key = key.as_bytes();
        Ok(self.find(key, xxh3_64(key))?.map(|slot| slot.value()))
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        check_sizes(self, key, Some(value))?;
        let key = key.as_bytes();
        self.find_or_bind(key, xxh3_64(key))?.store_value(value);
        Ok(())
    }

    fn add(&self, key: &str, value: &[u8]) -> StoreResult<bool> {
        check_sizes(self, key, Some(value))?;
        let key = key.as_bytes();
        let slot = self.find_or_bind(key, xxh3_64(key))?;
        if slot.state() == LIVE {
            return Ok(false);
        }
        slot.store_value(value);
        Ok(true)
    }

    fn compare_and_swap(&self, key: &str, current: &[u8], new: &[u8]) -> StoreResult<bool> {
        check_sizes(self, key, Some(new))?;
        let key = key.as_bytes();
        match self.find(key, xxh3_64(key))? {
            Some(slot) if slot.value_eq(current) => {
                slot.store_value(new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        check_sizes(self, key, None)?;
        let key = key.as_bytes();
        if let Some(slot) = self.find(key, xxh3_64(key))? {
            self.release(slot);
        }
        Ok(())
    }

    fn delete_if(&self, key: &str, current: &[u8]) -> StoreResult<bool> {
        check_sizes(self, key, None)?;
        let key = key.as_bytes();
        match self.find(key, xxh3_64(key))? {
            Some(slot) if slot.value_eq(current) => {
                self.release(slot);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Slots whose lock is busy past the deadline are skipped.
    fn sweep(&self, is_stale: &dyn Fn(&[u8]) -> bool) -> StoreResult<usize> {
        let mut removed = 0;
        for index in 0..self.slot_count {
            let slot = match self.slot(index).lock() {
                Ok(slot) => slot,
                Err(StoreError::LockTimeout { .. }) => continue,
                Err(e) => return Err(e),
            };
            if slot.state() == LIVE && is_stale(&slot.value()) {
                self.release(slot);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Take `word` for this process.
///
/// A holder whose process no longer exists is displaced. A live holder is
/// waited for until [`LOCK_DEADLINE`].
fn acquire(word: &AtomicU32, site: impl Fn() -> String) -> StoreResult<()> {
    let owner = std::process::id();
    let mut spins = 0u32;
    let mut deadline: Option<Instant> = None;

    loop {
        let holder = match word.compare_exchange_weak(UNLOCKED, owner, Ordering::Acquire, Ordering::Relaxed) {
            Ok(_) => return Ok(()),
            Err(UNLOCKED) => continue,
            Err(holder) => holder,
        };

        spins = spins.saturating_add(1);
        if spins < SPINS_BEFORE_YIELD {
            std::hint::spin_loop();
            continue;
        }

        let expired = match deadline {
            Some(at) => Instant::now() >= at,
            None => {
                deadline = Some(Instant::now() + LOCK_DEADLINE);
                false
            }
        };

        if (spins == SPINS_BEFORE_YIELD || expired) && !process_alive(holder) {
            if word
                .compare_exchange(holder, owner, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                tracing::warn!(lock = %site(), holder, "Took over lock left by an exited process");
                metrics::record_lock_takeover();
                return Ok(());
            }
            continue;
        }

        if expired {
            metrics::record_lock_timeout();
            return Err(StoreError::LockTimeout {
                lock: site(),
                holder,
            });
        }
        std::thread::yield_now();
    }
}

/// Whether `pid` names a running process. Assumed alive where `/proc` is missing.
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    let proc_root = Path::new("/proc");
    !proc_root.join("self").exists() || proc_root.join(pid.to_string()).exists()
}

/// Held claim lock. Released on drop.
struct ClaimGuard<'a> {
    word: &'a AtomicU32,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.word.store(UNLOCKED, Ordering::Release);
    }
}

/// Unlocked handle to one slot.
struct SlotRef<'a> {
    ptr: *mut u8,
    index: u32,
    value_capacity: usize,
    _region: PhantomData<&'a SharedRegion>,
}

impl<'a> SlotRef<'a> {
    fn lock_word(&self) -> &AtomicU32 {
        // SAFETY: slot starts are 8-byte aligned and the word is only used atomically.
        unsafe { &*(self.ptr.add(LOCK_OFFSET) as *const AtomicU32) }
    }

    fn state_word(&self) -> &AtomicU32 {
        // SAFETY: as above.
        unsafe { &*(self.ptr.add(STATE_OFFSET) as *const AtomicU32) }
    }

    fn lock(self) -> StoreResult<SlotGuard<'a>> {
        let index = self.index;
        acquire(self.lock_word(), || format!("slot {}", index))?;
        Ok(SlotGuard { slot: self })
    }
}

/// Locked slot. The lock is released on drop.
struct SlotGuard<'a> {
    slot: SlotRef<'a>,
}

impl SlotGuard<'_> {
    fn state(&self) -> u32 {
        self.slot.state_word().load(Ordering::Relaxed)
    }

    fn set_state(&self, state: u32) {
        self.slot.state_word().store(state, Ordering::Relaxed);
    }

    // SAFETY for the raw accessors below: the guard holds the slot lock, so no
    // other thread or process touches these bytes, and every offset stays inside
    // the slot.

    fn read_u16(&self, offset: usize) -> u16 {
        unsafe { ptr::read_unaligned(self.slot.ptr.add(offset) as *const u16) }
    }

    fn write_u16(&self, offset: usize, value: u16) {
        unsafe { ptr::write_unaligned(self.slot.ptr.add(offset) as *mut u16, value) }
    }

    fn is_bound_to(&self, hash: u64, key: &[u8]) -> bool {
        let stored_hash = unsafe { ptr::read_unaligned(self.slot.ptr.add(HASH_OFFSET) as *const u64) };
        if stored_hash != hash || self.read_u16(KEY_LEN_OFFSET) as usize != key.len() {
            return false;
        }
        let stored = unsafe { std::slice::from_raw_parts(self.slot.ptr.add(KEY_OFFSET), key.len()) };
        stored == key
    }

    /// Write the key. The slot turns live with the first stored value.
    fn bind(&self, hash: u64, key: &[u8]) {
        debug_assert!(key.len() <= KEY_CAPACITY);
        unsafe {
            ptr::write_unaligned(self.slot.ptr.add(HASH_OFFSET) as *mut u64, hash);
            ptr::copy_nonoverlapping(key.as_ptr(), self.slot.ptr.add(KEY_OFFSET), key.len());
        }
        self.write_u16(KEY_LEN_OFFSET, key.len() as u16);
        self.write_u16(VALUE_LEN_OFFSET, 0);
    }

    fn value(&self) -> Vec<u8> {
        let len = self.read_u16(VALUE_LEN_OFFSET) as usize;
        unsafe { std::slice::from_raw_parts(self.slot.ptr.add(VALUE_OFFSET), len) }.to_vec()
    }

    fn value_eq(&self, other: &[u8]) -> bool {
        let len = self.read_u16(VALUE_LEN_OFFSET) as usize;
        len == other.len()
            && unsafe { std::slice::from_raw_parts(self.slot.ptr.add(VALUE_OFFSET), len) } == other
    }

    fn store_value(&self, value: &[u8]) {
        debug_assert!(value.len() <= self.slot.value_capacity);
        unsafe {
            ptr::copy_nonoverlapping(value.as_ptr(), self.slot.ptr.add(VALUE_OFFSET), value.len());
        }
        self.write_u16(VALUE_LEN_OFFSET, value.len() as u16);
        self.set_state(LIVE);
    }

    /// Drop the value and unlock. Returns the slot index.
    fn free(self) -> u32 {
        self.write_u16(VALUE_LEN_OFFSET, 0);
        self.set_state(FREED);
        self.slot.index
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock_word().store(UNLOCKED, Ordering::Release);
    }
}

fn check_geometry(slot_count: u32, slot_size: u32) -> StoreResult<()> {
    if slot_count == 0 {
        return Err(StoreError::unavailable(BACKEND_NAME, "slot_count must be > 0"));
    }
    if !(MIN_SLOT_SIZE..=MAX_SLOT_SIZE).contains(&slot_size) || slot_size % 8 != 0 {
        return Err(StoreError::unavailable(
            BACKEND_NAME,
            format!(
                "slot_size {} must be a multiple of 8 between {} and {}",
                slot_size, MIN_SLOT_SIZE, MAX_SLOT_SIZE
            ),
        ));
    }
    Ok(())
}

fn region_len(slot_count: u32, slot_size: u32) -> u64 {
    HEADER_LEN as u64 + u64::from(slot_count) * u64::from(slot_size)
}

fn encode_header(slot_count: u32, slot_size: u32) -> [u8; HEADER_LEN] {
    let mut header = [0u8; HEADER_LEN];
    header[0..8].copy_from_slice(&MAGIC);
    header[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[12..16].copy_from_slice(&slot_count.to_le_bytes());
    header[16..20].copy_from_slice(&slot_size.to_le_bytes());
    header
}

fn verify_header(header: &[u8], slot_count: u32, slot_size: u32) -> StoreResult<()> {
    let read_u32 = |range: std::ops::Range<usize>| {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&header[range]);
        u32::from_le_bytes(bytes)
    };

    if header[0..8] != MAGIC {
        return Err(StoreError::unavailable(BACKEND_NAME, "bad region magic"));
    }
    let version = read_u32(8..12);
    if version != FORMAT_VERSION {
        return Err(StoreError::unavailable(
            BACKEND_NAME,
            format!("unsupported region format version {}", version),
        ));
    }
    let (stored_count, stored_size) = (read_u32(12..16), read_u32(16..20));
    if stored_count != slot_count || stored_size != slot_size {
        return Err(StoreError::unavailable(
            BACKEND_NAME,
            format!(
                "region geometry {}x{} does not match configured {}x{}",
                stored_count, stored_size, slot_count, slot_size
            ),
        ));
    }
    Ok(())
}

/// Write a fully initialized region under a temporary name, then publish it with
/// a hard link so no process ever maps a half-written header.
fn create_region_file(path: &Path, slot_count: u32, slot_size: u32) -> StoreResult<()> {
    let staging = path.with_extension(format!("init.{}", std::process::id()));

    let written = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&staging)?;
        file.set_len(region_len(slot_count, slot_size))?;
        file.write_all(&encode_header(slot_count, slot_size))?;
        file.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&staging);
        return Err(io_unavailable(&staging, e));
    }

    let published = fs::hard_link(&staging, path);
    let _ = fs::remove_file(&staging);

    match published {
        Ok(()) => {
            tracing::info!(path = %path.display(), slot_count, slot_size, "Shared region created");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!(path = %path.display(), "Shared region published by another process");
            Ok(())
        }
        Err(e) => Err(io_unavailable(path, e)),
    }
}

fn io_unavailable(path: &Path, e: io::Error) -> StoreError {
    StoreError::unavailable(BACKEND_NAME, format!("{}: {}", path.display(), e))
}
