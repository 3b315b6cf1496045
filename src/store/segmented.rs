//! # Segmented Store
//!
//! `SegmentedMap` maps the file as an append-only list of independent
//! segments. Growth maps the newly extended tail as a fresh segment and
//! never touches existing mappings, so a pointer resolved before a grow
//! stays valid afterwards. That property is what makes the optimistic
//! per-page locking of the engine sound under concurrency.
//!
//! ## Concurrency
//!
//! - All mutation (resize/allocate/version) is serialized by one growth
//!   mutex.
//! - Readers resolve offsets lock-free: the segment table is a fixed array
//!   of slots, and a new segment is published by an atomic length store
//!   (`Release`) after its slot is written. Readers `Acquire` the length and
//!   only walk published slots.
//!
//! ## Boundary Gaps
//!
//! An allocation is never allowed to straddle a segment boundary: the span
//! would not be contiguous in memory. When a request would cross the mapped
//! boundary, the committed size is first advanced to the boundary, leaving a
//! gap, and the span starts in the new segment. Because the grow increment
//! is a multiple of the unit size, gaps are always whole units; the arena
//! reclaims them onto its free list.

use std::cell::UnsafeCell;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use eyre::{bail, ensure, Result, WrapErr};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use tracing::{debug, trace};
use zerocopy::IntoBytes;

use super::{
    header_word, set_header_word, Store, StoreHeader, HEADER_SIZE_WORD, HEADER_VERSION_WORD,
};
use crate::config::{DEFAULT_GROW_SIZE, MAX_SEGMENTS, STORE_HEADER_SIZE};

#[derive(Debug)]
struct Segment {
    map: MmapMut,
    /// Absolute file offset of the first mapped byte.
    file_start: u64,
    len: u64,
}

#[derive(Debug)]
pub struct SegmentedMap {
    file: File,
    path: PathBuf,
    grow_size: u64,
    segments: [UnsafeCell<Option<Segment>>; MAX_SEGMENTS],
    /// Published segment count. Slots below this index are immutable.
    mapped: AtomicUsize,
    grow: Mutex<()>,
}

// SAFETY: the segment slots are written only under the growth mutex and only
// at indexes >= the published length; readers access slots strictly below the
// Acquire-loaded length, so no slot is ever read and written concurrently.
unsafe impl Sync for SegmentedMap {}
// SAFETY: all fields are Send; raw mappings carry no thread affinity.
unsafe impl Send for SegmentedMap {}

impl SegmentedMap {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, DEFAULT_GROW_SIZE)
    }

    /// Open (creating if absent) with an explicit grow increment. The
    /// increment must be unit aligned; see the module docs on gaps.
    pub fn open_with<P: AsRef<Path>>(path: P, grow_size: u64) -> Result<Self> {
        let path = path.as_ref();
        ensure!(grow_size > 0, "grow size must be non-zero");
        ensure!(
            grow_size % crate::config::UNIT_SIZE as u64 == 0,
            "grow size {} is not a multiple of the unit size",
            grow_size
        );

        let fresh = !path.exists();
        if fresh {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).wrap_err_with(|| {
                        format!("failed to create parent directories for '{}'", path.display())
                    })?;
                }
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let mut len = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        if len < STORE_HEADER_SIZE as u64 + grow_size {
            len = STORE_HEADER_SIZE as u64 + grow_size;
            file.set_len(len)
                .wrap_err_with(|| format!("failed to size store file '{}'", path.display()))?;
        }

        // SAFETY: mapping a file this process owns for its lifetime; the
        // mapping is stored in a slot that is never dropped until the store
        // itself is, and all access is bounds-checked against the slot.
        let map = unsafe {
            MmapOptions::new()
                .len(len as usize)
                .map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let store = Self {
            file,
            path: path.to_path_buf(),
            grow_size,
            segments: std::array::from_fn(|_| UnsafeCell::new(None)),
            mapped: AtomicUsize::new(0),
            grow: Mutex::new(()),
        };

        // First segment covers the whole current file, header included.
        // SAFETY: no readers exist yet; slot 0 is published below.
        unsafe {
            *store.segments[0].get() = Some(Segment {
                map,
                file_start: 0,
                len,
            });
        }
        store.mapped.store(1, Ordering::Release);

        if fresh {
            let header = StoreHeader::new();
            // SAFETY: segment 0 covers the header bytes.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    header.as_bytes().as_ptr(),
                    store.segment_base(0),
                    STORE_HEADER_SIZE,
                );
            }
            debug!(path = %store.path.display(), "created segmented store");
        } else {
            debug!(path = %store.path.display(), size = store.size(), "opened segmented store");
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn segment_base(&self, index: usize) -> *mut u8 {
        // SAFETY: callers pass a published index, whose slot is immutable.
        let slot = unsafe { &*self.segments[index].get() };
        match slot {
            Some(seg) => seg.map.as_ptr() as *mut u8,
            None => std::ptr::null_mut(),
        }
    }

    /// Total mapped file bytes across published segments.
    fn mapped_capacity(&self) -> u64 {
        let n = self.mapped.load(Ordering::Acquire);
        let mut total = 0;
        for i in 0..n {
            // SAFETY: i < published length, slot is immutable.
            if let Some(seg) = unsafe { &*self.segments[i].get() } {
                total = total.max(seg.file_start + seg.len);
            }
        }
        total
    }

    /// Map the file tail `[current_capacity, current_capacity + grow)` as a
    /// new segment. Caller holds the growth mutex.
    fn grow_segment(&self) -> Result<()> {
        let n = self.mapped.load(Ordering::Acquire);
        if n == MAX_SEGMENTS {
            bail!(
                "segment table full ({} segments of {} bytes)",
                MAX_SEGMENTS,
                self.grow_size
            );
        }

        let start = self.mapped_capacity();
        let new_len = start + self.grow_size;

        self.file.set_len(new_len).wrap_err_with(|| {
            format!("failed to extend '{}' to {} bytes", self.path.display(), new_len)
        })?;

        // SAFETY: mapping a disjoint tail region of the owned file; the slot
        // at index n is unpublished, so no reader can observe it until the
        // Release store below.
        let map = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(self.grow_size as usize)
                .map_mut(&self.file)
                .wrap_err_with(|| format!("failed to map segment of '{}'", self.path.display()))?
        };

        // SAFETY: index n is unpublished and we hold the growth mutex.
        unsafe {
            *self.segments[n].get() = Some(Segment {
                map,
                file_start: start,
                len: self.grow_size,
            });
        }
        self.mapped.store(n + 1, Ordering::Release);

        trace!(path = %self.path.display(), segment = n, start, "mapped new segment");
        Ok(())
    }

    fn resolve(&self, file_offset: u64) -> Option<*mut u8> {
        let n = self.mapped.load(Ordering::Acquire);
        for i in 0..n {
            // SAFETY: i < published length, slot is immutable.
            if let Some(seg) = unsafe { &*self.segments[i].get() } {
                if file_offset >= seg.file_start && file_offset < seg.file_start + seg.len {
                    // SAFETY: the delta is within the segment's mapping.
                    return Some(unsafe {
                        (seg.map.as_ptr() as *mut u8).add((file_offset - seg.file_start) as usize)
                    });
                }
            }
        }
        None
    }

    fn resize_locked(&self, target: u64) -> Result<()> {
        while target + STORE_HEADER_SIZE as u64 > self.mapped_capacity() {
            self.grow_segment()?;
        }
        set_header_word(self.segment_base(0), HEADER_SIZE_WORD, target);
        Ok(())
    }
}

impl Store for SegmentedMap {
    fn size(&self) -> u64 {
        header_word(self.segment_base(0), HEADER_SIZE_WORD)
    }

    fn resize(&self, target: u64) -> Result<()> {
        let _guard = self.grow.lock();
        self.resize_locked(target)
    }

    fn try_offset(&self, offset: u64) -> Option<*mut u8> {
        self.resolve(offset + STORE_HEADER_SIZE as u64)
    }

    fn offset_of(&self, ptr: *const u8) -> u64 {
        let n = self.mapped.load(Ordering::Acquire);
        for i in 0..n {
            // SAFETY: i < published length, slot is immutable.
            if let Some(seg) = unsafe { &*self.segments[i].get() } {
                let base = seg.map.as_ptr() as u64;
                if (ptr as u64) >= base && (ptr as u64) < base + seg.len {
                    return ptr as u64 - base + seg.file_start - STORE_HEADER_SIZE as u64;
                }
            }
        }
        0
    }

    fn allocate(&self, len: u64) -> Result<(*mut u8, u64)> {
        let _guard = self.grow.lock();

        let mut start = self.size();
        let boundary = self.mapped_capacity() - STORE_HEADER_SIZE as u64;

        // A span must be contiguous in memory; skip to the segment boundary
        // when it would straddle it. The gap is whole units by construction.
        if start < boundary && start + len > boundary {
            start = boundary;
        }

        self.resize_locked(start + len)?;

        let ptr = self
            .offset(start)
            .wrap_err("allocation start not mapped after grow")?;
        Ok((ptr, start))
    }

    fn stale(&self, extra: u64) -> bool {
        self.size() + extra + STORE_HEADER_SIZE as u64 > self.mapped_capacity()
    }

    fn flush(&self) -> Result<()> {
        let n = self.mapped.load(Ordering::Acquire);
        for i in 0..n {
            // SAFETY: i < published length, slot is immutable.
            if let Some(seg) = unsafe { &*self.segments[i].get() } {
                seg.map
                    .flush()
                    .wrap_err_with(|| format!("failed to flush '{}'", self.path.display()))?;
            }
        }
        Ok(())
    }

    fn version(&self) -> u64 {
        header_word(self.segment_base(0), HEADER_VERSION_WORD)
    }

    fn update_version(&self) {
        let _guard = self.grow.lock();
        let v = self.version();
        set_header_word(self.segment_base(0), HEADER_VERSION_WORD, v + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UNIT_SIZE;
    use tempfile::tempdir;

    const GROW: u64 = 4 * UNIT_SIZE as u64;

    #[test]
    fn create_seeds_header() {
        let dir = tempdir().unwrap();
        let store = SegmentedMap::open_with(dir.path().join("a.slab"), GROW).unwrap();

        assert_eq!(store.size(), 0);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn rejects_unaligned_grow_size() {
        let dir = tempdir().unwrap();
        let result = SegmentedMap::open_with(dir.path().join("a.slab"), 1000);

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("not a multiple of the unit size"));
    }

    #[test]
    fn pointers_stay_valid_across_growth() {
        let dir = tempdir().unwrap();
        let store = SegmentedMap::open_with(dir.path().join("a.slab"), GROW).unwrap();

        let (ptr, off) = store.allocate(UNIT_SIZE as u64).unwrap();
        // SAFETY: freshly allocated unit.
        unsafe { *ptr = 0x5a };

        // Force several segment grows.
        for _ in 0..16 {
            store.allocate(UNIT_SIZE as u64).unwrap();
        }

        let again = store.offset(off).unwrap();
        assert_eq!(again, ptr);
        // SAFETY: same committed unit.
        assert_eq!(unsafe { *again }, 0x5a);
    }

    #[test]
    fn straddling_allocation_skips_to_boundary() {
        let dir = tempdir().unwrap();
        let store = SegmentedMap::open_with(dir.path().join("a.slab"), GROW).unwrap();

        // Three units leave one unit before the first boundary; a two unit
        // span cannot straddle it.
        store.allocate(3 * UNIT_SIZE as u64).unwrap();
        let (_, off) = store.allocate(2 * UNIT_SIZE as u64).unwrap();

        assert_eq!(off, GROW);
        assert_eq!(off % UNIT_SIZE as u64, 0);
    }

    #[test]
    fn reopen_preserves_committed_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.slab");

        {
            let store = SegmentedMap::open_with(&path, GROW).unwrap();
            store.allocate(UNIT_SIZE as u64).unwrap();
            store.flush().unwrap();
        }

        let store = SegmentedMap::open_with(&path, GROW).unwrap();
        assert_eq!(store.size(), UNIT_SIZE as u64);
    }

    #[test]
    fn segment_table_exhaustion_is_an_error() {
        let dir = tempdir().unwrap();
        let store = SegmentedMap::open_with(dir.path().join("a.slab"), UNIT_SIZE as u64).unwrap();

        let mut last = Ok(0u64);
        for _ in 0..(MAX_SEGMENTS + 1) {
            last = store.allocate(UNIT_SIZE as u64).map(|(_, off)| off);
            if last.is_err() {
                break;
            }
        }

        assert!(last.unwrap_err().to_string().contains("segment table full"));
    }
}
