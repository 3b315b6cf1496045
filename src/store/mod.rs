//! # Backing Stores
//!
//! This module provides the byte-addressable backing stores the arena is
//! built on. A store owns a growable region of bytes, addressed by stable
//! integer offsets, with a small fixed header in front of the data region.
//!
//! ## Region Layout
//!
//! ```text
//! +---------------------------+  file offset 0
//! |  StoreHeader (64 bytes)   |  { size, version }
//! +---------------------------+  file offset 64 = data offset 0
//! |                           |
//! |  data region              |  addressed by data offsets
//! |                           |
//! +---------------------------+
//! ```
//!
//! `size()` is the number of *committed* data bytes; physical capacity is
//! always at least `size() + STORE_HEADER_SIZE` and grows in
//! `DEFAULT_GROW_SIZE` increments. A store never shrinks, and committed
//! offsets are stable for the life of the file.
//!
//! ## Variants
//!
//! - [`SingleMap`]: one contiguous mapping. Growing past capacity unmaps and
//!   remaps, which invalidates every outstanding pointer. Single-writer,
//!   single-thread; `!Sync` by construction.
//! - [`SegmentedMap`]: an append-only list of independently mapped segments.
//!   Growth appends a new mapping and never moves existing ones, so resolved
//!   pointers stay valid and lock-free readers can run concurrently with a
//!   growing writer.
//! - [`MemoryStore`]: a read-only in-memory image, for opening snapshots
//!   without touching the filesystem.
//!
//! ## Pointer vs Offset
//!
//! `offset(o)` resolves a data offset to a raw pointer valid until the next
//! remap (always, under the segmented variant); `offset_of(p)` inverts it.
//! Callers persist offsets, never pointers.

mod memory;
mod segmented;
mod single;

pub use memory::MemoryStore;
pub use segmented::SegmentedMap;
pub use single::SingleMap;

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{eyre, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::STORE_HEADER_SIZE;

/// On-disk header at the front of every store file.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct StoreHeader {
    /// Committed data bytes (excludes this header).
    pub size: u64,
    /// Format/schema version, bumped by `update_version`.
    pub version: u64,
    reserved: [u64; 6],
}

const _: () = assert!(std::mem::size_of::<StoreHeader>() == STORE_HEADER_SIZE);

impl StoreHeader {
    pub fn new() -> Self {
        Self {
            size: 0,
            version: 1,
            reserved: [0; 6],
        }
    }
}

impl Default for StoreHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A growable, byte-addressable backing region.
///
/// Offsets are relative to the data region and permanently stable. Pointer
/// stability across growth is variant-specific; see the module docs.
pub trait Store {
    /// Committed data bytes.
    fn size(&self) -> u64;

    /// Raise the committed size to `target`, growing physical capacity as
    /// needed. Never shrinks.
    fn resize(&self, target: u64) -> Result<()>;

    /// Resolve a data offset to a raw pointer, or `None` when the offset is
    /// not covered by the current mapping (a reader racing a grow).
    fn try_offset(&self, offset: u64) -> Option<*mut u8>;

    /// Resolve a data offset to a raw pointer.
    fn offset(&self, offset: u64) -> Result<*mut u8> {
        self.try_offset(offset)
            .ok_or_else(|| eyre!("offset {} is not mapped", offset))
    }

    /// Invert `offset`: the data offset of a pointer into this store.
    fn offset_of(&self, ptr: *const u8) -> u64;

    /// Bump-allocate `len` committed bytes; returns the pointer and the data
    /// offset of the new span.
    fn allocate(&self, len: u64) -> Result<(*mut u8, u64)>;

    /// `allocate` for callers racing other writers. The segmented store
    /// serializes all allocation internally, so the default forwards.
    fn allocate_locked(&self, len: u64) -> Result<(*mut u8, u64)> {
        self.allocate(len)
    }

    /// True when `size() + extra` exceeds the mapped capacity, i.e. another
    /// handle on the same file must remap before resolving new offsets.
    fn stale(&self, extra: u64) -> bool;

    /// Flush dirty mappings to the backing file.
    fn flush(&self) -> Result<()>;

    /// Current header version.
    fn version(&self) -> u64;

    /// Bump the header version.
    fn update_version(&self);
}

/// View a raw store pointer as an atomic word.
///
/// # Safety
///
/// `ptr` must point at 8 aligned bytes inside a live mapping of the store.
pub(crate) unsafe fn atomic_word<'a>(ptr: *mut u8) -> &'a AtomicU64 {
    &*(ptr as *const AtomicU64)
}

/// Load a header word (size or version) through the mapping.
pub(crate) fn header_word(base: *mut u8, index: usize) -> u64 {
    // SAFETY: the caller maps at least STORE_HEADER_SIZE bytes at `base`, and
    // the header words are 8 aligned because mappings are page aligned.
    unsafe { atomic_word(base.add(index * 8)).load(Ordering::Acquire) }
}

/// Store a header word (size or version) through the mapping.
pub(crate) fn set_header_word(base: *mut u8, index: usize, value: u64) {
    // SAFETY: same bounds and alignment argument as `header_word`.
    unsafe { atomic_word(base.add(index * 8)).store(value, Ordering::Release) }
}

pub(crate) const HEADER_SIZE_WORD: usize = 0;
pub(crate) const HEADER_VERSION_WORD: usize = 1;
