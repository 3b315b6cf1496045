//! # Recycling Arena
//!
//! The arena carves a backing store into fixed `UNIT_SIZE` units and hands
//! them out by integer index. Unit 0 is the arena's own header plus the
//! table descriptor array, so offset 0 never addresses a value; that is
//! why 0 can double as the "uncommitted" marker in surrogate keys.
//!
//! ## Unit 0 Layout
//!
//! ```text
//! +------------------------------+  data offset 0
//! |  header (64 bytes)           |  { unit_count, free_head, in_use,
//! +------------------------------+    generation }
//! |  descriptors (64 x 64 bytes) |
//! +------------------------------+
//! |  unused to end of unit       |
//! +------------------------------+  data offset UNIT_SIZE = unit 1
//! ```
//!
//! ## Recycling
//!
//! Freed units form an intrusive LIFO list: each free unit stores the index
//! of the next free unit in its first 8 bytes, terminated by `FREE_NULL`.
//! `allocate_page` pops the list before growing the store; `allocate_span`
//! always takes fresh units so multi-unit pages stay contiguous. A span that
//! would straddle a segment boundary is placed after it, and the skipped
//! whole units are pushed onto the free list instead of leaking.
//!
//! ## Incidental Allocation
//!
//! Values smaller than a unit are placed through a byte-precise cursor into
//! a spare unit, replenished from `allocate_span(1)` when exhausted. A
//! request larger than one unit is a capacity error the caller can handle.

mod descriptor;

pub use descriptor::{Descriptor, KeyClass, KeyMode, TableKind};

use std::sync::atomic::{AtomicU64, Ordering};

use eyre::{ensure, Result};
use parking_lot::Mutex;
use tracing::{debug, trace};
use zerocopy::IntoBytes;

use crate::config::{
    ARENA_HEADER_SIZE, DESCRIPTOR_SIZE, FREE_NULL, MAX_DESCRIPTORS, UNIT_SIZE,
};
use crate::keys::KeyContext;
use crate::store::{atomic_word, Store};

const H_COUNT: usize = 0;
const H_FREE: usize = 1;
const H_IN_USE: usize = 2;
const H_GENERATION: usize = 3;

/// Units spanned by a page type.
pub const fn units_of<T>() -> u64 {
    std::mem::size_of::<T>().div_ceil(UNIT_SIZE) as u64
}

/// Bytes left in the unit a byte-precise allocation cursor sits in.
pub const fn available_space(used: u64) -> u64 {
    UNIT_SIZE as u64 - used % UNIT_SIZE as u64
}

#[derive(Default)]
struct IncidentalCursor {
    offset: u64,
    remaining: u64,
}

pub struct Arena<S: Store> {
    store: S,
    alloc: Mutex<()>,
    incidental: Mutex<IncidentalCursor>,
}

impl<S: Store> Arena<S> {
    /// Wrap a store, seeding unit 0 when the store is empty.
    pub fn open(store: S) -> Result<Self> {
        let arena = Self {
            store,
            alloc: Mutex::new(()),
            incidental: Mutex::new(IncidentalCursor::default()),
        };

        if arena.store.size() == 0 {
            let (_, off) = arena.store.allocate(UNIT_SIZE as u64)?;
            ensure!(off == 0, "arena header landed at offset {} instead of 0", off);

            // A freshly extended file is zero filled; only the non-zero
            // header fields need seeding.
            arena.header(H_COUNT)?.store(1, Ordering::Release);
            arena.header(H_FREE)?.store(FREE_NULL, Ordering::Release);
            arena.header(H_IN_USE)?.store(1, Ordering::Release);
            debug!("initialized arena header");
        }

        Ok(arena)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Unit index of the first table root; unit 0 is the arena itself.
    pub fn root(&self) -> u64 {
        1
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    fn header(&self, word: usize) -> Result<&AtomicU64> {
        let ptr = self.store.offset(word as u64 * 8)?;
        // SAFETY: unit 0 is committed for the arena's lifetime and the
        // header words are 8 aligned within it.
        Ok(unsafe { atomic_word(ptr) })
    }

    /// First 8 bytes of a unit, the intrusive free-list link.
    fn unit_word(&self, idx: u64) -> Result<&AtomicU64> {
        let ptr = self.store.offset(idx * UNIT_SIZE as u64)?;
        // SAFETY: units are 8 aligned by construction (unit size is a
        // multiple of 8 and the data region starts 8 aligned).
        Ok(unsafe { atomic_word(ptr) })
    }

    /// Total units, header unit included.
    pub fn unit_count(&self) -> Result<u64> {
        Ok(self.header(H_COUNT)?.load(Ordering::Acquire))
    }

    /// Units currently allocated (not on the free list).
    pub fn in_use(&self) -> Result<u64> {
        Ok(self.header(H_IN_USE)?.load(Ordering::Acquire))
    }

    pub fn generation(&self) -> Result<u64> {
        Ok(self.header(H_GENERATION)?.load(Ordering::Acquire))
    }

    fn push_free(&self, idx: u64) -> Result<()> {
        let free = self.header(H_FREE)?;
        let cell = self.unit_word(idx)?;

        let mut head = free.load(Ordering::Acquire);
        loop {
            cell.store(head, Ordering::Release);
            match free.compare_exchange(head, idx, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(()),
                Err(current) => head = current,
            }
        }
    }

    fn pop_free(&self) -> Result<Option<u64>> {
        let free = self.header(H_FREE)?;
        let head = free.load(Ordering::Acquire);
        if head == FREE_NULL {
            return Ok(None);
        }

        let count = self.unit_count()?;
        ensure!(
            head < count,
            "free list corrupt: head {} exceeds unit count {}",
            head,
            count
        );

        let next = self.unit_word(head)?.load(Ordering::Acquire);
        ensure!(
            next == FREE_NULL || next < count,
            "free list corrupt: next {} at unit {} exceeds unit count {}",
            next,
            head,
            count
        );

        free.store(next, Ordering::Release);
        Ok(Some(head))
    }

    fn allocate_span_inner(&self, units: u64, locked: bool) -> Result<u64> {
        ensure!(units > 0, "cannot allocate an empty span");

        let expected = self.unit_count()?;
        let bytes = units * UNIT_SIZE as u64;
        let (_, off) = if locked {
            self.store.allocate_locked(bytes)?
        } else {
            self.store.allocate(bytes)?
        };

        debug_assert!(off % UNIT_SIZE as u64 == 0);
        let first = off / UNIT_SIZE as u64;

        // Units skipped at a segment boundary are recycled, not leaked.
        for gap in expected..first {
            self.push_free(gap)?;
        }

        self.header(H_COUNT)?.store(first + units, Ordering::Release);
        self.header(H_IN_USE)?.fetch_add(units, Ordering::Relaxed);

        trace!(first, units, "allocated span");
        Ok(first)
    }

    /// Allocate fresh units; never recycles, so the span is contiguous.
    pub fn allocate_span(&self, units: u64) -> Result<u64> {
        self.allocate_span_inner(units, false)
    }

    /// `allocate_span` for callers racing other writers.
    pub fn allocate_span_locked(&self, units: u64) -> Result<u64> {
        let _guard = self.alloc.lock();
        self.allocate_span_inner(units, true)
    }

    /// Allocate one unit, recycling a freed one when available.
    pub fn allocate_page(&self) -> Result<u64> {
        if let Some(idx) = self.pop_free()? {
            self.header(H_IN_USE)?.fetch_add(1, Ordering::Relaxed);
            return Ok(idx);
        }
        self.allocate_span_inner(1, false)
    }

    /// `allocate_page` for callers racing other writers.
    pub fn allocate_page_locked(&self) -> Result<u64> {
        let _guard = self.alloc.lock();
        if let Some(idx) = self.pop_free()? {
            self.header(H_IN_USE)?.fetch_add(1, Ordering::Relaxed);
            return Ok(idx);
        }
        self.allocate_span_inner(1, true)
    }

    /// Push a unit back onto the free list.
    pub fn free(&self, idx: u64) -> Result<()> {
        ensure!(idx != 0, "unit 0 is the arena header and cannot be freed");
        let count = self.unit_count()?;
        ensure!(idx < count, "unit {} out of range (count {})", idx, count);

        self.push_free(idx)?;
        self.header(H_IN_USE)?.fetch_sub(1, Ordering::Relaxed);
        self.header(H_GENERATION)?.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Resolve a committed unit to a typed page reference.
    ///
    /// The reference is transient: on a single-map store it is invalidated
    /// by the next growth, so callers re-resolve rather than hold it across
    /// allocation.
    pub fn page<T>(&self, idx: u64) -> Result<&T> {
        let count = self.unit_count()?;
        ensure!(
            idx + units_of::<T>() <= count,
            "unit {} out of range (count {})",
            idx,
            count
        );

        let ptr = self.store.offset(idx * UNIT_SIZE as u64)?;
        // SAFETY: the span is committed (bounds check above), unit aligned,
        // and T is a repr(C) page type whose size is a whole number of units.
        // Mutation of a live page goes through atomics or UnsafeCell fields.
        Ok(unsafe { &*(ptr as *const T) })
    }

    /// `page` for readers racing a growing writer: an index past the
    /// published count or an offset not yet mapped resolves to absent
    /// instead of an error.
    pub fn try_page<T>(&self, idx: u64) -> Option<&T> {
        let count = self.header(H_COUNT).ok()?.load(Ordering::Acquire);
        if idx + units_of::<T>() > count {
            return None;
        }

        let ptr = self.store.try_offset(idx * UNIT_SIZE as u64)?;
        // SAFETY: same argument as `page`.
        Some(unsafe { &*(ptr as *const T) })
    }

    /// Allocate `len` bytes through the byte-precise cursor; returns the
    /// stable data offset of the span.
    pub fn incidental(&self, len: u64) -> Result<u64> {
        ensure!(
            len <= UNIT_SIZE as u64,
            "incidental allocation of {} bytes exceeds the unit size",
            len
        );

        let mut cursor = self.incidental.lock();
        if len > cursor.remaining {
            let idx = self.allocate_span_locked(1)?;
            cursor.offset = idx * UNIT_SIZE as u64;
            cursor.remaining = UNIT_SIZE as u64;
        }

        let offset = cursor.offset;
        cursor.offset += len;
        cursor.remaining -= len;
        Ok(offset)
    }

    /// Store a value payload; the returned offset is what surrogate keys
    /// and slot pointers carry. The payload is length prefixed.
    pub fn set_object(&self, bytes: &[u8]) -> Result<u64> {
        ensure!(
            bytes.len() + 4 <= UNIT_SIZE,
            "object of {} bytes exceeds the unit size",
            bytes.len()
        );

        let offset = self.incidental(bytes.len() as u64 + 4)?;
        let ptr = self.store.offset(offset)?;

        // SAFETY: the span of len + 4 bytes at `ptr` was just allocated and
        // is exclusively ours until the offset is published.
        unsafe {
            let len = (bytes.len() as u32).to_le_bytes();
            std::ptr::copy_nonoverlapping(len.as_ptr(), ptr, 4);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(4), bytes.len());
        }

        Ok(offset)
    }

    /// Resolve an offset produced by `set_object` back to its payload.
    pub fn get_object(&self, offset: u64) -> Result<&[u8]> {
        let ptr = self.store.offset(offset)?;

        // SAFETY: offsets handed to get_object come from set_object, which
        // wrote a length prefix followed by that many payload bytes.
        unsafe {
            let len = (ptr as *const u32).read_unaligned() as usize;
            Ok(std::slice::from_raw_parts(ptr.add(4), len))
        }
    }

    fn descriptor_ptr(&self, index: usize) -> Result<*mut u8> {
        ensure!(
            index < MAX_DESCRIPTORS,
            "descriptor {} out of range (max {})",
            index,
            MAX_DESCRIPTORS
        );
        self.store
            .offset((ARENA_HEADER_SIZE + index * DESCRIPTOR_SIZE) as u64)
    }

    pub fn descriptor(&self, index: usize) -> Result<Descriptor> {
        let ptr = self.descriptor_ptr(index)?;
        // SAFETY: the descriptor table is inside committed unit 0 and
        // Descriptor is plain old data.
        Ok(unsafe { (ptr as *const Descriptor).read_unaligned() })
    }

    pub fn set_descriptor(&self, index: usize, desc: Descriptor) -> Result<()> {
        let ptr = self.descriptor_ptr(index)?;
        let bytes = desc.as_bytes();
        // SAFETY: same bounds as `descriptor`; 64 bytes inside unit 0.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len()) };
        Ok(())
    }

    /// Human-readable dump of every written descriptor.
    pub fn describe(&self) -> Result<String> {
        let mut out = String::new();
        for i in 0..MAX_DESCRIPTORS {
            let desc = self.descriptor(i)?;
            if desc.is_written() {
                out.push_str(&format!("Unit {}:\n", i));
                out.push_str(&desc.describe());
            }
        }
        Ok(out)
    }
}

impl<S: Store> KeyContext for Arena<S> {
    fn object(&self, offset: u64) -> Option<*const u8> {
        self.store.try_offset(offset).map(|p| p as *const u8)
    }
}

/// Claims unit indexes for tables sharing one arena. Unit 0 is the arena
/// header, so the cursor starts at 1. Open every table in the same order
/// the store was created with.
pub struct UnitCursor {
    next: u64,
}

impl UnitCursor {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn claim(&mut self, units: u64) -> u64 {
        let at = self.next;
        self.next += units;
        at
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for UnitCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// A pseudo-table reserving `N` units at its cursor position, so a layout
/// can leave room for future tables without a format change. The span is
/// filled with 0x77 at first open and otherwise untouched.
pub struct ReservedUnits<const N: u64>;

impl<const N: u64> ReservedUnits<N> {
    pub fn open<S: Store>(arena: &Arena<S>, cursor: &mut UnitCursor) -> Result<Self> {
        let at = cursor.claim(N);

        if arena.unit_count()? <= at {
            let first = arena.allocate_span(N)?;
            ensure!(
                first == at,
                "reserved span landed at unit {} instead of {}",
                first,
                at
            );

            for i in 0..N {
                let ptr = arena.store().offset((first + i) * UNIT_SIZE as u64)?;
                // SAFETY: the span was just allocated; each unit is mapped.
                unsafe { std::ptr::write_bytes(ptr, 0x77, UNIT_SIZE) };
            }
        }

        Ok(Self)
    }
}
