//! Fuzzy hashmap page. A key hashes straight to a bin from one 16-bit
//! slice of its words; collisions probe a small window of `FUZZ` slots
//! around the home bin before routing to a child. Slots never move once
//! written, which is what makes this the layout for concurrent trees: a
//! reader can race a writer and at worst misses a slot whose pointer is
//! still zero, and [`SlotRef::wait_nonzero`] covers that window.
//!
//! Direct addressing needs distributed keys; sequential keys would pile
//! into one bin and degenerate the page into a route-only node.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::TableKind;
use crate::config::{FUZZY_EMPTY, GUARD_MAGIC};
use crate::keys::{IndexKey, KeyContext};

use super::{guard_lock, guard_sane, guard_unlock, FindStep, IndexPage, PageStep, SlotRef};

#[repr(C)]
pub struct FuzzyPage<
    K,
    const BINS: usize,
    const LINKS: usize,
    const FUZZ: usize,
    const PAD: usize,
> {
    keys: UnsafeCell<[K; BINS]>,
    pointers: [AtomicU64; BINS],
    links: [AtomicU64; LINKS],
    count: AtomicU64,
    checksum: AtomicU64,
    guard: AtomicU64,
    _pad: [u8; PAD],
}

// SAFETY: keys are written only under the guard lock, and a slot's key is
// complete before its pointer leaves FUZZY_EMPTY; every other word is
// atomic.
unsafe impl<K: Send, const BINS: usize, const LINKS: usize, const FUZZ: usize, const PAD: usize>
    Sync for FuzzyPage<K, BINS, LINKS, FUZZ, PAD>
{
}
unsafe impl<K: Send, const BINS: usize, const LINKS: usize, const FUZZ: usize, const PAD: usize>
    Send for FuzzyPage<K, BINS, LINKS, FUZZ, PAD>
{
}

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const FUZZ: usize, const PAD: usize>
    FuzzyPage<K, BINS, LINKS, FUZZ, PAD>
{
    fn read_key(&self, slot: usize) -> K {
        debug_assert!(slot < BINS);
        // SAFETY: slot < BINS; occupied slots had their key written before
        // the pointer left FUZZY_EMPTY.
        unsafe { (self.keys.get() as *const K).add(slot).read() }
    }

    fn write_key(&self, slot: usize, key: K) {
        debug_assert!(slot < BINS);
        // SAFETY: slot < BINS; caller holds the page lock or owns the tree.
        unsafe { (self.keys.get() as *mut K).add(slot).write(key) }
    }

    #[cfg(feature = "validation")]
    fn note_key(&self, key: &K) {
        self.checksum
            .fetch_xor(key.checksum_word(), Ordering::Relaxed);
    }

    #[cfg(not(feature = "validation"))]
    fn note_key(&self, _key: &K) {}

    fn occupied(&self, slot: usize) -> bool {
        self.pointers[slot].load(Ordering::Acquire) != FUZZY_EMPTY
    }

    /// Home bin of `key` at `depth`: one 16-bit slice of the key, the
    /// slice index cycling through the key as the tree deepens.
    fn bin_of(&self, key: &K, depth: usize) -> usize {
        let slices = std::mem::size_of::<K>() / 2;
        key.slice16(depth % slices) as usize % BINS
    }

    /// Probe window around `bin`: `FUZZ` slots centered on it, clamped to
    /// the page.
    fn window(bin: usize) -> (usize, usize) {
        let low = bin as i64 - (FUZZ / 2) as i64;
        let high = (low + FUZZ as i64).min(BINS as i64) as usize;
        (low.max(0) as usize, high)
    }

    fn claim(&self, slot: usize, key: &K, pointer: u64) -> PageStep {
        self.write_key(slot, *key);
        self.note_key(key);
        self.pointers[slot].store(pointer, Ordering::Release);
        self.count.fetch_add(1, Ordering::Release);
        PageStep::Stored {
            slot,
            overwrite: false,
        }
    }

    /// Route link when the probe window `[low, high)` is exhausted.
    fn exhausted_route(high: usize) -> usize {
        ((high - 1) * LINKS) / BINS
    }

    #[cfg(feature = "validation")]
    fn checksum_holds(&self) -> bool {
        let mut folded = 0u64;
        for slot in 0..BINS {
            if self.occupied(slot) {
                folded ^= self.read_key(slot).checksum_word();
            }
        }
        folded == self.checksum.load(Ordering::Acquire)
    }
}

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const FUZZ: usize, const PAD: usize>
    IndexPage for FuzzyPage<K, BINS, LINKS, FUZZ, PAD>
{
    type Key = K;

    const BINS: usize = BINS;
    const LINKS: usize = LINKS;
    const KIND: TableKind = TableKind::FuzzyMap;

    fn init(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.checksum.store(0, Ordering::Relaxed);
        for pointer in &self.pointers {
            pointer.store(FUZZY_EMPTY, Ordering::Relaxed);
        }
        for link in &self.links {
            link.store(0, Ordering::Relaxed);
        }
        // The guard goes up last; a zero guard reads as locked.
        self.guard.store(GUARD_MAGIC, Ordering::Release);
    }

    fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    fn link(&self, index: usize) -> u64 {
        self.links[index].load(Ordering::Acquire)
    }

    fn set_link(&self, index: usize, unit: u64) {
        self.links[index].store(unit, Ordering::Release)
    }

    fn lock(&self) {
        guard_lock(&self.guard)
    }

    fn unlock(&self) {
        guard_unlock(&self.guard)
    }

    fn key_at(&self, slot: usize) -> K {
        self.read_key(slot)
    }

    fn pointer_at(&self, slot: usize) -> u64 {
        self.pointers[slot].load(Ordering::Acquire)
    }

    fn slot(&self, slot: usize) -> SlotRef<'_> {
        SlotRef::new(&self.pointers[slot])
    }

    fn insert(&self, key: &K, pointer: u64, depth: usize, ctx: &dyn KeyContext) -> PageStep {
        let bin = self.bin_of(key, depth);

        if !self.occupied(bin) {
            return self.claim(bin, key, pointer);
        }
        if self.read_key(bin).equal(key, ctx, None) {
            return PageStep::Stored {
                slot: bin,
                overwrite: true,
            };
        }

        let (low, high) = Self::window(bin);
        let mut empty: Option<usize> = None;
        for slot in low..high {
            if !self.occupied(slot) {
                empty = Some(slot);
                continue;
            }
            if self.read_key(slot).equal(key, ctx, None) {
                return PageStep::Stored {
                    slot,
                    overwrite: true,
                };
            }
        }

        match empty {
            Some(slot) => self.claim(slot, key, pointer),
            None => PageStep::Route(Self::exhausted_route(high)),
        }
    }

    fn find(&self, key: &K, depth: usize, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> FindStep {
        if self.count.load(Ordering::Acquire) == 0 {
            return FindStep::Miss;
        }

        let bin = self.bin_of(key, depth);

        if self.occupied(bin) && self.read_key(bin).equal(key, ctx, staged) {
            return FindStep::Hit(bin);
        }

        let (low, high) = Self::window(bin);
        let mut saw_empty = !self.occupied(bin);
        for slot in low..high {
            if !self.occupied(slot) {
                saw_empty = true;
                continue;
            }
            if self.read_key(slot).equal(key, ctx, staged) {
                return FindStep::Hit(slot);
            }
        }

        // An empty slot in the window proves the key never overflowed to a
        // child from here.
        if saw_empty {
            FindStep::Miss
        } else {
            FindStep::Route(Self::exhausted_route(high))
        }
    }

    fn validate(&self) -> bool {
        let count = self.count.load(Ordering::Acquire);
        if count > BINS as u64 || !guard_sane(&self.guard) {
            return false;
        }

        let occupied = (0..BINS).filter(|&slot| self.occupied(slot)).count() as u64;
        if occupied != count {
            return false;
        }

        #[cfg(feature = "validation")]
        if !self.checksum_holds() {
            return false;
        }

        true
    }
}
