//! Ordered unique-key page. Binary search over a sorted slot prefix;
//! inserts shift the tail up by one. Shifting is why this layout is only
//! safe for single-writer trees or under the page lock.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::TableKind;
use crate::keys::{IndexKey, KeyContext};

use super::{
    guard_lock, guard_sane, guard_unlock, route_link, FindStep, IndexPage, PageStep, RangePage,
    SlotRef,
};
use crate::config::GUARD_MAGIC;

#[repr(C)]
pub struct ListPage<K, const BINS: usize, const LINKS: usize, const PAD: usize> {
    keys: UnsafeCell<[K; BINS]>,
    pointers: [AtomicU64; BINS],
    links: [AtomicU64; LINKS],
    count: AtomicU64,
    checksum: AtomicU64,
    guard: AtomicU64,
    _pad: [u8; PAD],
}

// SAFETY: keys are written only while holding the guard lock or from the
// sole writer of an unshared tree; every other word is atomic.
unsafe impl<K: Send, const BINS: usize, const LINKS: usize, const PAD: usize> Sync
    for ListPage<K, BINS, LINKS, PAD>
{
}
unsafe impl<K: Send, const BINS: usize, const LINKS: usize, const PAD: usize> Send
    for ListPage<K, BINS, LINKS, PAD>
{
}

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const PAD: usize>
    ListPage<K, BINS, LINKS, PAD>
{
    fn key_ptr(&self) -> *mut K {
        self.keys.get() as *mut K
    }

    pub(super) fn read_key(&self, slot: usize) -> K {
        debug_assert!(slot < BINS);
        // SAFETY: slot < BINS; slots below count were fully written before
        // count was raised.
        unsafe { self.key_ptr().add(slot).read() }
    }

    pub(super) fn write_key(&self, slot: usize, key: K) {
        debug_assert!(slot < BINS);
        // SAFETY: slot < BINS; caller is the page's only mutator.
        unsafe { self.key_ptr().add(slot).write(key) }
    }

    #[cfg(feature = "validation")]
    pub(super) fn note_key(&self, key: &K) {
        self.checksum
            .fetch_xor(key.checksum_word(), Ordering::Relaxed);
    }

    #[cfg(not(feature = "validation"))]
    pub(super) fn note_key(&self, _key: &K) {}

    /// Open a hole at `at` by shifting `[at, count)` up one slot, then
    /// raise the count. The hole's key and pointer are the caller's to fill.
    pub(super) fn expand(&self, at: usize) {
        let count = self.count.load(Ordering::Acquire) as usize;
        debug_assert!(count < BINS && at <= count);

        let mut slot = count;
        while slot > at {
            let key = self.read_key(slot - 1);
            self.write_key(slot, key);
            let pointer = self.pointers[slot - 1].load(Ordering::Relaxed);
            self.pointers[slot].store(pointer, Ordering::Relaxed);
            slot -= 1;
        }

        self.count.fetch_add(1, Ordering::Release);
    }

    pub(super) fn bump_count(&self) {
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Binary search over the sorted prefix. `Ok(slot)` on an exact match,
    /// `Err(position)` with the insertion position otherwise.
    pub(super) fn search(
        &self,
        key: &K,
        ctx: &dyn KeyContext,
        staged: Option<&[u8]>,
    ) -> std::result::Result<usize, i64> {
        let count = self.count.load(Ordering::Acquire) as i64;
        let mut low: i64 = 0;
        let mut high: i64 = count - 1;

        while low <= high {
            let middle = (low + high) >> 1;
            match self.read_key(middle as usize).compare(key, ctx, staged) {
                std::cmp::Ordering::Less => low = middle + 1,
                std::cmp::Ordering::Greater => high = middle - 1,
                std::cmp::Ordering::Equal => return Ok(middle as usize),
            }
        }

        Err(low)
    }

    #[cfg(feature = "validation")]
    fn checksum_holds(&self) -> bool {
        let count = self.count.load(Ordering::Acquire) as usize;
        let mut folded = 0u64;
        for slot in 0..count {
            folded ^= self.read_key(slot).checksum_word();
        }
        folded == self.checksum.load(Ordering::Acquire)
    }
}

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const PAD: usize> IndexPage
    for ListPage<K, BINS, LINKS, PAD>
{
    type Key = K;

    const BINS: usize = BINS;
    const LINKS: usize = LINKS;
    const KIND: TableKind = TableKind::SortedList;

    fn init(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.checksum.store(0, Ordering::Relaxed);
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

    fn insert(&self, key: &K, pointer: u64, _depth: usize, ctx: &dyn KeyContext) -> PageStep {
        let count = self.count.load(Ordering::Acquire) as usize;

        if count == 0 {
            self.write_key(0, *key);
            self.note_key(key);
            self.pointers[0].store(pointer, Ordering::Release);
            self.count.fetch_add(1, Ordering::Release);
            return PageStep::Stored {
                slot: 0,
                overwrite: false,
            };
        }

        let position = match self.search(key, ctx, None) {
            Ok(slot) => {
                // The slot keeps its pointer; the caller decides whether to
                // replace it.
                return PageStep::Stored {
                    slot,
                    overwrite: true,
                };
            }
            Err(position) => position,
        };

        if count == BINS {
            return PageStep::Route(route_link(position, BINS, LINKS));
        }

        self.expand(position as usize);
        self.write_key(position as usize, *key);
        self.note_key(key);
        self.pointers[position as usize].store(pointer, Ordering::Release);

        PageStep::Stored {
            slot: position as usize,
            overwrite: false,
        }
    }

    fn find(&self, key: &K, _depth: usize, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> FindStep {
        let count = self.count.load(Ordering::Acquire) as usize;
        if count == 0 {
            return FindStep::Miss;
        }

        match self.search(key, ctx, staged) {
            Ok(slot) => FindStep::Hit(slot),
            Err(position) if count == BINS => {
                FindStep::Route(route_link(position, BINS, LINKS))
            }
            Err(_) => FindStep::Miss,
        }
    }

    fn validate(&self) -> bool {
        let count = self.count.load(Ordering::Acquire);
        if count > BINS as u64 || !guard_sane(&self.guard) {
            return false;
        }

        #[cfg(feature = "validation")]
        if !self.checksum_holds() {
            return false;
        }

        true
    }
}

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const PAD: usize> RangePage
    for ListPage<K, BINS, LINKS, PAD>
{
    fn find_range(
        &self,
        low: &K,
        high: &K,
        ctx: &dyn KeyContext,
        staged: Option<&[u8]>,
        visit: &mut dyn FnMut(u64),
    ) -> Option<(usize, usize)> {
        let count = self.count.load(Ordering::Acquire) as usize;
        if count == 0 {
            return None;
        }

        // First slot not below `low`.
        let mut start = 0usize;
        let mut end = count;
        while start < end {
            let middle = (start + end) >> 1;
            if self.read_key(middle).compare(low, ctx, staged) == std::cmp::Ordering::Less {
                start = middle + 1;
            } else {
                end = middle;
            }
        }
        let first = start;

        // First slot above `high`.
        let mut lo = first;
        let mut hi = count;
        while lo < hi {
            let middle = (lo + hi) >> 1;
            if self.read_key(middle).compare(high, ctx, staged) == std::cmp::Ordering::Greater {
                hi = middle;
            } else {
                lo = middle + 1;
            }
        }
        let past = lo;

        for slot in first..past {
            visit(self.pointers[slot].load(Ordering::Acquire));
        }

        if count < BINS {
            return None;
        }

        // Keys inside the range can only sit below children routed from
        // positions between the two bounds.
        Some((
            route_link(first as i64, BINS, LINKS),
            route_link(past as i64, BINS, LINKS),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Key16;

    struct NoContext;

    impl KeyContext for NoContext {
        fn object(&self, _offset: u64) -> Option<*const u8> {
            None
        }
    }

    type Tiny = ListPage<Key16, 4, 2, 0>;

    fn fresh() -> Box<Tiny> {
        // SAFETY: every field of the page is valid all-zero; init() then
        // raises the guard.
        let page: Box<Tiny> = unsafe { Box::new_zeroed().assume_init() };
        page.init();
        page
    }

    fn key(value: u64) -> Key16 {
        Key16::new([value, 0])
    }

    #[test]
    fn inserts_stay_sorted() {
        let ctx = NoContext;
        let page = fresh();

        for value in [30u64, 10, 20] {
            let step = page.insert(&key(value), value, 0, &ctx);
            assert!(matches!(step, PageStep::Stored { overwrite: false, .. }));
        }

        assert_eq!(page.count(), 3);
        assert_eq!(page.key_at(0), key(10));
        assert_eq!(page.key_at(1), key(20));
        assert_eq!(page.key_at(2), key(30));
        assert_eq!(page.pointer_at(1), 20);
    }

    #[test]
    fn duplicate_insert_reports_overwrite_and_keeps_the_pointer() {
        let ctx = NoContext;
        let page = fresh();

        page.insert(&key(7), 70, 0, &ctx);
        let step = page.insert(&key(7), 99, 0, &ctx);

        assert_eq!(
            step,
            PageStep::Stored {
                slot: 0,
                overwrite: true
            }
        );
        assert_eq!(page.pointer_at(0), 70);

        // The caller applies the new value through the slot.
        if let PageStep::Stored { slot, .. } = step {
            page.slot(slot).set(99);
        }
        assert_eq!(page.pointer_at(0), 99);
    }

    #[test]
    fn full_page_routes_by_position() {
        let ctx = NoContext;
        let page = fresh();

        for value in [10u64, 20, 30, 40] {
            page.insert(&key(value), value, 0, &ctx);
        }
        assert_eq!(page.count(), 4);

        // Position 0 of 4 bins over 2 links scales to link 0; position 4
        // clamps to the last slot and scales to link 1.
        assert_eq!(page.insert(&key(5), 5, 0, &ctx), PageStep::Route(0));
        assert_eq!(page.insert(&key(45), 45, 0, &ctx), PageStep::Route(1));
        assert_eq!(page.find(&key(25), 0, &ctx, None), FindStep::Route(1));
    }

    #[test]
    fn find_misses_on_a_page_with_room() {
        let ctx = NoContext;
        let page = fresh();

        page.insert(&key(10), 10, 0, &ctx);

        assert_eq!(page.find(&key(10), 0, &ctx, None), FindStep::Hit(0));
        assert_eq!(page.find(&key(11), 0, &ctx, None), FindStep::Miss);
    }

    #[test]
    fn range_scan_visits_the_inclusive_window() {
        let ctx = NoContext;
        let page = fresh();

        for value in [10u64, 20, 30, 40] {
            page.insert(&key(value), value, 0, &ctx);
        }

        let mut seen = Vec::new();
        let span = page.find_range(&key(20), &key(30), &ctx, None, &mut |p| seen.push(p));

        assert_eq!(seen, vec![20, 30]);
        // Full page: children between the bound positions may hold more.
        assert_eq!(span, Some((0, 1)));
    }

    #[test]
    fn range_scan_on_a_page_with_room_has_no_children_to_visit() {
        let ctx = NoContext;
        let page = fresh();

        page.insert(&key(10), 10, 0, &ctx);
        page.insert(&key(20), 20, 0, &ctx);

        let mut seen = Vec::new();
        let span = page.find_range(&key(0), &key(99), &ctx, None, &mut |p| seen.push(p));

        assert_eq!(seen, vec![10, 20]);
        assert_eq!(span, None);
    }

    #[test]
    fn validate_accepts_a_live_page() {
        let ctx = NoContext;
        let page = fresh();

        page.insert(&key(1), 1, 0, &ctx);
        page.insert(&key(2), 2, 0, &ctx);

        assert!(page.validate());
    }
}
