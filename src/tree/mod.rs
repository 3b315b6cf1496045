//! # Tree Walking Engine
//!
//! A table is a tree of identical pages rooted at a fixed unit. The engine
//! is generic over the page layout: it owns the descent, child allocation
//! and lock choreography, while the page decides where a key lives.
//!
//! ```text
//!                    root unit (claimed by a UnitCursor)
//!                         │
//!              ┌──────────┼──────────┐
//!            link 0     link 1 ..  link L-1     pages never split or
//!              │                                rebalance; a full page
//!            child page ...                     routes and the key sinks
//! ```
//!
//! Every step is a page operation followed by at most one link hop, so a
//! lookup touches `depth + 1` pages and takes no locks on full pages.
//!
//! ## Concurrency
//!
//! `insert` and `find` are the single-writer fast path. `insert_lock` and
//! `find_lock` serialize on the per-page guard word, but only while a page
//! still has room: a full page's slots are immutable, so it is traversed
//! lock-free forever after. Child links are only ever set under the lock of
//! the page that owns them, with a re-check after acquisition so two
//! writers racing the same empty link cannot both allocate.
//!
//! Concurrent use requires a store whose mappings are stable under growth
//! (the segmented store); the single map may remap, which the locked paths
//! defend against by re-resolving the current page after any allocation.
//!
//! ## Stalling
//!
//! A stalled tree forces routes through link 0 at shallow depths, trading
//! fanout for depth so the key's later hash slices get consumed before the
//! tree spreads. `STALL_INTERVAL` and `STALL_DEPTH` default to off.

use std::marker::PhantomData;

use eyre::{ensure, Result};
use smallvec::SmallVec;
use tracing::trace;

use crate::arena::{units_of, Arena, Descriptor, UnitCursor};
use crate::config::{FUZZY_EMPTY, MAX_DESCRIPTORS};
use crate::keys::IndexKey;
use crate::page::{FindStep, IndexPage, MultiPage, PageStep, RangePage, SlotRef};
use crate::store::Store;

/// Result of placing a key: the live slot and whether a previous value was
/// already there. On `overwrite` the old pointer is untouched; the caller
/// reads or replaces it through the slot.
#[derive(Clone, Copy)]
pub struct Placed<'a> {
    pub slot: SlotRef<'a>,
    pub overwrite: bool,
}

pub struct Tree<
    'a,
    S: Store,
    P: IndexPage,
    const STALL_INTERVAL: usize = 1,
    const STALL_DEPTH: usize = 0,
> {
    arena: &'a Arena<S>,
    root: u64,
    _page: PhantomData<P>,
}

impl<'a, S: Store, P: IndexPage, const STALL_INTERVAL: usize, const STALL_DEPTH: usize>
    Tree<'a, S, P, STALL_INTERVAL, STALL_DEPTH>
{
    /// Open the table at the cursor's position, allocating and initializing
    /// the root page on first open. The descriptor slot for the root unit
    /// is written once, at creation.
    pub fn open(arena: &'a Arena<S>, cursor: &mut UnitCursor) -> Result<Self> {
        let root = cursor.claim(units_of::<P>());

        if arena.unit_count()? <= root {
            let first = arena.allocate_span(units_of::<P>())?;
            ensure!(
                first == root,
                "table root landed at unit {} instead of {}",
                first,
                root
            );
            arena.page::<P>(root)?.init();

            if (root as usize) < MAX_DESCRIPTORS {
                arena.set_descriptor(
                    root as usize,
                    Descriptor::for_index(
                        P::KIND,
                        <P::Key as IndexKey>::MODE,
                        <P::Key as IndexKey>::CLASS,
                        std::mem::size_of::<P::Key>() as u32,
                        P::LINKS as u32,
                        P::BINS as u32,
                        std::mem::size_of::<P>() as u32,
                    ),
                )?;
            }
            trace!(root, "created table");
        }

        Ok(Self {
            arena,
            root,
            _page: PhantomData,
        })
    }

    pub fn root(&self) -> u64 {
        self.root
    }

    /// Route index after the stall override. While stalling, everything
    /// funnels through link 0.
    fn routed(depth: usize, route: usize) -> usize {
        if STALL_INTERVAL > 1 && depth < STALL_DEPTH && depth % STALL_INTERVAL != 0 {
            0
        } else {
            route
        }
    }

    fn new_child(&self, locked: bool) -> Result<u64> {
        let child = if locked {
            self.arena.allocate_span_locked(units_of::<P>())?
        } else {
            self.arena.allocate_span(units_of::<P>())?
        };
        self.arena.page::<P>(child)?.init();
        Ok(child)
    }

    /// Single-writer insert. The key sinks until a page stores it,
    /// allocating children as needed.
    pub fn insert(&self, key: &P::Key, pointer: u64) -> Result<Placed<'_>> {
        let mut unit = self.root;
        let mut depth = 0;

        loop {
            let page = self.arena.page::<P>(unit)?;
            match page.insert(key, pointer, depth, self.arena) {
                PageStep::Stored { slot, overwrite } => {
                    return Ok(Placed {
                        slot: page.slot(slot),
                        overwrite,
                    });
                }
                PageStep::Route(route) => {
                    let route = Self::routed(depth, route);
                    let mut link = page.link(route);
                    if link == 0 {
                        let child = self.new_child(false)?;
                        // Allocation may have remapped; write the link
                        // through a fresh resolution of this unit.
                        self.arena.page::<P>(unit)?.set_link(route, child);
                        link = child;
                    }
                    unit = link;
                    depth += 1;
                }
            }
        }
    }

    /// Concurrent insert. Pages with room are taken under their guard;
    /// full pages are descended lock-free. An empty link is re-checked
    /// after acquiring the lock so racing writers converge on one child.
    pub fn insert_lock(&self, key: &P::Key, pointer: u64) -> Result<Placed<'_>> {
        let mut unit = self.root;
        let mut depth = 0;

        loop {
            let page = self.arena.page::<P>(unit)?;
            let mut locked = page.count() != P::BINS as u64;
            if locked {
                page.lock();
            }

            match page.insert(key, pointer, depth, self.arena) {
                PageStep::Stored { slot, overwrite } => {
                    let placed = Placed {
                        slot: page.slot(slot),
                        overwrite,
                    };
                    if locked {
                        page.unlock();
                    }
                    return Ok(placed);
                }
                PageStep::Route(route) => {
                    let route = Self::routed(depth, route);
                    let mut link = page.link(route);

                    if link == 0 {
                        if !locked {
                            page.lock();
                            locked = true;
                        }
                        // Another writer may have hung the child while we
                        // waited on the guard.
                        link = page.link(route);
                        if link == 0 {
                            let child = self.new_child(true)?;
                            self.arena.page::<P>(unit)?.set_link(route, child);
                            link = child;
                        }
                    }

                    if locked {
                        self.arena.page::<P>(unit)?.unlock();
                    }
                    unit = link;
                    depth += 1;
                }
            }
        }
    }

    /// `insert_lock` variant that runs `with` on the placement before the
    /// page guard is released, so slot inspection and update are atomic
    /// with respect to other locked writers.
    pub fn insert_lock_with<R>(
        &self,
        key: &P::Key,
        pointer: u64,
        with: impl FnOnce(Placed<'_>) -> R,
    ) -> Result<R> {
        let mut unit = self.root;
        let mut depth = 0;

        loop {
            let page = self.arena.page::<P>(unit)?;
            let mut locked = page.count() != P::BINS as u64;
            if locked {
                page.lock();
            }

            match page.insert(key, pointer, depth, self.arena) {
                PageStep::Stored { slot, overwrite } => {
                    let result = with(Placed {
                        slot: page.slot(slot),
                        overwrite,
                    });
                    if locked {
                        page.unlock();
                    }
                    return Ok(result);
                }
                PageStep::Route(route) => {
                    let route = Self::routed(depth, route);
                    let mut link = page.link(route);

                    if link == 0 {
                        if !locked {
                            page.lock();
                            locked = true;
                        }
                        link = page.link(route);
                        if link == 0 {
                            let child = self.new_child(true)?;
                            self.arena.page::<P>(unit)?.set_link(route, child);
                            link = child;
                        }
                    }

                    if locked {
                        self.arena.page::<P>(unit)?.unlock();
                    }
                    unit = link;
                    depth += 1;
                }
            }
        }
    }

    /// Single-reader lookup. Absent pages and empty links resolve to a
    /// miss, never an error, so a reader can race a growing writer.
    pub fn find(&self, key: &P::Key) -> Result<Option<u64>> {
        self.find_with(key, None)
    }

    /// `find` with a staged payload for an uncommitted surrogate probe.
    pub fn find_with(&self, key: &P::Key, staged: Option<&[u8]>) -> Result<Option<u64>> {
        let mut unit = self.root;
        let mut depth = 0;

        loop {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                return Ok(None);
            };

            match page.find(key, depth, self.arena, staged) {
                FindStep::Hit(slot) => return Ok(Some(page.pointer_at(slot))),
                FindStep::Miss => return Ok(None),
                FindStep::Route(route) => {
                    let link = page.link(Self::routed(depth, route));
                    if link == 0 {
                        return Ok(None);
                    }
                    unit = link;
                    depth += 1;
                }
            }
        }
    }

    /// Concurrent lookup: pages with room are searched under their guard
    /// so a half-shifted ordered page is never observed.
    pub fn find_lock(&self, key: &P::Key) -> Result<Option<u64>> {
        self.find_lock_with(key, None)
    }

    pub fn find_lock_with(&self, key: &P::Key, staged: Option<&[u8]>) -> Result<Option<u64>> {
        let mut unit = self.root;
        let mut depth = 0;

        loop {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                return Ok(None);
            };

            let locked = page.count() != P::BINS as u64;
            if locked {
                page.lock();
            }

            let step = page.find(key, depth, self.arena, staged);
            let next = match step {
                FindStep::Hit(slot) => {
                    let pointer = page.pointer_at(slot);
                    if locked {
                        page.unlock();
                    }
                    return Ok(Some(pointer));
                }
                FindStep::Miss => {
                    if locked {
                        page.unlock();
                    }
                    return Ok(None);
                }
                FindStep::Route(route) => page.link(Self::routed(depth, route)),
            };

            if locked {
                page.unlock();
            }
            if next == 0 {
                return Ok(None);
            }
            unit = next;
            depth += 1;
        }
    }

    /// Depth-first walk over every committed pointer. `visit` returns
    /// `false` to stop early. Unoccupied direct-addressed slots are
    /// filtered out.
    pub fn iterate(&self, visit: &mut dyn FnMut(u64) -> bool) -> Result<()> {
        let mut stack: SmallVec<[u64; 16]> = SmallVec::new();
        stack.push(self.root);

        while let Some(unit) = stack.pop() {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                continue;
            };

            let count = page.count() as usize;
            let mut visited = 0;
            let mut slot = 0;
            while visited < count && slot < P::BINS {
                let pointer = page.pointer_at(slot);
                slot += 1;
                if pointer == FUZZY_EMPTY {
                    continue;
                }
                visited += 1;
                if !visit(pointer) {
                    return Ok(());
                }
            }

            for index in 0..P::LINKS {
                let link = page.link(index);
                if link != 0 {
                    stack.push(link);
                }
            }
        }

        Ok(())
    }

    /// Raw key/pointer walk in slot order, no filtering: direct-addressed
    /// layouts expose their empty sentinel and callers skip it themselves.
    pub fn iterate_kv(&self, visit: &mut dyn FnMut(P::Key, u64) -> bool) -> Result<()> {
        let mut stack: SmallVec<[u64; 16]> = SmallVec::new();
        stack.push(self.root);

        while let Some(unit) = stack.pop() {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                continue;
            };

            let count = page.count() as usize;
            for slot in 0..count.min(P::BINS) {
                if !visit(page.key_at(slot), page.pointer_at(slot)) {
                    return Ok(());
                }
            }

            for index in 0..P::LINKS {
                let link = page.link(index);
                if link != 0 {
                    stack.push(link);
                }
            }
        }

        Ok(())
    }

    /// Entries stored and slot capacity across every allocated page of the
    /// tree, as a `(used, capacity)` pair.
    pub fn population(&self) -> Result<(u64, u64)> {
        let mut used = 0;
        let mut capacity = 0;
        let mut stack: SmallVec<[u64; 16]> = SmallVec::new();
        stack.push(self.root);

        while let Some(unit) = stack.pop() {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                continue;
            };
            used += page.count();
            capacity += P::BINS as u64;

            for index in 0..P::LINKS {
                let link = page.link(index);
                if link != 0 {
                    stack.push(link);
                }
            }
        }

        Ok((used, capacity))
    }

    /// Structural check of every page. Quiesce writers first; a page
    /// mid-insert legitimately fails its checksum.
    pub fn validate(&self) -> Result<bool> {
        let mut stack: SmallVec<[u64; 16]> = SmallVec::new();
        stack.push(self.root);

        while let Some(unit) = stack.pop() {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                return Ok(false);
            };
            if !page.validate() {
                return Ok(false);
            }

            for index in 0..P::LINKS {
                let link = page.link(index);
                if link != 0 {
                    stack.push(link);
                }
            }
        }

        Ok(true)
    }
}

impl<'a, S: Store, P, const STALL_INTERVAL: usize, const STALL_DEPTH: usize>
    Tree<'a, S, P, STALL_INTERVAL, STALL_DEPTH>
where
    P: MultiPage,
{
    /// Visit every pointer stored under `key`, across all pages that the
    /// key's duplicates may have routed to.
    pub fn multi_find(&self, key: &P::Key, visit: &mut dyn FnMut(u64)) -> Result<()> {
        self.multi_find_with(key, None, visit)
    }

    /// `multi_find` with a staged payload for an uncommitted surrogate
    /// probe.
    pub fn multi_find_with(
        &self,
        key: &P::Key,
        staged: Option<&[u8]>,
        visit: &mut dyn FnMut(u64),
    ) -> Result<()> {
        let mut unit = self.root;
        let mut depth = 0;

        loop {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                return Ok(());
            };

            match page.multi_find(key, depth, self.arena, staged, visit) {
                FindStep::Hit(_) | FindStep::Miss => return Ok(()),
                FindStep::Route(route) => {
                    let link = page.link(Self::routed(depth, route));
                    if link == 0 {
                        return Ok(());
                    }
                    unit = link;
                    depth += 1;
                }
            }
        }
    }
}

impl<'a, S: Store, P, const STALL_INTERVAL: usize, const STALL_DEPTH: usize>
    Tree<'a, S, P, STALL_INTERVAL, STALL_DEPTH>
where
    P: RangePage,
{
    /// Visit every pointer whose key falls in `[low, high]`, inclusive on
    /// both ends. Pages report the child-link span that could hold more.
    pub fn range_find(
        &self,
        low: &P::Key,
        high: &P::Key,
        visit: &mut dyn FnMut(u64),
    ) -> Result<()> {
        self.range_find_with(low, high, None, visit)
    }

    /// `range_find` with a staged payload; whichever bound is an
    /// uncommitted surrogate resolves through it.
    pub fn range_find_with(
        &self,
        low: &P::Key,
        high: &P::Key,
        staged: Option<&[u8]>,
        visit: &mut dyn FnMut(u64),
    ) -> Result<()> {
        let mut stack: SmallVec<[u64; 16]> = SmallVec::new();
        stack.push(self.root);

        while let Some(unit) = stack.pop() {
            let Some(page) = self.arena.try_page::<P>(unit) else {
                continue;
            };

            if let Some((first, last)) = page.find_range(low, high, self.arena, staged, visit) {
                for index in first..=last {
                    let link = page.link(index);
                    if link != 0 {
                        stack.push(link);
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Key16, Key32};
    use crate::page::{FuzzyPage, ListPage, MultiListPage};
    use crate::store::SingleMap;
    use tempfile::tempdir;

    // Small layouts so descent happens within a few inserts; each still
    // occupies one whole arena unit.
    type TinyList = ListPage<Key16, 4, 2, 0>;
    type TinyMulti = MultiListPage<Key16, 4, 2, 0>;
    type TinyFuzzy = FuzzyPage<Key16, 8, 2, 4, 0>;

    fn arena(dir: &tempfile::TempDir) -> Arena<SingleMap> {
        Arena::open(SingleMap::open(dir.path().join("t.slab")).unwrap()).unwrap()
    }

    fn key(value: u64) -> Key16 {
        Key16::new([value, 0])
    }

    #[test]
    fn open_claims_the_root_and_writes_its_descriptor() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();

        let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();

        assert_eq!(tree.root(), 1);
        assert_eq!(cursor.peek(), 2);

        let desc = arena.descriptor(1).unwrap();
        assert!(desc.is_written());
        assert_eq!(desc.key_size, 16);
        assert_eq!(desc.link_count, 2);
    }

    #[test]
    fn keys_sink_into_children_past_a_full_page() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();

        for value in 1..=32u64 {
            tree.insert(&key(value), value * 10).unwrap();
        }

        assert!(arena.unit_count().unwrap() > 2, "overflow allocated children");
        for value in 1..=32u64 {
            assert_eq!(tree.find(&key(value)).unwrap(), Some(value * 10));
        }
        assert_eq!(tree.find(&key(99)).unwrap(), None);

        let (used, capacity) = tree.population().unwrap();
        assert_eq!(used, 32);
        // Capacity counts whole pages of 4 slots each.
        assert_eq!(capacity % 4, 0);
        assert!(capacity >= used);
        assert!(tree.validate().unwrap());
    }

    #[test]
    fn overwrite_returns_the_live_slot() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();

        tree.insert(&key(1), 100).unwrap();
        let placed = tree.insert(&key(1), 200).unwrap();

        assert!(placed.overwrite);
        assert_eq!(placed.slot.get(), 100);

        placed.slot.set(200);
        assert_eq!(tree.find(&key(1)).unwrap(), Some(200));
    }

    #[test]
    fn two_tables_share_one_arena() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();

        let first: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();
        let second: Tree<_, TinyFuzzy> = Tree::open(&arena, &mut cursor).unwrap();

        first.insert(&key(1), 11).unwrap();
        second.insert(&key(1), 22).unwrap();

        assert_eq!(first.find(&key(1)).unwrap(), Some(11));
        assert_eq!(second.find(&key(1)).unwrap(), Some(22));
    }

    #[test]
    fn reopen_finds_the_same_data() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.slab");

        {
            let arena = Arena::open(SingleMap::open(&path).unwrap()).unwrap();
            let mut cursor = UnitCursor::new();
            let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();
            for value in 1..=20u64 {
                tree.insert(&key(value), value).unwrap();
            }
            arena.flush().unwrap();
        }

        let arena = Arena::open(SingleMap::open(&path).unwrap()).unwrap();
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();

        for value in 1..=20u64 {
            assert_eq!(tree.find(&key(value)).unwrap(), Some(value));
        }
        assert_eq!(tree.population().unwrap().0, 20);
    }

    #[test]
    fn multi_find_collects_across_pages() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyMulti> = Tree::open(&arena, &mut cursor).unwrap();

        // Enough copies to overflow the 4-slot root several times over.
        for copy in 0..10u64 {
            tree.insert(&key(5), 50 + copy).unwrap();
        }
        tree.insert(&key(1), 1).unwrap();
        tree.insert(&key(9), 9).unwrap();

        let mut seen = Vec::new();
        tree.multi_find(&key(5), &mut |p| seen.push(p)).unwrap();

        seen.sort_unstable();
        assert_eq!(seen, (50..60).collect::<Vec<_>>());
    }

    #[test]
    fn range_find_spans_children() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();

        for value in 1..=32u64 {
            tree.insert(&key(value), value).unwrap();
        }

        let mut seen = Vec::new();
        tree.range_find(&key(10), &key(20), &mut |p| seen.push(p)).unwrap();

        seen.sort_unstable();
        assert_eq!(seen, (10..=20).collect::<Vec<_>>());
    }

    #[test]
    fn iterate_visits_everything_and_stops_on_demand() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyFuzzy> = Tree::open(&arena, &mut cursor).unwrap();

        for value in 1..=30u64 {
            tree.insert(&Key16::digest(&value.to_le_bytes()), value).unwrap();
        }

        let mut seen = Vec::new();
        tree.iterate(&mut |p| {
            seen.push(p);
            true
        })
        .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (1..=30).collect::<Vec<_>>());

        let mut stopped = 0;
        tree.iterate(&mut |_| {
            stopped += 1;
            stopped < 5
        })
        .unwrap();
        assert_eq!(stopped, 5);
    }

    #[test]
    fn iterate_kv_exposes_raw_slots() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();

        tree.insert(&key(2), 20).unwrap();
        tree.insert(&key(1), 10).unwrap();

        let mut seen = Vec::new();
        tree.iterate_kv(&mut |k, p| {
            seen.push((k.words[0], p));
            true
        })
        .unwrap();

        assert_eq!(seen, vec![(1, 10), (2, 20)]);
    }

    #[test]
    fn stalled_tree_funnels_shallow_routes_through_link_zero() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();

        // Stall every depth below 4 that is not a multiple of 2.
        let tree: Tree<_, TinyFuzzy, 2, 4> = Tree::open(&arena, &mut cursor).unwrap();

        for value in 1..=60u64 {
            tree.insert(&Key16::digest(&value.to_le_bytes()), value).unwrap();
        }

        for value in 1..=60u64 {
            assert_eq!(
                tree.find(&Key16::digest(&value.to_le_bytes())).unwrap(),
                Some(value)
            );
        }

        // Depth-1 pages hang off the root's children; their siblings at
        // link 1 stay empty while stalling.
        let root = arena.page::<TinyFuzzy>(tree.root()).unwrap();
        for index in 0..2 {
            let child = root.link(index);
            if child != 0 {
                let page = arena.page::<TinyFuzzy>(child).unwrap();
                assert_eq!(page.link(1), 0, "stalled depth fanned out");
            }
        }
    }

    #[test]
    fn locked_paths_agree_with_the_plain_ones() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyFuzzy> = Tree::open(&arena, &mut cursor).unwrap();

        for value in 1..=40u64 {
            tree.insert_lock(&Key16::digest(&value.to_le_bytes()), value).unwrap();
        }

        for value in 1..=40u64 {
            let k = Key16::digest(&value.to_le_bytes());
            assert_eq!(tree.find_lock(&k).unwrap(), Some(value));
            assert_eq!(tree.find(&k).unwrap(), Some(value));
        }
    }

    #[test]
    fn insert_lock_with_runs_under_the_page_guard() {
        let dir = tempdir().unwrap();
        let arena = arena(&dir);
        let mut cursor = UnitCursor::new();
        let tree: Tree<_, TinyList> = Tree::open(&arena, &mut cursor).unwrap();

        tree.insert_lock(&key(1), 100).unwrap();

        let previous = tree
            .insert_lock_with(&key(1), 0, |placed| {
                let old = placed.slot.get();
                placed.slot.set(old + 1);
                old
            })
            .unwrap();

        assert_eq!(previous, 100);
        assert_eq!(tree.find(&key(1)).unwrap(), Some(101));
    }
}
