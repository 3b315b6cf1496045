//! # Index Page Layouts
//!
//! A page is one tree node, sized to exactly one (or a whole number of)
//! arena units so that unit index and node identity coincide. Three layouts
//! share a common shape:
//!
//! ```text
//! +--------------------------+
//! |  keys      [K; BINS]     |
//! |  pointers  [u64; BINS]   |
//! |  links     [u64; LINKS]  |
//! |  count     u64           |
//! |  checksum  u64           |
//! |  guard     u64           |
//! |  padding   [u8; PAD]     |
//! +--------------------------+  == unit size, checked at compile time
//! ```
//!
//! - [`ListPage`]: ordered, unique keys; binary search; in-place shift on
//!   insert.
//! - [`MultiListPage`]: ordered, duplicate keys allowed; equal keys are
//!   adjacent.
//! - [`FuzzyPage`]: direct-addressed hashmap with a bounded probe window
//!   and no shifting, the concurrency-friendly layout.
//!
//! `BINS` and `PAD` are derived from the unit size by [`page_bins`] /
//! [`page_pad`], never hand-placed.
//!
//! ## Routing
//!
//! When a page cannot resolve an operation locally it routes to one of its
//! `LINKS` children by scaling the decision position:
//! `clamped(pos) * LINKS / BINS`. Keys are not moved down; a full page is
//! immutable except for its links.
//!
//! ## Locking
//!
//! The guard word doubles as a spinlock: compare-exchange the magic to 0 to
//! acquire (retrying on a fixed delay), store the magic back to release. A
//! page is lockable only while it is not full: once `count == BINS` the
//! slots are immutable and readers need no lock; link mutation re-acquires
//! the lock regardless. Readers of a freshly inserted slot poll it until
//! non-zero ([`SlotRef::wait_nonzero`]), which is the commit protocol.

mod fuzzy;
mod list;
mod multi;

pub use fuzzy::FuzzyPage;
pub use list::ListPage;
pub use multi::MultiListPage;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::arena::TableKind;
use crate::config::{
    BIG_UNIT_SIZE, DEFAULT_FUZZ, DEFAULT_LINKS, GUARD_MAGIC, LOCK_RETRY_DELAY, UNIT_SIZE,
};
use crate::keys::{IndexKey, Key32, KeyContext, KeyPointer, SurrogateBytes, SurrogateKey32};

/// Slots a page of `page` bytes holds for a `key`-byte key, a u64 pointer
/// per slot, `links` u64 children and the three u64 tail words.
pub const fn page_bins(page: usize, key: usize, links: usize) -> usize {
    (page - 8 * 3 - 8 * links) / (key + 8)
}

/// Padding bytes left over by the same division.
pub const fn page_pad(page: usize, key: usize, links: usize) -> usize {
    (page - 8 * 3 - 8 * links) % (key + 8)
}

/// Scale a slot position to a child link index, clamping the two positions
/// that fall off the slot range.
pub(crate) fn route_link(position: i64, bins: usize, links: usize) -> usize {
    let mut pos = position;
    if pos == bins as i64 {
        pos -= 1;
    } else if pos == -1 {
        pos += 1;
    }
    (pos as usize * links) / bins
}

/// Outcome of a page-level insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStep {
    /// The key lives in this page at `slot`. On `overwrite` the existing
    /// pointer was left untouched for the caller to inspect or update.
    Stored { slot: usize, overwrite: bool },
    /// The page is full here; continue at the child behind this link.
    Route(usize),
}

/// Outcome of a page-level search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindStep {
    Hit(usize),
    Miss,
    Route(usize),
}

/// A live pointer slot. Copyable; the underlying word is atomic.
#[derive(Clone, Copy)]
pub struct SlotRef<'a> {
    cell: &'a AtomicU64,
}

impl<'a> SlotRef<'a> {
    pub(crate) fn new(cell: &'a AtomicU64) -> Self {
        Self { cell }
    }

    pub fn get(&self) -> u64 {
        self.cell.load(Ordering::Acquire)
    }

    pub fn set(&self, value: u64) {
        self.cell.store(value, Ordering::Release)
    }

    /// Poll the slot until a writer commits it. Slot commit is a single
    /// aligned store, so the first non-zero value observed is complete.
    pub fn wait_nonzero(&self) -> u64 {
        loop {
            let value = self.get();
            if value != 0 {
                return value;
            }
            std::thread::sleep(LOCK_RETRY_DELAY);
        }
    }
}

/// Acquire a page guard word: CAS magic -> 0, fixed-delay retry.
pub(crate) fn guard_lock(guard: &AtomicU64) {
    while guard
        .compare_exchange_weak(GUARD_MAGIC, 0, Ordering::Acquire, Ordering::Relaxed)
        .is_err()
    {
        std::thread::sleep(LOCK_RETRY_DELAY);
    }
}

/// Release a page guard word.
pub(crate) fn guard_unlock(guard: &AtomicU64) {
    guard.store(GUARD_MAGIC, Ordering::Release);
}

/// A guard word is sane when it holds the magic or the locked marker.
pub(crate) fn guard_sane(guard: &AtomicU64) -> bool {
    let value = guard.load(Ordering::Acquire);
    value == GUARD_MAGIC || value == 0
}

/// One tree node: the operations the walking engine needs, identical
/// across the three layouts.
pub trait IndexPage {
    type Key: IndexKey;

    const BINS: usize;
    const LINKS: usize;
    const KIND: TableKind;

    /// Prepare a freshly allocated (zero-filled) span as an empty page.
    fn init(&self);

    fn count(&self) -> u64;
    fn link(&self, index: usize) -> u64;
    fn set_link(&self, index: usize, unit: u64);

    fn lock(&self);
    fn unlock(&self);

    fn key_at(&self, slot: usize) -> Self::Key;
    fn pointer_at(&self, slot: usize) -> u64;
    fn slot(&self, slot: usize) -> SlotRef<'_>;

    /// Place or locate `key` in this page, or route to a child.
    fn insert(
        &self,
        key: &Self::Key,
        pointer: u64,
        depth: usize,
        ctx: &dyn KeyContext,
    ) -> PageStep;

    fn find(
        &self,
        key: &Self::Key,
        depth: usize,
        ctx: &dyn KeyContext,
        staged: Option<&[u8]>,
    ) -> FindStep;

    /// Structural self-check; with the `validation` feature also verifies
    /// the key checksum.
    fn validate(&self) -> bool;
}

/// Ordered layouts that allow duplicate keys.
pub trait MultiPage: IndexPage {
    /// Call `visit` with every local match, then report whether a child
    /// could hold more.
    fn multi_find(
        &self,
        key: &Self::Key,
        depth: usize,
        ctx: &dyn KeyContext,
        staged: Option<&[u8]>,
        visit: &mut dyn FnMut(u64),
    ) -> FindStep;
}

/// Ordered layouts supporting inclusive range scans.
pub trait RangePage: IndexPage {
    /// Call `visit` with every local slot in `[low, high]` and return the
    /// inclusive child-link span that could hold more, or `None` when this
    /// page is not full.
    fn find_range(
        &self,
        low: &Self::Key,
        high: &Self::Key,
        ctx: &dyn KeyContext,
        staged: Option<&[u8]>,
        visit: &mut dyn FnMut(u64),
    ) -> Option<(usize, usize)>;
}

// Standard instantiations. Every alias must tile its unit exactly; the
// assertions below are the check.

/// Ordered unique Key32 -> u64, one unit.
pub type OrderedListPointer = ListPage<
    Key32,
    { page_bins(UNIT_SIZE, 32, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    { page_pad(UNIT_SIZE, 32, DEFAULT_LINKS) },
>;

/// Ordered Key32 -> u64 with duplicates, one unit.
pub type MultiListPointer = MultiListPage<
    Key32,
    { page_bins(UNIT_SIZE, 32, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    { page_pad(UNIT_SIZE, 32, DEFAULT_LINKS) },
>;

/// Fuzzy hashmap Key32 -> u64, one unit.
pub type FuzzyPointer = FuzzyPage<
    Key32,
    { page_bins(UNIT_SIZE, 32, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    DEFAULT_FUZZ,
    { page_pad(UNIT_SIZE, 32, DEFAULT_LINKS) },
>;

/// Fuzzy hashmap Key32 -> u64 over the large unit.
pub type BigFuzzyPointer = FuzzyPage<
    Key32,
    { page_bins(BIG_UNIT_SIZE, 32, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    DEFAULT_FUZZ,
    { page_pad(BIG_UNIT_SIZE, 32, DEFAULT_LINKS) },
>;

/// Ordered unique surrogate byte-string keys -> u64, one unit.
pub type SurrogateList = ListPage<
    SurrogateBytes,
    { page_bins(UNIT_SIZE, 8, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    { page_pad(UNIT_SIZE, 8, DEFAULT_LINKS) },
>;

/// Ordered surrogate byte-string keys with duplicates -> u64, one unit.
pub type SurrogateMultiList = MultiListPage<
    SurrogateBytes,
    { page_bins(UNIT_SIZE, 8, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    { page_pad(UNIT_SIZE, 8, DEFAULT_LINKS) },
>;

/// Ordered unique out-of-line Key32 -> u64, one unit.
pub type SurrogateKeyList = ListPage<
    SurrogateKey32,
    { page_bins(UNIT_SIZE, 8, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    { page_pad(UNIT_SIZE, 8, DEFAULT_LINKS) },
>;

/// Ordered unique keys with an embedded pointer payload, one unit.
pub type OrderedPairList = ListPage<
    KeyPointer,
    { page_bins(UNIT_SIZE, 32, DEFAULT_LINKS) },
    DEFAULT_LINKS,
    { page_pad(UNIT_SIZE, 32, DEFAULT_LINKS) },
>;

const _: () = assert!(std::mem::size_of::<OrderedListPointer>() == UNIT_SIZE);
const _: () = assert!(std::mem::size_of::<MultiListPointer>() == UNIT_SIZE);
const _: () = assert!(std::mem::size_of::<FuzzyPointer>() == UNIT_SIZE);
const _: () = assert!(std::mem::size_of::<BigFuzzyPointer>() == BIG_UNIT_SIZE);
const _: () = assert!(std::mem::size_of::<SurrogateList>() == UNIT_SIZE);
const _: () = assert!(std::mem::size_of::<SurrogateMultiList>() == UNIT_SIZE);
const _: () = assert!(std::mem::size_of::<SurrogateKeyList>() == UNIT_SIZE);
const _: () = assert!(std::mem::size_of::<OrderedPairList>() == UNIT_SIZE);
