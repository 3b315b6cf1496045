//! Ordered page that admits duplicate keys. Equal keys occupy adjacent
//! slots; a full page routes duplicates from the lower bound of their run
//! so every copy stays reachable on one descent path.

use crate::arena::TableKind;
use crate::keys::{IndexKey, KeyContext};

use super::{route_link, FindStep, IndexPage, ListPage, MultiPage, PageStep, RangePage, SlotRef};

#[repr(transparent)]
pub struct MultiListPage<K, const BINS: usize, const LINKS: usize, const PAD: usize>(
    ListPage<K, BINS, LINKS, PAD>,
);

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const PAD: usize> IndexPage
    for MultiListPage<K, BINS, LINKS, PAD>
{
    type Key = K;

    const BINS: usize = BINS;
    const LINKS: usize = LINKS;
    const KIND: TableKind = TableKind::SortedMultiList;

    fn init(&self) {
        self.0.init()
    }

    fn count(&self) -> u64 {
        self.0.count()
    }

    fn link(&self, index: usize) -> u64 {
        self.0.link(index)
    }

    fn set_link(&self, index: usize, unit: u64) {
        self.0.set_link(index, unit)
    }

    fn lock(&self) {
        self.0.lock()
    }

    fn unlock(&self) {
        self.0.unlock()
    }

    fn key_at(&self, slot: usize) -> K {
        self.0.key_at(slot)
    }

    fn pointer_at(&self, slot: usize) -> u64 {
        self.0.pointer_at(slot)
    }

    fn slot(&self, slot: usize) -> SlotRef<'_> {
        self.0.slot(slot)
    }

    fn insert(&self, key: &K, pointer: u64, _depth: usize, ctx: &dyn KeyContext) -> PageStep {
        let count = self.0.count() as usize;

        if count == 0 {
            self.0.write_key(0, *key);
            self.0.note_key(key);
            self.0.slot(0).set(pointer);
            self.0.bump_count();
            return PageStep::Stored {
                slot: 0,
                overwrite: false,
            };
        }

        match self.0.search(key, ctx, None) {
            Ok(mut middle) => {
                if count == BINS {
                    // Route every duplicate from the lower bound of its run
                    // so all copies share one descent path.
                    while middle > 0 && self.0.read_key(middle - 1).equal(key, ctx, None) {
                        middle -= 1;
                    }
                    return PageStep::Route(route_link(middle as i64, BINS, LINKS));
                }

                self.0.expand(middle);
                self.0.write_key(middle, *key);
                self.0.note_key(key);
                self.0.slot(middle).set(pointer);
                PageStep::Stored {
                    slot: middle,
                    overwrite: false,
                }
            }
            Err(position) => {
                if count == BINS {
                    return PageStep::Route(route_link(position, BINS, LINKS));
                }

                self.0.expand(position as usize);
                self.0.write_key(position as usize, *key);
                self.0.note_key(key);
                self.0.slot(position as usize).set(pointer);
                PageStep::Stored {
                    slot: position as usize,
                    overwrite: false,
                }
            }
        }
    }

    fn find(&self, key: &K, depth: usize, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> FindStep {
        self.0.find(key, depth, ctx, staged)
    }

    fn validate(&self) -> bool {
        self.0.validate()
    }
}

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const PAD: usize> MultiPage
    for MultiListPage<K, BINS, LINKS, PAD>
{
    fn multi_find(
        &self,
        key: &K,
        _depth: usize,
        ctx: &dyn KeyContext,
        staged: Option<&[u8]>,
        visit: &mut dyn FnMut(u64),
    ) -> FindStep {
        let count = self.0.count() as usize;
        if count == 0 {
            return FindStep::Miss;
        }

        match self.0.search(key, ctx, staged) {
            Ok(middle) => {
                visit(self.0.pointer_at(middle));

                let mut upper = middle;
                while upper + 1 < count && self.0.read_key(upper + 1).equal(key, ctx, staged) {
                    upper += 1;
                    visit(self.0.pointer_at(upper));
                }

                let mut lower = middle;
                while lower > 0 && self.0.read_key(lower - 1).equal(key, ctx, staged) {
                    lower -= 1;
                    visit(self.0.pointer_at(lower));
                }

                if count == BINS {
                    // More duplicates may have routed below the run's lower
                    // bound.
                    FindStep::Route(route_link(lower as i64, BINS, LINKS))
                } else {
                    FindStep::Miss
                }
            }
            Err(position) if count == BINS => {
                FindStep::Route(route_link(position, BINS, LINKS))
            }
            Err(_) => FindStep::Miss,
        }
    }
}

impl<K: IndexKey, const BINS: usize, const LINKS: usize, const PAD: usize> RangePage
    for MultiListPage<K, BINS, LINKS, PAD>
{
    fn find_range(
        &self,
        low: &K,
        high: &K,
        ctx: &dyn KeyContext,
        staged: Option<&[u8]>,
        visit: &mut dyn FnMut(u64),
    ) -> Option<(usize, usize)> {
        self.0.find_range(low, high, ctx, staged, visit)
    }
}
