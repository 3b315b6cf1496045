//! # slabtree - Embedded Memory-Mapped Index Engine
//!
//! slabtree stores index trees directly in a memory-mapped file: pages are
//! read and written in place, so there is no cache layer, no serialization
//! and no write-ahead path between the API and the bytes on disk. This
//! implementation prioritizes:
//!
//! - **Zero-copy data access**: pages and values are mmap slices, never
//!   intermediate buffers
//! - **Append-only growth**: pages never split, merge or rebalance; a full
//!   page routes to a child and stays put
//! - **Cheap concurrency**: full pages are immutable and traversed
//!   lock-free; only pages with room take a per-page guard
//!
//! ## Quick Start
//!
//! ```ignore
//! use slabtree::{Arena, Key32, OrderedListPointer, SingleMap, Tree, UnitCursor};
//!
//! let arena = Arena::open(SingleMap::open("./index.slab")?)?;
//! let mut cursor = UnitCursor::new();
//! let tree: Tree<_, OrderedListPointer> = Tree::open(&arena, &mut cursor)?;
//!
//! let key = Key32::digest(b"user:42");
//! tree.insert(&key, 99)?;
//! assert_eq!(tree.find(&key)?, Some(99));
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │        Tree engine (walk, locks)          │   tree
//! ├───────────────────────────────────────────┤
//! │  ListPage │ MultiListPage │ FuzzyPage     │   page
//! ├───────────────────────────────────────────┤
//! │   Arena (units, recycling, descriptors)   │   arena
//! ├───────────────────────────────────────────┤
//! │  SingleMap │ SegmentedMap │ MemoryStore   │   store
//! └───────────────────────────────────────────┘
//! ```
//!
//! The store maps file bytes; the arena carves them into 64 KiB units and
//! recycles freed ones; a page is a typed view of a unit span; the tree
//! walks pages by child links. Several tables share one file by claiming
//! root units through a [`UnitCursor`] in a fixed order.
//!
//! ## Module Overview
//!
//! - [`store`]: memory-mapped backing stores
//! - [`arena`]: unit allocation, recycling, table descriptors
//! - [`keys`]: direct and surrogate key types
//! - [`page`]: the three page layouts
//! - [`tree`]: the generic walking engine

pub mod arena;
pub mod config;
pub mod keys;
pub mod page;
pub mod store;
pub mod tree;

pub use arena::{Arena, Descriptor, KeyClass, KeyMode, ReservedUnits, TableKind, UnitCursor};
pub use keys::{
    IndexKey, Key16, Key24, Key32, Key64, KeyContext, KeyPointer, SurrogateBytes, SurrogateKey32,
};
pub use page::{
    BigFuzzyPointer, FindStep, FuzzyPage, FuzzyPointer, IndexPage, ListPage, MultiListPage,
    MultiListPointer, MultiPage, OrderedListPointer, OrderedPairList, PageStep, RangePage,
    SlotRef, SurrogateKeyList, SurrogateList, SurrogateMultiList,
};
pub use store::{MemoryStore, SegmentedMap, SingleMap, Store};
pub use tree::{Placed, Tree};
