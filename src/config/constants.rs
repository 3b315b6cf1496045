//! # Engine Constants
//!
//! This module centralizes the layout and protocol constants, grouping
//! interdependent values together and documenting their relationships.
//!
//! ## Dependency Graph
//!
//! ```text
//! UNIT_SIZE (65536 bytes)
//!       │
//!       ├─> BIG_UNIT_SIZE (4 * UNIT_SIZE, multi-unit page layouts)
//!       │
//!       ├─> DEFAULT_GROW_SIZE (must be a multiple of UNIT_SIZE so that
//!       │     segment boundaries in a segmented store land on unit
//!       │     boundaries; a straddling allocation skips whole units)
//!       │
//!       └─> ARENA_HEADER_SIZE + MAX_DESCRIPTORS * DESCRIPTOR_SIZE
//!             (must fit in unit 0)
//!
//! STORE_HEADER_SIZE (64 bytes)
//!       │
//!       └─> precedes the data region of every store; data offsets are
//!           relative to it, so offset 0 is the arena header, never a value
//! ```
//!
//! ## Critical Invariants
//!
//! Enforced by the compile-time assertions at the bottom of this file:
//!
//! 1. `DEFAULT_GROW_SIZE % UNIT_SIZE == 0` (unit-aligned segment boundaries)
//! 2. `BIG_UNIT_SIZE % UNIT_SIZE == 0` (multi-unit pages span whole units)
//! 3. The arena header plus the descriptor table fits in unit 0

use std::time::Duration;

/// Allocation unit of the arena. Every page layout is exactly one or more
/// units, and unit index * UNIT_SIZE is the unit's data offset.
pub const UNIT_SIZE: usize = 64 * 1024;

/// Page size for the large fuzzy-map layout.
pub const BIG_UNIT_SIZE: usize = 4 * UNIT_SIZE;

/// Bytes of store header preceding the data region. Data offsets exclude it.
pub const STORE_HEADER_SIZE: usize = 64;

/// Increment by which a backing store grows its physical capacity.
pub const DEFAULT_GROW_SIZE: u64 = 1024 * 1024;

/// Fixed capacity of the segmented store's mapping table. Each grow appends
/// one segment, so this bounds total capacity at
/// `MAX_SEGMENTS * DEFAULT_GROW_SIZE` for the default configuration.
pub const MAX_SEGMENTS: usize = 64;

/// Size of the arena header at the front of unit 0.
pub const ARENA_HEADER_SIZE: usize = 64;

/// Number of table descriptors stored in unit 0 after the arena header.
pub const MAX_DESCRIPTORS: usize = 64;

/// On-disk size of one table descriptor.
pub const DESCRIPTOR_SIZE: usize = 64;

/// Guard word value of an unlocked page. A CAS to 0 acquires the page lock;
/// storing the magic back releases it.
pub const GUARD_MAGIC: u64 = 0xfe34_51dc_eabc_45af;

/// Fixed delay between page-lock acquisition attempts and slot-commit polls.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Terminator of the intrusive unit free list.
pub const FREE_NULL: u64 = u64::MAX;

/// Sentinel pointer marking an unoccupied fuzzy-map slot.
pub const FUZZY_EMPTY: u64 = u64::MAX;

/// Default probe-window width of the fuzzy hashmap layouts.
pub const DEFAULT_FUZZ: usize = 4;

/// Default child-link count of the page layouts.
pub const DEFAULT_LINKS: usize = 4;

const _: () = assert!(
    DEFAULT_GROW_SIZE % UNIT_SIZE as u64 == 0,
    "grow increments must be unit aligned or segment gaps would not be whole units"
);

const _: () = assert!(
    BIG_UNIT_SIZE % UNIT_SIZE == 0,
    "multi-unit page layouts must span whole units"
);

const _: () = assert!(
    ARENA_HEADER_SIZE + MAX_DESCRIPTORS * DESCRIPTOR_SIZE <= UNIT_SIZE,
    "arena header and descriptor table must fit in unit 0"
);
