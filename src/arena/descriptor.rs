//! # Table Descriptors
//!
//! Unit 0 carries a fixed table of 64-byte descriptors, one per table root.
//! A descriptor is written once, at first open of its table, and records the
//! shape of the index rooted at that unit: layout kind, key geometry, page
//! capacity. It exists for introspection and forward compatibility (a tool
//! can describe a store file without knowing the types it was built with)
//! and is never consulted on the hot path.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::DESCRIPTOR_SIZE;

/// Page layout rooted at a descriptor's unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TableKind {
    Undefined = 0,
    SortedList = 1,
    SortedMultiList = 2,
    FuzzyMap = 3,
}

impl TableKind {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::SortedList,
            2 => Self::SortedMultiList,
            3 => Self::FuzzyMap,
            _ => Self::Undefined,
        }
    }
}

/// How a key's payload is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyMode {
    Undefined = 0,
    /// The key's words are the payload.
    Direct = 1,
    /// The key holds an offset; the payload lives in the arena.
    Surrogate = 2,
}

impl KeyMode {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Direct,
            2 => Self::Surrogate,
            _ => Self::Undefined,
        }
    }
}

/// Distribution class of a key, which decides the layouts it suits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyClass {
    Undefined = 0,
    /// Uniformly distributed (digest-derived); required by the fuzzy map.
    Distributed = 1,
    Sequential = 2,
    Mixed = 3,
}

impl KeyClass {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Distributed,
            2 => Self::Sequential,
            3 => Self::Mixed,
            _ => Self::Undefined,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Descriptor {
    pub kind: u32,
    pub self_balanced: u32,
    pub distributed_key: u32,
    pub key_size: u32,
    pub pointer_size: u32,
    pub link_size: u32,
    pub link_count: u32,
    pub max_capacity: u32,
    pub min_capacity: u32,
    pub max_page: u32,
    pub min_page: u32,
    pub key_mode: u8,
    pub key_class: u8,
    _pad: [u8; 2],
    _reserved: [u64; 2],
}

const _: () = assert!(std::mem::size_of::<Descriptor>() == DESCRIPTOR_SIZE);

impl Descriptor {
    /// Descriptor for an index table. Pointer and link words are u64 in
    /// every current layout; the minimum bounds are unused and left at max.
    pub fn for_index(
        kind: TableKind,
        key_mode: KeyMode,
        key_class: KeyClass,
        key_size: u32,
        link_count: u32,
        max_capacity: u32,
        max_page: u32,
    ) -> Self {
        Self {
            kind: kind as u32,
            self_balanced: 0,
            distributed_key: (kind == TableKind::FuzzyMap) as u32,
            key_size,
            pointer_size: 8,
            link_size: 8,
            link_count,
            max_capacity,
            min_capacity: u32::MAX,
            max_page,
            min_page: u32::MAX,
            key_mode: key_mode as u8,
            key_class: key_class as u8,
            _pad: [0; 2],
            _reserved: [0; 2],
        }
    }

    pub fn kind(&self) -> TableKind {
        TableKind::from_raw(self.kind)
    }

    pub fn is_written(&self) -> bool {
        self.kind != 0
    }

    /// Human-readable dump of one descriptor.
    pub fn describe(&self) -> String {
        let mut out = String::new();

        match self.kind() {
            TableKind::Undefined => out.push_str("Type: Unknown\n"),
            TableKind::SortedList => out.push_str("Type: Sorted List\n"),
            TableKind::SortedMultiList => out.push_str("Type: Sorted Multilist\n"),
            TableKind::FuzzyMap => out.push_str("Type: Fuzzy Hashmap\n"),
        }

        out.push_str(&format!(
            "Self Balanced: {}\n",
            if self.self_balanced != 0 { "True" } else { "False" }
        ));
        out.push_str(&format!(
            "Distributed Key: {}\n",
            if self.distributed_key != 0 { "True" } else { "False" }
        ));

        out.push_str(&format!("Key Size: {}\n", self.key_size));
        out.push_str(&format!("Pointer Size: {}\n", self.pointer_size));
        out.push_str(&format!("Link Size: {}\n", self.link_size));
        out.push_str(&format!("Link Count: {}\n", self.link_count));

        out.push_str(&format!("Max Capacity: {}\n", self.max_capacity));
        out.push_str(&format!("Max Page: {}\n", self.max_page));

        match KeyMode::from_raw(self.key_mode) {
            KeyMode::Undefined => out.push_str("Key Mode: Unknown\n"),
            KeyMode::Direct => out.push_str("Key Mode: Literal\n"),
            KeyMode::Surrogate => out.push_str("Key Mode: Surrogate\n"),
        }

        match KeyClass::from_raw(self.key_class) {
            KeyClass::Undefined => out.push_str("Key Class: Unknown\n"),
            KeyClass::Distributed => out.push_str("Key Class: Distributed\n"),
            KeyClass::Sequential => out.push_str("Key Class: Sequential\n"),
            KeyClass::Mixed => out.push_str("Key Class: Mixed\n"),
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_is_exactly_one_slot() {
        assert_eq!(std::mem::size_of::<Descriptor>(), DESCRIPTOR_SIZE);
    }

    #[test]
    fn zeroed_descriptor_is_unwritten() {
        let desc = Descriptor::default();

        assert!(!desc.is_written());
        assert_eq!(desc.kind(), TableKind::Undefined);
    }

    #[test]
    fn describe_names_the_layout() {
        let desc = Descriptor {
            kind: TableKind::FuzzyMap as u32,
            distributed_key: 1,
            key_size: 32,
            pointer_size: 8,
            link_size: 8,
            link_count: 4,
            max_capacity: 1637,
            max_page: 65536,
            key_mode: KeyMode::Direct as u8,
            key_class: KeyClass::Distributed as u8,
            ..Default::default()
        };

        let text = desc.describe();
        assert!(text.contains("Type: Fuzzy Hashmap"));
        assert!(text.contains("Key Size: 32"));
        assert!(text.contains("Key Class: Distributed"));
    }
}
