//! # Key Model
//!
//! Keys are fixed-size plain-old-data values compared word-wise, so the
//! page layouts can hold them inline and compare without deserializing.
//!
//! Two families:
//!
//! - **Direct keys** ([`Key16`]/[`Key24`]/[`Key32`]/[`Key64`]): the key's
//!   u64 words are the payload. Digest constructors derive uniformly
//!   distributed keys from arbitrary bytes, which is what the fuzzy map
//!   layout requires.
//! - **Surrogate keys** ([`SurrogateBytes`]/[`SurrogateKey32`]): the key
//!   holds only an arena offset; comparison resolves the payload through a
//!   [`KeyContext`]. An offset of 0 marks a probe key whose payload is not
//!   committed yet: its bytes come from a caller-supplied staged buffer.
//!   Offset 0 can never be a committed payload because unit 0 holds the
//!   arena header.
//!
//! Comparison is always `slot_key.compare(probe_key)`: `Less` means the
//! slot sorts before the probe.

use std::cmp::Ordering;

use xxhash_rust::xxh64::xxh64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::arena::{KeyClass, KeyMode};

/// Resolves committed payload offsets for surrogate keys. Implemented by
/// the arena; returns `None` for an unmapped offset, which comparison
/// treats as an empty payload rather than a wild dereference.
pub trait KeyContext {
    fn object(&self, offset: u64) -> Option<*const u8>;
}

/// A key the page layouts can store and order.
pub trait IndexKey: Copy {
    const MODE: KeyMode;
    const CLASS: KeyClass;

    /// Three-way compare of `self` (a stored slot) against `probe`.
    /// `staged` supplies the probe's payload when the probe is an
    /// uncommitted surrogate; direct keys ignore both arguments.
    fn compare(&self, probe: &Self, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> Ordering;

    fn equal(&self, probe: &Self, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> bool {
        self.compare(probe, ctx, staged) == Ordering::Equal
    }

    /// 16-bit slice of the key's bytes, used by the fuzzy layout to pick a
    /// bin. `index` is taken modulo the number of slices by the caller.
    fn slice16(&self, index: usize) -> u16;

    /// XOR fold of the key's words, accumulated into the page checksum.
    fn checksum_word(&self) -> u64;
}

/// Word-wise lexicographic compare in declaration order.
fn compare_words(a: &[u64], b: &[u64]) -> Ordering {
    for (l, r) in a.iter().zip(b.iter()) {
        match l.cmp(r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

macro_rules! direct_key {
    ($(#[$meta:meta])* $name:ident, $words:expr) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Default, Hash,
            FromBytes, IntoBytes, Immutable, KnownLayout,
        )]
        #[repr(C)]
        pub struct $name {
            pub words: [u64; $words],
        }

        impl $name {
            pub const SIZE: usize = $words * 8;

            pub fn new(words: [u64; $words]) -> Self {
                Self { words }
            }

            /// Derive a uniformly distributed key from arbitrary bytes.
            /// Each word is an independently seeded 64-bit digest.
            pub fn digest(bytes: &[u8]) -> Self {
                let mut words = [0u64; $words];
                for (seed, word) in words.iter_mut().enumerate() {
                    *word = xxh64(bytes, seed as u64);
                }
                Self { words }
            }

            pub fn is_zero(&self) -> bool {
                self.words.iter().all(|w| *w == 0)
            }
        }

        impl IndexKey for $name {
            const MODE: KeyMode = KeyMode::Direct;
            const CLASS: KeyClass = KeyClass::Distributed;

            fn compare(
                &self,
                probe: &Self,
                _ctx: &dyn KeyContext,
                _staged: Option<&[u8]>,
            ) -> Ordering {
                compare_words(&self.words, &probe.words)
            }

            fn slice16(&self, index: usize) -> u16 {
                let word = self.words[(index / 4) % $words];
                (word >> ((index % 4) * 16)) as u16
            }

            fn checksum_word(&self) -> u64 {
                self.words.iter().fold(0, |acc, w| acc ^ w)
            }
        }
    };
}

direct_key!(
    /// 16-byte direct key.
    Key16, 2
);
direct_key!(
    /// 24-byte direct key.
    Key24, 3
);
direct_key!(
    /// 32-byte direct key, the workhorse of the standard page layouts.
    Key32, 4
);
direct_key!(
    /// 64-byte direct key.
    Key64, 8
);

/// A key carrying an embedded pointer payload alongside its words, for
/// layouts that want a second value channel without widening the slot
/// pointer. Orders by the key part only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct KeyPointer {
    pub key: Key24,
    pub pointer: u64,
}

impl KeyPointer {
    pub fn new(key: Key24, pointer: u64) -> Self {
        Self { key, pointer }
    }
}

impl IndexKey for KeyPointer {
    const MODE: KeyMode = KeyMode::Direct;
    const CLASS: KeyClass = KeyClass::Distributed;

    fn compare(&self, probe: &Self, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> Ordering {
        self.key.compare(&probe.key, ctx, staged)
    }

    fn slice16(&self, index: usize) -> u16 {
        self.key.slice16(index)
    }

    fn checksum_word(&self) -> u64 {
        self.key.checksum_word()
    }
}

/// Resolve a surrogate payload: committed offsets through the context, the
/// uncommitted probe (offset 0) from the staged buffer.
fn surrogate_payload<'a>(
    offset: u64,
    ctx: &dyn KeyContext,
    staged: Option<&'a [u8]>,
) -> &'a [u8] {
    if offset == 0 {
        return staged.unwrap_or(&[]);
    }

    match ctx.object(offset) {
        // SAFETY: committed offsets come from set_object, which wrote a u32
        // length prefix followed by that many payload bytes; the mapping
        // backing them is never unmapped while the context is alive.
        Some(ptr) => unsafe {
            let len = (ptr as *const u32).read_unaligned() as usize;
            std::slice::from_raw_parts(ptr.add(4), len)
        },
        None => &[],
    }
}

/// Surrogate key over a length-prefixed byte payload; orders by the
/// payload bytes. The inline footprint is one offset word, so arbitrarily
/// long keys fit the fixed page layouts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct SurrogateBytes {
    pub offset: u64,
}

impl SurrogateBytes {
    pub fn committed(offset: u64) -> Self {
        Self { offset }
    }

    /// A probe key whose payload is supplied out of band via the staged
    /// buffer argument of the search operations.
    pub fn staged() -> Self {
        Self { offset: 0 }
    }
}

impl IndexKey for SurrogateBytes {
    const MODE: KeyMode = KeyMode::Surrogate;
    const CLASS: KeyClass = KeyClass::Mixed;

    fn compare(&self, probe: &Self, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> Ordering {
        let own = surrogate_payload(self.offset, ctx, None);
        let other = surrogate_payload(probe.offset, ctx, staged);
        own.cmp(other)
    }

    fn slice16(&self, index: usize) -> u16 {
        let word = self.offset;
        (word >> ((index % 4) * 16)) as u16
    }

    fn checksum_word(&self) -> u64 {
        self.offset
    }
}

/// Surrogate key over an out-of-line [`Key32`]; orders like the resolved
/// key. Used when the same 32-byte key is shared by several indexes and
/// worth storing once.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
#[repr(C)]
pub struct SurrogateKey32 {
    pub offset: u64,
}

impl SurrogateKey32 {
    pub fn committed(offset: u64) -> Self {
        Self { offset }
    }

    pub fn staged() -> Self {
        Self { offset: 0 }
    }

    fn resolve(offset: u64, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> Key32 {
        let payload = surrogate_payload(offset, ctx, staged);
        let mut words = [0u64; 4];
        for (i, chunk) in payload.chunks_exact(8).take(4).enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            words[i] = u64::from_le_bytes(buf);
        }
        Key32::new(words)
    }
}

impl IndexKey for SurrogateKey32 {
    const MODE: KeyMode = KeyMode::Surrogate;
    const CLASS: KeyClass = KeyClass::Distributed;

    fn compare(&self, probe: &Self, ctx: &dyn KeyContext, staged: Option<&[u8]>) -> Ordering {
        let own = Self::resolve(self.offset, ctx, None);
        let other = Self::resolve(probe.offset, ctx, staged);
        compare_words(&own.words, &other.words)
    }

    fn slice16(&self, index: usize) -> u16 {
        (self.offset >> ((index % 4) * 16)) as u16
    }

    fn checksum_word(&self) -> u64 {
        self.offset
    }
}
