//! # Single-Mapping Store
//!
//! `SingleMap` keeps the whole file under one contiguous mapping. Growing
//! past the mapped capacity unmaps and remaps the file, which moves the base
//! address and invalidates every pointer previously resolved through
//! `offset()`.
//!
//! That makes this variant strictly single-writer, single-thread: the caller
//! must not hold resolved pointers across any call that can grow the store.
//! This is a documented precondition, not a runtime check; the engine's walk
//! re-resolves its current page after every child allocation for exactly
//! this reason. Concurrent access goes through [`SegmentedMap`] instead.
//!
//! The type is `!Sync` by construction (the mapping lives in a `RefCell`),
//! so the compiler already rejects sharing it across threads.
//!
//! [`SegmentedMap`]: super::SegmentedMap

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use eyre::{ensure, Result, WrapErr};
use memmap2::MmapMut;
use tracing::{debug, trace};
use zerocopy::IntoBytes;

use super::{
    header_word, set_header_word, Store, StoreHeader, HEADER_SIZE_WORD, HEADER_VERSION_WORD,
};
use crate::config::{DEFAULT_GROW_SIZE, STORE_HEADER_SIZE};

pub struct SingleMap {
    file: File,
    map: RefCell<MmapMut>,
    path: PathBuf,
    grow_size: u64,
}

impl SingleMap {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, DEFAULT_GROW_SIZE)
    }

    /// Open (creating if absent) with an explicit grow increment.
    pub fn open_with<P: AsRef<Path>>(path: P, grow_size: u64) -> Result<Self> {
        let path = path.as_ref();
        ensure!(grow_size > 0, "grow size must be non-zero");

        let fresh = !path.exists();
        if fresh {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).wrap_err_with(|| {
                        format!("failed to create parent directories for '{}'", path.display())
                    })?;
                }
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open store file '{}'", path.display()))?;

        let len = file
            .metadata()
            .wrap_err_with(|| format!("failed to get metadata for '{}'", path.display()))?
            .len();

        if len < (STORE_HEADER_SIZE as u64 + grow_size) {
            file.set_len(STORE_HEADER_SIZE as u64 + grow_size)
                .wrap_err_with(|| format!("failed to size store file '{}'", path.display()))?;
        }

        // SAFETY: MmapMut::map_mut is unsafe because the file could be
        // modified externally. This is safe because:
        // 1. The store file is owned by this process for its lifetime
        // 2. The mapping is replaced, never leaked, on every grow
        // 3. All access goes through offset()/try_offset() which bounds-check
        let map = unsafe {
            MmapMut::map_mut(&file)
                .wrap_err_with(|| format!("failed to memory-map '{}'", path.display()))?
        };

        let store = Self {
            file,
            map: RefCell::new(map),
            path: path.to_path_buf(),
            grow_size,
        };

        if fresh || len < STORE_HEADER_SIZE as u64 {
            let header = StoreHeader::new();
            store.map.borrow_mut()[..STORE_HEADER_SIZE].copy_from_slice(header.as_bytes());
            debug!(path = %store.path.display(), "created store");
        } else {
            debug!(path = %store.path.display(), size = store.size(), "opened store");
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn base(&self) -> *mut u8 {
        self.map.borrow().as_ptr() as *mut u8
    }

    fn mapped_len(&self) -> u64 {
        self.map.borrow().len() as u64
    }
}

impl Store for SingleMap {
    fn size(&self) -> u64 {
        header_word(self.base(), HEADER_SIZE_WORD)
    }

    fn resize(&self, target: u64) -> Result<()> {
        let need = target + STORE_HEADER_SIZE as u64;
        let mapped = self.mapped_len();
        if need >= mapped {
            let growth = (need - mapped).max(self.grow_size);
            let new_len = mapped + growth;

            let mut map = self.map.borrow_mut();
            map.flush().wrap_err("failed to flush mapping before grow")?;

            self.file.set_len(new_len).wrap_err_with(|| {
                format!("failed to extend '{}' to {} bytes", self.path.display(), new_len)
            })?;

            // SAFETY: remapping invalidates the old base address. This is
            // safe because:
            // 1. The old mapping is dropped by the assignment below
            // 2. Pointer stability across resize is a documented caller
            //    precondition of this store variant
            // 3. The file was extended to new_len before remapping
            *map = unsafe {
                MmapMut::map_mut(&self.file).wrap_err_with(|| {
                    format!("failed to remap '{}' after grow", self.path.display())
                })?
            };

            trace!(path = %self.path.display(), new_len, "grew mapping");
        }

        set_header_word(self.base(), HEADER_SIZE_WORD, target);
        Ok(())
    }

    fn try_offset(&self, offset: u64) -> Option<*mut u8> {
        let file_offset = offset + STORE_HEADER_SIZE as u64;
        if file_offset >= self.mapped_len() {
            return None;
        }

        // SAFETY: file_offset < mapped_len, so the pointer stays inside the
        // live mapping.
        Some(unsafe { self.base().add(file_offset as usize) })
    }

    fn offset_of(&self, ptr: *const u8) -> u64 {
        ptr as u64 - self.base() as u64 - STORE_HEADER_SIZE as u64
    }

    fn allocate(&self, len: u64) -> Result<(*mut u8, u64)> {
        let start = self.size();
        self.resize(start + len)?;
        Ok((self.offset(start)?, start))
    }

    fn stale(&self, extra: u64) -> bool {
        self.size() + extra + STORE_HEADER_SIZE as u64 > self.mapped_len()
    }

    fn flush(&self) -> Result<()> {
        self.map
            .borrow()
            .flush()
            .wrap_err_with(|| format!("failed to flush '{}'", self.path.display()))
    }

    fn version(&self) -> u64 {
        header_word(self.base(), HEADER_VERSION_WORD)
    }

    fn update_version(&self) {
        let v = self.version();
        set_header_word(self.base(), HEADER_VERSION_WORD, v + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_seeds_header() {
        let dir = tempdir().unwrap();
        let store = SingleMap::open(dir.path().join("a.slab")).unwrap();

        assert_eq!(store.size(), 0);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn allocate_advances_size() {
        let dir = tempdir().unwrap();
        let store = SingleMap::open(dir.path().join("a.slab")).unwrap();

        let (_, off1) = store.allocate(128).unwrap();
        let (_, off2) = store.allocate(64).unwrap();

        assert_eq!(off1, 0);
        assert_eq!(off2, 128);
        assert_eq!(store.size(), 192);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.slab");

        {
            let store = SingleMap::open(&path).unwrap();
            let (ptr, off) = store.allocate(16).unwrap();
            assert_eq!(off, 0);
            // SAFETY: ptr covers 16 freshly allocated bytes.
            unsafe { std::ptr::copy_nonoverlapping(b"hello".as_ptr(), ptr, 5) };
            store.flush().unwrap();
        }

        let store = SingleMap::open(&path).unwrap();
        assert_eq!(store.size(), 16);

        let ptr = store.offset(0).unwrap();
        // SAFETY: offset 0 is committed and mapped.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 5) };
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn growth_remaps_past_capacity() {
        let dir = tempdir().unwrap();
        let store = SingleMap::open_with(dir.path().join("a.slab"), 64 * 1024).unwrap();

        // Cross the initial 64 KiB capacity several times over.
        for _ in 0..8 {
            store.allocate(64 * 1024).unwrap();
        }

        assert_eq!(store.size(), 8 * 64 * 1024);
        assert!(store.try_offset(store.size() - 1).is_some());
    }

    #[test]
    fn unmapped_offset_resolves_to_none() {
        let dir = tempdir().unwrap();
        let store = SingleMap::open_with(dir.path().join("a.slab"), 1024).unwrap();

        assert!(store.try_offset(1 << 30).is_none());
        assert!(store.offset(1 << 30).is_err());
    }

    #[test]
    fn offset_of_inverts_offset() {
        let dir = tempdir().unwrap();
        let store = SingleMap::open(dir.path().join("a.slab")).unwrap();

        let (ptr, off) = store.allocate(4096).unwrap();
        assert_eq!(store.offset_of(ptr), off);
    }

    #[test]
    fn update_version_is_monotonic() {
        let dir = tempdir().unwrap();
        let store = SingleMap::open(dir.path().join("a.slab")).unwrap();

        assert_eq!(store.version(), 1);
        store.update_version();
        store.update_version();
        assert_eq!(store.version(), 3);
    }
}
