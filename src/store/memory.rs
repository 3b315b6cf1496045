//! Read-only in-memory store, for opening a snapshot of a store file (for
//! example one fetched over the network) without touching the filesystem.
//! Every mutating operation is rejected.

use eyre::{bail, ensure, Result};

use super::{header_word, Store, HEADER_SIZE_WORD, HEADER_VERSION_WORD};
use crate::config::STORE_HEADER_SIZE;

#[derive(Debug)]
pub struct MemoryStore {
    data: Box<[u8]>,
}

impl MemoryStore {
    /// Take ownership of a complete store image, header included.
    pub fn from_image(image: Vec<u8>) -> Result<Self> {
        ensure!(
            image.len() >= STORE_HEADER_SIZE,
            "store image of {} bytes is smaller than the header",
            image.len()
        );

        Ok(Self {
            data: image.into_boxed_slice(),
        })
    }

    fn base(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }
}

impl Store for MemoryStore {
    fn size(&self) -> u64 {
        header_word(self.base(), HEADER_SIZE_WORD)
    }

    fn resize(&self, _target: u64) -> Result<()> {
        bail!("memory store is read-only")
    }

    fn try_offset(&self, offset: u64) -> Option<*mut u8> {
        let file_offset = offset + STORE_HEADER_SIZE as u64;
        if file_offset >= self.data.len() as u64 {
            return None;
        }

        // SAFETY: file_offset < data.len(). The pointer is only read through;
        // this store never hands out writable regions.
        Some(unsafe { self.base().add(file_offset as usize) })
    }

    fn offset_of(&self, ptr: *const u8) -> u64 {
        ptr as u64 - self.base() as u64 - STORE_HEADER_SIZE as u64
    }

    fn allocate(&self, _len: u64) -> Result<(*mut u8, u64)> {
        bail!("memory store is read-only")
    }

    fn stale(&self, extra: u64) -> bool {
        self.size() + extra + STORE_HEADER_SIZE as u64 > self.data.len() as u64
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn version(&self) -> u64 {
        header_word(self.base(), HEADER_VERSION_WORD)
    }

    fn update_version(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{SingleMap, StoreHeader};
    use tempfile::tempdir;
    use zerocopy::IntoBytes;

    #[test]
    fn rejects_truncated_image() {
        let result = MemoryStore::from_image(vec![0u8; 8]);

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("smaller than the header"));
    }

    #[test]
    fn allocate_is_rejected() {
        let mut image = StoreHeader::new().as_bytes().to_vec();
        image.resize(1024, 0);

        let store = MemoryStore::from_image(image).unwrap();
        let result = store.allocate(16);

        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[test]
    fn reads_an_image_written_by_a_file_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.slab");

        {
            let file_store = SingleMap::open(&path).unwrap();
            let (ptr, _) = file_store.allocate(16).unwrap();
            // SAFETY: freshly allocated span of 16 bytes.
            unsafe { std::ptr::copy_nonoverlapping(b"snapshot".as_ptr(), ptr, 8) };
            file_store.flush().unwrap();
        }

        let image = std::fs::read(&path).unwrap();
        let store = MemoryStore::from_image(image).unwrap();

        assert_eq!(store.size(), 16);
        let ptr = store.offset(0).unwrap();
        // SAFETY: offset 0 is committed in the image.
        let bytes = unsafe { std::slice::from_raw_parts(ptr, 8) };
        assert_eq!(bytes, b"snapshot");
    }
}
