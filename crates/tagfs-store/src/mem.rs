//! In-memory page store
//!
//! Pages live in a map keyed by page id. The free list, next-id counter and
//! page map share one reader/writer lock; reads take the shared mode.

use crate::PageStore;
use bytes::Bytes;
use parking_lot::RwLock;
use tagfs_common::{Error, PAGE_SIZE, PageId, Result};

struct MemInner {
    pages: std::collections::HashMap<PageId, Vec<u8>>,
    next_id: u64,
    free_list: Vec<PageId>,
}

/// Page store backed by process memory
///
/// The metadata channel is a sink: saves succeed and are discarded, loads
/// always report not-found, so an engine over this store cold-starts every
/// run.
pub struct MemPageStore {
    inner: RwLock<MemInner>,
}

impl MemPageStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemInner {
                pages: std::collections::HashMap::new(),
                next_id: 1,
                free_list: Vec::new(),
            }),
        }
    }
}

impl Default for MemPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemPageStore {
    fn alloc(&self, n: usize) -> Result<Vec<PageId>> {
        let mut inner = self.inner.write();

        let mut result = Vec::with_capacity(n);
        for _ in 0..n {
            let pid = match inner.free_list.pop() {
                Some(pid) => pid,
                None => {
                    let pid = PageId::from(inner.next_id);
                    inner.next_id += 1;
                    pid
                }
            };
            inner.pages.insert(pid, vec![0u8; PAGE_SIZE]);
            result.push(pid);
        }
        Ok(result)
    }

    fn free(&self, pid: PageId) {
        let mut inner = self.inner.write();
        if inner.pages.remove(&pid).is_some() {
            inner.free_list.push(pid);
        }
    }

    fn read(&self, pid: PageId, off: usize, n: usize) -> Result<Bytes> {
        let inner = self.inner.read();

        let page = inner
            .pages
            .get(&pid)
            .ok_or(Error::PageNotFound { page_id: pid })?;

        if off >= PAGE_SIZE {
            return Err(Error::OffsetOutOfRange { offset: off as i64 });
        }

        let end = (off + n).min(PAGE_SIZE);
        Ok(Bytes::copy_from_slice(&page[off..end]))
    }

    fn write(&self, pid: PageId, off: usize, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.write();

        if off >= PAGE_SIZE {
            return Err(Error::OffsetOutOfRange { offset: off as i64 });
        }

        let page = inner
            .pages
            .get_mut(&pid)
            .ok_or(Error::PageNotFound { page_id: pid })?;

        let count = data.len().min(PAGE_SIZE - off);
        page[off..off + count].copy_from_slice(&data[..count]);
        Ok(count)
    }

    fn save_metadata(&self, _key: &str, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn load_metadata(&self, key: &str) -> Result<Vec<u8>> {
        Err(Error::MetadataNotFound(key.to_string()))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_returns_zeroed_pages() {
        let store = MemPageStore::new();

        let pages = store.alloc(2).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].as_u64(), 1);
        assert_eq!(pages[1].as_u64(), 2);

        let data = store.read(pages[0], 0, PAGE_SIZE).unwrap();
        assert_eq!(data.len(), PAGE_SIZE);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_free_list_reuse_is_lifo() {
        let store = MemPageStore::new();

        let pages = store.alloc(3).unwrap();
        store.free(pages[0]);
        store.free(pages[2]);

        let reused = store.alloc(2).unwrap();
        assert_eq!(reused[0], pages[2]);
        assert_eq!(reused[1], pages[0]);
    }

    #[test]
    fn test_reused_page_is_zeroed() {
        let store = MemPageStore::new();

        let pid = store.alloc(1).unwrap()[0];
        store.write(pid, 0, b"dirty").unwrap();
        store.free(pid);

        let reused = store.alloc(1).unwrap()[0];
        assert_eq!(reused, pid);
        let data = store.read(reused, 0, 5).unwrap();
        assert_eq!(&data[..], &[0u8; 5]);
    }

    #[test]
    fn test_read_write_roundtrip() {
        let store = MemPageStore::new();
        let pid = store.alloc(1).unwrap()[0];

        let written = store.write(pid, 100, b"hello").unwrap();
        assert_eq!(written, 5);

        let data = store.read(pid, 100, 5).unwrap();
        assert_eq!(&data[..], b"hello");
    }

    #[test]
    fn test_write_clamped_at_page_end() {
        let store = MemPageStore::new();
        let pid = store.alloc(1).unwrap()[0];

        let written = store.write(pid, PAGE_SIZE - 3, b"abcdef").unwrap();
        assert_eq!(written, 3);

        let data = store.read(pid, PAGE_SIZE - 3, 100).unwrap();
        assert_eq!(&data[..], b"abc");
    }

    #[test]
    fn test_read_clamped_at_page_end() {
        let store = MemPageStore::new();
        let pid = store.alloc(1).unwrap()[0];

        let data = store.read(pid, PAGE_SIZE - 10, 100).unwrap();
        assert_eq!(data.len(), 10);
    }

    #[test]
    fn test_offset_out_of_range() {
        let store = MemPageStore::new();
        let pid = store.alloc(1).unwrap()[0];

        assert!(matches!(
            store.read(pid, PAGE_SIZE, 1),
            Err(Error::OffsetOutOfRange { .. })
        ));
        assert!(matches!(
            store.write(pid, PAGE_SIZE, b"x"),
            Err(Error::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_freed_page_not_accessible() {
        let store = MemPageStore::new();
        let pid = store.alloc(1).unwrap()[0];
        store.free(pid);

        assert!(matches!(
            store.read(pid, 0, 1),
            Err(Error::PageNotFound { .. })
        ));
        assert!(matches!(
            store.write(pid, 0, b"x"),
            Err(Error::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_double_free_does_not_duplicate_ids() {
        let store = MemPageStore::new();
        let pid = store.alloc(1).unwrap()[0];

        store.free(pid);
        store.free(pid);

        let a = store.alloc(1).unwrap()[0];
        let b = store.alloc(1).unwrap()[0];
        assert_ne!(a, b);
    }

    #[test]
    fn test_metadata_is_a_sink() {
        let store = MemPageStore::new();

        store.save_metadata("system", b"payload").unwrap();
        assert!(matches!(
            store.load_metadata("system"),
            Err(Error::MetadataNotFound(_))
        ));
    }
}
