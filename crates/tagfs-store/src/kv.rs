//! Durable page store backed by redb
//!
//! Pages and metadata blobs share one byte-keyed table so state survives
//! restarts:
//! - Page: `'p' ‖ BE64(pid)` → exactly `PAGE_SIZE` bytes
//! - Next-id counter: `meta:nextID` → 8-byte big-endian u64
//! - Arbitrary metadata: `meta:{name}` → opaque caller bytes
//!
//! The free list is process-local: freed ids are reused within a run, ids
//! freed right before shutdown are simply never reissued.

use crate::PageStore;
use bytes::Bytes;
use parking_lot::RwLock;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tagfs_common::{Error, PAGE_SIZE, PageId, Result};
use tracing::warn;

/// All records: pages under `'p'`-prefixed keys, blobs under `meta:` keys
const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// Key of the persisted next-id counter
const NEXT_ID_KEY: &[u8] = b"meta:nextID";

fn page_key(pid: PageId) -> [u8; 9] {
    let mut key = [0u8; 9];
    key[0] = b'p';
    key[1..].copy_from_slice(&pid.as_u64().to_be_bytes());
    key
}

fn meta_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(5 + name.len());
    key.extend_from_slice(b"meta:");
    key.extend_from_slice(name.as_bytes());
    key
}

struct AllocState {
    next_id: u64,
    free_list: Vec<PageId>,
}

/// Page store persisted in an embedded redb database
pub struct RedbPageStore {
    db: Database,
    alloc_state: RwLock<AllocState>,
}

impl RedbPageStore {
    /// Open (or create) the store at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path)
            .map_err(|e| Error::Storage(format!("open redb database: {}", e)))?;

        // Ensure the table exists before any read transaction touches it
        let wtx = db
            .begin_write()
            .map_err(|e| Error::Storage(format!("begin write: {}", e)))?;
        wtx.open_table(KV)
            .map_err(|e| Error::Storage(format!("open table: {}", e)))?;
        wtx.commit()
            .map_err(|e| Error::Storage(format!("commit: {}", e)))?;

        let next_id = Self::load_next_id(&db)?.unwrap_or(1);

        Ok(Self {
            db,
            alloc_state: RwLock::new(AllocState {
                next_id,
                free_list: Vec::new(),
            }),
        })
    }

    fn load_next_id(db: &Database) -> Result<Option<u64>> {
        let rtx = db
            .begin_read()
            .map_err(|e| Error::Storage(format!("begin read: {}", e)))?;
        let table = rtx
            .open_table(KV)
            .map_err(|e| Error::Storage(format!("open table: {}", e)))?;

        let guard = table
            .get(NEXT_ID_KEY)
            .map_err(|e| Error::Storage(format!("read next id: {}", e)))?;

        Ok(guard.and_then(|v| {
            let bytes: [u8; 8] = v.value().try_into().ok()?;
            Some(u64::from_be_bytes(bytes))
        }))
    }

    fn save_next_id(&self, next_id: u64) -> Result<()> {
        let wtx = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(format!("begin write: {}", e)))?;
        wtx.open_table(KV)
            .map_err(|e| Error::Storage(format!("open table: {}", e)))?
            .insert(NEXT_ID_KEY, next_id.to_be_bytes().as_slice())
            .map_err(|e| Error::Storage(format!("save next id: {}", e)))?;
        wtx.commit()
            .map_err(|e| Error::Storage(format!("commit: {}", e)))
    }
}

impl PageStore for RedbPageStore {
    fn alloc(&self, n: usize) -> Result<Vec<PageId>> {
        let mut state = self.alloc_state.write();

        let mut result = Vec::with_capacity(n);
        let zero_page = vec![0u8; PAGE_SIZE];

        let wtx = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(format!("begin write: {}", e)))?;
        {
            let mut table = wtx
                .open_table(KV)
                .map_err(|e| Error::Storage(format!("open table: {}", e)))?;

            for _ in 0..n {
                let pid = match state.free_list.pop() {
                    Some(pid) => pid,
                    None => {
                        let pid = PageId::from(state.next_id);
                        state.next_id += 1;
                        pid
                    }
                };
                table
                    .insert(page_key(pid).as_slice(), zero_page.as_slice())
                    .map_err(|e| Error::Storage(format!("write page {}: {}", pid, e)))?;
                result.push(pid);
            }

            table
                .insert(NEXT_ID_KEY, state.next_id.to_be_bytes().as_slice())
                .map_err(|e| Error::Storage(format!("save next id: {}", e)))?;
        }
        wtx.commit()
            .map_err(|e| Error::Storage(format!("commit: {}", e)))?;

        Ok(result)
    }

    fn free(&self, pid: PageId) {
        let mut state = self.alloc_state.write();

        let removed = (|| -> Result<bool> {
            let wtx = self
                .db
                .begin_write()
                .map_err(|e| Error::Storage(format!("begin write: {}", e)))?;
            let existed = wtx
                .open_table(KV)
                .map_err(|e| Error::Storage(format!("open table: {}", e)))?
                .remove(page_key(pid).as_slice())
                .map_err(|e| Error::Storage(format!("remove page {}: {}", pid, e)))?
                .is_some();
            wtx.commit()
                .map_err(|e| Error::Storage(format!("commit: {}", e)))?;
            Ok(existed)
        })();

        match removed {
            Ok(true) => state.free_list.push(pid),
            Ok(false) => {}
            Err(e) => warn!("failed to free page {}: {}", pid, e),
        }
    }

    fn read(&self, pid: PageId, off: usize, n: usize) -> Result<Bytes> {
        if off >= PAGE_SIZE {
            return Err(Error::OffsetOutOfRange { offset: off as i64 });
        }

        let rtx = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(format!("begin read: {}", e)))?;
        let table = rtx
            .open_table(KV)
            .map_err(|e| Error::Storage(format!("open table: {}", e)))?;

        let guard = table
            .get(page_key(pid).as_slice())
            .map_err(|e| Error::Storage(format!("read page {}: {}", pid, e)))?
            .ok_or(Error::PageNotFound { page_id: pid })?;

        let page = guard.value();
        let end = (off + n).min(PAGE_SIZE);
        Ok(Bytes::copy_from_slice(&page[off..end]))
    }

    fn write(&self, pid: PageId, off: usize, data: &[u8]) -> Result<usize> {
        if off >= PAGE_SIZE {
            return Err(Error::OffsetOutOfRange { offset: off as i64 });
        }

        let count = data.len().min(PAGE_SIZE - off);

        let wtx = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(format!("begin write: {}", e)))?;
        {
            let mut table = wtx
                .open_table(KV)
                .map_err(|e| Error::Storage(format!("open table: {}", e)))?;

            let mut page = {
                let guard = table
                    .get(page_key(pid).as_slice())
                    .map_err(|e| Error::Storage(format!("read page {}: {}", pid, e)))?
                    .ok_or(Error::PageNotFound { page_id: pid })?;
                guard.value().to_vec()
            };
            page.resize(PAGE_SIZE, 0);
            page[off..off + count].copy_from_slice(&data[..count]);

            table
                .insert(page_key(pid).as_slice(), page.as_slice())
                .map_err(|e| Error::Storage(format!("write page {}: {}", pid, e)))?;
        }
        wtx.commit()
            .map_err(|e| Error::Storage(format!("commit: {}", e)))?;

        Ok(count)
    }

    fn save_metadata(&self, key: &str, data: &[u8]) -> Result<()> {
        let wtx = self
            .db
            .begin_write()
            .map_err(|e| Error::Storage(format!("begin write: {}", e)))?;
        wtx.open_table(KV)
            .map_err(|e| Error::Storage(format!("open table: {}", e)))?
            .insert(meta_key(key).as_slice(), data)
            .map_err(|e| Error::Storage(format!("save metadata {}: {}", key, e)))?;
        wtx.commit()
            .map_err(|e| Error::Storage(format!("commit: {}", e)))
    }

    fn load_metadata(&self, key: &str) -> Result<Vec<u8>> {
        let rtx = self
            .db
            .begin_read()
            .map_err(|e| Error::Storage(format!("begin read: {}", e)))?;
        let table = rtx
            .open_table(KV)
            .map_err(|e| Error::Storage(format!("open table: {}", e)))?;

        let guard = table
            .get(meta_key(key).as_slice())
            .map_err(|e| Error::Storage(format!("load metadata {}: {}", key, e)))?
            .ok_or_else(|| Error::MetadataNotFound(key.to_string()))?;

        Ok(guard.value().to_vec())
    }

    fn close(&self) -> Result<()> {
        let next_id = self.alloc_state.read().next_id;
        self.save_next_id(next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_alloc_read_write() {
        let dir = tempdir().unwrap();
        let store = RedbPageStore::open(dir.path().join("pages.redb")).unwrap();

        let pid = store.alloc(1).unwrap()[0];
        assert_eq!(pid.as_u64(), 1);

        let written = store.write(pid, 10, b"persistent").unwrap();
        assert_eq!(written, 10);

        let data = store.read(pid, 10, 10).unwrap();
        assert_eq!(&data[..], b"persistent");
    }

    #[test]
    fn test_free_list_reuse() {
        let dir = tempdir().unwrap();
        let store = RedbPageStore::open(dir.path().join("pages.redb")).unwrap();

        let pages = store.alloc(2).unwrap();
        store.free(pages[1]);

        let reused = store.alloc(1).unwrap()[0];
        assert_eq!(reused, pages[1]);

        let data = store.read(reused, 0, 8).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_freed_page_not_accessible() {
        let dir = tempdir().unwrap();
        let store = RedbPageStore::open(dir.path().join("pages.redb")).unwrap();

        let pid = store.alloc(1).unwrap()[0];
        store.free(pid);

        assert!(matches!(
            store.read(pid, 0, 1),
            Err(Error::PageNotFound { .. })
        ));
    }

    #[test]
    fn test_offset_out_of_range() {
        let dir = tempdir().unwrap();
        let store = RedbPageStore::open(dir.path().join("pages.redb")).unwrap();

        let pid = store.alloc(1).unwrap()[0];
        assert!(matches!(
            store.write(pid, PAGE_SIZE, b"x"),
            Err(Error::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.redb");

        let pid = {
            let store = RedbPageStore::open(&path).unwrap();
            let pid = store.alloc(1).unwrap()[0];
            store.write(pid, 0, b"durable").unwrap();
            store.save_metadata("system", b"snapshot bytes").unwrap();
            store.close().unwrap();
            pid
        };

        let store = RedbPageStore::open(&path).unwrap();

        let data = store.read(pid, 0, 7).unwrap();
        assert_eq!(&data[..], b"durable");
        assert_eq!(store.load_metadata("system").unwrap(), b"snapshot bytes");

        // Next-id counter continues past persisted pages
        let fresh = store.alloc(1).unwrap()[0];
        assert_eq!(fresh.as_u64(), 2);
    }

    #[test]
    fn test_metadata_not_found() {
        let dir = tempdir().unwrap();
        let store = RedbPageStore::open(dir.path().join("pages.redb")).unwrap();

        assert!(matches!(
            store.load_metadata("missing"),
            Err(Error::MetadataNotFound(_))
        ));
    }
}
