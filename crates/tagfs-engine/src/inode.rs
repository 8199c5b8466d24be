//! Inode table and paged file I/O
//!
//! An inode is the per-file metadata record: logical size, the ordered list
//! of pages holding the bytes, and the set of tag ids attached to the file.
//! Inodes are keyed by `(device, file)`; file bytes are reached through the
//! page store one page at a time.
//!
//! The page list only ever grows; `size` is the sole end-of-file marker, and
//! bytes past it are never observable through [`InodeManager::read`].

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tagfs_common::{DeviceId, Error, FileId, IdGenerator, PAGE_SIZE, PageId, Result, TagId};
use tagfs_store::PageStore;

/// Per-file metadata record
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Inode {
    /// Logical file size in bytes
    pub size: i64,
    /// Pages holding the file bytes, in file order
    pub pages: Vec<PageId>,
    /// Tags attached to the file
    pub tags: Vec<TagId>,
}

/// The full inode table, keyed by device then file
pub type InodeTable = HashMap<DeviceId, HashMap<FileId, Inode>>;

/// Manager for per-(device, file) metadata and paged byte I/O
pub struct InodeManager {
    inner: RwLock<InodeTable>,
    store: Arc<dyn PageStore>,
    id_gen: Arc<IdGenerator>,
}

impl InodeManager {
    /// Create an empty inode table over `store`
    #[must_use]
    pub fn new(store: Arc<dyn PageStore>, id_gen: Arc<IdGenerator>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            store,
            id_gen,
        }
    }

    /// Create a zero-size file on `device` and return its id
    pub fn create(&self, device: DeviceId) -> FileId {
        let mut inner = self.inner.write();

        let file_id = self.id_gen.next_file();
        inner
            .entry(device)
            .or_default()
            .insert(file_id, Inode::default());
        file_id
    }

    /// Delete a file, releasing every page it owns
    pub fn delete(&self, device: DeviceId, file: FileId) -> Result<()> {
        let mut inner = self.inner.write();

        let device_inodes = inner
            .get_mut(&device)
            .ok_or(Error::DeviceNotFound { device_id: device })?;
        let inode = device_inodes.remove(&file).ok_or(Error::FileNotFound {
            device_id: device,
            file_id: file,
        })?;

        for pid in inode.pages {
            self.store.free(pid);
        }
        Ok(())
    }

    /// Check whether a file exists
    #[must_use]
    pub fn exists(&self, device: DeviceId, file: FileId) -> bool {
        self.inner
            .read()
            .get(&device)
            .is_some_and(|files| files.contains_key(&file))
    }

    /// Logical size of a file in bytes
    pub fn size(&self, device: DeviceId, file: FileId) -> Result<i64> {
        let inner = self.inner.read();
        Ok(Self::get_inode(&inner, device, file)?.size)
    }

    /// Number of pages backing a file
    pub fn page_count(&self, device: DeviceId, file: FileId) -> Result<usize> {
        let inner = self.inner.read();
        Ok(Self::get_inode(&inner, device, file)?.pages.len())
    }

    /// Read up to `n` bytes starting at `off`
    ///
    /// Reads past the end of file return empty; otherwise the length is
    /// clamped to `size - off` and assembled page by page.
    pub fn read(&self, device: DeviceId, file: FileId, off: i64, n: i64) -> Result<Bytes> {
        let inner = self.inner.read();
        let inode = Self::get_inode(&inner, device, file)?;

        if n <= 0 || off < 0 || off >= inode.size {
            return Ok(Bytes::new());
        }
        let n = n.min(inode.size - off);

        let page_size = PAGE_SIZE as i64;
        let mut page_idx = (off / page_size) as usize;
        let mut page_off = (off % page_size) as usize;
        let mut remaining = n as usize;
        let mut buf = BytesMut::with_capacity(remaining);

        while remaining > 0 && page_idx < inode.pages.len() {
            let to_read = remaining.min(PAGE_SIZE - page_off);
            let data = self.store.read(inode.pages[page_idx], page_off, to_read)?;
            buf.extend_from_slice(&data);
            remaining -= data.len();
            if data.len() < to_read {
                break;
            }
            page_idx += 1;
            page_off = 0;
        }

        Ok(buf.freeze())
    }

    /// Write `data` at `off`, growing the page list as needed
    ///
    /// Returns the number of bytes actually copied; the file size becomes
    /// `max(size, off + data.len())`. Writing past the current end leaves a
    /// hole of zeroed page bytes.
    pub fn write(&self, device: DeviceId, file: FileId, off: i64, data: &[u8]) -> Result<usize> {
        if off < 0 {
            return Err(Error::OffsetOutOfRange { offset: off });
        }

        let mut inner = self.inner.write();
        let inode = Self::get_inode_mut(&mut inner, device, file)?;

        let page_size = PAGE_SIZE as i64;
        let end_pos = off + data.len() as i64;
        let required_pages = ((end_pos + page_size - 1) / page_size) as usize;

        if required_pages > inode.pages.len() {
            let fresh = self.store.alloc(required_pages - inode.pages.len())?;
            inode.pages.extend(fresh);
        }

        let mut written = 0usize;
        let mut page_idx = (off / page_size) as usize;
        let mut page_off = (off % page_size) as usize;
        let mut remaining = data.len();

        while remaining > 0 && page_idx < inode.pages.len() {
            let to_write = remaining.min(PAGE_SIZE - page_off);
            let count = self.store.write(
                inode.pages[page_idx],
                page_off,
                &data[written..written + to_write],
            )?;
            written += count;
            remaining -= count;
            if count < to_write {
                break;
            }
            page_idx += 1;
            page_off = 0;
        }

        if end_pos > inode.size {
            inode.size = end_pos;
        }
        Ok(written)
    }

    /// Tags attached to a file
    pub fn tag_ids(&self, device: DeviceId, file: FileId) -> Result<Vec<TagId>> {
        let inner = self.inner.read();
        Ok(Self::get_inode(&inner, device, file)?.tags.clone())
    }

    /// Attach a tag id to a file; a no-op if already attached
    pub fn add_tag_id(&self, device: DeviceId, file: FileId, tag: TagId) -> Result<()> {
        let mut inner = self.inner.write();
        let inode = Self::get_inode_mut(&mut inner, device, file)?;

        if !inode.tags.contains(&tag) {
            inode.tags.push(tag);
        }
        Ok(())
    }

    /// Detach a tag id from a file; a no-op if absent
    pub fn remove_tag_id(&self, device: DeviceId, file: FileId, tag: TagId) -> Result<()> {
        let mut inner = self.inner.write();
        let inode = Self::get_inode_mut(&mut inner, device, file)?;

        inode.tags.retain(|&t| t != tag);
        Ok(())
    }

    /// Deep copy of the inode table
    #[must_use]
    pub fn snapshot(&self) -> InodeTable {
        self.inner.read().clone()
    }

    /// Replace the inode table from a snapshot
    pub fn restore(&self, table: InodeTable) {
        *self.inner.write() = table;
    }

    fn get_inode<'a>(
        table: &'a InodeTable,
        device: DeviceId,
        file: FileId,
    ) -> Result<&'a Inode> {
        table
            .get(&device)
            .ok_or(Error::DeviceNotFound { device_id: device })?
            .get(&file)
            .ok_or(Error::FileNotFound {
                device_id: device,
                file_id: file,
            })
    }

    fn get_inode_mut<'a>(
        table: &'a mut InodeTable,
        device: DeviceId,
        file: FileId,
    ) -> Result<&'a mut Inode> {
        table
            .get_mut(&device)
            .ok_or(Error::DeviceNotFound { device_id: device })?
            .get_mut(&file)
            .ok_or(Error::FileNotFound {
                device_id: device,
                file_id: file,
            })
    }
}
