//! The composed tagfs engine
//!
//! [`TagStore`] wires the components together in dependency order: id
//! generator → page store → (device registry, inode table, tag list, tag
//! tree) → scope manager. It owns the persistence contract: every successful
//! mutation writes a fresh snapshot to the store's metadata channel before
//! returning; a failed save is logged and the in-memory state stands, to be
//! captured by the next successful save.
//!
//! Reads and scope listings never persist. Scope state is ephemeral per run.

use crate::device::DeviceManager;
use crate::inode::InodeManager;
use crate::scope::{ScopeManager, TagListProvider};
use crate::snapshot::{SNAPSHOT_KEY, SystemSnapshot};
use crate::tag::{TagList, TagTree, canonical_tag_name};
use bytes::Bytes;
use std::sync::Arc;
use tagfs_common::{
    DeviceId, Error, FileId, FileRef, IdGenerator, Result, ScopeId, Source,
};
use tagfs_store::PageStore;
use tracing::{error, info, warn};

/// Hardware id registered on a fresh start
const DEFAULT_HW_ID: &str = "default";

/// The tag-based file store engine
pub struct TagStore {
    id_gen: Arc<IdGenerator>,
    store: Arc<dyn PageStore>,
    devices: DeviceManager,
    inodes: InodeManager,
    tags: Arc<TagList>,
    tag_tree: TagTree,
    scopes: ScopeManager,
}

impl TagStore {
    /// Open an engine over `store`
    ///
    /// Restores the persisted snapshot when one exists and rebuilds the tag
    /// tree from the tag list's name map. Without one the engine starts
    /// empty and registers the `"default"` device. An undecodable snapshot
    /// fails startup with [`Error::CorruptSnapshot`]; the caller decides
    /// whether to wipe and run empty.
    pub fn open(store: Arc<dyn PageStore>) -> Result<Self> {
        let id_gen = Arc::new(IdGenerator::new());
        let devices = DeviceManager::new(Arc::clone(&id_gen));
        let inodes = InodeManager::new(Arc::clone(&store), Arc::clone(&id_gen));
        let tags = Arc::new(TagList::new(Arc::clone(&id_gen)));
        let tag_tree = TagTree::new();
        let scopes = ScopeManager::new(
            Arc::clone(&id_gen),
            Arc::clone(&tags) as Arc<dyn TagListProvider>,
        );

        let engine = Self {
            id_gen,
            store,
            devices,
            inodes,
            tags,
            tag_tree,
            scopes,
        };

        match engine.store.load_metadata(SNAPSHOT_KEY) {
            Ok(data) => {
                let snap = SystemSnapshot::decode(&data)?;
                engine.devices.restore(snap.devices);
                engine.inodes.restore(snap.inodes);
                for (name, tag_id) in &snap.tags.name_to_id {
                    engine.tag_tree.insert(name, *tag_id);
                }
                engine.tags.restore(snap.tags);
                engine.id_gen.restore(snap.id_gen);
                info!("metadata restored from storage");
            }
            Err(e) if e.is_not_found() => {
                info!("no existing metadata, starting fresh");
                engine.devices.register(DEFAULT_HW_ID);
            }
            Err(e) => {
                warn!("failed to load metadata, starting fresh: {}", e);
                engine.devices.register(DEFAULT_HW_ID);
            }
        }

        Ok(engine)
    }

    /// Flush bookkeeping and release the backing store
    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    fn ensure_device(&self, device: DeviceId) -> Result<()> {
        if self.devices.exists(device) {
            Ok(())
        } else {
            Err(Error::DeviceNotFound { device_id: device })
        }
    }

    fn ensure_file(&self, device: DeviceId, file: FileId) -> Result<()> {
        self.ensure_device(device)?;
        if self.inodes.exists(device, file) {
            Ok(())
        } else {
            Err(Error::FileNotFound {
                device_id: device,
                file_id: file,
            })
        }
    }

    /// Serialize the engine state and write it under the `"system"` key
    ///
    /// Save failures are logged, not surfaced: the logical state is in
    /// memory and the next successful save captures it.
    fn persist(&self) {
        let snapshot = SystemSnapshot {
            id_gen: self.id_gen.snapshot(),
            devices: self.devices.snapshot(),
            inodes: self.inodes.snapshot(),
            tags: self.tags.snapshot(),
        };

        let bytes = match snapshot.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to serialize metadata: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.save_metadata(SNAPSHOT_KEY, &bytes) {
            error!("failed to save metadata: {}", e);
        }
    }

    // ── Devices ──────────────────────────────────────────────────────────

    /// Register a hardware id, returning its device id
    pub fn register_device(&self, hw_id: &str) -> DeviceId {
        let (device_id, created) = self.devices.register(hw_id);
        if created {
            self.persist();
        }
        device_id
    }

    /// All registered device ids
    #[must_use]
    pub fn device_list(&self) -> Vec<DeviceId> {
        self.devices.list()
    }

    // ── Files ────────────────────────────────────────────────────────────

    /// Create an empty file on `device`
    pub fn create(&self, device: DeviceId) -> Result<FileId> {
        self.ensure_device(device)?;
        let file = self.inodes.create(device);
        self.persist();
        Ok(file)
    }

    /// Delete a file: drops its tag memberships, frees its pages
    pub fn delete(&self, device: DeviceId, file: FileId) -> Result<()> {
        self.ensure_device(device)?;

        for tag_id in self.inodes.tag_ids(device, file)? {
            let name = self.tags.tag_name(tag_id);
            match self.tags.remove_fid(tag_id, file) {
                Ok(())
                | Err(Error::FileNotInTag { .. })
                | Err(Error::TagNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            if let Some(name) = name {
                if self.tags.find_tag_id(&name).is_none() {
                    self.tag_tree.delete(&name);
                }
                self.scopes.invalidate_tag(&name);
            }
        }

        self.inodes.delete(device, file)?;
        self.persist();
        Ok(())
    }

    /// Check whether a file exists
    #[must_use]
    pub fn exists(&self, device: DeviceId, file: FileId) -> bool {
        self.inodes.exists(device, file)
    }

    /// Logical size of a file
    pub fn size(&self, device: DeviceId, file: FileId) -> Result<i64> {
        self.ensure_device(device)?;
        self.inodes.size(device, file)
    }

    /// Read up to `n` bytes at `off`
    pub fn read(&self, device: DeviceId, file: FileId, off: i64, n: i64) -> Result<Bytes> {
        self.ensure_device(device)?;
        self.inodes.read(device, file, off, n)
    }

    /// Write `data` at `off`, returning the byte count actually copied
    pub fn write(&self, device: DeviceId, file: FileId, off: i64, data: &[u8]) -> Result<usize> {
        self.ensure_device(device)?;
        let written = self.inodes.write(device, file, off, data)?;
        self.persist();
        Ok(written)
    }

    /// Copy a file's bytes and tags to a fresh file on `dst_device`
    pub fn copy(
        &self,
        src_device: DeviceId,
        file: FileId,
        dst_device: DeviceId,
    ) -> Result<FileId> {
        self.ensure_file(src_device, file)?;
        self.ensure_device(dst_device)?;

        let size = self.inodes.size(src_device, file)?;
        let data = self.inodes.read(src_device, file, 0, size)?;
        let tag_names = self.tag_list(src_device, file)?;

        let dst_file = self.inodes.create(dst_device);
        if !data.is_empty()
            && let Err(e) = self.inodes.write(dst_device, dst_file, 0, &data)
        {
            let _ = self.inodes.delete(dst_device, dst_file);
            return Err(e);
        }

        for name in tag_names {
            self.tag_add(dst_device, dst_file, &name)?;
        }

        self.persist();
        Ok(dst_file)
    }

    // ── Tags ─────────────────────────────────────────────────────────────

    /// Attach a tag to a file, creating the tag on first use
    ///
    /// Adding a tag the file already carries is a no-op.
    pub fn tag_add(&self, device: DeviceId, file: FileId, tag: &str) -> Result<()> {
        self.ensure_file(device, file)?;
        let name = canonical_tag_name(tag);

        let tag_id = match self.tag_tree.lookup(&name) {
            Some(tag_id) => tag_id,
            None => {
                let (tag_id, _) = self.tags.alloc_tag_id(&name);
                self.tag_tree.insert(&name, tag_id);
                tag_id
            }
        };

        if self.inodes.tag_ids(device, file)?.contains(&tag_id) {
            return Ok(());
        }

        self.tags.add_fid(tag_id, file)?;
        self.inodes.add_tag_id(device, file, tag_id)?;
        self.scopes.invalidate_tag(&name);

        self.persist();
        Ok(())
    }

    /// Detach a tag from a file
    ///
    /// Removing a tag the file does not carry, or one that does not exist,
    /// is a no-op. A tag whose last file is removed is destroyed.
    pub fn tag_remove(&self, device: DeviceId, file: FileId, tag: &str) -> Result<()> {
        self.ensure_file(device, file)?;
        let name = canonical_tag_name(tag);

        let Some(tag_id) = self.tag_tree.lookup(&name) else {
            return Ok(());
        };

        match self.tags.remove_fid(tag_id, file) {
            Ok(()) | Err(Error::FileNotInTag { .. }) | Err(Error::TagNotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        self.inodes.remove_tag_id(device, file, tag_id)?;

        if self.tags.find_tag_id(&name).is_none() {
            self.tag_tree.delete(&name);
        }
        self.scopes.invalidate_tag(&name);

        self.persist();
        Ok(())
    }

    /// Names of the tags attached to a file
    pub fn tag_list(&self, device: DeviceId, file: FileId) -> Result<Vec<String>> {
        self.ensure_file(device, file)?;

        Ok(self
            .inodes
            .tag_ids(device, file)?
            .into_iter()
            .filter_map(|tag_id| self.tags.tag_name(tag_id))
            .collect())
    }

    // ── Scopes ───────────────────────────────────────────────────────────

    /// Create an empty scope
    pub fn mk_scope(&self) -> ScopeId {
        self.scopes.mk_scope()
    }

    /// Add a source (raw shared-id-space encoding) to a scope
    pub fn scope_add_source(&self, scope_id: ScopeId, source: u64) -> Result<()> {
        self.scopes.add_source(scope_id, Source::decode(source))
    }

    /// Remove a source (raw shared-id-space encoding) from a scope
    pub fn scope_rm_source(&self, scope_id: ScopeId, source: u64) -> Result<()> {
        self.scopes.rm_source(scope_id, Source::decode(source))
    }

    /// Add filter tags to a scope
    pub fn scope_add_filter(&self, scope_id: ScopeId, tags: &[&str]) -> Result<()> {
        self.scopes.add_filter(scope_id, tags)
    }

    /// Remove filter tags from a scope
    pub fn scope_rm_filter(&self, scope_id: ScopeId, tags: &[&str]) -> Result<()> {
        self.scopes.rm_filter(scope_id, tags)
    }

    /// Materialize a scope's result set
    pub fn list_scope(&self, scope_id: ScopeId) -> Result<Vec<FileRef>> {
        self.scopes.list(scope_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagfs_common::{PAGE_SIZE, SCOPE_SOURCE_SPLIT};
    use tagfs_store::{MemPageStore, RedbPageStore};
    use tempfile::tempdir;

    fn mem_engine() -> TagStore {
        TagStore::open(Arc::new(MemPageStore::new())).unwrap()
    }

    fn default_device(engine: &TagStore) -> DeviceId {
        engine.device_list()[0]
    }

    #[test]
    fn test_fresh_start_registers_default_device() {
        let engine = mem_engine();

        let devices = engine.device_list();
        assert_eq!(devices, vec![DeviceId::from(1)]);

        // Re-registering the default hardware id changes nothing
        assert_eq!(engine.register_device("default"), DeviceId::from(1));
        assert_eq!(engine.device_list().len(), 1);
    }

    #[test]
    fn test_paged_write_then_read_across_pages() {
        let engine = mem_engine();
        let dev = default_device(&engine);

        let file = engine.create(dev).unwrap();
        assert_eq!(file, FileId::from(1));

        let off = (PAGE_SIZE - 6) as i64;
        let written = engine.write(dev, file, off, b"ABCDEFGHIJ").unwrap();
        assert_eq!(written, 10);

        let data = engine.read(dev, file, off, 10).unwrap();
        assert_eq!(&data[..], b"ABCDEFGHIJ");

        assert_eq!(engine.size(dev, file).unwrap(), off + 10);
        assert_eq!(engine.inodes.page_count(dev, file).unwrap(), 2);
    }

    #[test]
    fn test_tag_add_creates_tag_and_delete_file_destroys_it() {
        let engine = mem_engine();
        let dev = default_device(&engine);

        let file = engine.create(dev).unwrap();
        engine.tag_add(dev, file, "red").unwrap();

        let tag_id = engine.tags.find_tag_id("red").unwrap();
        assert_eq!(engine.tags.files(tag_id), vec![file]);
        assert_eq!(engine.tag_list(dev, file).unwrap(), vec!["red"]);

        engine.delete(dev, file).unwrap();
        assert!(engine.tags.find_tag_id("red").is_none());
        assert!(engine.tag_tree.lookup("red").is_none());
    }

    #[test]
    fn test_tag_add_is_idempotent() {
        let engine = mem_engine();
        let dev = default_device(&engine);
        let file = engine.create(dev).unwrap();

        engine.tag_add(dev, file, "red").unwrap();
        engine.tag_add(dev, file, "red").unwrap();

        let tag_id = engine.tags.find_tag_id("red").unwrap();
        assert_eq!(engine.tags.files(tag_id), vec![file]);
        assert_eq!(engine.tag_list(dev, file).unwrap(), vec!["red"]);
    }

    #[test]
    fn test_tag_remove_unassigned_is_noop() {
        let engine = mem_engine();
        let dev = default_device(&engine);
        let file = engine.create(dev).unwrap();
        let other = engine.create(dev).unwrap();
        engine.tag_add(dev, other, "red").unwrap();

        engine.tag_remove(dev, file, "red").unwrap();
        engine.tag_remove(dev, file, "never-existed").unwrap();

        let tag_id = engine.tags.find_tag_id("red").unwrap();
        assert_eq!(engine.tags.files(tag_id), vec![other]);
    }

    #[test]
    fn test_tag_can_be_recreated_after_destruction() {
        let engine = mem_engine();
        let dev = default_device(&engine);
        let file = engine.create(dev).unwrap();

        engine.tag_add(dev, file, "red").unwrap();
        engine.tag_remove(dev, file, "red").unwrap();
        assert!(engine.tags.find_tag_id("red").is_none());

        engine.tag_add(dev, file, "red").unwrap();
        assert_eq!(engine.tag_list(dev, file).unwrap(), vec!["red"]);
    }

    fn tagged_fixture() -> (TagStore, DeviceId, FileId, FileId, FileId) {
        let engine = mem_engine();
        let dev = default_device(&engine);

        let f1 = engine.create(dev).unwrap();
        let f2 = engine.create(dev).unwrap();
        let f3 = engine.create(dev).unwrap();

        engine.tag_add(dev, f1, "a").unwrap();
        engine.tag_add(dev, f1, "b").unwrap();
        engine.tag_add(dev, f2, "a").unwrap();
        engine.tag_add(dev, f3, "b").unwrap();

        (engine, dev, f1, f2, f3)
    }

    #[test]
    fn test_scope_intersects_filters_on_device() {
        let (engine, dev, f1, _, _) = tagged_fixture();

        let s = engine.mk_scope();
        engine.scope_add_source(s, dev.as_u64()).unwrap();
        engine.scope_add_filter(s, &["a", "b"]).unwrap();

        assert_eq!(
            engine.list_scope(s).unwrap(),
            vec![FileRef::new(dev, f1)]
        );
    }

    #[test]
    fn test_scope_union_and_subscope_passthrough() {
        let (engine, dev, f1, f2, _) = tagged_fixture();

        let s2 = engine.mk_scope();
        engine.scope_add_source(s2, dev.as_u64()).unwrap();
        engine.scope_add_filter(s2, &["a"]).unwrap();
        assert_eq!(
            engine.list_scope(s2).unwrap(),
            vec![FileRef::new(dev, f1), FileRef::new(dev, f2)]
        );

        // The sub-scope's result passes through untouched by s3's own filter
        let s3 = engine.mk_scope();
        engine
            .scope_add_source(s3, SCOPE_SOURCE_SPLIT | s2.as_u64())
            .unwrap();
        engine.scope_add_filter(s3, &["b"]).unwrap();
        assert_eq!(
            engine.list_scope(s3).unwrap(),
            vec![FileRef::new(dev, f1), FileRef::new(dev, f2)]
        );
    }

    #[test]
    fn test_tag_change_invalidates_scope_cache() {
        let (engine, dev, f1, _, _) = tagged_fixture();

        let s = engine.mk_scope();
        engine.scope_add_source(s, dev.as_u64()).unwrap();
        engine.scope_add_filter(s, &["a", "b"]).unwrap();
        assert_eq!(
            engine.list_scope(s).unwrap(),
            vec![FileRef::new(dev, f1)]
        );

        engine.tag_remove(dev, f1, "b").unwrap();
        assert!(engine.list_scope(s).unwrap().is_empty());
    }

    #[test]
    fn test_scope_cycle_rejected() {
        let engine = mem_engine();

        let a = engine.mk_scope();
        let b = engine.mk_scope();

        engine
            .scope_add_source(a, SCOPE_SOURCE_SPLIT | b.as_u64())
            .unwrap();
        assert!(matches!(
            engine.scope_add_source(b, SCOPE_SOURCE_SPLIT | a.as_u64()),
            Err(Error::CycleDetected)
        ));
        assert!(matches!(
            engine.scope_add_source(a, SCOPE_SOURCE_SPLIT | a.as_u64()),
            Err(Error::SelfReference)
        ));
    }

    #[test]
    fn test_copy_carries_bytes_and_tags() {
        let engine = mem_engine();
        let dev = default_device(&engine);
        let other = engine.register_device("secondary");

        let src = engine.create(dev).unwrap();
        engine.write(dev, src, 0, b"copy me").unwrap();
        engine.tag_add(dev, src, "keep").unwrap();

        let dst = engine.copy(dev, src, other).unwrap();
        assert_ne!(dst, src);

        let data = engine.read(other, dst, 0, 100).unwrap();
        assert_eq!(&data[..], b"copy me");
        assert_eq!(engine.tag_list(other, dst).unwrap(), vec!["keep"]);

        // Both files now carry the tag
        let tag_id = engine.tags.find_tag_id("keep").unwrap();
        assert_eq!(engine.tags.files(tag_id), vec![src, dst]);
    }

    #[test]
    fn test_operations_on_unknown_device_fail() {
        let engine = mem_engine();
        let bogus = DeviceId::from(99);

        assert!(matches!(
            engine.create(bogus),
            Err(Error::DeviceNotFound { .. })
        ));
        assert!(matches!(
            engine.read(bogus, FileId::from(1), 0, 1),
            Err(Error::DeviceNotFound { .. })
        ));
        assert!(matches!(
            engine.tag_add(bogus, FileId::from(1), "x"),
            Err(Error::DeviceNotFound { .. })
        ));
    }

    #[test]
    fn test_mem_store_engine_cold_starts() {
        let store = Arc::new(MemPageStore::new());

        {
            let engine = TagStore::open(Arc::clone(&store) as Arc<dyn PageStore>).unwrap();
            let dev = default_device(&engine);
            engine.create(dev).unwrap();
        }

        // The memory store's metadata channel is a sink, so a new engine
        // over the same store starts empty
        let engine = TagStore::open(store as Arc<dyn PageStore>).unwrap();
        assert!(!engine.exists(DeviceId::from(1), FileId::from(1)));
    }

    #[test]
    fn test_snapshot_roundtrip_over_redb() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagfs.redb");

        let (dev, file, off) = {
            let store = Arc::new(RedbPageStore::open(&path).unwrap());
            let engine = TagStore::open(store as Arc<dyn PageStore>).unwrap();
            let dev = default_device(&engine);

            let file = engine.create(dev).unwrap();
            let off = (PAGE_SIZE - 6) as i64;
            engine.write(dev, file, off, b"ABCDEFGHIJ").unwrap();
            engine.tag_add(dev, file, "red").unwrap();
            engine.tag_add(dev, file, "blue").unwrap();

            let scope = engine.mk_scope();
            engine.scope_add_source(scope, dev.as_u64()).unwrap();
            engine.scope_add_filter(scope, &["red"]).unwrap();
            assert_eq!(
                engine.list_scope(scope).unwrap(),
                vec![FileRef::new(dev, file)]
            );

            engine.close().unwrap();
            (dev, file, off)
        };

        let store = Arc::new(RedbPageStore::open(&path).unwrap());
        let engine = TagStore::open(store as Arc<dyn PageStore>).unwrap();

        // File bytes, size, tags, and device identity survive the reload
        assert!(engine.exists(dev, file));
        assert_eq!(engine.size(dev, file).unwrap(), off + 10);
        let data = engine.read(dev, file, off, 10).unwrap();
        assert_eq!(&data[..], b"ABCDEFGHIJ");

        let mut tags = engine.tag_list(dev, file).unwrap();
        tags.sort();
        assert_eq!(tags, vec!["blue", "red"]);

        // The tree was rebuilt from the tag list
        assert_eq!(
            engine.tag_tree.lookup("red"),
            engine.tags.find_tag_id("red")
        );

        // Scopes are ephemeral: the manager rebuilds empty. The scope
        // counter restores to its value at the last persisted mutation,
        // which no scope op ever advances.
        assert!(matches!(
            engine.list_scope(ScopeId::from(1)),
            Err(Error::ScopeNotFound { .. })
        ));
        assert_eq!(engine.mk_scope(), ScopeId::from(1));

        // Id generators resume past persisted ids
        let next = engine.create(dev).unwrap();
        assert_eq!(next.as_u64(), file.as_u64() + 1);
    }

    #[test]
    fn test_corrupt_snapshot_fails_startup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagfs.redb");

        {
            let store = Arc::new(RedbPageStore::open(&path).unwrap());
            store.save_metadata(SNAPSHOT_KEY, b"not a snapshot").unwrap();
        }

        let store = Arc::new(RedbPageStore::open(&path).unwrap());
        assert!(matches!(
            TagStore::open(store as Arc<dyn PageStore>),
            Err(Error::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn test_registered_devices_survive_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tagfs.redb");

        let secondary = {
            let store = Arc::new(RedbPageStore::open(&path).unwrap());
            let engine = TagStore::open(store as Arc<dyn PageStore>).unwrap();
            let secondary = engine.register_device("secondary");
            engine.close().unwrap();
            secondary
        };

        let store = Arc::new(RedbPageStore::open(&path).unwrap());
        let engine = TagStore::open(store as Arc<dyn PageStore>).unwrap();

        assert_eq!(engine.device_list().len(), 2);
        assert_eq!(engine.register_device("secondary"), secondary);
    }
}
