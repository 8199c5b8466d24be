//! Tag inverted index
//!
//! Each tag node stores its name as a fixed-width null-padded byte field and
//! its file bag in two regions: an inline prefix of [`FIXED_FIDS`] slots for
//! the common small-cardinality case, and an elastic overflow tail. Removal
//! keeps the inline prefix packed by promoting the overflow head into the
//! vacated slot.
//!
//! A tag node whose bag drains to empty is destroyed: its id goes back on
//! the free list and its name is unmapped.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tagfs_common::{Error, FIXED_FIDS, FileId, IdGenerator, Result, TAG_NAME_MAX, TagId};

/// Canonical stored form of a tag name
///
/// Names are truncated at the [`TAG_NAME_MAX`] storage boundary (on a UTF-8
/// character boundary) and at the first embedded null. The canonical form is
/// the key of the name→id map, so lookup, destruction and rebuild agree on
/// one spelling.
#[must_use]
pub fn canonical_tag_name(name: &str) -> String {
    let name = match name.find('\0') {
        Some(pos) => &name[..pos],
        None => name,
    };
    if name.len() <= TAG_NAME_MAX {
        return name.to_string();
    }
    let mut end = TAG_NAME_MAX;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

fn encode_tag_name(name: &str) -> Vec<u8> {
    let canonical = canonical_tag_name(name);
    let mut fixed = vec![0u8; TAG_NAME_MAX];
    fixed[..canonical.len()].copy_from_slice(canonical.as_bytes());
    fixed
}

fn decode_tag_name(fixed: &[u8]) -> String {
    let end = fixed.iter().position(|&b| b == 0).unwrap_or(fixed.len());
    String::from_utf8_lossy(&fixed[..end]).into_owned()
}

/// A single tag: encoded name plus the bag of tagged files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TagNode {
    /// Null-padded name field, exactly [`TAG_NAME_MAX`] bytes
    pub name_fixed: Vec<u8>,
    /// Logical bag size across both regions
    pub files_count: u32,
    /// Inline file-id slots; the first `min(files_count, FIXED_FIDS)` are live
    pub fixed_fids: [FileId; FIXED_FIDS],
    /// Overflow tail beyond the inline region
    pub overflow: Vec<FileId>,
}

impl TagNode {
    fn new(name: &str) -> Self {
        Self {
            name_fixed: encode_tag_name(name),
            files_count: 0,
            fixed_fids: [FileId::from(0); FIXED_FIDS],
            overflow: Vec::new(),
        }
    }

    /// Decode the stored tag name
    #[must_use]
    pub fn name(&self) -> String {
        decode_tag_name(&self.name_fixed)
    }

    /// All file ids in the bag: inline prefix first, then overflow
    #[must_use]
    pub fn files(&self) -> Vec<FileId> {
        let inline = (self.files_count as usize).min(FIXED_FIDS);
        let mut result = Vec::with_capacity(self.files_count as usize);
        result.extend_from_slice(&self.fixed_fids[..inline]);
        result.extend_from_slice(&self.overflow);
        result
    }
}

#[derive(Default)]
struct TagListInner {
    tags: HashMap<TagId, TagNode>,
    name_to_id: HashMap<String, TagId>,
    free_ids: Vec<TagId>,
}

/// Point-in-time copy of the inverted index
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TagListSnapshot {
    /// Tag nodes by id
    pub tags: HashMap<TagId, TagNode>,
    /// Canonical name to tag id
    pub name_to_id: HashMap<String, TagId>,
    /// Recyclable tag ids
    pub free_ids: Vec<TagId>,
}

/// The tag inverted index: tag id → file bag, plus the name→id map
pub struct TagList {
    inner: RwLock<TagListInner>,
    id_gen: Arc<IdGenerator>,
}

impl TagList {
    /// Create an empty index
    #[must_use]
    pub fn new(id_gen: Arc<IdGenerator>) -> Self {
        Self {
            inner: RwLock::new(TagListInner::default()),
            id_gen,
        }
    }

    /// Get or mint the tag id for `name`
    ///
    /// Returns `(id, true)` when a new tag node was created. Fresh ids come
    /// from the free list before the generator.
    pub fn alloc_tag_id(&self, name: &str) -> (TagId, bool) {
        let canonical = canonical_tag_name(name);
        let mut inner = self.inner.write();

        if let Some(&tag_id) = inner.name_to_id.get(&canonical) {
            return (tag_id, false);
        }

        let tag_id = match inner.free_ids.pop() {
            Some(tag_id) => tag_id,
            None => self.id_gen.next_tag(),
        };

        inner.tags.insert(tag_id, TagNode::new(&canonical));
        inner.name_to_id.insert(canonical, tag_id);
        (tag_id, true)
    }

    /// Look up the tag id for `name`
    #[must_use]
    pub fn find_tag_id(&self, name: &str) -> Option<TagId> {
        let canonical = canonical_tag_name(name);
        self.inner.read().name_to_id.get(&canonical).copied()
    }

    /// Append a file id to the tag's bag
    ///
    /// Callers must not add the same file twice; the inode tag set
    /// deduplicates upstream.
    pub fn add_fid(&self, tag_id: TagId, file: FileId) -> Result<()> {
        let mut inner = self.inner.write();

        let node = inner
            .tags
            .get_mut(&tag_id)
            .ok_or(Error::TagNotFound { tag_id })?;

        let count = node.files_count as usize;
        if count < FIXED_FIDS {
            node.fixed_fids[count] = file;
        } else {
            node.overflow.push(file);
        }
        node.files_count += 1;
        Ok(())
    }

    /// Remove a file id from the tag's bag
    ///
    /// Removal from the inline region shifts the remaining slots left and
    /// pulls the overflow head into the freed slot. Draining the bag destroys
    /// the tag.
    pub fn remove_fid(&self, tag_id: TagId, file: FileId) -> Result<()> {
        let mut inner = self.inner.write();

        let node = inner
            .tags
            .get_mut(&tag_id)
            .ok_or(Error::TagNotFound { tag_id })?;

        let inline = (node.files_count as usize).min(FIXED_FIDS);
        if let Some(pos) = node.fixed_fids[..inline].iter().position(|&f| f == file) {
            node.fixed_fids.copy_within(pos + 1..inline, pos);
            if !node.overflow.is_empty() {
                node.fixed_fids[FIXED_FIDS - 1] = node.overflow.remove(0);
            }
            node.files_count -= 1;
            if node.files_count == 0 {
                Self::release_tag(&mut inner, tag_id);
            }
            return Ok(());
        }

        if let Some(pos) = node.overflow.iter().position(|&f| f == file) {
            node.overflow.remove(pos);
            node.files_count -= 1;
            if node.files_count == 0 {
                Self::release_tag(&mut inner, tag_id);
            }
            return Ok(());
        }

        Err(Error::FileNotInTag {
            file_id: file,
            tag_id,
        })
    }

    fn release_tag(inner: &mut TagListInner, tag_id: TagId) {
        if let Some(node) = inner.tags.remove(&tag_id) {
            inner.name_to_id.remove(&node.name());
            inner.free_ids.push(tag_id);
        }
    }

    /// Decoded name of a tag, if it exists
    #[must_use]
    pub fn tag_name(&self, tag_id: TagId) -> Option<String> {
        self.inner.read().tags.get(&tag_id).map(TagNode::name)
    }

    /// File ids in the tag's bag; empty for an unknown tag
    #[must_use]
    pub fn files(&self, tag_id: TagId) -> Vec<FileId> {
        self.inner
            .read()
            .tags
            .get(&tag_id)
            .map(TagNode::files)
            .unwrap_or_default()
    }

    /// Capture the full index state
    #[must_use]
    pub fn snapshot(&self) -> TagListSnapshot {
        let inner = self.inner.read();
        TagListSnapshot {
            tags: inner.tags.clone(),
            name_to_id: inner.name_to_id.clone(),
            free_ids: inner.free_ids.clone(),
        }
    }

    /// Replace the index state from a snapshot
    pub fn restore(&self, snap: TagListSnapshot) {
        let mut inner = self.inner.write();
        inner.tags = snap.tags;
        inner.name_to_id = snap.name_to_id;
        inner.free_ids = snap.free_ids;
    }
}
