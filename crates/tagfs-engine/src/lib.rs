//! tagfs core engine
//!
//! This crate implements the tag-based file store engine:
//! - Device registry (stable hardware id → device id)
//! - Inode table with paged random-access file I/O
//! - Tag inverted index (tag → file bag) and name-ordered B+ tree
//! - Scope manager (composable cached views with tag-driven invalidation)
//! - Snapshot persistence through the page store's metadata channel
//!
//! [`TagStore`] composes the pieces and is the intended entry point; the
//! individual managers are exported for callers that embed a subset.

pub mod device;
pub mod engine;
pub mod inode;
pub mod scope;
pub mod snapshot;
pub mod tag;

// Re-exports
pub use device::{DeviceManager, DeviceSnapshot};
pub use engine::TagStore;
pub use inode::{Inode, InodeManager, InodeTable};
pub use scope::{ScopeManager, TagListProvider};
pub use snapshot::{SNAPSHOT_KEY, SystemSnapshot};
pub use tag::{TagList, TagListSnapshot, TagNode, TagTree, canonical_tag_name};
