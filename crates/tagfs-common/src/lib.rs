//! Common foundation for the tagfs engine
//!
//! This crate defines the pieces shared by every other tagfs crate:
//! - Opaque 64-bit handle types (devices, files, tags, scopes, pages)
//! - The monotone per-kind id generator
//! - Storage layout constants
//! - The common error type

pub mod error;
pub mod limits;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use limits::{BPTREE_ORDER, FIXED_FIDS, PAGE_SIZE, SCOPE_SOURCE_SPLIT, TAG_NAME_MAX};
pub use types::{
    DeviceId, FileId, FileRef, IdGenerator, IdSnapshot, PageId, ScopeId, Source, TagId,
};
