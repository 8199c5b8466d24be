//! Storage layout constants
//!
//! These are fixed at build time and must not change between runs that share
//! a data directory: page payloads, encoded tag names, and the inline file-id
//! region of a tag node are all sized by them.

/// Size of a single page payload in bytes
pub const PAGE_SIZE: usize = 4096;

/// Fixed width of the encoded tag-name field, including null padding
///
/// Names longer than this are truncated at the storage boundary.
pub const TAG_NAME_MAX: usize = 64;

/// Number of file-id slots stored inline in a tag node before overflow
pub const FIXED_FIDS: usize = 8;

/// Split threshold of the tag-name B+ tree (entries per node)
pub const BPTREE_ORDER: usize = 32;

/// Boundary of the shared scope-source id space
///
/// Sources below this value are device ids; sources at or above it are
/// sub-scope ids. The convention is part of the external contract.
pub const SCOPE_SOURCE_SPLIT: u64 = 1 << 32;
