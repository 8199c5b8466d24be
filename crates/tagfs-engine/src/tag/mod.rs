//! Tag indexes
//!
//! Tags are held in two structures with one source of truth:
//! - [`list::TagList`] — the inverted index from tag id to file bag, owning
//!   the name→id map and the id free list
//! - [`tree::TagTree`] — a name-ordered B+ tree for point lookup and range
//!   iteration, rebuilt from the tag list on restore

pub mod list;
pub mod tree;

pub use list::{TagList, TagListSnapshot, TagNode, canonical_tag_name};
pub use tree::TagTree;
