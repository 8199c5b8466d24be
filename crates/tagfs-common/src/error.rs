//! Error types for tagfs
//!
//! This module defines the common error type used throughout the engine.

use crate::types::{DeviceId, FileId, PageId, ScopeId, TagId};
use thiserror::Error;

/// Common result type for tagfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for tagfs
#[derive(Debug, Error)]
pub enum Error {
    // Entity lookup errors
    #[error("device not found: {device_id}")]
    DeviceNotFound { device_id: DeviceId },

    #[error("file {file_id} not found on device {device_id}")]
    FileNotFound {
        device_id: DeviceId,
        file_id: FileId,
    },

    #[error("tag not found: {tag_id}")]
    TagNotFound { tag_id: TagId },

    #[error("file {file_id} not in tag {tag_id}")]
    FileNotInTag { file_id: FileId, tag_id: TagId },

    #[error("scope not found: {scope_id}")]
    ScopeNotFound { scope_id: ScopeId },

    // Scope graph errors
    #[error("adding source would create a cycle")]
    CycleDetected,

    #[error("scope cannot reference itself")]
    SelfReference,

    // Page store errors
    #[error("page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("offset {offset} out of page range")]
    OffsetOutOfRange { offset: i64 },

    // Persistence errors
    #[error("metadata key not found: {0}")]
    MetadataNotFound(String),

    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::FileNotFound { .. }
                | Self::TagNotFound { .. }
                | Self::ScopeNotFound { .. }
                | Self::PageNotFound { .. }
                | Self::MetadataNotFound(_)
        )
    }
}
