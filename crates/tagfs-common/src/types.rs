//! Core identifier types for tagfs
//!
//! All entities are addressed by opaque 64-bit handles issued by a single
//! [`IdGenerator`] that keeps one monotone counter per entity kind. Handles
//! are never reused within a run; tag ids may be recycled through the tag
//! list's free list once a tag becomes empty.

use crate::limits::SCOPE_SOURCE_SPLIT;
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a device
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Get the raw handle value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Unique identifier for a file within a device
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
pub struct FileId(u64);

impl FileId {
    /// Get the raw handle value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Unique identifier for a tag
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
pub struct TagId(u64);

impl TagId {
    /// Get the raw handle value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Unique identifier for a scope
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Get the raw handle value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Unique identifier for a page in the page store
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
    From, Into,
)]
pub struct PageId(u64);

impl PageId {
    /// Get the raw handle value
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// A fully qualified file reference
///
/// A file id is only meaningful relative to its device: the same file id on
/// two devices names two unrelated files.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FileRef {
    /// Device the file lives on
    pub device: DeviceId,
    /// File id within the device
    pub file: FileId,
}

impl FileRef {
    /// Create a new file reference
    #[must_use]
    pub const fn new(device: DeviceId, file: FileId) -> Self {
        Self { device, file }
    }
}

/// A scope source: either a device or another scope
///
/// Externally both kinds share one 64-bit id space split by magnitude:
/// values below [`SCOPE_SOURCE_SPLIT`] are device ids, values at or above it
/// carry a scope id in the low 32 bits. The split is part of the external
/// contract; internally sources are always handled in decoded form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// All files on a device, intersected with the scope's filter tags
    Device(DeviceId),
    /// The full result of another scope, passed through unfiltered
    SubScope(ScopeId),
}

impl Source {
    /// Decode a raw source id from the shared id space
    #[must_use]
    pub fn decode(raw: u64) -> Self {
        if raw < SCOPE_SOURCE_SPLIT {
            Self::Device(DeviceId::from(raw))
        } else {
            Self::SubScope(ScopeId::from(raw & (SCOPE_SOURCE_SPLIT - 1)))
        }
    }

    /// Encode this source into the shared id space
    #[must_use]
    pub fn encode(self) -> u64 {
        match self {
            Self::Device(device) => device.as_u64(),
            Self::SubScope(scope) => SCOPE_SOURCE_SPLIT | scope.as_u64(),
        }
    }
}

/// Point-in-time copy of the generator counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSnapshot {
    /// Last issued device id
    pub device: u64,
    /// Last issued file id
    pub file: u64,
    /// Last issued tag id
    pub tag: u64,
    /// Last issued scope id
    pub scope: u64,
}

/// Monotone id generator with one counter per entity kind
///
/// Each call issues `previous + 1`. Counters are atomic and safe to share
/// across threads without external locking.
#[derive(Debug, Default)]
pub struct IdGenerator {
    device: AtomicU64,
    file: AtomicU64,
    tag: AtomicU64,
    scope: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next device id
    pub fn next_device(&self) -> DeviceId {
        DeviceId::from(self.device.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Issue the next file id
    pub fn next_file(&self) -> FileId {
        FileId::from(self.file.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Issue the next tag id
    pub fn next_tag(&self) -> TagId {
        TagId::from(self.tag.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Issue the next scope id
    pub fn next_scope(&self) -> ScopeId {
        ScopeId::from(self.scope.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Capture the current counter values
    #[must_use]
    pub fn snapshot(&self) -> IdSnapshot {
        IdSnapshot {
            device: self.device.load(Ordering::SeqCst),
            file: self.file.load(Ordering::SeqCst),
            tag: self.tag.load(Ordering::SeqCst),
            scope: self.scope.load(Ordering::SeqCst),
        }
    }

    /// Overwrite the counters from a snapshot
    ///
    /// Restore is authoritative: it always follows state restoration, so the
    /// snapshot values win even over live counters.
    pub fn restore(&self, snap: IdSnapshot) {
        self.device.store(snap.device, Ordering::SeqCst);
        self.file.store(snap.file, Ordering::SeqCst);
        self.tag.store(snap.tag, Ordering::SeqCst);
        self.scope.store(snap.scope, Ordering::SeqCst);
    }
}
