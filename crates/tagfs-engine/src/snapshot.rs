//! Engine snapshot codec
//!
//! The whole logical state of the engine — id counters, device registry,
//! inode table, tag list — is captured as one structured record and written
//! to the page store's metadata channel under the `"system"` key after every
//! mutation. Scopes and the tag tree are not part of the record: scopes are
//! ephemeral per run, the tree is rebuilt from the tag list's name→id map on
//! load.
//!
//! Wire format: a fixed-size header (magic, version, crc32c of the payload)
//! followed by the bincode-encoded record. Any decode failure surfaces as
//! [`Error::CorruptSnapshot`].

use crate::device::DeviceSnapshot;
use crate::inode::InodeTable;
use crate::tag::TagListSnapshot;
use serde::{Deserialize, Serialize};
use tagfs_common::{Error, IdSnapshot, Result};

/// Metadata key the snapshot is stored under
pub const SNAPSHOT_KEY: &str = "system";

/// Fixed-size header guarding the snapshot payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SnapshotHeader {
    magic: u32,
    version: u32,
    checksum: u32,
}

impl SnapshotHeader {
    const MAGIC: u32 = 0x5447_4653; // "TGFS"
    const VERSION: u32 = 1;
    const SIZE: usize = 12;

    fn new(checksum: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            checksum,
        }
    }

    fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::CorruptSnapshot("header too short".into()));
        }
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

        let magic = word(0);
        if magic != Self::MAGIC {
            return Err(Error::CorruptSnapshot("bad magic".into()));
        }
        let version = word(4);
        if version != Self::VERSION {
            return Err(Error::CorruptSnapshot(format!(
                "unsupported version {}",
                version
            )));
        }
        let checksum = word(8);
        Ok(Self {
            magic,
            version,
            checksum,
        })
    }
}

/// The full durable state of the engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Generator counters
    pub id_gen: IdSnapshot,
    /// Device registry, both directions
    pub devices: DeviceSnapshot,
    /// Inode table
    pub inodes: InodeTable,
    /// Tag inverted index, name map, and id free list
    pub tags: TagListSnapshot,
}

impl SystemSnapshot {
    /// Encode to the framed wire form
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("encode snapshot: {}", e)))?;

        let header = SnapshotHeader::new(crc32c::crc32c(&payload));

        let mut buf = Vec::with_capacity(SnapshotHeader::SIZE + payload.len());
        buf.extend_from_slice(&header.to_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decode from the framed wire form
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = SnapshotHeader::from_bytes(data)?;
        let payload = &data[SnapshotHeader::SIZE..];

        if crc32c::crc32c(payload) != header.checksum {
            return Err(Error::CorruptSnapshot("checksum mismatch".into()));
        }

        bincode::deserialize(payload)
            .map_err(|e| Error::CorruptSnapshot(format!("decode snapshot: {}", e)))
    }
}
