// Copyright 2024 Kevin Ludwig
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use lfs_err::{Error, Result};
use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

pub const SECTOR_SIZE: usize = 512;
/// Unit of allocation: eight contiguous sectors.
pub const CLUSTER_SIZE: usize = 4096;
pub const SECTORS_PER_CLUSTER: u64 = 8;

/// "LFS2", little-endian.
pub const LFS_MAGIC: u32 = 0x4C46_5332;
pub const LFS_VERSION: u32 = 2;

/// Allocation table sentinel: the cluster is free.
pub const LAT_FREE: u64 = 0x0000_0000_0000_0000;
/// Allocation table sentinel: last cluster of its chain.
pub const LAT_END: u64 = 0xFFFF_FFFF_FFFF_FFFF;
/// Allocation table sentinel: unusable cluster.
pub const LAT_BAD: u64 = 0xFFFF_FFFF_FFFF_FFFE;

/// Hard bound on any chain walk; a chain longer than this is corrupt.
pub const CHAIN_HOP_LIMIT: usize = 1_000_000;

/// Fixed-size on-disk records per 512-byte sector. `DirEntry`,
/// `VersionEntry` and `JournalEntry` are all 64 bytes.
pub const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / 64;

pub const OP_CREATE: u32 = 1;
pub const OP_WRITE: u32 = 2;
pub const OP_DELETE: u32 = 3;
pub const OP_UPDATE_DIR: u32 = 4;
pub const OP_MKDIR: u32 = 5;
pub const OP_LEVEL_CREATE: u32 = 6;
pub const OP_LEVEL_LINK: u32 = 7;

pub const J_PENDING: u32 = 0;
pub const J_COMMITTED: u32 = 1;
pub const J_ABORTED: u32 = 2;

pub const TYPE_FREE: u8 = 0;
pub const TYPE_FILE: u8 = 1;
pub const TYPE_LEVELED_DIR: u8 = 2;
pub const TYPE_SYMLINK: u8 = 3;
pub const TYPE_HARDLINK: u8 = 4;
pub const TYPE_LEVEL_MOUNT: u8 = 5;

/// Permission bits in the low byte of `DirEntry::attributes`. The remaining
/// bits are reserved and preserved across rewrites.
pub const PERM_EXEC: u32 = 0x1;
pub const PERM_WRITE: u32 = 0x2;
pub const PERM_READ: u32 = 0x4;
pub const PERM_DEFAULT_FILE: u32 = PERM_READ | PERM_WRITE;
pub const PERM_DEFAULT_DIR: u32 = PERM_READ | PERM_WRITE | PERM_EXEC;
pub const PERM_MASK: u32 = 0x7;

/// Every directory is born with (or lazily grows) this level.
pub const MASTER_LEVEL: &str = "master";

pub const MAX_NAME_LEN: usize = 23;
pub const MAX_LEVEL_NAME_LEN: usize = 31;

/// On-disk superblock, sector 0 and mirrored at `backup_sb_cluster * 8`.
/// 512 bytes exactly; any layout change bumps `version`.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct SuperBlock {
    /// Shall be `LFS_MAGIC`. A mismatch on mount triggers the backup copy.
    pub magic: U32,
    pub version: U32,
    /// Count of 512-byte sectors the volume spans.
    pub total_sectors: U64,
    /// Bytes per cluster. Shall be 4096.
    pub cluster_size: U32,
    pub _pad0: [u8; 4],
    /// `total_sectors / 8`, stored for convenience.
    pub total_clusters: U64,
    /// First cluster of the allocation table region.
    pub lat_start_cluster: U64,
    /// Count of sectors the allocation table spans.
    pub lat_sectors: U64,
    /// First cluster of the journal region.
    pub journal_start_cluster: U64,
    /// Count of sectors the journal spans.
    pub journal_sectors: U64,
    /// Transaction id of the last committed journal record.
    pub last_tx_id: U64,
    /// Level table of the root directory.
    pub root_dir_cluster: U64,
    /// Cluster holding the mirrored superblock, last cluster of the volume.
    pub backup_sb_cluster: U64,
    /// NUL-terminated volume label.
    pub volume_name: [u8; 32],
    pub reserved: [u8; 392],
}

/// One slot of a directory's level table. 64 bytes, eight per sector. An
/// inactive slot is reusable.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct VersionEntry {
    /// NUL-terminated level name, unique within the owning directory.
    pub version_name: [u8; 32],
    /// Head of this level's content table. The same cluster may appear in
    /// level tables of different directories (shared level).
    pub content_table_cluster: U64,
    /// Reserved.
    pub parent_level_id: U64,
    /// Reserved.
    pub level_id: U64,
    pub flags: U32,
    /// 0 marks a free slot.
    pub active: u8,
    pub _pad0: [u8; 3],
}

/// One slot of a content table. 64 bytes, eight per sector.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirEntry {
    /// NUL-terminated; at most `MAX_NAME_LEN` usable bytes.
    pub name: [u8; 32],
    /// One of the `TYPE_*` constants; `TYPE_FREE` marks a reusable slot.
    pub entry_type: u8,
    /// Data chain for a file/hardlink, level table for a leveled directory,
    /// target-path cluster for a symlink.
    pub start_cluster: U64,
    /// Byte length for file-like entries.
    pub size: U64,
    /// Permission bits (`PERM_*`); upper bits reserved.
    pub attributes: U32,
    pub create_time: U32,
    pub mod_time: U32,
    /// Count of entries sharing `start_cluster`; the data chain is freed
    /// when the last one goes.
    pub ref_count: U16,
    pub _pad0: [u8; 1],
}

/// One journal record. 64 bytes, eight per sector; `checksum` is CRC-64
/// over the first 56 bytes.
#[repr(C)]
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct JournalEntry {
    /// 0 marks an unused slot.
    pub tx_id: U64,
    /// One of the `OP_*` constants.
    pub op_type: U32,
    /// One of the `J_*` constants.
    pub status: U32,
    /// Content cluster the operation mutates.
    pub target_cluster: U64,
    pub timestamp: U64,
    /// Operation argument, typically a NUL-terminated entry name.
    pub metadata: [u8; 24],
    pub checksum: U64,
}

impl DirEntry {
    pub fn name_str(&self) -> String {
        str_from_field(&self.name)
    }

    pub fn perms(&self) -> u32 {
        self.attributes.get() & PERM_MASK
    }
}

impl VersionEntry {
    pub fn name_str(&self) -> String {
        str_from_field(&self.version_name)
    }
}

impl JournalEntry {
    pub fn metadata_str(&self) -> String {
        str_from_field(&self.metadata)
    }
}

/// Decodes a NUL-terminated fixed field, tolerating junk after the NUL.
pub fn str_from_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// Copies `value` into a NUL-padded fixed field.
pub fn str_to_field<const N: usize>(value: &str) -> [u8; N] {
    let mut field = [0u8; N];
    let bytes = value.as_bytes();
    field[..bytes.len().min(N - 1)].copy_from_slice(&bytes[..bytes.len().min(N - 1)]);
    field
}

const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// An entry name: non-empty, at most 23 bytes, no path or wildcard
/// characters.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(name.into()));
    }
    if name.chars().any(|c| FORBIDDEN.contains(&c) || c.is_control()) {
        return Err(Error::InvalidName(name.into()));
    }
    Ok(())
}

/// A level name: same character set as entry names, up to 31 bytes.
pub fn validate_level_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_LEVEL_NAME_LEN {
        return Err(Error::InvalidName(name.into()));
    }
    if name.chars().any(|c| FORBIDDEN.contains(&c) || c.is_control()) {
        return Err(Error::InvalidName(name.into()));
    }
    Ok(())
}

pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_are_fixed() {
        assert_eq!(size_of::<SuperBlock>(), SECTOR_SIZE);
        assert_eq!(size_of::<VersionEntry>(), 64);
        assert_eq!(size_of::<DirEntry>(), 64);
        assert_eq!(size_of::<JournalEntry>(), 64);
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"x".repeat(23)).is_ok());
        assert!(validate_name(&"x".repeat(24)).is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("a:b").is_err());
        assert!(validate_name("what?").is_err());
        assert!(validate_level_name(&"l".repeat(31)).is_ok());
        assert!(validate_level_name(&"l".repeat(32)).is_err());
    }

    #[test]
    fn field_round_trip() {
        let field: [u8; 32] = str_to_field("master");
        assert_eq!(str_from_field(&field), "master");
        let long: [u8; 8] = str_to_field("overlong-name");
        assert_eq!(str_from_field(&long), "overlon");
    }
}
