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

//! Superblock lifecycle: formatting a fresh volume, validating on mount,
//! falling back to the backup copy, and keeping both copies in step.

use lfs_ds::BlockDevice;
use log::{info, warn};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::{
    cluster_to_sector,
    context::NavContext,
    layout::{
        str_to_field, SuperBlock, VersionEntry, CLUSTER_SIZE, LAT_END, LAT_FREE, LFS_MAGIC,
        LFS_VERSION, MASTER_LEVEL, SECTORS_PER_CLUSTER, SECTOR_SIZE,
    },
    Error, LevelFs, Result,
};

/// Journal capacity chosen at format time.
const JOURNAL_ENTRIES: u64 = 1024;
/// Sectors batched per write while initializing the allocation table.
const FORMAT_BATCH_SECTORS: u64 = 64;

impl<D: BlockDevice> LevelFs<D> {
    /// Stamps an empty leveled file system onto `device`.
    ///
    /// Geometry, first to last: superblock cluster, allocation table,
    /// journal, root level table, root content table, data area, backup
    /// superblock in the final cluster.
    pub fn format(device: &D, label: &str) -> Result<()> {
        let total_sectors = device.size_in_bytes()? / SECTOR_SIZE as u64;
        let total_clusters = total_sectors / SECTORS_PER_CLUSTER;

        let lat_start_cluster = 1u64;
        let lat_sectors = (total_clusters * 8).div_ceil(SECTOR_SIZE as u64);
        let lat_clusters = lat_sectors.div_ceil(SECTORS_PER_CLUSTER);

        let journal_sectors = (JOURNAL_ENTRIES * 64).div_ceil(SECTOR_SIZE as u64);
        let journal_start_cluster = lat_start_cluster + lat_clusters;
        let journal_clusters = journal_sectors.div_ceil(SECTORS_PER_CLUSTER);

        let root_dir_cluster = journal_start_cluster + journal_clusters;
        let root_content_cluster = root_dir_cluster + 1;
        let backup_sb_cluster = total_clusters.saturating_sub(1);

        if root_content_cluster + 1 >= backup_sb_cluster {
            return Err(Error::NoSpace);
        }

        let mut sb = SuperBlock::new_zeroed();
        sb.magic = U32::new(LFS_MAGIC);
        sb.version = U32::new(LFS_VERSION);
        sb.total_sectors = U64::new(total_sectors);
        sb.cluster_size = U32::new(CLUSTER_SIZE as u32);
        sb.total_clusters = U64::new(total_clusters);
        sb.lat_start_cluster = U64::new(lat_start_cluster);
        sb.lat_sectors = U64::new(lat_sectors);
        sb.journal_start_cluster = U64::new(journal_start_cluster);
        sb.journal_sectors = U64::new(journal_sectors);
        sb.root_dir_cluster = U64::new(root_dir_cluster);
        sb.backup_sb_cluster = U64::new(backup_sb_cluster);
        sb.volume_name = str_to_field(label);

        device.write_sectors(0, sb.as_bytes())?;
        device.write_sectors(cluster_to_sector(backup_sb_cluster), sb.as_bytes())?;

        info!("initializing allocation table ({lat_sectors} sectors)");
        let reserved = |cluster: u64| {
            cluster == 0
                || cluster == backup_sb_cluster
                || (cluster >= lat_start_cluster && cluster < lat_start_cluster + lat_clusters)
                || (cluster >= journal_start_cluster
                    && cluster < journal_start_cluster + journal_clusters)
                || cluster == root_dir_cluster
                || cluster == root_content_cluster
        };
        let lat_start_sector = cluster_to_sector(lat_start_cluster);
        let entries_per_sector = (SECTOR_SIZE / 8) as u64;
        let mut batch = vec![0u8; (FORMAT_BATCH_SECTORS * SECTOR_SIZE as u64) as usize];
        let mut sector_index = 0;
        while sector_index < lat_sectors {
            let batch_sectors = FORMAT_BATCH_SECTORS.min(lat_sectors - sector_index);
            let batch_len = (batch_sectors * SECTOR_SIZE as u64) as usize;
            batch[..batch_len].fill(0);
            let first_cluster = sector_index * entries_per_sector;
            for slot in 0..batch_sectors * entries_per_sector {
                let cluster = first_cluster + slot;
                let value = if cluster < total_clusters && reserved(cluster) {
                    LAT_END
                } else {
                    LAT_FREE
                };
                let offset = (slot * 8) as usize;
                batch[offset..offset + 8].copy_from_slice(U64::new(value).as_bytes());
            }
            device.write_sectors(lat_start_sector + sector_index, &batch[..batch_len])?;
            if sector_index % (lat_sectors / 10 + 1) == 0 {
                info!("  allocation table {}%", sector_index * 100 / lat_sectors);
            }
            sector_index += batch_sectors;
        }

        let journal_start_sector = cluster_to_sector(journal_start_cluster);
        let mut remaining = journal_sectors;
        let zeros = vec![0u8; (FORMAT_BATCH_SECTORS * SECTOR_SIZE as u64) as usize];
        while remaining > 0 {
            let batch_sectors = FORMAT_BATCH_SECTORS.min(remaining);
            device.write_sectors(
                journal_start_sector + journal_sectors - remaining,
                &zeros[..(batch_sectors * SECTOR_SIZE as u64) as usize],
            )?;
            remaining -= batch_sectors;
        }

        // Root level table: one active "master" level over an empty content
        // table.
        let mut root = [0u8; CLUSTER_SIZE];
        let mut master = VersionEntry::new_zeroed();
        master.version_name = str_to_field(MASTER_LEVEL);
        master.content_table_cluster = U64::new(root_content_cluster);
        master.active = 1;
        root[..64].copy_from_slice(master.as_bytes());
        device.write_sectors(cluster_to_sector(root_dir_cluster), &root)?;
        device.write_sectors(cluster_to_sector(root_content_cluster), &[0u8; CLUSTER_SIZE])?;

        device.flush()?;
        info!(
            "format complete: {total_clusters} clusters, journal of {JOURNAL_ENTRIES} entries"
        );
        Ok(())
    }

    /// Attaches to a formatted volume: superblock validation (with backup
    /// fallback), journal replay, and navigation to the root `master` level.
    pub fn mount(device: D) -> Result<Self> {
        let mut primary = [0u8; SECTOR_SIZE];
        device.read_sectors(0, &mut primary)?;
        let mut sb = SuperBlock::read_from_bytes(&primary).unwrap();

        if sb.magic.get() != LFS_MAGIC {
            sb = Self::recover_superblock(&device)?;
        }
        Self::validate(&sb, device.size_in_bytes()?)?;

        let root_dir = sb.root_dir_cluster.get();
        let tx_id = sb.last_tx_id.get();
        let mut fs = Self {
            device,
            sb,
            journal_head: 0,
            tx_id,
            ctx: NavContext::new(root_dir, 0),
        };
        fs.replay_journal()?;

        let content = fs.ensure_level(root_dir, MASTER_LEVEL)?;
        fs.ctx = NavContext::new(root_dir, content);
        info!(
            "mounted '{}', {} clusters",
            fs.sb.volume_name_str(),
            fs.sb.total_clusters.get()
        );
        Ok(fs)
    }

    /// The backup superblock lives in the last cluster; its location is
    /// derived from the device size because the primary cannot be trusted
    /// here. A valid backup is copied back over the primary.
    fn recover_superblock(device: &D) -> Result<SuperBlock> {
        let total_clusters = device.size_in_bytes()? / CLUSTER_SIZE as u64;
        let backup_cluster = total_clusters.saturating_sub(1);
        let mut buffer = [0u8; SECTOR_SIZE];
        device.read_sectors(cluster_to_sector(backup_cluster), &mut buffer)?;
        let sb = SuperBlock::read_from_bytes(&buffer).unwrap();
        if sb.magic.get() != LFS_MAGIC || sb.backup_sb_cluster.get() != backup_cluster {
            return Err(Error::FilesystemCorrupt(
                "both superblock copies are invalid".into(),
            ));
        }
        warn!("primary superblock corrupt, restored from cluster {backup_cluster}");
        device.write_sectors(0, sb.as_bytes())?;
        Ok(sb)
    }

    fn validate(sb: &SuperBlock, device_bytes: u64) -> Result<()> {
        if sb.version.get() != LFS_VERSION {
            return Err(Error::FilesystemCorrupt(format!(
                "unsupported version {}",
                sb.version.get()
            )));
        }
        if sb.cluster_size.get() as usize != CLUSTER_SIZE {
            return Err(Error::FilesystemCorrupt(format!(
                "unsupported cluster size {}",
                sb.cluster_size.get()
            )));
        }
        if sb.total_sectors.get() > device_bytes / SECTOR_SIZE as u64 {
            return Err(Error::FilesystemCorrupt(
                "volume is larger than its device".into(),
            ));
        }
        let minimum = sb.lat_sectors.get()
            + sb.journal_sectors.get()
            + 2 * SECTORS_PER_CLUSTER
            + 2;
        if sb.total_sectors.get() < minimum {
            return Err(Error::FilesystemCorrupt(
                "volume too small for its own metadata".into(),
            ));
        }
        let total_clusters = sb.total_clusters.get();
        if sb.root_dir_cluster.get() + 1 >= total_clusters
            || sb.backup_sb_cluster.get() >= total_clusters
        {
            return Err(Error::FilesystemCorrupt(
                "metadata region outside the volume".into(),
            ));
        }
        Ok(())
    }

    /// Persists the in-memory superblock to both on-disk locations.
    pub(crate) fn write_superblock(&self) -> Result<()> {
        self.device.write_sectors(0, self.sb.as_bytes())?;
        let backup = self.sb.backup_sb_cluster.get();
        if backup != 0 {
            self.device
                .write_sectors(cluster_to_sector(backup), self.sb.as_bytes())?;
        }
        Ok(())
    }
}

impl SuperBlock {
    pub fn volume_name_str(&self) -> String {
        crate::layout::str_from_field(&self.volume_name)
    }
}
