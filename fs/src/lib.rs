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

pub use lfs_err::*;

pub mod context;
pub mod dir;
pub mod entry;
pub mod journal;
pub mod lat;
pub mod layout;
pub mod ops;
pub mod path;
pub mod superblock;

use lfs_ds::BlockDevice;

use crate::{
    context::NavContext,
    layout::{SuperBlock, CLUSTER_SIZE, SECTORS_PER_CLUSTER, SECTOR_SIZE},
};

/// A mounted leveled file system over a block device.
///
/// Construction goes through [`superblock`]: `format` stamps a fresh volume,
/// `mount` validates the superblock (falling back to the backup copy),
/// replays the journal and lands the navigation context at the root's
/// `master` level.
pub struct LevelFs<D: BlockDevice> {
    device: D,
    sb: SuperBlock,
    /// Next circular slot the journal writes to.
    journal_head: u64,
    /// Last transaction id handed out; restored from the superblock.
    tx_id: u64,
    ctx: NavContext,
}

pub(crate) fn cluster_to_sector(cluster: u64) -> u64 {
    cluster * SECTORS_PER_CLUSTER
}

impl<D: BlockDevice> LevelFs<D> {
    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    pub fn context(&self) -> &NavContext {
        &self.ctx
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub(crate) fn read_sector(&self, sector: u64) -> Result<[u8; SECTOR_SIZE]> {
        let mut buffer = [0u8; SECTOR_SIZE];
        self.device.read_sectors(sector, &mut buffer)?;
        Ok(buffer)
    }

    pub(crate) fn write_sector(&self, sector: u64, buffer: &[u8; SECTOR_SIZE]) -> Result<()> {
        self.device.write_sectors(sector, buffer)
    }

    pub(crate) fn read_cluster(&self, cluster: u64) -> Result<[u8; CLUSTER_SIZE]> {
        let mut buffer = [0u8; CLUSTER_SIZE];
        self.device
            .read_sectors(cluster_to_sector(cluster), &mut buffer)?;
        Ok(buffer)
    }

    pub(crate) fn write_cluster(&self, cluster: u64, buffer: &[u8; CLUSTER_SIZE]) -> Result<()> {
        self.device.write_sectors(cluster_to_sector(cluster), buffer)
    }

    pub(crate) fn clear_cluster(&self, cluster: u64) -> Result<()> {
        self.write_cluster(cluster, &[0u8; CLUSTER_SIZE])
    }
}
