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

//! Level Allocation Table: a flat array of 64-bit next-cluster pointers.
//! Entry `i` names the cluster following `i` in its chain, or a sentinel.

use std::collections::HashSet;

use lfs_ds::BlockDevice;
use log::debug;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    cluster_to_sector,
    layout::{CHAIN_HOP_LIMIT, LAT_BAD, LAT_END, LAT_FREE, SECTOR_SIZE},
    Error, LevelFs, Result,
};

const ENTRIES_PER_LAT_SECTOR: u64 = (SECTOR_SIZE / size_of::<u64>()) as u64;

impl<D: BlockDevice> LevelFs<D> {
    /// One allocation-table entry; a single sector read.
    pub fn lat_get(&self, cluster: u64) -> Result<u64> {
        let (sector, offset) = self.lat_locate(cluster);
        let buffer = self.read_sector(sector)?;
        Ok(U64::read_from_bytes(&buffer[offset..offset + 8])
            .unwrap()
            .get())
    }

    /// Read-modify-write of the sector holding entry `cluster`.
    pub fn lat_set(&self, cluster: u64, value: u64) -> Result<()> {
        let (sector, offset) = self.lat_locate(cluster);
        let mut buffer = self.read_sector(sector)?;
        buffer[offset..offset + 8].copy_from_slice(U64::new(value).as_bytes());
        self.write_sector(sector, &buffer)
    }

    fn lat_locate(&self, cluster: u64) -> (u64, usize) {
        let byte_offset = cluster * size_of::<u64>() as u64;
        let sector = cluster_to_sector(self.sb.lat_start_cluster.get()) + byte_offset / SECTOR_SIZE as u64;
        (sector, (byte_offset % SECTOR_SIZE as u64) as usize)
    }

    /// Linear scan for a free entry; the winner is marked end-of-chain.
    pub fn allocate_cluster(&self) -> Result<u64> {
        let lat_start = cluster_to_sector(self.sb.lat_start_cluster.get());
        let total_clusters = self.sb.total_clusters.get();
        for sector_index in 0..self.sb.lat_sectors.get() {
            let buffer = self.read_sector(lat_start + sector_index)?;
            for slot in 0..ENTRIES_PER_LAT_SECTOR {
                let offset = (slot * 8) as usize;
                let value = U64::read_from_bytes(&buffer[offset..offset + 8]).unwrap().get();
                if value != LAT_FREE {
                    continue;
                }
                let cluster = sector_index * ENTRIES_PER_LAT_SECTOR + slot;
                // The tail of the last LAT sector may describe clusters
                // beyond the volume.
                if cluster == 0 || cluster >= total_clusters {
                    continue;
                }
                self.lat_set(cluster, LAT_END)?;
                debug!("allocated cluster {cluster}");
                return Ok(cluster);
            }
        }
        Err(Error::NoSpace)
    }

    /// Every cluster of the chain rooted at `start`, in order.
    pub fn follow_chain(&self, start: u64) -> Result<Vec<u64>> {
        ClusterChain::new(self, start).collect()
    }

    /// Allocates a cluster and hangs it off `last_in_chain`.
    pub fn extend_chain(&self, last_in_chain: u64) -> Result<u64> {
        let cluster = self.allocate_cluster()?;
        self.lat_set(last_in_chain, cluster)?;
        Ok(cluster)
    }

    /// Walks the chain releasing every cluster.
    pub fn free_chain(&self, start: u64) -> Result<()> {
        let chain = self.follow_chain(start)?;
        for cluster in &chain {
            self.lat_set(*cluster, LAT_FREE)?;
        }
        debug!("freed chain of {} clusters at {start}", chain.len());
        Ok(())
    }

    /// Clusters the allocator could still hand out.
    pub fn free_cluster_count(&self) -> Result<u64> {
        let lat_start = cluster_to_sector(self.sb.lat_start_cluster.get());
        let total_clusters = self.sb.total_clusters.get();
        let mut free = 0;
        for sector_index in 0..self.sb.lat_sectors.get() {
            let buffer = self.read_sector(lat_start + sector_index)?;
            for slot in 0..ENTRIES_PER_LAT_SECTOR {
                let cluster = sector_index * ENTRIES_PER_LAT_SECTOR + slot;
                if cluster == 0 || cluster >= total_clusters {
                    continue;
                }
                let offset = (slot * 8) as usize;
                if U64::read_from_bytes(&buffer[offset..offset + 8]).unwrap().get() == LAT_FREE {
                    free += 1;
                }
            }
        }
        Ok(free)
    }
}

/// Lazy walk over a cluster chain. Yields each cluster number; revisiting a
/// cluster or exceeding the hop cap surfaces as `FilesystemCorrupt` so a
/// damaged table cannot loop a caller forever.
pub struct ClusterChain<'fs, D: BlockDevice> {
    fs: &'fs LevelFs<D>,
    next: u64,
    visited: HashSet<u64>,
    failed: bool,
}

impl<'fs, D: BlockDevice> ClusterChain<'fs, D> {
    pub fn new(fs: &'fs LevelFs<D>, start: u64) -> Self {
        Self {
            fs,
            next: start,
            visited: HashSet::new(),
            failed: false,
        }
    }
}

impl<D: BlockDevice> Iterator for ClusterChain<'_, D> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let cluster = self.next;
        if cluster == LAT_FREE || cluster == LAT_END || cluster == LAT_BAD {
            return None;
        }
        if cluster >= self.fs.sb.total_clusters.get() {
            self.failed = true;
            return Some(Err(Error::FilesystemCorrupt(format!(
                "chain points at cluster {cluster} beyond the volume"
            ))));
        }
        if !self.visited.insert(cluster) {
            self.failed = true;
            return Some(Err(Error::FilesystemCorrupt(format!(
                "cycle through cluster {cluster}"
            ))));
        }
        if self.visited.len() > CHAIN_HOP_LIMIT {
            self.failed = true;
            return Some(Err(Error::FilesystemCorrupt(
                "chain exceeds the hop bound".into(),
            )));
        }
        match self.fs.lat_get(cluster) {
            Ok(next) => {
                self.next = next;
                Some(Ok(cluster))
            }
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}
