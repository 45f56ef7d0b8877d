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

//! The level store: each leveled directory is a chain of `VersionEntry`
//! records binding level names to content tables. Two directories naming
//! the same content table share that level's storage (the DAG case), so
//! removing a level never frees its content chain.

use lfs_ds::BlockDevice;
use log::debug;
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::{
    cluster_to_sector,
    entry::EntrySlot,
    layout::{
        str_to_field, validate_level_name, VersionEntry, ENTRIES_PER_SECTOR, MASTER_LEVEL,
        SECTORS_PER_CLUSTER,
    },
    Error, LevelFs, Result,
};

impl<D: BlockDevice> LevelFs<D> {
    /// Active levels of the directory whose level table starts at
    /// `dir_cluster`.
    pub fn read_levels(&self, dir_cluster: u64) -> Result<Vec<VersionEntry>> {
        let mut levels = Vec::new();
        self.scan_levels(dir_cluster, |_, entry| {
            if entry.active != 0 {
                levels.push(entry.clone());
            }
            Ok(false)
        })?;
        Ok(levels)
    }

    pub fn find_level(
        &self,
        dir_cluster: u64,
        name: &str,
    ) -> Result<Option<(EntrySlot, VersionEntry)>> {
        let mut found = None;
        self.scan_levels(dir_cluster, |slot, entry| {
            if entry.active != 0 && entry.name_str() == name {
                found = Some((slot, entry.clone()));
                return Ok(true);
            }
            Ok(false)
        })?;
        Ok(found)
    }

    /// Adds a level backed by a freshly allocated, empty content table.
    pub fn add_level(&self, dir_cluster: u64, name: &str) -> Result<u64> {
        validate_level_name(name)?;
        if self.find_level(dir_cluster, name)?.is_some() {
            return Err(Error::AlreadyExists(name.into()));
        }
        let content = self.allocate_cluster()?;
        self.clear_cluster(content)?;
        self.add_level_shared(dir_cluster, name, content)?;
        Ok(content)
    }

    /// Adds a level over an existing content table. This is how `link`
    /// makes one content chain visible from two directories.
    pub fn add_level_shared(&self, dir_cluster: u64, name: &str, content: u64) -> Result<()> {
        validate_level_name(name)?;
        if self.find_level(dir_cluster, name)?.is_some() {
            return Err(Error::AlreadyExists(name.into()));
        }

        let mut entry = VersionEntry::new_zeroed();
        entry.version_name = str_to_field(name);
        entry.content_table_cluster = U64::new(content);
        entry.active = 1;

        let mut slot = None;
        self.scan_levels(dir_cluster, |candidate, existing| {
            if existing.active == 0 {
                slot = Some(candidate);
                return Ok(true);
            }
            Ok(false)
        })?;
        let slot = match slot {
            Some(slot) => slot,
            None => {
                let chain = self.follow_chain(dir_cluster)?;
                let last = *chain.last().unwrap_or(&dir_cluster);
                let cluster = self.extend_chain(last)?;
                self.clear_cluster(cluster)?;
                debug!("extended level table {dir_cluster} with cluster {cluster}");
                EntrySlot {
                    sector: cluster_to_sector(cluster),
                    index: 0,
                }
            }
        };
        self.store_level(slot, &entry)
    }

    /// Deactivates a level slot. The content chain stays: another directory
    /// may still reference it.
    pub fn remove_level(&self, dir_cluster: u64, name: &str) -> Result<()> {
        if name == MASTER_LEVEL {
            return Err(Error::ProtectedLevel(name.into()));
        }
        let (slot, mut entry) = self
            .find_level(dir_cluster, name)?
            .ok_or_else(|| Error::NotFound(name.into()))?;
        entry.active = 0;
        self.store_level(slot, &entry)
    }

    pub fn rename_level(&self, dir_cluster: u64, old_name: &str, new_name: &str) -> Result<()> {
        validate_level_name(new_name)?;
        if self.find_level(dir_cluster, new_name)?.is_some() {
            return Err(Error::AlreadyExists(new_name.into()));
        }
        let (slot, mut entry) = self
            .find_level(dir_cluster, old_name)?
            .ok_or_else(|| Error::NotFound(old_name.into()))?;
        entry.version_name = str_to_field(new_name);
        self.store_level(slot, &entry)
    }

    /// The content cluster of `name`, creating the level when absent. Used
    /// to bootstrap `master` lazily.
    pub(crate) fn ensure_level(&self, dir_cluster: u64, name: &str) -> Result<u64> {
        match self.find_level(dir_cluster, name)? {
            Some((_, entry)) => Ok(entry.content_table_cluster.get()),
            None => self.add_level(dir_cluster, name),
        }
    }

    fn store_level(&self, slot: EntrySlot, entry: &VersionEntry) -> Result<()> {
        let mut buffer = self.read_sector(slot.sector)?;
        let offset = slot.index * size_of::<VersionEntry>();
        buffer[offset..offset + size_of::<VersionEntry>()].copy_from_slice(entry.as_bytes());
        self.write_sector(slot.sector, &buffer)
    }

    fn scan_levels(
        &self,
        dir_cluster: u64,
        mut visit: impl FnMut(EntrySlot, &VersionEntry) -> Result<bool>,
    ) -> Result<()> {
        for cluster in self.follow_chain(dir_cluster)? {
            let first_sector = cluster_to_sector(cluster);
            for sector in first_sector..first_sector + SECTORS_PER_CLUSTER {
                let buffer = self.read_sector(sector)?;
                for index in 0..ENTRIES_PER_SECTOR {
                    let offset = index * size_of::<VersionEntry>();
                    let entry = VersionEntry::ref_from_bytes(
                        &buffer[offset..offset + size_of::<VersionEntry>()],
                    )
                    .unwrap();
                    if visit(EntrySlot { sector, index }, entry)? {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }
}
