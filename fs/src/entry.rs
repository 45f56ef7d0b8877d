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

//! Fixed-size directory entries inside a content chain: scanning, lookup,
//! free-slot search and slot-addressed rewrites.

use lfs_ds::BlockDevice;
use log::debug;
use zerocopy::{FromBytes, IntoBytes};

use crate::{
    cluster_to_sector,
    layout::{DirEntry, ENTRIES_PER_SECTOR, SECTORS_PER_CLUSTER, TYPE_FREE},
    LevelFs, Result,
};

/// Stable address of one 64-byte record: absolute sector plus slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntrySlot {
    pub sector: u64,
    pub index: usize,
}

impl<D: BlockDevice> LevelFs<D> {
    /// All non-free entries of the content chain rooted at `content`.
    pub fn read_dir_entries(&self, content: u64) -> Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        self.scan_entries(content, |_, entry| {
            if entry.entry_type != TYPE_FREE {
                entries.push(entry.clone());
            }
            Ok(false)
        })?;
        Ok(entries)
    }

    /// First non-free entry named `name`, with its slot.
    pub fn find_entry(&self, content: u64, name: &str) -> Result<Option<(EntrySlot, DirEntry)>> {
        let mut found = None;
        self.scan_entries(content, |slot, entry| {
            if entry.entry_type != TYPE_FREE && entry.name_str() == name {
                found = Some((slot, entry.clone()));
                return Ok(true);
            }
            Ok(false)
        })?;
        Ok(found)
    }

    /// First reusable slot of the chain; when every slot is taken the chain
    /// is extended by a zeroed cluster and its first slot returned.
    pub fn find_free_slot(&self, content: u64) -> Result<EntrySlot> {
        let mut found = None;
        self.scan_entries(content, |slot, entry| {
            if entry.entry_type == TYPE_FREE {
                found = Some(slot);
                return Ok(true);
            }
            Ok(false)
        })?;
        if let Some(slot) = found {
            return Ok(slot);
        }

        let chain = self.follow_chain(content)?;
        let last = *chain.last().unwrap_or(&content);
        let cluster = self.extend_chain(last)?;
        self.clear_cluster(cluster)?;
        debug!("extended directory chain {content} with cluster {cluster}");
        Ok(EntrySlot {
            sector: cluster_to_sector(cluster),
            index: 0,
        })
    }

    pub fn load_entry(&self, slot: EntrySlot) -> Result<DirEntry> {
        let buffer = self.read_sector(slot.sector)?;
        let offset = slot.index * size_of::<DirEntry>();
        Ok(DirEntry::read_from_bytes(&buffer[offset..offset + size_of::<DirEntry>()]).unwrap())
    }

    /// Read-modify-write of the sector holding `slot`.
    pub fn store_entry(&self, slot: EntrySlot, entry: &DirEntry) -> Result<()> {
        let mut buffer = self.read_sector(slot.sector)?;
        let offset = slot.index * size_of::<DirEntry>();
        buffer[offset..offset + size_of::<DirEntry>()].copy_from_slice(entry.as_bytes());
        self.write_sector(slot.sector, &buffer)
    }

    /// Walks every slot of the content chain; `visit` returns true to stop.
    pub(crate) fn scan_entries(
        &self,
        content: u64,
        mut visit: impl FnMut(EntrySlot, &DirEntry) -> Result<bool>,
    ) -> Result<()> {
        for cluster in self.follow_chain(content)? {
            let first_sector = cluster_to_sector(cluster);
            for sector in first_sector..first_sector + SECTORS_PER_CLUSTER {
                let buffer = self.read_sector(sector)?;
                for index in 0..ENTRIES_PER_SECTOR {
                    let offset = index * size_of::<DirEntry>();
                    let entry =
                        DirEntry::ref_from_bytes(&buffer[offset..offset + size_of::<DirEntry>()])
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
