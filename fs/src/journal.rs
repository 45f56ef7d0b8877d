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

//! Write-ahead journal. Every mutation logs a pending record (flushed
//! before any cluster is touched), mutates, then flips the record to
//! committed. Mount-time replay walks the whole circular buffer and settles
//! every pending record by the per-operation rules.

use crc::{Crc, CRC_64_XZ};
use lfs_ds::BlockDevice;
use log::{info, warn};
use zerocopy::little_endian::{U32, U64};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::{
    cluster_to_sector,
    layout::{
        now_secs, str_to_field, JournalEntry, ENTRIES_PER_SECTOR, J_ABORTED, J_COMMITTED,
        J_PENDING, OP_CREATE, OP_DELETE, OP_LEVEL_CREATE, OP_LEVEL_LINK, OP_MKDIR, OP_UPDATE_DIR,
        OP_WRITE, SECTORS_PER_CLUSTER, TYPE_FREE,
    },
    LevelFs, Result,
};

/// Reflected ECMA-182 (polynomial 0xC96C5795D7870F42), init and xorout
/// all-ones. Fixed for the lifetime of a volume.
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// CRC-64 over everything but the trailing checksum field.
pub fn entry_checksum(entry: &JournalEntry) -> u64 {
    CRC64.checksum(&entry.as_bytes()[..size_of::<JournalEntry>() - 8])
}

impl<D: BlockDevice> LevelFs<D> {
    fn journal_capacity(&self) -> u64 {
        self.sb.journal_sectors.get() * ENTRIES_PER_SECTOR as u64
    }

    fn journal_slot(&self, slot: u64) -> (u64, usize) {
        let sector = cluster_to_sector(self.sb.journal_start_cluster.get())
            + slot / ENTRIES_PER_SECTOR as u64;
        (sector, (slot % ENTRIES_PER_SECTOR as u64) as usize)
    }

    /// Appends a pending record at the circular head and returns its
    /// transaction id. The sector write is durable before this returns,
    /// which is the write-ahead guarantee.
    pub fn log_operation(&mut self, op_type: u32, target_cluster: u64, metadata: &str) -> Result<u64> {
        self.tx_id += 1;

        let mut entry = JournalEntry::new_zeroed();
        entry.tx_id = U64::new(self.tx_id);
        entry.op_type = U32::new(op_type);
        entry.status = U32::new(J_PENDING);
        entry.target_cluster = U64::new(target_cluster);
        entry.timestamp = U64::new(now_secs());
        entry.metadata = str_to_field(metadata);
        entry.checksum = U64::new(entry_checksum(&entry));

        let (sector, index) = self.journal_slot(self.journal_head);
        let mut buffer = self.read_sector(sector)?;
        let offset = index * size_of::<JournalEntry>();
        buffer[offset..offset + size_of::<JournalEntry>()].copy_from_slice(entry.as_bytes());
        self.write_sector(sector, &buffer)?;

        self.journal_head = (self.journal_head + 1) % self.journal_capacity();
        Ok(self.tx_id)
    }

    /// Flips the record to committed and persists the superblock's last
    /// committed transaction id.
    pub fn commit_operation(&mut self, tx_id: u64) -> Result<()> {
        if self.set_status(tx_id, J_COMMITTED)? {
            self.sb.last_tx_id = U64::new(tx_id);
            self.write_superblock()?;
        }
        Ok(())
    }

    /// Flips the record to aborted. Disk state is not rolled back; the
    /// replay rules define what an aborted operation means.
    pub fn abort_operation(&mut self, tx_id: u64) -> Result<()> {
        self.set_status(tx_id, J_ABORTED)?;
        Ok(())
    }

    fn set_status(&mut self, tx_id: u64, status: u32) -> Result<bool> {
        let journal_start = cluster_to_sector(self.sb.journal_start_cluster.get());
        for sector_index in 0..self.sb.journal_sectors.get() {
            let sector = journal_start + sector_index;
            let mut buffer = self.read_sector(sector)?;
            for index in 0..ENTRIES_PER_SECTOR {
                let offset = index * size_of::<JournalEntry>();
                let mut entry = JournalEntry::read_from_bytes(
                    &buffer[offset..offset + size_of::<JournalEntry>()],
                )
                .unwrap();
                if entry.tx_id.get() != tx_id {
                    continue;
                }
                entry.status = U32::new(status);
                entry.checksum = U64::new(entry_checksum(&entry));
                buffer[offset..offset + size_of::<JournalEntry>()]
                    .copy_from_slice(entry.as_bytes());
                self.write_sector(sector, &buffer)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Runs `mutate` inside a journal transaction: pending before, committed
    /// after, aborted when it fails.
    pub(crate) fn with_txn<T>(
        &mut self,
        op_type: u32,
        target_cluster: u64,
        metadata: &str,
        mutate: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let tx_id = self.log_operation(op_type, target_cluster, metadata)?;
        match mutate(self) {
            Ok(value) => {
                self.commit_operation(tx_id)?;
                Ok(value)
            }
            Err(error) => {
                let _ = self.abort_operation(tx_id);
                Err(error)
            }
        }
    }

    /// Mount-time recovery. CRC-bad records are skipped (they never count
    /// as operations); pending records are settled by the per-op rules and
    /// rewritten as committed or aborted.
    pub fn replay_journal(&mut self) -> Result<()> {
        let journal_start = cluster_to_sector(self.sb.journal_start_cluster.get());
        let mut replayed = 0;
        for sector_index in 0..self.sb.journal_sectors.get() {
            let sector = journal_start + sector_index;
            let mut buffer = self.read_sector(sector)?;
            let mut dirty = false;
            for index in 0..ENTRIES_PER_SECTOR {
                let offset = index * size_of::<JournalEntry>();
                let mut entry = JournalEntry::read_from_bytes(
                    &buffer[offset..offset + size_of::<JournalEntry>()],
                )
                .unwrap();
                if entry.tx_id.get() == 0 {
                    continue;
                }
                if entry.checksum.get() != entry_checksum(&entry) {
                    warn!("journal: tx {} fails its checksum, skipped", entry.tx_id.get());
                    continue;
                }
                if entry.status.get() != J_PENDING {
                    continue;
                }

                // A rule that cannot even run (unreadable or insane target)
                // settles as aborted rather than failing the mount.
                let committed = self.replay_entry(&entry).unwrap_or(false);
                entry.status = U32::new(if committed { J_COMMITTED } else { J_ABORTED });
                entry.checksum = U64::new(entry_checksum(&entry));
                buffer[offset..offset + size_of::<JournalEntry>()]
                    .copy_from_slice(entry.as_bytes());
                dirty = true;
                replayed += 1;
                info!(
                    "journal: tx {} (op {}) replayed as {}",
                    entry.tx_id.get(),
                    entry.op_type.get(),
                    if committed { "committed" } else { "aborted" }
                );
            }
            if dirty {
                self.write_sector(sector, &buffer)?;
            }
        }
        if replayed > 0 {
            info!("journal: settled {replayed} pending operations");
        }
        Ok(())
    }

    /// Per-operation replay rule; true means the operation counts as done.
    fn replay_entry(&mut self, entry: &JournalEntry) -> Result<bool> {
        let target = entry.target_cluster.get();
        let name = entry.metadata_str();
        Ok(match entry.op_type.get() {
            // The entry either made it to disk (done) or the writer was
            // interrupted mid-create; a half-created entry is not
            // reconstructible, so absence aborts.
            OP_CREATE | OP_MKDIR => {
                !name.is_empty() && self.find_entry(target, &name)?.is_some()
            }
            // Write-ahead: data clusters precede the commit record, so the
            // file is in either the old or the new consistent state.
            OP_WRITE => true,
            // Finish the deletion if the entry survived; absence means it
            // already happened.
            OP_DELETE => {
                if name.is_empty() {
                    false
                } else {
                    if let Some((slot, mut found)) = self.find_entry(target, &name)? {
                        found.entry_type = TYPE_FREE;
                        self.store_entry(slot, &found)?;
                    }
                    true
                }
            }
            // Commit when the directory cluster still reads cleanly.
            OP_UPDATE_DIR => self.read_check(target).is_ok(),
            OP_LEVEL_CREATE | OP_LEVEL_LINK => {
                !name.is_empty() && self.find_level(target, &name)?.is_some()
            }
            other => {
                warn!("journal: unknown op type {other}, aborting tx {}", entry.tx_id.get());
                false
            }
        })
    }

    fn read_check(&self, cluster: u64) -> Result<()> {
        let first_sector = cluster_to_sector(cluster);
        for sector in first_sector..first_sector + SECTORS_PER_CLUSTER {
            self.read_sector(sector)?;
        }
        Ok(())
    }

    /// Background sweep: zero committed records older than `older_than` so
    /// the circular buffer never fills with history.
    pub fn sweep_journal(&mut self, older_than: u64) -> Result<u64> {
        let journal_start = cluster_to_sector(self.sb.journal_start_cluster.get());
        let mut swept = 0;
        for sector_index in 0..self.sb.journal_sectors.get() {
            let sector = journal_start + sector_index;
            let mut buffer = self.read_sector(sector)?;
            let mut dirty = false;
            for index in 0..ENTRIES_PER_SECTOR {
                let offset = index * size_of::<JournalEntry>();
                let entry = JournalEntry::ref_from_bytes(
                    &buffer[offset..offset + size_of::<JournalEntry>()],
                )
                .unwrap();
                if entry.status.get() == J_COMMITTED
                    && entry.tx_id.get() != 0
                    && entry.tx_id.get() < older_than
                {
                    buffer[offset..offset + size_of::<JournalEntry>()].fill(0);
                    dirty = true;
                    swept += 1;
                }
            }
            if dirty {
                self.write_sector(sector, &buffer)?;
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable() {
        let mut entry = JournalEntry::new_zeroed();
        entry.tx_id = U64::new(7);
        entry.op_type = U32::new(OP_CREATE);
        entry.metadata = str_to_field("hello");
        let checksum = entry_checksum(&entry);
        assert_eq!(checksum, entry_checksum(&entry));
        entry.metadata = str_to_field("hellO");
        assert_ne!(checksum, entry_checksum(&entry));
    }
}
