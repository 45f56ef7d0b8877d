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

mod common;

use lfs_ds::BlockDevice;
use lfs_ds_file::FileDevice;
use lfs_fs::{
    layout::{J_ABORTED, J_COMMITTED, OP_CREATE, OP_DELETE, OP_WRITE},
    ops::CreateKind,
    Error,
};

/// Raw view of one journal slot, straight off the device.
fn journal_slot(image: &tempfile::NamedTempFile, journal_sector: u64, slot: usize) -> (u64, u32) {
    let device = FileDevice::open_image(image.path()).unwrap();
    let mut sector = [0u8; 512];
    device.read_sectors(journal_sector, &mut sector).unwrap();
    let offset = slot * 64;
    let tx_id = u64::from_le_bytes(sector[offset..offset + 8].try_into().unwrap());
    let status = u32::from_le_bytes(sector[offset + 12..offset + 16].try_into().unwrap());
    (tx_id, status)
}

#[test]
fn interrupted_create_is_rolled_forward_to_aborted() {
    let image = common::formatted_image(4);
    let journal_sector = {
        let mut fs = common::mount(&image);
        let content = fs.context().content_cluster;
        // Crash injection: the pending record lands, the mutation never does.
        fs.log_operation(OP_CREATE, content, "ghost").unwrap();
        fs.superblock().journal_start_cluster.get() * 8
    };

    let fs = common::mount(&image);
    assert!(matches!(fs.read("ghost"), Err(Error::NotFound(_))));
    let (tx_id, status) = journal_slot(&image, journal_sector, 0);
    assert_ne!(tx_id, 0);
    assert_eq!(status, J_ABORTED);
}

#[test]
fn committed_create_survives_a_remount() {
    let image = common::formatted_image(4);
    {
        let mut fs = common::mount(&image);
        fs.create(CreateKind::File, "durable").unwrap();
    }
    let fs = common::mount(&image);
    assert_eq!(fs.read("durable").unwrap(), b"");
}

#[test]
fn pending_delete_is_completed_on_replay() {
    let image = common::formatted_image(4);
    {
        let mut fs = common::mount(&image);
        fs.write("doomed", b"bytes").unwrap();
        let content = fs.context().content_cluster;
        fs.log_operation(OP_DELETE, content, "doomed").unwrap();
    }
    let fs = common::mount(&image);
    assert!(matches!(fs.read("doomed"), Err(Error::NotFound(_))));

    // Replaying a second time changes nothing (idempotency).
    drop(fs);
    let fs = common::mount(&image);
    assert!(matches!(fs.read("doomed"), Err(Error::NotFound(_))));
}

#[test]
fn pending_write_keeps_the_previous_content() {
    let image = common::formatted_image(4);
    {
        let mut fs = common::mount(&image);
        fs.write("f", b"version 1").unwrap();
        let content = fs.context().content_cluster;
        fs.log_operation(OP_WRITE, content, "f").unwrap();
    }
    let fs = common::mount(&image);
    assert_eq!(fs.read("f").unwrap(), b"version 1");
}

#[test]
fn checksum_corruption_disarms_a_record() {
    let image = common::formatted_image(4);
    let journal_sector = {
        let mut fs = common::mount(&image);
        let content = fs.context().content_cluster;
        fs.log_operation(OP_DELETE, content, "anything").unwrap();
        fs.superblock().journal_start_cluster.get() * 8
    };

    // Flip one metadata byte of the pending record.
    let device = FileDevice::open_image(image.path()).unwrap();
    let mut sector = [0u8; 512];
    device.read_sectors(journal_sector, &mut sector).unwrap();
    sector[24] ^= 0xFF;
    device.write_sectors(journal_sector, &sector).unwrap();

    // The record is skipped, not replayed, and the mount succeeds.
    let fs = common::mount(&image);
    drop(fs);
    let (tx_id, status) = journal_slot(&image, journal_sector, 0);
    assert_ne!(tx_id, 0);
    assert_ne!(status, J_COMMITTED);
    assert_ne!(status, J_ABORTED);
}

#[test]
fn head_wraps_at_journal_capacity() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);
    let content = fs.context().content_cluster;
    let journal_sector = fs.superblock().journal_start_cluster.get() * 8;
    let capacity = fs.superblock().journal_sectors.get() * 8;

    let mut last_tx = 0;
    for _ in 0..capacity + 1 {
        last_tx = fs.log_operation(OP_WRITE, content, "wrap").unwrap();
    }
    drop(fs);

    // Record capacity + 1 landed back on slot 0.
    let (tx_id, _) = journal_slot(&image, journal_sector, 0);
    assert_eq!(tx_id, last_tx);
    let (second_tx, _) = journal_slot(&image, journal_sector, 1);
    assert_eq!(second_tx, 2);
}

#[test]
fn sweep_clears_old_committed_records() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);
    fs.create(CreateKind::File, "a").unwrap();
    fs.create(CreateKind::File, "b").unwrap();

    let last = fs.superblock().last_tx_id.get();
    let swept = fs.sweep_journal(last + 1).unwrap();
    assert!(swept >= 2);
}
