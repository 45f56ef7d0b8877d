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
use lfs_fs::{layout::LFS_MAGIC, Error, LevelFs};

#[test]
fn format_geometry_of_a_200_mib_image() {
    let image = common::formatted_image(200);
    let device = FileDevice::open_image(image.path()).unwrap();

    let mut sector = [0u8; 512];
    device.read_sectors(0, &mut sector).unwrap();
    assert_eq!(
        u32::from_le_bytes(sector[0..4].try_into().unwrap()),
        LFS_MAGIC
    );

    let fs = common::mount(&image);
    let sb = fs.superblock();
    assert_eq!(sb.total_sectors.get(), 409_600);
    assert_eq!(sb.total_clusters.get(), 51_200);
    assert_eq!(sb.backup_sb_cluster.get(), 51_199);

    // The backup copy is byte-identical to sector 0.
    let mut backup = [0u8; 512];
    device
        .read_sectors(sb.backup_sb_cluster.get() * 8, &mut backup)
        .unwrap();
    device.read_sectors(0, &mut sector).unwrap();
    assert_eq!(sector, backup);
}

#[test]
fn mount_falls_back_to_the_backup_superblock() {
    let image = common::formatted_image(4);
    let device = FileDevice::open_image(image.path()).unwrap();
    device.write_sectors(0, &[0xA5u8; 512]).unwrap();

    let fs = common::mount(&image);
    assert_eq!(fs.superblock().magic.get(), LFS_MAGIC);

    // The primary was rewritten from the backup.
    let mut sector = [0u8; 512];
    device.read_sectors(0, &mut sector).unwrap();
    assert_eq!(
        u32::from_le_bytes(sector[0..4].try_into().unwrap()),
        LFS_MAGIC
    );
}

#[test]
fn mount_refuses_when_both_superblocks_are_bad() {
    let image = common::formatted_image(4);
    let device = FileDevice::open_image(image.path()).unwrap();
    let backup_sector = {
        let fs = common::mount(&image);
        fs.superblock().backup_sb_cluster.get() * 8
    };
    device.write_sectors(0, &[0xA5u8; 512]).unwrap();
    device.write_sectors(backup_sector, &[0x5Au8; 512]).unwrap();

    let result = LevelFs::mount(FileDevice::open_image(image.path()).unwrap());
    assert!(matches!(result, Err(Error::FilesystemCorrupt(_))));
}

#[test]
fn reformat_restores_the_initial_state() {
    let image = common::formatted_image(4);
    let baseline = {
        let fs = common::mount(&image);
        assert!(common::names(&fs).is_empty());
        fs.free_cluster_count().unwrap()
    };

    {
        let mut fs = common::mount(&image);
        fs.create(lfs_fs::ops::CreateKind::File, "junk").unwrap();
        fs.write("junk", b"junk").unwrap();
    }

    let device = FileDevice::open_image(image.path()).unwrap();
    LevelFs::format(&device, "test").unwrap();
    let fs = common::mount(&image);
    assert!(common::names(&fs).is_empty());
    assert_eq!(fs.free_cluster_count().unwrap(), baseline);
}

#[test]
fn format_rejects_a_volume_too_small_for_its_metadata() {
    let image = tempfile::NamedTempFile::new().unwrap();
    FileDevice::create_image(image.path(), 1).unwrap();
    // 1 MiB still fits; truncate far below the metadata footprint.
    image.as_file().set_len(64 * 1024).unwrap();
    let device = FileDevice::open_image(image.path()).unwrap();
    assert!(matches!(
        LevelFs::format(&device, "tiny"),
        Err(Error::NoSpace)
    ));
}
