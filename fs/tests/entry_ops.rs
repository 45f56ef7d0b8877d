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

use lfs_fs::{
    ops::{CreateKind, LookResult},
    Error,
};

#[test]
fn write_then_read_round_trip() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::File, "hello").unwrap();
    fs.write("hello", b"Hello, world!\n").unwrap();
    assert_eq!(fs.read("hello").unwrap(), b"Hello, world!\n");
}

#[test]
fn multi_cluster_write_round_trip() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    fs.write("big", &data).unwrap();
    assert_eq!(fs.read("big").unwrap(), data);
}

#[test]
fn rewrite_shrink_releases_the_tail() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.write("f", &vec![7u8; 5 * 4096]).unwrap();
    let free_large = fs.free_cluster_count().unwrap();
    fs.write("f", b"small").unwrap();
    assert_eq!(fs.free_cluster_count().unwrap(), free_large + 4);
    assert_eq!(fs.read("f").unwrap(), b"small");
}

#[test]
fn name_length_boundary() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    let ok = "x".repeat(23);
    let too_long = "x".repeat(24);
    fs.create(CreateKind::File, &ok).unwrap();
    assert!(matches!(
        fs.create(CreateKind::File, &too_long),
        Err(Error::InvalidName(_))
    ));
}

#[test]
fn duplicate_create_collides() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::File, "twice").unwrap();
    assert!(matches!(
        fs.create(CreateKind::File, "twice"),
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        fs.create(CreateKind::Folder, "twice"),
        Err(Error::AlreadyExists(_))
    ));
}

#[test]
fn delete_returns_every_cluster() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    let free_before = fs.free_cluster_count().unwrap();
    fs.write("f", &vec![1u8; 3 * 4096 + 1]).unwrap();
    fs.del("f", false).unwrap();
    assert_eq!(fs.free_cluster_count().unwrap(), free_before);
    assert!(matches!(fs.read("f"), Err(Error::NotFound(_))));
}

#[test]
fn fill_the_allocator_to_the_last_cluster() {
    let image = common::formatted_image(2);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::File, "fill").unwrap();
    let free = fs.free_cluster_count().unwrap();
    // The file already owns one cluster, so it can absorb free + 1.
    let data = vec![9u8; ((free + 1) * 4096) as usize];
    fs.write("fill", &data).unwrap();
    assert_eq!(fs.free_cluster_count().unwrap(), 0);

    let mut more = data.clone();
    more.push(9);
    assert!(matches!(fs.write("fill", &more), Err(Error::NoSpace)));

    fs.del("fill", false).unwrap();
    assert_eq!(fs.free_cluster_count().unwrap(), free + 1);
}

#[test]
fn move_renames_across_directories() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "dst").unwrap();
    fs.nav("dst:master").unwrap();
    fs.nav("..").unwrap();
    fs.write("a", b"payload").unwrap();
    fs.move_entry("a", "dst/b").unwrap();

    assert!(matches!(fs.read("a"), Err(Error::NotFound(_))));
    assert_eq!(fs.read("dst/b").unwrap(), b"payload");
}

#[test]
fn symlink_reads_through_to_the_target() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.write("t", b"via link").unwrap();
    fs.symlink("/t", "l1").unwrap();
    fs.symlink("/l1", "l2").unwrap();
    assert_eq!(fs.read("l1").unwrap(), b"via link");
    assert_eq!(fs.read("l2").unwrap(), b"via link");
}

#[test]
fn deleting_the_target_breaks_the_symlink() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.write("t", b"gone soon").unwrap();
    fs.symlink("/t", "l").unwrap();
    fs.del("t", false).unwrap();
    assert!(matches!(fs.read("l"), Err(Error::BrokenSymlink(_))));
}

#[test]
fn symlink_cycle_is_detected() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.symlink("/b", "a").unwrap();
    fs.symlink("/a", "b").unwrap();
    assert!(matches!(fs.read("a"), Err(Error::SymlinkLoop(_))));
}

#[test]
fn hardlink_keeps_data_until_the_last_reference() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    let free_before = fs.free_cluster_count().unwrap();
    fs.write("t", b"shared bytes").unwrap();
    fs.hardlink("t", "l").unwrap();

    fs.del("t", false).unwrap();
    assert_eq!(fs.read("l").unwrap(), b"shared bytes");

    fs.del("l", false).unwrap();
    assert_eq!(fs.free_cluster_count().unwrap(), free_before);
}

#[test]
fn hardlink_requires_a_regular_file() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "d").unwrap();
    assert!(matches!(fs.hardlink("d", "l"), Err(Error::NotAFile(_))));
}

#[test]
fn permissions_gate_reads_and_writes() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.write("f", b"locked").unwrap();
    fs.chmod("f", 0o0).unwrap();
    assert!(matches!(fs.read("f"), Err(Error::PermissionDenied(_))));
    assert!(matches!(
        fs.write("f", b"nope"),
        Err(Error::PermissionDenied(_))
    ));
    assert!(matches!(fs.del("f", false), Err(Error::PermissionDenied(_))));

    fs.chmod("f", 0o6).unwrap();
    assert_eq!(fs.read("f").unwrap(), b"locked");
}

#[test]
fn look_reports_files_and_folders() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.write("f", b"x").unwrap();
    fs.create(CreateKind::Folder, "d").unwrap();
    fs.level_add("d", "draft").unwrap();

    match fs.look(None).unwrap() {
        LookResult::Entries { entries, .. } => {
            let mut found: Vec<String> = entries.into_iter().map(|entry| entry.name).collect();
            found.sort();
            assert_eq!(found, ["d", "f"]);
        }
        other => panic!("unexpected look result: {other:?}"),
    }
    match fs.look(Some("d")).unwrap() {
        LookResult::Levels { levels, .. } => assert_eq!(levels, ["draft"]),
        other => panic!("unexpected look result: {other:?}"),
    }
    match fs.look(Some("f")).unwrap() {
        LookResult::File(name) => assert_eq!(name, "f"),
        other => panic!("unexpected look result: {other:?}"),
    }
}
