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

use lfs_fs::{ops::CreateKind, Error};

#[test]
fn levels_of_one_directory_diverge() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "docs").unwrap();
    fs.level_add("docs", "draft").unwrap();

    fs.nav("docs:draft").unwrap();
    fs.create(CreateKind::File, "note").unwrap();
    assert_eq!(common::names(&fs), ["note"]);

    fs.nav("..").unwrap();
    fs.nav("docs:master").unwrap();
    assert!(common::names(&fs).is_empty());
}

#[test]
fn master_is_created_lazily() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "fresh").unwrap();
    // A brand-new folder has no levels at all.
    match fs.look(Some("fresh")).unwrap() {
        lfs_fs::ops::LookResult::Levels { levels, .. } => assert!(levels.is_empty()),
        other => panic!("unexpected look result: {other:?}"),
    }
    fs.nav("fresh").unwrap();
    assert_eq!(fs.context().level, "master");
}

#[test]
fn master_level_is_protected() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "d").unwrap();
    fs.nav("d:master").unwrap();
    fs.nav("..").unwrap();
    assert!(matches!(
        fs.level_remove("d", "master"),
        Err(Error::ProtectedLevel(_))
    ));
}

#[test]
fn level_remove_keeps_the_content_chain() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "d").unwrap();
    fs.level_add("d", "side").unwrap();
    fs.nav("d:side").unwrap();
    fs.create(CreateKind::File, "kept").unwrap();
    let content = fs.context().content_cluster;
    fs.nav("..").unwrap();

    let free_before = fs.free_cluster_count().unwrap();
    fs.level_remove("d", "side").unwrap();
    // The slot is inactive but the chain and its entries are untouched.
    assert_eq!(fs.free_cluster_count().unwrap(), free_before);
    let survivors = fs.list_entries(content).unwrap();
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].name, "kept");
    assert!(matches!(fs.nav("d:side"), Err(Error::NotFound(_))));
}

#[test]
fn level_rename_finds_the_new_name() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "d").unwrap();
    fs.level_add("d", "old").unwrap();
    fs.level_rename("d", "old", "new").unwrap();
    assert!(fs.nav("d:new").is_ok());
    fs.nav("..").unwrap();
    assert!(matches!(fs.nav("d:old"), Err(Error::NotFound(_))));
}

#[test]
fn duplicate_level_name_collides() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "d").unwrap();
    fs.level_add("d", "x").unwrap();
    assert!(matches!(
        fs.level_add("d", "x"),
        Err(Error::AlreadyExists(_))
    ));
}

#[test]
fn linked_directories_share_one_level() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "a").unwrap();
    fs.create(CreateKind::Folder, "b").unwrap();
    fs.link("a", "b", "shared").unwrap();

    fs.nav("a:shared").unwrap();
    fs.write("x", b"through a").unwrap();
    fs.nav("/").unwrap();

    fs.nav("b:shared").unwrap();
    assert_eq!(common::names(&fs), ["x"]);
    assert_eq!(fs.read("x").unwrap(), b"through a");
}

#[test]
fn linking_a_directory_to_itself_is_refused() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "a").unwrap();
    assert!(fs.link("a", "a", "loop").is_err());
}

#[test]
fn recursive_delete_restores_the_root_listing() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.write("keep", b"stays").unwrap();
    let names_before = common::names(&fs);
    let free_before = fs.free_cluster_count().unwrap();

    fs.create(CreateKind::Folder, "d").unwrap();
    fs.nav("d").unwrap();
    fs.create(CreateKind::File, "x").unwrap();
    fs.nav("/").unwrap();
    fs.del("d", true).unwrap();

    assert_eq!(common::names(&fs), names_before);
    // File payloads inside the tree come back; the directory's own table
    // chains deliberately stay allocated (they may be shared).
    assert!(fs.free_cluster_count().unwrap() <= free_before);
    assert_eq!(fs.read("keep").unwrap(), b"stays");
}

#[test]
fn non_recursive_delete_of_a_leveled_directory_fails() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.create(CreateKind::Folder, "d").unwrap();
    fs.nav("d").unwrap();
    fs.nav("..").unwrap();
    assert!(matches!(fs.del("d", false), Err(Error::NotEmpty(_))));
    fs.del("d", true).unwrap();
}

#[test]
fn dir_tree_shows_folders_levels_and_files() {
    let image = common::formatted_image(4);
    let mut fs = common::mount(&image);

    fs.write("top", b"1").unwrap();
    fs.create(CreateKind::Folder, "docs").unwrap();
    fs.level_add("docs", "draft").unwrap();
    fs.nav("docs:draft").unwrap();
    fs.create(CreateKind::File, "note").unwrap();
    fs.nav("/").unwrap();

    let tree = fs.dir_tree().unwrap();
    assert!(tree.contains("top"));
    assert!(tree.contains("[docs]"));
    assert!(tree.contains(":draft"));
    assert!(tree.contains("note"));
}
