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

//! The user-facing verbs. Every mutation follows the same shape: log a
//! pending journal record, mutate clusters, commit; an error leaves the
//! record aborted and the replay rules decide what survives a crash.

use std::collections::HashSet;

use lfs_ds::BlockDevice;
use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::FromZeros;

use crate::{
    entry::EntrySlot,
    layout::{
        now_secs, str_from_field, str_to_field, validate_name, DirEntry, CLUSTER_SIZE, LAT_BAD,
        LAT_END, LAT_FREE, MASTER_LEVEL, OP_CREATE, OP_DELETE, OP_LEVEL_CREATE, OP_LEVEL_LINK,
        OP_MKDIR, OP_UPDATE_DIR, OP_WRITE, PERM_DEFAULT_DIR, PERM_DEFAULT_FILE, PERM_MASK,
        PERM_READ, PERM_WRITE, TYPE_FILE, TYPE_FREE, TYPE_HARDLINK, TYPE_LEVELED_DIR,
        TYPE_SYMLINK,
    },
    path::split_level,
    Error, LevelFs, Result,
};

/// Maximum symlink hops before the resolver declares a loop.
const SYMLINK_DEPTH_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateKind {
    File,
    Folder,
}

/// Listing row handed to callers; everything the shell prints.
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub name: String,
    pub entry_type: u8,
    pub size: u64,
    pub perms: u32,
    pub ref_count: u16,
    pub symlink_target: Option<String>,
}

#[derive(Debug)]
pub enum LookResult {
    Entries { title: String, entries: Vec<EntryInfo> },
    Levels { name: String, levels: Vec<String> },
    File(String),
}

#[derive(Debug, Clone)]
pub struct CurrentInfo {
    pub path: String,
    pub level: String,
    pub dir_cluster: u64,
    pub content_cluster: u64,
}

impl<D: BlockDevice> LevelFs<D> {
    /// Creates an empty file or leveled directory. A file starts with one
    /// data cluster; a directory starts with an empty level table and gains
    /// `master` lazily on first navigation.
    pub fn create(&mut self, kind: CreateKind, path: &str) -> Result<()> {
        let resolved = self.resolve(path)?;
        validate_name(&resolved.name)?;
        if self.find_entry(resolved.parent, &resolved.name)?.is_some() {
            return Err(Error::AlreadyExists(resolved.name));
        }

        let op = match kind {
            CreateKind::File => OP_CREATE,
            CreateKind::Folder => OP_MKDIR,
        };
        let parent = resolved.parent;
        let name = resolved.name;
        self.with_txn(op, parent, &name, |fs| {
            let slot = fs.find_free_slot(parent)?;
            let start = fs.allocate_cluster()?;
            fs.clear_cluster(start)?;

            let mut entry = DirEntry::new_zeroed();
            entry.name = str_to_field(&name);
            entry.start_cluster = U64::new(start);
            let now = now_secs() as u32;
            entry.create_time = U32::new(now);
            entry.mod_time = U32::new(now);
            match kind {
                CreateKind::File => {
                    entry.entry_type = TYPE_FILE;
                    entry.attributes = U32::new(PERM_DEFAULT_FILE);
                    entry.ref_count = U16::new(1);
                }
                CreateKind::Folder => {
                    entry.entry_type = TYPE_LEVELED_DIR;
                    entry.attributes = U32::new(PERM_DEFAULT_DIR);
                }
            }
            fs.store_entry(slot, &entry)
        })
    }

    /// Replaces the file's content, creating the file when absent. The data
    /// chain grows and shrinks to fit; a shrink releases the old tail.
    pub fn write(&mut self, path: &str, data: &[u8]) -> Result<u64> {
        let resolved = self.resolve(path)?;
        let existing = self.find_entry(resolved.parent, &resolved.name)?;
        let (slot, entry) = match existing {
            Some((slot, entry)) if entry.entry_type == TYPE_FILE => {
                if entry.perms() & PERM_WRITE == 0 {
                    return Err(Error::PermissionDenied(resolved.name));
                }
                (slot, entry)
            }
            Some(_) => return Err(Error::AlreadyExists(resolved.name)),
            None => {
                self.create(CreateKind::File, path)?;
                self.find_entry(resolved.parent, &resolved.name)?
                    .ok_or_else(|| Error::NotFound(resolved.name.clone()))?
            }
        };

        let parent = resolved.parent;
        let name = resolved.name;
        self.with_txn(OP_WRITE, parent, &name, |fs| {
            fs.write_file_data(entry.start_cluster.get(), data)?;
            let mut entry = fs.load_entry(slot)?;
            entry.size = U64::new(data.len() as u64);
            entry.mod_time = U32::new(now_secs() as u32);
            fs.store_entry(slot, &entry)?;
            Ok(data.len() as u64)
        })
    }

    /// The file's content, exactly `size` bytes, following symlinks and
    /// hardlinks on the way.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.lookup_file(path)?;
        if entry.perms() & PERM_READ == 0 {
            return Err(Error::PermissionDenied(path.into()));
        }
        self.read_file_data(&entry)
    }

    /// Removes an entry. Files and hardlinks release their data chain only
    /// when the last reference goes; directories require `recursive` when
    /// any level is active, and their table chains are left in place (a
    /// shared level may still be visible elsewhere).
    pub fn del(&mut self, path: &str, recursive: bool) -> Result<()> {
        let resolved = self.resolve(path)?;
        let (slot, entry) = self
            .find_entry(resolved.parent, &resolved.name)?
            .ok_or_else(|| Error::NotFound(resolved.name.clone()))?;
        if entry.perms() & PERM_WRITE == 0 {
            return Err(Error::PermissionDenied(resolved.name));
        }
        if entry.entry_type == TYPE_LEVELED_DIR
            && !recursive
            && !self.read_levels(entry.start_cluster.get())?.is_empty()
        {
            return Err(Error::NotEmpty(resolved.name));
        }

        let parent = resolved.parent;
        let name = resolved.name;
        self.with_txn(OP_DELETE, parent, &name, |fs| {
            fs.delete_at(slot, &entry, recursive)
        })
    }

    /// Moves (or renames) an entry: the copy lands at the destination
    /// first, then the source slot is released.
    pub fn move_entry(&mut self, src: &str, dst: &str) -> Result<()> {
        let src_resolved = self.resolve(src)?;
        let dst_resolved = self.resolve(dst)?;
        validate_name(&dst_resolved.name)?;
        let (src_slot, src_entry) = self
            .find_entry(src_resolved.parent, &src_resolved.name)?
            .ok_or_else(|| Error::NotFound(src_resolved.name.clone()))?;
        if src_entry.perms() & PERM_WRITE == 0 {
            return Err(Error::PermissionDenied(src_resolved.name));
        }
        if self
            .find_entry(dst_resolved.parent, &dst_resolved.name)?
            .is_some()
        {
            return Err(Error::AlreadyExists(dst_resolved.name));
        }

        let dst_parent = dst_resolved.parent;
        let dst_name = dst_resolved.name;
        self.with_txn(OP_UPDATE_DIR, dst_parent, &dst_name, |fs| {
            let dst_slot = fs.find_free_slot(dst_parent)?;
            let mut moved = src_entry.clone();
            moved.name = str_to_field(&dst_name);
            fs.store_entry(dst_slot, &moved)?;

            let mut freed = DirEntry::new_zeroed();
            freed.entry_type = TYPE_FREE;
            fs.store_entry(src_slot, &freed)
        })
    }

    /// Creates a symbolic link holding `target` as a path string in a
    /// single cluster. The target is not required to exist.
    pub fn symlink(&mut self, target: &str, link_path: &str) -> Result<()> {
        let resolved = self.resolve(link_path)?;
        validate_name(&resolved.name)?;
        if target.len() >= CLUSTER_SIZE {
            return Err(Error::InvalidName(target.into()));
        }
        if self.find_entry(resolved.parent, &resolved.name)?.is_some() {
            return Err(Error::AlreadyExists(resolved.name));
        }

        let parent = resolved.parent;
        let name = resolved.name;
        self.with_txn(OP_CREATE, parent, &name, |fs| {
            let cluster = fs.allocate_cluster()?;
            let mut buffer = [0u8; CLUSTER_SIZE];
            buffer[..target.len()].copy_from_slice(target.as_bytes());
            fs.write_cluster(cluster, &buffer)?;

            let slot = fs.find_free_slot(parent)?;
            let mut entry = DirEntry::new_zeroed();
            entry.name = str_to_field(&name);
            entry.entry_type = TYPE_SYMLINK;
            entry.start_cluster = U64::new(cluster);
            entry.size = U64::new(target.len() as u64);
            entry.attributes = U32::new(PERM_DEFAULT_FILE);
            let now = now_secs() as u32;
            entry.create_time = U32::new(now);
            entry.mod_time = U32::new(now);
            fs.store_entry(slot, &entry)
        })
    }

    /// Creates a hard link to a regular file. Every entry sharing the data
    /// chain carries the same reference count.
    pub fn hardlink(&mut self, target: &str, link_path: &str) -> Result<()> {
        let target_resolved = self.resolve(target)?;
        let (_, target_entry) = self
            .find_entry(target_resolved.parent, &target_resolved.name)?
            .ok_or_else(|| Error::NotFound(target_resolved.name.clone()))?;
        if target_entry.entry_type != TYPE_FILE {
            return Err(Error::NotAFile(target_resolved.name));
        }

        let resolved = self.resolve(link_path)?;
        validate_name(&resolved.name)?;
        if self.find_entry(resolved.parent, &resolved.name)?.is_some() {
            return Err(Error::AlreadyExists(resolved.name));
        }

        let parent = resolved.parent;
        let name = resolved.name;
        self.with_txn(OP_CREATE, parent, &name, |fs| {
            fs.adjust_ref_counts(target_entry.start_cluster.get(), 1)?;

            let slot = fs.find_free_slot(parent)?;
            let mut entry = DirEntry::new_zeroed();
            entry.name = str_to_field(&name);
            entry.entry_type = TYPE_HARDLINK;
            entry.start_cluster = target_entry.start_cluster;
            entry.size = target_entry.size;
            entry.attributes = target_entry.attributes;
            entry.ref_count = U16::new(target_entry.ref_count.get() + 1);
            let now = now_secs() as u32;
            entry.create_time = U32::new(now);
            entry.mod_time = U32::new(now);
            fs.store_entry(slot, &entry)
        })
    }

    /// Moves the navigation context. Accepts `/`, `..`, `:level` (switch
    /// level in place) and `name[:level]` segments separated by `/`. The
    /// `master` level is created lazily on first entry.
    pub fn nav(&mut self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(Error::NotFound(path.into()));
        }
        if let Some(level) = path.strip_prefix(':') {
            return self.switch_level(level);
        }

        let mut rest = path;
        if let Some(stripped) = path.strip_prefix('/') {
            self.nav_to_root()?;
            rest = stripped;
        }
        for segment in rest.split('/').filter(|s| !s.is_empty()) {
            if segment == ".." {
                if !self.ctx.pop() {
                    self.nav_to_root()?;
                }
            } else {
                self.enter_folder(segment)?;
            }
        }
        Ok(())
    }

    fn nav_to_root(&mut self) -> Result<()> {
        let root_dir = self.sb.root_dir_cluster.get();
        let content = self.ensure_level(root_dir, MASTER_LEVEL)?;
        self.ctx.reset_to_root(root_dir, content, MASTER_LEVEL);
        self.ctx.root_content_cluster = content;
        Ok(())
    }

    fn switch_level(&mut self, level: &str) -> Result<()> {
        let dir = self.ctx.dir_cluster;
        let content = match self.find_level(dir, level)? {
            Some((_, version)) => version.content_table_cluster.get(),
            None if level == MASTER_LEVEL => {
                self.with_txn(OP_LEVEL_CREATE, dir, level, |fs| fs.add_level(dir, level))?
            }
            None => return Err(Error::NotFound(format!(":{level}"))),
        };
        self.ctx.content_cluster = content;
        self.ctx.level = level.into();
        if self.ctx.is_at_root() {
            self.ctx.root_content_cluster = content;
        }
        Ok(())
    }

    fn enter_folder(&mut self, segment: &str) -> Result<()> {
        let (name, level) = split_level(segment);
        let level = level.unwrap_or(MASTER_LEVEL);
        let (_, entry) = self
            .find_entry(self.ctx.content_cluster, name)?
            .filter(|(_, entry)| entry.entry_type == TYPE_LEVELED_DIR)
            .ok_or_else(|| Error::NotFound(name.into()))?;
        let dir = entry.start_cluster.get();

        let content = match self.find_level(dir, level)? {
            Some((_, version)) => version.content_table_cluster.get(),
            None if level == MASTER_LEVEL => {
                self.with_txn(OP_LEVEL_CREATE, dir, level, |fs| fs.add_level(dir, level))?
            }
            None => return Err(Error::NotFound(format!("{name}:{level}"))),
        };
        self.ctx.push(dir, content, name, level);
        Ok(())
    }

    /// Diagnostic listing: the current chain, a folder's levels, or a
    /// specific `folder:level` chain.
    pub fn look(&self, target: Option<&str>) -> Result<LookResult> {
        let Some(target) = target.filter(|t| !t.is_empty()) else {
            return Ok(LookResult::Entries {
                title: format!("{} ({})", self.ctx.path, self.ctx.level),
                entries: self.list_entries(self.ctx.content_cluster)?,
            });
        };

        let resolved = self.resolve(target)?;
        if resolved.name.is_empty() {
            return Ok(LookResult::Entries {
                title: target.into(),
                entries: self.list_entries(resolved.parent)?,
            });
        }
        let (name, level) = split_level(&resolved.name);
        let (_, entry) = self
            .find_entry(resolved.parent, name)?
            .ok_or_else(|| Error::NotFound(name.into()))?;
        match entry.entry_type {
            TYPE_LEVELED_DIR => match level {
                None => Ok(LookResult::Levels {
                    name: name.into(),
                    levels: self
                        .read_levels(entry.start_cluster.get())?
                        .iter()
                        .map(|version| version.name_str())
                        .collect(),
                }),
                Some(level) => {
                    let (_, version) = self
                        .find_level(entry.start_cluster.get(), level)?
                        .ok_or_else(|| Error::NotFound(format!("{name}:{level}")))?;
                    Ok(LookResult::Entries {
                        title: format!("{name}:{level}"),
                        entries: self.list_entries(version.content_table_cluster.get())?,
                    })
                }
            },
            _ => Ok(LookResult::File(name.into())),
        }
    }

    pub fn list_entries(&self, content: u64) -> Result<Vec<EntryInfo>> {
        self.read_dir_entries(content)?
            .iter()
            .map(|entry| {
                let symlink_target = if entry.entry_type == TYPE_SYMLINK
                    && entry.start_cluster.get() != 0
                {
                    Some(self.read_symlink_target(entry.start_cluster.get())?)
                } else {
                    None
                };
                Ok(EntryInfo {
                    name: entry.name_str(),
                    entry_type: entry.entry_type,
                    size: entry.size.get(),
                    perms: entry.perms(),
                    ref_count: entry.ref_count.get(),
                    symlink_target,
                })
            })
            .collect()
    }

    /// Recursive listing of every folder, level and file under the current
    /// chain, one tree line per node.
    pub fn dir_tree(&self) -> Result<String> {
        let mut out = format!("{} ({})\n", self.ctx.path, self.ctx.level);
        let mut visited = HashSet::new();
        self.tree_at(self.ctx.content_cluster, "", &mut out, &mut visited)?;
        Ok(out)
    }

    fn tree_at(
        &self,
        content: u64,
        prefix: &str,
        out: &mut String,
        visited: &mut HashSet<u64>,
    ) -> Result<()> {
        if !visited.insert(content) {
            out.push_str(prefix);
            out.push_str("└── (shared, shown above)\n");
            return Ok(());
        }
        let entries = self.read_dir_entries(content)?;
        let files: Vec<&DirEntry> = entries
            .iter()
            .filter(|entry| entry.entry_type != TYPE_LEVELED_DIR)
            .collect();
        let folders: Vec<&DirEntry> = entries
            .iter()
            .filter(|entry| entry.entry_type == TYPE_LEVELED_DIR)
            .collect();

        for (index, file) in files.iter().enumerate() {
            let last = index + 1 == files.len() && folders.is_empty();
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            out.push_str(&file.name_str());
            out.push('\n');
        }
        for (index, folder) in folders.iter().enumerate() {
            let last = index + 1 == folders.len();
            out.push_str(prefix);
            out.push_str(if last { "└── " } else { "├── " });
            out.push('[');
            out.push_str(&folder.name_str());
            out.push_str("]\n");

            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            let levels = self.read_levels(folder.start_cluster.get())?;
            for (level_index, level) in levels.iter().enumerate() {
                let last_level = level_index + 1 == levels.len();
                out.push_str(&child_prefix);
                out.push_str(if last_level { "└── " } else { "├── " });
                out.push(':');
                out.push_str(&level.name_str());
                out.push('\n');
                let level_prefix =
                    format!("{child_prefix}{}", if last_level { "    " } else { "│   " });
                self.tree_at(
                    level.content_table_cluster.get(),
                    &level_prefix,
                    out,
                    visited,
                )?;
            }
        }
        visited.remove(&content);
        Ok(())
    }

    /// Adds a level with fresh storage to a folder (`.` for the current
    /// directory).
    pub fn level_add(&mut self, folder: &str, level: &str) -> Result<()> {
        let dir = self.dir_cluster_of(folder)?;
        if self.find_level(dir, level)?.is_some() {
            return Err(Error::AlreadyExists(level.into()));
        }
        self.with_txn(OP_LEVEL_CREATE, dir, level, |fs| fs.add_level(dir, level))?;
        Ok(())
    }

    /// Deactivates a level. `master` is protected; the content chain is
    /// never touched.
    pub fn level_remove(&mut self, folder: &str, level: &str) -> Result<()> {
        let dir = self.dir_cluster_of(folder)?;
        if level == MASTER_LEVEL {
            return Err(Error::ProtectedLevel(level.into()));
        }
        self.with_txn(OP_UPDATE_DIR, dir, level, |fs| fs.remove_level(dir, level))
    }

    pub fn level_rename(&mut self, folder: &str, old_name: &str, new_name: &str) -> Result<()> {
        let dir = self.dir_cluster_of(folder)?;
        self.with_txn(OP_UPDATE_DIR, dir, new_name, |fs| {
            fs.rename_level(dir, old_name, new_name)
        })
    }

    /// Binds two directories to one fresh content chain under a shared
    /// level name; mutations through either side are visible in both.
    pub fn link(&mut self, dir1: &str, dir2: &str, level: &str) -> Result<()> {
        let d1 = self.dir_cluster_of(dir1)?;
        let d2 = self.dir_cluster_of(dir2)?;
        if d1 == d2 {
            return Err(Error::InvalidName(
                "cannot link a directory to itself".into(),
            ));
        }
        if self.find_level(d1, level)?.is_some() || self.find_level(d2, level)?.is_some() {
            return Err(Error::AlreadyExists(level.into()));
        }
        self.with_txn(OP_LEVEL_LINK, d1, level, |fs| {
            let shared = fs.allocate_cluster()?;
            fs.clear_cluster(shared)?;
            fs.add_level_shared(d1, level, shared)?;
            fs.add_level_shared(d2, level, shared)
        })
    }

    /// Sets the permission bits of an entry; the reserved attribute bits
    /// are preserved.
    pub fn chmod(&mut self, path: &str, perms: u32) -> Result<()> {
        let resolved = self.resolve(path)?;
        let (slot, entry) = self
            .find_entry(resolved.parent, &resolved.name)?
            .ok_or_else(|| Error::NotFound(resolved.name.clone()))?;
        let parent = resolved.parent;
        let name = resolved.name;
        self.with_txn(OP_UPDATE_DIR, parent, &name, |fs| {
            let mut entry = entry;
            entry.attributes =
                U32::new((entry.attributes.get() & !PERM_MASK) | (perms & PERM_MASK));
            entry.mod_time = U32::new(now_secs() as u32);
            fs.store_entry(slot, &entry)
        })
    }

    pub fn current(&self) -> CurrentInfo {
        CurrentInfo {
            path: self.ctx.path.clone(),
            level: self.ctx.level.clone(),
            dir_cluster: self.ctx.dir_cluster,
            content_cluster: self.ctx.content_cluster,
        }
    }

    fn dir_cluster_of(&self, folder: &str) -> Result<u64> {
        if folder == "." {
            return Ok(self.ctx.dir_cluster);
        }
        let resolved = self.resolve(folder)?;
        let (name, _) = split_level(&resolved.name);
        let (_, entry) = self
            .find_entry(resolved.parent, name)?
            .filter(|(_, entry)| entry.entry_type == TYPE_LEVELED_DIR)
            .ok_or_else(|| Error::NotFound(name.into()))?;
        Ok(entry.start_cluster.get())
    }

    /// Final entry behind `path`, following symlinks up to the depth limit.
    fn lookup_file(&self, path: &str) -> Result<DirEntry> {
        let resolved = self.resolve(path)?;
        let (_, mut entry) = self
            .find_entry(resolved.parent, &resolved.name)?
            .filter(|(_, entry)| {
                matches!(entry.entry_type, TYPE_FILE | TYPE_SYMLINK | TYPE_HARDLINK)
            })
            .ok_or_else(|| Error::NotFound(resolved.name.clone()))?;

        let mut depth = 0;
        while entry.entry_type == TYPE_SYMLINK {
            if depth >= SYMLINK_DEPTH_LIMIT {
                return Err(Error::SymlinkLoop(path.into()));
            }
            if entry.start_cluster.get() == 0 {
                return Err(Error::BrokenSymlink(resolved.name.clone()));
            }
            let target = self.read_symlink_target(entry.start_cluster.get())?;
            let target_resolved = self
                .resolve(&target)
                .map_err(|_| Error::BrokenSymlink(target.clone()))?;
            entry = self
                .find_entry(target_resolved.parent, &target_resolved.name)?
                .filter(|(_, entry)| {
                    matches!(entry.entry_type, TYPE_FILE | TYPE_SYMLINK | TYPE_HARDLINK)
                })
                .map(|(_, entry)| entry)
                .ok_or_else(|| Error::BrokenSymlink(target.clone()))?;
            depth += 1;
        }
        Ok(entry)
    }

    fn read_symlink_target(&self, cluster: u64) -> Result<String> {
        let buffer = self.read_cluster(cluster)?;
        Ok(str_from_field(&buffer))
    }

    fn read_file_data(&self, entry: &DirEntry) -> Result<Vec<u8>> {
        let mut remaining = entry.size.get() as usize;
        let mut data = Vec::with_capacity(remaining);
        for cluster in self.follow_chain(entry.start_cluster.get())? {
            if remaining == 0 {
                break;
            }
            let buffer = self.read_cluster(cluster)?;
            let take = remaining.min(CLUSTER_SIZE);
            data.extend_from_slice(&buffer[..take]);
            remaining -= take;
        }
        if remaining > 0 {
            return Err(Error::FilesystemCorrupt(format!(
                "data chain of '{}' is shorter than its size",
                entry.name_str()
            )));
        }
        Ok(data)
    }

    /// Lays `data` over the chain rooted at `start`, extending on demand
    /// and releasing whatever tail the previous content no longer needs.
    fn write_file_data(&self, start: u64, data: &[u8]) -> Result<()> {
        let mut current = start;
        let mut offset = 0;
        loop {
            let chunk = (data.len() - offset).min(CLUSTER_SIZE);
            let mut buffer = [0u8; CLUSTER_SIZE];
            buffer[..chunk].copy_from_slice(&data[offset..offset + chunk]);
            self.write_cluster(current, &buffer)?;
            offset += chunk;
            if offset >= data.len() {
                break;
            }
            let next = self.lat_get(current)?;
            current = if next == LAT_END || next == LAT_FREE || next == LAT_BAD {
                self.extend_chain(current)?
            } else {
                next
            };
        }
        let tail = self.lat_get(current)?;
        if tail != LAT_END && tail != LAT_FREE && tail != LAT_BAD {
            self.free_chain(tail)?;
        }
        self.lat_set(current, LAT_END)
    }

    fn delete_at(&mut self, slot: EntrySlot, entry: &DirEntry, recursive: bool) -> Result<()> {
        match entry.entry_type {
            TYPE_FILE | TYPE_HARDLINK => {
                if entry.ref_count.get() > 1 {
                    self.adjust_ref_counts(entry.start_cluster.get(), -1)?;
                } else if entry.start_cluster.get() != 0 {
                    self.free_chain(entry.start_cluster.get())?;
                }
            }
            TYPE_SYMLINK => {
                if entry.start_cluster.get() != 0 {
                    self.free_chain(entry.start_cluster.get())?;
                }
            }
            TYPE_LEVELED_DIR if recursive => {
                let mut visited = HashSet::new();
                for level in self.read_levels(entry.start_cluster.get())? {
                    self.delete_level_contents(level.content_table_cluster.get(), &mut visited)?;
                }
            }
            _ => {}
        }
        let mut freed = DirEntry::new_zeroed();
        freed.entry_type = TYPE_FREE;
        self.store_entry(slot, &freed)
    }

    /// Empties one level's content chain, recursing through nested leveled
    /// directories. Content and level tables stay allocated (DAG sharing);
    /// only file-like payloads are released.
    fn delete_level_contents(&mut self, content: u64, visited: &mut HashSet<u64>) -> Result<()> {
        if content == 0 || !visited.insert(content) {
            return Ok(());
        }
        for (slot, entry) in self.collect_slots(content)? {
            match entry.entry_type {
                TYPE_LEVELED_DIR => {
                    for level in self.read_levels(entry.start_cluster.get())? {
                        self.delete_level_contents(level.content_table_cluster.get(), visited)?;
                    }
                }
                TYPE_FILE | TYPE_HARDLINK => {
                    if entry.ref_count.get() > 1 {
                        self.adjust_ref_counts(entry.start_cluster.get(), -1)?;
                    } else if entry.start_cluster.get() != 0 {
                        self.free_chain(entry.start_cluster.get())?;
                    }
                }
                TYPE_SYMLINK => {
                    if entry.start_cluster.get() != 0 {
                        self.free_chain(entry.start_cluster.get())?;
                    }
                }
                _ => {}
            }
            let mut freed = DirEntry::new_zeroed();
            freed.entry_type = TYPE_FREE;
            self.store_entry(slot, &freed)?;
        }
        Ok(())
    }

    /// Applies `delta` to the reference count of every entry sharing
    /// `data_cluster`, across every level reachable from the root (the DAG
    /// is walked once per content chain).
    fn adjust_ref_counts(&self, data_cluster: u64, delta: i64) -> Result<()> {
        let mut visited = HashSet::new();
        for level in self.read_levels(self.sb.root_dir_cluster.get())? {
            self.adjust_refs_under(
                level.content_table_cluster.get(),
                data_cluster,
                delta,
                &mut visited,
            )?;
        }
        Ok(())
    }

    fn adjust_refs_under(
        &self,
        content: u64,
        data_cluster: u64,
        delta: i64,
        visited: &mut HashSet<u64>,
    ) -> Result<()> {
        if content == 0 || !visited.insert(content) {
            return Ok(());
        }
        for (slot, mut entry) in self.collect_slots(content)? {
            match entry.entry_type {
                TYPE_FILE | TYPE_HARDLINK if entry.start_cluster.get() == data_cluster => {
                    let count = (entry.ref_count.get() as i64 + delta).max(0) as u16;
                    entry.ref_count = U16::new(count);
                    self.store_entry(slot, &entry)?;
                }
                TYPE_LEVELED_DIR => {
                    for level in self.read_levels(entry.start_cluster.get())? {
                        self.adjust_refs_under(
                            level.content_table_cluster.get(),
                            data_cluster,
                            delta,
                            visited,
                        )?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn collect_slots(&self, content: u64) -> Result<Vec<(EntrySlot, DirEntry)>> {
        let mut slots = Vec::new();
        self.scan_entries(content, |slot, entry| {
            if entry.entry_type != TYPE_FREE {
                slots.push((slot, entry.clone()));
            }
            Ok(false)
        })?;
        Ok(slots)
    }
}
