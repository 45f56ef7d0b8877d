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

use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::LevelFilter;

use lfs_ds::BlockDevice;
use lfs_ds_file::FileDevice;
use lfs_fs::{
    layout::{TYPE_FILE, TYPE_HARDLINK, TYPE_LEVELED_DIR, TYPE_SYMLINK},
    ops::{CreateKind, EntryInfo, LookResult},
    LevelFs,
};

#[derive(Parser)]
#[command(name = "lfs", version, about = "Leveled file system tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a zero-filled disk image.
    Mkimg {
        path: PathBuf,
        /// Image size in mebibytes.
        size_mb: u64,
    },
    /// Stamp an empty filesystem onto an image or device.
    Format {
        path: PathBuf,
        /// Byte offset of the partition inside the device.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Volume label.
        #[arg(long, default_value = "LevelFS")]
        label: String,
    },
    /// Interactive command shell, mounting PATH when given.
    Shell {
        path: Option<PathBuf>,
        /// Byte offset of the partition inside the device.
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .format_timestamp(None)
        .init();
    // Sector tracing stays dark until `log on`.
    log::set_max_level(LevelFilter::Info);

    match Cli::parse().command {
        Command::Mkimg { path, size_mb } => {
            FileDevice::create_image(&path, size_mb)
                .with_context(|| format!("creating {}", path.display()))?;
            println!("Created image {} ({size_mb} MiB).", path.display());
        }
        Command::Format { path, offset, label } => {
            let device = FileDevice::open_at(&path, offset)
                .with_context(|| format!("opening {}", path.display()))?;
            LevelFs::format(&device, &label)
                .with_context(|| format!("formatting {}", path.display()))?;
            println!("Format complete.");
        }
        Command::Shell { path, offset } => {
            let fs = match path {
                Some(path) => Some(mount(&path, offset)?),
                None => None,
            };
            run_shell(fs)?;
        }
    }
    Ok(())
}

fn mount(path: &PathBuf, offset: u64) -> anyhow::Result<LevelFs<FileDevice>> {
    let device =
        FileDevice::open_at(path, offset).with_context(|| format!("opening {}", path.display()))?;
    let size = device.size_in_bytes()?;
    let fs = LevelFs::mount(device).with_context(|| format!("mounting {}", path.display()))?;
    println!("Mounted {} ({} MiB).", path.display(), size / 1024 / 1024);
    Ok(fs)
}

fn run_shell(mut fs: Option<LevelFs<FileDevice>>) -> anyhow::Result<()> {
    println!("LevelFS shell. Type 'help' for commands, 'log on' to trace disk access.");
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        match &fs {
            Some(volume) => {
                let ctx = volume.context();
                print!("fs:{}:{}$ ", ctx.path, ctx.level);
            }
            None => print!("fs> "),
        }
        io::stdout().flush()?;

        let Some(line) = lines.next() else { break };
        let line = line?;
        let args: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, rest)) = args.split_first() else {
            continue;
        };

        match verb {
            "exit" => break,
            "help" => help(),
            "mount" => match rest {
                [path] => match mount(&PathBuf::from(path), 0) {
                    Ok(volume) => fs = Some(volume),
                    Err(error) => println!("Error: {error:#}"),
                },
                _ => println!("Usage: mount <image>"),
            },
            "log" => match rest {
                ["on"] => {
                    log::set_max_level(LevelFilter::Trace);
                    println!("Disk logging ENABLED.");
                }
                ["off"] => {
                    log::set_max_level(LevelFilter::Info);
                    println!("Disk logging DISABLED.");
                }
                _ => println!("Usage: log <on|off>"),
            },
            _ => match &mut fs {
                Some(volume) => {
                    if let Err(error) = dispatch(volume, verb, rest, &mut lines) {
                        println!("Error: {error}");
                    }
                }
                None => println!("Not mounted."),
            },
        }
    }
    Ok(())
}

fn dispatch(
    fs: &mut LevelFs<FileDevice>,
    verb: &str,
    rest: &[&str],
    lines: &mut impl Iterator<Item = io::Result<String>>,
) -> lfs_fs::Result<()> {
    match (verb, rest) {
        ("look", []) => print_look(fs.look(None)?),
        ("look", [target]) => print_look(fs.look(Some(target))?),
        ("dir-tree", []) => print!("{}", fs.dir_tree()?),
        ("create", ["folder", name]) => {
            fs.create(CreateKind::Folder, name)?;
            println!("Created folder {name}.");
        }
        ("create", ["file", name]) => {
            fs.create(CreateKind::File, name)?;
            println!("Created file {name}.");
        }
        ("write", [name]) => {
            println!("--- Editor: {name} ---");
            println!("Type content. End with line '.done'");
            let mut content = String::new();
            for line in lines.by_ref() {
                let line = line.map_err(lfs_fs::Error::DeviceIo)?;
                if line == ".done" {
                    break;
                }
                content.push_str(&line);
                content.push('\n');
            }
            if content.is_empty() {
                println!("No content.");
            } else {
                let written = fs.write(name, content.as_bytes())?;
                println!("Written {written} bytes.");
            }
        }
        ("read", [name]) => {
            let data = fs.read(name)?;
            io::stdout()
                .write_all(&data)
                .map_err(lfs_fs::Error::DeviceIo)?;
            if !data.ends_with(b"\n") {
                println!();
            }
        }
        ("symlink", [target, link]) => {
            fs.symlink(target, link)?;
            println!("Symlink '{link}' -> '{target}' created.");
        }
        ("hardlink", [target, link]) => {
            fs.hardlink(target, link)?;
            println!("Hardlink '{link}' -> '{target}' created.");
        }
        ("nav", [path]) => fs.nav(path)?,
        ("del", [name]) => {
            fs.del(name, false)?;
            println!("Deleted {name}.");
        }
        ("del", [name, "-r"]) => {
            fs.del(name, true)?;
            println!("Deleted {name}.");
        }
        ("move", [src, dst]) => {
            fs.move_entry(src, dst)?;
            println!("Moved {src} to {dst}.");
        }
        ("level", ["add", folder, name]) => {
            fs.level_add(folder, name)?;
            println!("Added level {name}.");
        }
        ("level", ["remove", folder, name]) => {
            fs.level_remove(folder, name)?;
            println!("Removed level {name} from {folder}.");
        }
        ("level", ["rename", folder, old, new]) => {
            fs.level_rename(folder, old, new)?;
            println!("Renamed level {old} to {new} in {folder}.");
        }
        ("link", [dir1, dir2, level]) => {
            fs.link(dir1, dir2, level)?;
            println!("Created shared level '{level}' linking {dir1} <-> {dir2}.");
        }
        ("chmod", [name, bits]) => {
            let perms = u32::from_str_radix(bits, 8)
                .map_err(|_| lfs_fs::Error::InvalidName(format!("bad permission bits: {bits}")))?;
            fs.chmod(name, perms)?;
            println!("Permissions of {name} set to {perms:o}.");
        }
        ("current", []) => {
            let info = fs.current();
            println!("Path: {}", info.path);
            println!("Level: {}", info.level);
            println!("Directory Cluster: {}", info.dir_cluster);
            println!("Content Cluster: {}", info.content_cluster);
        }
        _ => println!("Unknown command. Type 'help' for list."),
    }
    Ok(())
}

fn print_look(result: LookResult) {
    match result {
        LookResult::Entries { title, entries } => {
            println!("Content of {title}:");
            if entries.is_empty() {
                println!("(empty)");
            }
            for entry in entries {
                print_entry(&entry);
            }
        }
        LookResult::Levels { name, levels } => {
            println!("Levels of '{name}':");
            if levels.is_empty() {
                println!("  (no levels)");
            }
            for level in levels {
                println!("  [{level}]");
            }
        }
        LookResult::File(name) => println!("File: {name}"),
    }
}

fn print_entry(entry: &EntryInfo) {
    let tag = match entry.entry_type {
        TYPE_LEVELED_DIR => "<L-DIR>",
        TYPE_FILE => "<FILE>",
        TYPE_SYMLINK => "<SYMLNK>",
        TYPE_HARDLINK => "<HDLINK>",
        _ => "<?>",
    };
    print!("{tag:<8} {}", entry.name);
    if let Some(target) = &entry.symlink_target {
        print!(" -> {target}");
    }
    println!();
}

fn help() {
    println!("Commands:");
    println!("  mount <image>            - Mount a disk image");
    println!("  log <on|off>             - Toggle sector tracing");
    println!("  look                     - List directory contents");
    println!("  look <folder>            - List levels of a folder");
    println!("  look <folder>:<level>    - List contents of folder:level");
    println!("  dir-tree                 - Display directory tree");
    println!("  current                  - Show current path and level");
    println!("  create folder <name>     - Create leveled directory");
    println!("  create file <name>       - Create file");
    println!("  write <name>             - Write file (input until '.done')");
    println!("  read <name>              - Read file contents");
    println!("  symlink <target> <link>  - Create symbolic link");
    println!("  hardlink <target> <link> - Create hard link");
    println!("  nav <path>               - Navigate ('..', '/', ':level')");
    println!("  del <name> [-r]          - Delete entry");
    println!("  move <src> <dst>         - Move/rename entry");
    println!("  level add <f|.> <name>   - Add level");
    println!("  level remove <f|.> <name> - Remove level");
    println!("  level rename <f|.> <old> <new> - Rename level");
    println!("  link <dir1> <dir2> <lvl> - Create shared level (DAG)");
    println!("  chmod <name> <bits>      - Set permission bits (octal)");
    println!("  exit                     - Exit");
}
