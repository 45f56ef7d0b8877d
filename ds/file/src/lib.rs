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
    fs::{File, OpenOptions},
    io::Write,
    os::unix::fs::FileExt,
    path::Path,
};

use lfs_ds::{trace_access, BlockDevice, Error, Result, SECTOR_SIZE};

/// A volume backed by a regular file (disk image) or a raw device node.
/// `base_offset` shifts every access, which is how a partition inside a
/// larger device is addressed.
pub struct FileDevice {
    file: File,
    base_offset: u64,
}

impl FileDevice {
    /// Opens a disk image for read/write at offset 0.
    pub fn open_image<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_at(path, 0)
    }

    /// Opens a file or device node with every sector address shifted by
    /// `base_offset` bytes.
    pub fn open_at<P: AsRef<Path>>(path: P, base_offset: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file, base_offset })
    }

    /// Creates a zero-filled image file of `size_mb` mebibytes. Only the
    /// first mebibyte is explicitly zeroed, the rest is a hole.
    pub fn create_image<P: AsRef<Path>>(path: P, size_mb: u64) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_mb * 1024 * 1024)?;
        let zeros = [0u8; 4096];
        let explicit = (size_mb * 1024 * 1024).min(1024 * 1024);
        for _ in 0..explicit / 4096 {
            file.write_all(&zeros)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

impl BlockDevice for FileDevice {
    fn read_sectors(&self, index: u64, buffer: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buffer.len() % SECTOR_SIZE, 0);
        let offset = self.base_offset + index * SECTOR_SIZE as u64;
        self.file
            .read_exact_at(buffer, offset)
            .map_err(|error| match error.kind() {
                std::io::ErrorKind::UnexpectedEof => Error::ShortAccess {
                    op: "read",
                    sector: index,
                },
                _ => Error::DeviceIo(error),
            })?;
        trace_access("READ ", index, buffer);
        Ok(())
    }

    fn write_sectors(&self, index: u64, buffer: &[u8]) -> Result<()> {
        debug_assert_eq!(buffer.len() % SECTOR_SIZE, 0);
        trace_access("WRITE", index, buffer);
        let offset = self.base_offset + index * SECTOR_SIZE as u64;
        self.file.write_all_at(buffer, offset)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn size_in_bytes(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len().saturating_sub(self.base_offset))
    }

    fn flush(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
