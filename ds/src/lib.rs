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

pub use lfs_err::*;

/// Smallest addressable unit of a volume.
pub const SECTOR_SIZE: usize = 512;

/// Sector-granular access to a volume. All addresses are sector indices
/// relative to the volume start; partition offsets are the implementation's
/// concern. A write shall be durable by the time `write_sectors` returns.
pub trait BlockDevice {
    /// Reads `buffer.len() / 512` sectors starting at `index`. A short read
    /// is an error, never a partial fill.
    fn read_sectors(&self, index: u64, buffer: &mut [u8]) -> Result<()>;

    /// Writes `buffer.len() / 512` sectors starting at `index` and waits for
    /// the data to reach stable storage.
    fn write_sectors(&self, index: u64, buffer: &[u8]) -> Result<()>;

    fn size_in_bytes(&self) -> Result<u64>;

    fn flush(&self) -> Result<()>;
}

/// Per-sector access trace, emitted at trace level so it is free unless the
/// shell turns it on.
pub fn trace_access(op: &str, index: u64, buffer: &[u8]) {
    if log::log_enabled!(log::Level::Trace) {
        let head = &buffer[..buffer.len().min(16)];
        let head: Vec<String> = head.iter().map(|b| format!("{b:02x}")).collect();
        log::trace!(
            "[{op}] sector {index} offset {:#x} size {}: {}",
            index * SECTOR_SIZE as u64,
            buffer.len(),
            head.join(" ")
        );
    }
}
