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

use lfs_ds_file::FileDevice;
use lfs_fs::LevelFs;
use tempfile::NamedTempFile;

/// A formatted scratch image; dropped with the test.
pub fn formatted_image(size_mb: u64) -> NamedTempFile {
    let image = NamedTempFile::new().unwrap();
    FileDevice::create_image(image.path(), size_mb).unwrap();
    let device = FileDevice::open_image(image.path()).unwrap();
    LevelFs::format(&device, "test").unwrap();
    image
}

pub fn mount(image: &NamedTempFile) -> LevelFs<FileDevice> {
    LevelFs::mount(FileDevice::open_image(image.path()).unwrap()).unwrap()
}

pub fn names(fs: &LevelFs<FileDevice>) -> Vec<String> {
    fs.list_entries(fs.context().content_cluster)
        .unwrap()
        .into_iter()
        .map(|entry| entry.name)
        .collect()
}
