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

//! Path grammar: `("/" | "") segment ("/" segment)*`, where a segment is
//! `name` or `name:level`. A leading `/` anchors at the root content chain;
//! otherwise resolution starts at the current one. Intermediate segments
//! must be leveled directories; the final segment is handed back unopened.

use lfs_ds::BlockDevice;

use crate::{
    layout::{MASTER_LEVEL, TYPE_LEVELED_DIR},
    Error, LevelFs, Result,
};

/// Outcome of resolving everything but the last path segment.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Content chain the final segment lives in.
    pub parent: u64,
    /// Final segment, possibly still carrying a `:level` suffix.
    pub name: String,
}

/// Splits `name:level` into its parts; the level is optional.
pub fn split_level(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once(':') {
        Some((name, level)) => (name, Some(level)),
        None => (segment, None),
    }
}

impl<D: BlockDevice> LevelFs<D> {
    /// Resolves `path` against the navigation context.
    pub fn resolve(&self, path: &str) -> Result<ResolvedPath> {
        if path.is_empty() {
            return Err(Error::NotFound(path.into()));
        }
        let (mut current, rest) = if let Some(rest) = path.strip_prefix('/') {
            (self.ctx.root_content_cluster, rest)
        } else {
            (self.ctx.content_cluster, path)
        };

        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, intermediate)) = segments.split_last() else {
            return Ok(ResolvedPath {
                parent: current,
                name: String::new(),
            });
        };

        for segment in intermediate {
            current = self.descend(current, segment)?;
        }
        Ok(ResolvedPath {
            parent: current,
            name: (*last).into(),
        })
    }

    /// One intermediate hop: leveled directory lookup, then level selection
    /// (`master` unless the segment names one).
    pub(crate) fn descend(&self, content: u64, segment: &str) -> Result<u64> {
        let (name, level) = split_level(segment);
        let level = level.unwrap_or(MASTER_LEVEL);

        let (_, entry) = self
            .find_entry(content, name)?
            .filter(|(_, entry)| entry.entry_type == TYPE_LEVELED_DIR)
            .ok_or_else(|| Error::NotFound(name.into()))?;
        let (_, version) = self
            .find_level(entry.start_cluster.get(), level)?
            .ok_or_else(|| Error::NotFound(format!("{name}:{level}")))?;
        Ok(version.content_table_cluster.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_splitting() {
        assert_eq!(split_level("docs"), ("docs", None));
        assert_eq!(split_level("docs:draft"), ("docs", Some("draft")));
        assert_eq!(split_level(":draft"), ("", Some("draft")));
    }
}
