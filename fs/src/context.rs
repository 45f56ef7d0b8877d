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

use crate::layout::MASTER_LEVEL;

/// Where the resolver currently stands: a directory (level table), the
/// content chain of the level selected within it, and the display path.
/// `nav ..` pops the history stack; an empty stack means the root.
#[derive(Debug, Clone)]
pub struct NavContext {
    pub dir_cluster: u64,
    pub content_cluster: u64,
    pub root_content_cluster: u64,
    pub path: String,
    pub level: String,
    pub(crate) history: Vec<NavState>,
}

#[derive(Debug, Clone)]
pub(crate) struct NavState {
    pub dir_cluster: u64,
    pub content_cluster: u64,
    pub path: String,
    pub level: String,
}

impl NavContext {
    pub(crate) fn new(root_dir: u64, root_content: u64) -> Self {
        Self {
            dir_cluster: root_dir,
            content_cluster: root_content,
            root_content_cluster: root_content,
            path: "/".into(),
            level: MASTER_LEVEL.into(),
            history: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, dir_cluster: u64, content_cluster: u64, name: &str, level: &str) {
        self.history.push(NavState {
            dir_cluster: self.dir_cluster,
            content_cluster: self.content_cluster,
            path: self.path.clone(),
            level: self.level.clone(),
        });
        if !self.path.ends_with('/') {
            self.path.push('/');
        }
        self.path.push_str(name);
        self.dir_cluster = dir_cluster;
        self.content_cluster = content_cluster;
        self.level = level.into();
    }

    /// Returns false when already at the root.
    pub(crate) fn pop(&mut self) -> bool {
        match self.history.pop() {
            Some(state) => {
                self.dir_cluster = state.dir_cluster;
                self.content_cluster = state.content_cluster;
                self.path = state.path;
                self.level = state.level;
                true
            }
            None => false,
        }
    }

    pub(crate) fn reset_to_root(&mut self, root_dir: u64, content: u64, level: &str) {
        self.dir_cluster = root_dir;
        self.content_cluster = content;
        self.path = "/".into();
        self.level = level.into();
        self.history.clear();
    }

    pub fn is_at_root(&self) -> bool {
        self.history.is_empty()
    }
}
