// Copyright 2025 eraflo
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

//! File watching for resource hot reload.
//!
//! The watcher only queues [`ReloadRequest`]s; the actual rebuild happens when the GPU
//! thread calls [`ResourceManager::process_reload_queue`].

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use prism_core::{EngineError, EngineResult, ErrorKind};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use crate::resource_manager::{ReloadRequest, ResourceManager};

type TrackedPaths = Arc<Mutex<HashMap<PathBuf, PathBuf>>>;

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn watch_error(e: notify::Error) -> EngineError {
    EngineError::new(ErrorKind::OperationFailed, format!("file watcher: {e}"))
}

/// Watches the source files of registered resources and queues reloads when they change.
///
/// Parent directories are watched rather than the files themselves, so editors that
/// save by replacing the file are still picked up. Drop the watcher to stop watching.
pub struct HotReloadWatcher {
    watcher: RecommendedWatcher,
    watched_dirs: HashSet<PathBuf>,
    tracked: TrackedPaths,
}

impl std::fmt::Debug for HotReloadWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloadWatcher")
            .field("watched_dirs", &self.watched_dirs)
            .field("tracked", &self.tracked.lock().len())
            .finish()
    }
}

impl HotReloadWatcher {
    /// Creates a watcher feeding `manager`'s reload queue. The watcher holds only a weak
    /// reference, so it never keeps the manager alive.
    pub fn new(manager: &Arc<ResourceManager>) -> EngineResult<Self> {
        let tracked: TrackedPaths = Arc::default();
        let weak: Weak<ResourceManager> = Arc::downgrade(manager);
        let callback_paths = Arc::clone(&tracked);

        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let Some(manager) = weak.upgrade() else {
                        return;
                    };
                    for request in reload_requests_for(&event, &callback_paths) {
                        manager.queue_reload(request);
                    }
                }
                Err(e) => log::warn!("File watcher error: {e}"),
            },
            Config::default(),
        )
        .map_err(watch_error)?;

        Ok(Self {
            watcher,
            watched_dirs: HashSet::new(),
            tracked,
        })
    }

    /// Starts watching `path`. Changes to it queue `ReloadRequest::Path(path)`.
    pub fn watch_path(&mut self, path: &Path) -> EngineResult<()> {
        let resolved = canonical(path);
        let dir = resolved
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                EngineError::invalid_argument(format!("{} has no parent", path.display()))
            })?;

        if self.watched_dirs.insert(dir.clone()) {
            self.watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(watch_error)?;
            log::debug!("Watching {} for hot reload", dir.display());
        }
        self.tracked.lock().insert(resolved, path.to_path_buf());
        Ok(())
    }

    /// Watches every source path currently known to `manager`. Returns how many paths
    /// are tracked afterwards.
    pub fn sync_with(&mut self, manager: &ResourceManager) -> EngineResult<usize> {
        for path in manager.watched_paths() {
            if let Err(e) = self.watch_path(&path) {
                log::warn!("Cannot watch {}: {e}", path.display());
            }
        }
        Ok(self.tracked.lock().len())
    }

    /// Number of tracked files.
    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }
}

fn reload_requests_for(
    event: &Event,
    tracked: &Mutex<HashMap<PathBuf, PathBuf>>,
) -> Vec<ReloadRequest> {
    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return Vec::new();
    }
    let tracked = tracked.lock();
    event
        .paths
        .iter()
        .filter_map(|p| tracked.get(&canonical(p)))
        .map(|registered| ReloadRequest::Path(registered.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{DataChange, ModifyKind, RemoveKind};
    use std::fs;

    #[test]
    fn modify_events_map_to_registered_paths() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("basic.frag");
        fs::write(&file, "void main() {}").unwrap();

        let tracked = Mutex::new(HashMap::new());
        tracked.lock().insert(canonical(&file), file.clone());

        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(file.clone());
        assert_eq!(
            reload_requests_for(&modify, &tracked),
            vec![ReloadRequest::Path(file.clone())]
        );

        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(file.clone());
        assert!(reload_requests_for(&remove, &tracked).is_empty());

        let other = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(dir.path().join("unrelated.txt"));
        assert!(reload_requests_for(&other, &tracked).is_empty());
    }

    #[test]
    fn watcher_tracks_paths() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.vert");
        let b = dir.path().join("b.frag");
        fs::write(&a, "").unwrap();
        fs::write(&b, "").unwrap();

        let manager = Arc::new(ResourceManager::default());
        let mut watcher = HotReloadWatcher::new(&manager).unwrap();
        watcher.watch_path(&a).unwrap();
        watcher.watch_path(&b).unwrap();
        assert_eq!(watcher.tracked_count(), 2);
        assert_eq!(watcher.watched_dirs.len(), 1);
    }
}
