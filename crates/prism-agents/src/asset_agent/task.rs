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

//! Per-request state of an asynchronous load.

use parking_lot::Mutex;
use prism_core::EngineError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::scheduler_agent::TaskHandle;

/// Lifecycle of a [`LoadTask`].
///
/// `Pending → Loading → Loaded → Uploading → Completed`, with `Failed` and `Cancelled`
/// reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStatus {
    /// Queued on the scheduler.
    Pending,
    /// Decoding on a worker.
    Loading,
    /// Decoded; waiting for the GPU thread.
    Loaded,
    /// Being uploaded on the GPU thread.
    Uploading,
    /// Uploaded; the callback received the resource.
    Completed,
    /// Gave up; the callback received the error.
    Failed,
    /// Cancelled before completion; no callback.
    Cancelled,
}

impl LoadStatus {
    /// Returns `true` for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The kind of resource a task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadKind {
    /// A texture from an image file.
    Texture,
    /// A mesh from an OBJ file.
    Mesh,
    /// A multi-part model with materials.
    Model,
    /// A caller-provided decode/upload pair.
    Custom,
}

/// Shared state of one load request.
pub struct LoadTask {
    id: u32,
    name: String,
    path: PathBuf,
    kind: LoadKind,
    status: Mutex<LoadStatus>,
    cancelled: AtomicBool,
    attempts: AtomicU32,
    error: Mutex<Option<EngineError>>,
    worker: Mutex<Option<TaskHandle>>,
}

impl LoadTask {
    pub(crate) fn new(id: u32, name: &str, path: &Path, kind: LoadKind) -> Self {
        Self {
            id,
            name: name.to_owned(),
            path: path.to_path_buf(),
            kind,
            status: Mutex::new(LoadStatus::Pending),
            cancelled: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            error: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Task id, unique per loader.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The name the resource will be registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The source file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the task produces.
    pub fn kind(&self) -> LoadKind {
        self.kind
    }

    /// Current phase.
    pub fn status(&self) -> LoadStatus {
        *self.status.lock()
    }

    /// Decode attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// The failure, once the task has failed.
    pub fn error(&self) -> Option<EngineError> {
        self.error.lock().clone()
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Requests cancellation. Returns `false` if the task already finished.
    pub(crate) fn request_cancel(&self) -> bool {
        let status = self.status.lock();
        if status.is_terminal() {
            return false;
        }
        self.cancelled.store(true, Ordering::Release);
        true
    }

    /// Moves to `next` unless the task already reached a terminal phase.
    pub(crate) fn transition(&self, next: LoadStatus) -> bool {
        let mut status = self.status.lock();
        if status.is_terminal() {
            return false;
        }
        log::trace!("Load '{}' {:?} -> {:?}", self.name, *status, next);
        *status = next;
        true
    }

    /// Settles a cancelled task. Returns `true` if cancellation was pending.
    pub(crate) fn settle_cancel(&self) -> bool {
        if !self.is_cancel_requested() {
            return false;
        }
        if self.transition(LoadStatus::Cancelled) {
            log::debug!("Load '{}' cancelled", self.name);
        }
        true
    }

    pub(crate) fn fail(&self, error: EngineError) {
        *self.error.lock() = Some(error);
        self.transition(LoadStatus::Failed);
    }

    pub(crate) fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn set_worker(&self, handle: TaskHandle) {
        *self.worker.lock() = Some(handle);
    }

    pub(crate) fn worker(&self) -> Option<TaskHandle> {
        self.worker.lock().clone()
    }
}

impl fmt::Debug for LoadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("status", &self.status())
            .field("attempts", &self.attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_phases_are_sticky() {
        let task = LoadTask::new(0, "t", Path::new("t.png"), LoadKind::Texture);
        assert!(task.transition(LoadStatus::Loading));
        task.fail(EngineError::invalid_state("boom"));
        assert_eq!(task.status(), LoadStatus::Failed);
        assert!(!task.transition(LoadStatus::Completed));
        assert!(!task.request_cancel());
        assert_eq!(task.status(), LoadStatus::Failed);
        assert!(task.error().is_some());
    }

    #[test]
    fn cancellation_settles_once_requested() {
        let task = LoadTask::new(1, "m", Path::new("m.obj"), LoadKind::Mesh);
        assert!(!task.settle_cancel());
        assert!(task.request_cancel());
        assert!(task.settle_cancel());
        assert_eq!(task.status(), LoadStatus::Cancelled);
    }
}
