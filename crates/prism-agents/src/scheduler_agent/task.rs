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

//! Units of work for the task scheduler and the handles used to wait on them.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scheduling band. Higher bands always run before lower ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TaskPriority {
    /// Runs only when nothing else is queued.
    Background = 0,
    /// Deferred work.
    Low = 1,
    /// The default band.
    #[default]
    Normal = 2,
    /// Latency-sensitive work.
    High = 3,
    /// Work the frame is waiting on.
    Critical = 4,
}

impl TaskPriority {
    /// Number of bands.
    pub const COUNT: usize = 5;

    /// Every band, lowest first.
    pub const ALL: [TaskPriority; Self::COUNT] = [
        Self::Background,
        Self::Low,
        Self::Normal,
        Self::High,
        Self::Critical,
    ];

    /// Maps a caller-facing weight in `[0, 1]` onto a band.
    ///
    /// The range is split into five equal slices: below `0.2` is `Background`, then
    /// `Low`, `Normal` (from `0.4`), `High` (from `0.6`) and `Critical` from `0.8` up.
    /// NaN falls back to `Normal`.
    pub fn from_weight(weight: f32) -> Self {
        if weight.is_nan() {
            return Self::Normal;
        }
        match weight {
            w if w >= 0.8 => Self::Critical,
            w if w >= 0.6 => Self::High,
            w if w >= 0.4 => Self::Normal,
            w if w >= 0.2 => Self::Low,
            _ => Self::Background,
        }
    }

    /// Position of the band in [`TaskPriority::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A unit of work executed by a scheduler worker.
pub trait Task: Send + 'static {
    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// The band this task is queued in.
    fn priority(&self) -> TaskPriority {
        TaskPriority::Normal
    }

    /// Runs the task. Called exactly once, on a worker thread.
    fn execute(self: Box<Self>);
}

/// A [`Task`] built from a closure.
pub struct LambdaTask<F> {
    name: String,
    priority: TaskPriority,
    func: F,
}

impl<F> LambdaTask<F>
where
    F: FnOnce() + Send + 'static,
{
    /// Wraps `func`.
    pub fn new(func: F, priority: TaskPriority, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority,
            func,
        }
    }
}

impl<F> Task for LambdaTask<F>
where
    F: FnOnce() + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn execute(self: Box<Self>) {
        (self.func)()
    }
}

/// Completion flag shared between a queued task and its handles.
#[derive(Default)]
pub(crate) struct CompletionSignal {
    done: AtomicBool,
    panicked: AtomicBool,
    lock: Mutex<()>,
    condvar: Condvar,
}

impl CompletionSignal {
    pub(crate) fn signal(&self, panicked: bool) {
        let _guard = self.lock.lock();
        self.panicked.store(panicked, Ordering::Release);
        self.done.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn wait(&self) {
        if self.is_done() {
            return;
        }
        let mut guard = self.lock.lock();
        while !self.is_done() {
            self.condvar.wait(&mut guard);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_done() {
            return true;
        }
        let mut guard = self.lock.lock();
        let deadline = std::time::Instant::now() + timeout;
        while !self.is_done() {
            if self.condvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.is_done()
    }
}

/// Tracks one submitted task. Cloning shares the same completion state.
#[derive(Clone)]
pub struct TaskHandle {
    id: u64,
    name: Arc<str>,
    signal: Arc<CompletionSignal>,
}

impl TaskHandle {
    pub(crate) fn new(id: u64, name: &str) -> (Self, Arc<CompletionSignal>) {
        let signal = Arc::new(CompletionSignal::default());
        let handle = Self {
            id,
            name: Arc::from(name),
            signal: Arc::clone(&signal),
        };
        (handle, signal)
    }

    /// Submission sequence number, unique per scheduler.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The task's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks until the task has run.
    pub fn wait(&self) {
        self.signal.wait();
    }

    /// Blocks for at most `timeout_ms`. Returns `true` if the task completed in time;
    /// on `false` the task keeps running.
    pub fn wait_for(&self, timeout_ms: u64) -> bool {
        self.signal.wait_timeout(Duration::from_millis(timeout_ms))
    }

    /// Returns `true` once the task has run, whether or not it panicked.
    pub fn is_completed(&self) -> bool {
        self.signal.is_done()
    }

    /// Returns `true` if the task completed by panicking.
    pub fn panicked(&self) -> bool {
        self.signal.is_done() && self.signal.panicked.load(Ordering::Acquire)
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Blocks until every handle has completed.
pub fn wait_for_all(handles: &[TaskHandle]) {
    for handle in handles {
        handle.wait();
    }
}
