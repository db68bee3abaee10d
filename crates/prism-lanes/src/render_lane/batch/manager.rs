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

//! The batch manager: off-thread binning and on-thread execution.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use prism_core::renderer::FrameStats;
use prism_core::{BatchingMode, Stopwatch};
use std::mem;
use std::sync::Arc;
use std::thread;

use super::renderable::{BatchableItem, RenderContext, Renderable};
use super::storage::{BatchStorage, DEFAULT_MAX_IDLE_FRAMES};

enum WorkerMessage {
    Submit(Arc<dyn Renderable>),
    Shutdown,
}

#[derive(Debug, Default)]
struct Backlog {
    pending: usize,
    max_depth: usize,
}

struct Shared {
    mode: Mutex<BatchingMode>,
    recording: Mutex<BatchStorage>,
    backlog: Mutex<Backlog>,
    idle: Condvar,
}

impl Shared {
    fn record(&self, renderable: Arc<dyn Renderable>) {
        let mode = *self.mode.lock();
        match BatchableItem::classify(renderable.clone()) {
            Some(item) => self.recording.lock().record(item, mode),
            None => self.recording.lock().record_immediate(renderable),
        }
    }

    fn complete_one(&self) {
        let mut backlog = self.backlog.lock();
        backlog.pending = backlog.pending.saturating_sub(1);
        if backlog.pending == 0 {
            self.idle.notify_all();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<WorkerMessage>) {
    log::debug!("Batch worker started");
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Submit(renderable) => {
                shared.record(renderable);
                shared.complete_one();
            }
            WorkerMessage::Shutdown => break,
        }
    }
    log::debug!("Batch worker stopped");
}

/// Groups submissions into batches on a worker thread and draws them on the GPU thread.
///
/// `submit` may be called from any thread. `flush` must run on the GPU thread; it waits
/// for the worker to finish the frame's submissions, swaps the recording and execution
/// storages, and executes.
pub struct BatchManager {
    shared: Arc<Shared>,
    execution: BatchStorage,
    tx: Sender<WorkerMessage>,
    worker: Option<thread::JoinHandle<()>>,
    max_idle_frames: u32,
}

impl std::fmt::Debug for BatchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("mode", &self.batching_mode())
            .field("worker_running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl BatchManager {
    /// Starts the binning worker.
    pub fn new(mode: BatchingMode) -> Self {
        let shared = Arc::new(Shared {
            mode: Mutex::new(mode),
            recording: Mutex::new(BatchStorage::new()),
            backlog: Mutex::new(Backlog::default()),
            idle: Condvar::new(),
        });
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("prism-batch-worker".into())
            .spawn(move || worker_loop(worker_shared, rx))
            .map_err(|e| log::error!("Could not start the batch worker, binning inline: {e}"))
            .ok();
        Self {
            shared,
            execution: BatchStorage::new(),
            tx,
            worker,
            max_idle_frames: DEFAULT_MAX_IDLE_FRAMES,
        }
    }

    /// The active batching mode.
    pub fn batching_mode(&self) -> BatchingMode {
        *self.shared.mode.lock()
    }

    /// Changes the batching mode. Applies to submissions classified after the call.
    pub fn set_batching_mode(&self, mode: BatchingMode) {
        let mut current = self.shared.mode.lock();
        if *current != mode {
            log::info!("Batching mode {:?} -> {:?}", *current, mode);
            *current = mode;
        }
    }

    /// Frames an unused batch keeps its GPU resources.
    pub fn set_max_idle_frames(&mut self, frames: u32) {
        self.max_idle_frames = frames;
    }

    /// Queues a renderable for this frame.
    pub fn submit(&self, renderable: Arc<dyn Renderable>) {
        if self.worker.is_none() {
            self.shared.record(renderable);
            return;
        }
        {
            let mut backlog = self.shared.backlog.lock();
            backlog.pending += 1;
            backlog.max_depth = backlog.max_depth.max(backlog.pending);
        }
        if let Err(err) = self.tx.send(WorkerMessage::Submit(renderable)) {
            log::warn!("Batch worker is gone; binning inline");
            if let WorkerMessage::Submit(renderable) = err.into_inner() {
                self.shared.record(renderable);
            }
            self.shared.complete_one();
        }
    }

    /// Submissions the worker has not binned yet.
    pub fn pending(&self) -> usize {
        self.shared.backlog.lock().pending
    }

    /// Blocks until the worker has binned everything submitted so far. Returns the time
    /// spent waiting in milliseconds.
    pub fn drain(&self) -> f64 {
        let watch = Stopwatch::new();
        let mut backlog = self.shared.backlog.lock();
        while backlog.pending > 0 {
            self.shared.idle.wait(&mut backlog);
        }
        watch.elapsed_ms_f64()
    }

    /// Executes everything submitted since the previous flush. Must run on the GPU thread.
    pub fn flush(&mut self, ctx: &RenderContext<'_>) -> FrameStats {
        let wait_ms = self.drain();
        let max_depth = mem::take(&mut self.shared.backlog.lock().max_depth);

        let released = {
            let mut recording = self.shared.recording.lock();
            mem::swap(&mut *recording, &mut self.execution);
            recording.reset_for_recording(self.max_idle_frames)
        };
        for mesh in released {
            ctx.resources.free_mesh(ctx.state.context(), mesh);
        }

        let mut stats = self.execution.execute(ctx);
        stats.worker_wait_time_ms = wait_ms;
        stats.worker_max_queue_depth = max_depth as u32;
        log::trace!("Batch flush: {stats}");
        stats
    }
}

impl Drop for BatchManager {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.tx.send(WorkerMessage::Shutdown);
            if worker.join().is_err() {
                log::error!("Batch worker panicked");
            }
        }
    }
}
