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

//! The priority worker pool.

use parking_lot::{Condvar, Mutex};
use prism_core::config::resolve_worker_count;
use prism_core::{EngineConfig, EngineError, ErrorKind, Stopwatch};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;

use super::task::{CompletionSignal, LambdaTask, Task, TaskHandle, TaskPriority};

/// Failures of the task scheduler itself. Task failures are the task's business.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler was shut down; no further work is accepted.
    #[error("task scheduler is shut down")]
    ShutDown,
    /// A worker thread could not be started.
    #[error("failed to spawn scheduler worker: {0}")]
    Spawn(#[from] io::Error),
}

impl From<SchedulerError> for EngineError {
    #[track_caller]
    fn from(err: SchedulerError) -> Self {
        let kind = match &err {
            SchedulerError::ShutDown => ErrorKind::InvalidState,
            SchedulerError::Spawn(_) => ErrorKind::InitializationFailed,
        };
        EngineError::new(kind, err.to_string())
    }
}

/// A snapshot of scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchedulerStats {
    /// Worker threads in the pool.
    pub worker_count: usize,
    /// Tasks accepted since creation.
    pub submitted: u64,
    /// Tasks that finished, including panicked ones.
    pub completed: u64,
    /// Tasks that panicked.
    pub panicked: u64,
    /// Tasks waiting in the queue.
    pub pending: usize,
    /// Queued tasks per band, indexed by [`TaskPriority::index`].
    pub pending_by_priority: [usize; TaskPriority::COUNT],
    /// Tasks running right now.
    pub active: usize,
    /// Mean task duration in milliseconds.
    pub average_task_ms: f64,
    /// Longest task duration in milliseconds.
    pub max_task_ms: f64,
    /// Fraction of worker time spent running tasks since creation, in `[0, 1]`.
    pub utilization: f64,
}

struct QueuedTask {
    priority: TaskPriority,
    seq: u64,
    name: Arc<str>,
    task: Box<dyn Task>,
    signal: Arc<CompletionSignal>,
}

// Max-heap: higher band first, then lower sequence number (FIFO within a band).
impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<QueuedTask>,
    shutting_down: bool,
}

#[derive(Debug, Default)]
struct Timings {
    completed: u64,
    panicked: u64,
    total_ms: f64,
    max_ms: f64,
}

struct Shared {
    queue: Mutex<Queue>,
    available: Condvar,
    timings: Mutex<Timings>,
    submitted: AtomicU64,
    active: AtomicUsize,
    uptime: Stopwatch,
}

impl Shared {
    fn next_task(&self) -> Option<QueuedTask> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(job) = queue.heap.pop() {
                return Some(job);
            }
            if queue.shutting_down {
                return None;
            }
            self.available.wait(&mut queue);
        }
    }

    fn run(&self, job: QueuedTask) {
        let QueuedTask {
            name, task, signal, ..
        } = job;
        self.active.fetch_add(1, Ordering::Relaxed);
        let watch = Stopwatch::new();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| task.execute()));
        let elapsed = watch.elapsed_ms_f64();
        self.active.fetch_sub(1, Ordering::Relaxed);

        let panicked = outcome.is_err();
        if panicked {
            log::error!("Task '{name}' panicked after {elapsed:.2} ms");
        } else {
            log::trace!("Task '{name}' finished in {elapsed:.2} ms");
        }
        {
            let mut timings = self.timings.lock();
            timings.completed += 1;
            timings.panicked += u64::from(panicked);
            timings.total_ms += elapsed;
            timings.max_ms = timings.max_ms.max(elapsed);
        }
        signal.signal(panicked);
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    log::debug!("Scheduler worker {index} started");
    while let Some(job) = shared.next_task() {
        shared.run(job);
    }
    log::debug!("Scheduler worker {index} stopped");
}

/// A fixed-size pool of worker threads fed from a priority queue.
///
/// Strictly higher priorities run first; tasks of the same priority run in submission
/// order. A panicking task is logged and reported through its handle; the worker keeps
/// going. Shutting down lets the workers drain the queue before they are joined.
pub struct TaskScheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("worker_count", &self.worker_count)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl TaskScheduler {
    /// Starts `worker_count` workers. Zero picks `max(1, cpu_count - 1)`.
    pub fn new(worker_count: usize) -> Result<Self, SchedulerError> {
        let worker_count = resolve_worker_count(worker_count);
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            available: Condvar::new(),
            timings: Mutex::new(Timings::default()),
            submitted: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            uptime: Stopwatch::new(),
        });

        let scheduler = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            worker_count,
        };
        for index in 0..worker_count {
            let shared = Arc::clone(&scheduler.shared);
            let handle = thread::Builder::new()
                .name(format!("prism-worker-{index}"))
                .spawn(move || worker_loop(shared, index))?;
            scheduler.workers.lock().push(handle);
        }
        log::info!("Task scheduler started with {worker_count} worker(s)");
        Ok(scheduler)
    }

    /// Starts a pool sized by `task_scheduler_worker_count`.
    pub fn from_config(config: &EngineConfig) -> Result<Self, SchedulerError> {
        Self::new(config.task_scheduler_worker_count as usize)
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Queues `task` in its priority band.
    pub fn submit<T: Task>(&self, task: T) -> Result<TaskHandle, SchedulerError> {
        self.submit_boxed(Box::new(task))
    }

    /// Queues an already boxed task.
    pub fn submit_boxed(&self, task: Box<dyn Task>) -> Result<TaskHandle, SchedulerError> {
        let mut queue = self.shared.queue.lock();
        if queue.shutting_down {
            return Err(SchedulerError::ShutDown);
        }
        let seq = self.shared.submitted.fetch_add(1, Ordering::Relaxed);
        let (handle, signal) = TaskHandle::new(seq, task.name());
        queue.heap.push(QueuedTask {
            priority: task.priority(),
            seq,
            name: Arc::from(task.name()),
            task,
            signal,
        });
        drop(queue);
        self.shared.available.notify_one();
        Ok(handle)
    }

    /// Queues a closure.
    pub fn submit_lambda<F>(
        &self,
        func: F,
        priority: TaskPriority,
        name: impl Into<String>,
    ) -> Result<TaskHandle, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(LambdaTask::new(func, priority, name))
    }

    /// Tasks queued but not started.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    /// Returns `true` once [`TaskScheduler::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().shutting_down
    }

    /// Current counters and timings.
    pub fn stats(&self) -> SchedulerStats {
        let mut pending_by_priority = [0; TaskPriority::COUNT];
        let pending = {
            let queue = self.shared.queue.lock();
            for job in queue.heap.iter() {
                pending_by_priority[job.priority.index()] += 1;
            }
            queue.heap.len()
        };
        let timings = self.shared.timings.lock();
        let average_task_ms = if timings.completed > 0 {
            timings.total_ms / timings.completed as f64
        } else {
            0.0
        };
        let capacity_ms = self.shared.uptime.elapsed_ms_f64() * self.worker_count as f64;
        let utilization = if capacity_ms > 0.0 {
            (timings.total_ms / capacity_ms).clamp(0.0, 1.0)
        } else {
            0.0
        };
        SchedulerStats {
            worker_count: self.worker_count,
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: timings.completed,
            panicked: timings.panicked,
            pending,
            pending_by_priority,
            active: self.shared.active.load(Ordering::Relaxed),
            average_task_ms,
            max_task_ms: timings.max_ms,
            utilization,
        }
    }

    /// Stops accepting work, lets the workers drain the queue, then joins them.
    ///
    /// Idempotent. When called from one of the pool's own workers, that worker is
    /// detached instead of joined.
    pub fn shutdown(&self) {
        {
            let mut queue = self.shared.queue.lock();
            if queue.shutting_down && self.workers.lock().is_empty() {
                return;
            }
            queue.shutting_down = true;
        }
        self.shared.available.notify_all();

        let current: ThreadId = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                log::error!("Scheduler worker exited abnormally");
            }
        }
        log::info!("Task scheduler shut down");
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn queued_tasks_order_by_band_then_fifo() {
        let mut heap = BinaryHeap::new();
        for (seq, priority) in [
            (0, TaskPriority::Low),
            (1, TaskPriority::High),
            (2, TaskPriority::Background),
            (3, TaskPriority::Low),
            (4, TaskPriority::High),
        ] {
            let (_, signal) = TaskHandle::new(seq, "t");
            heap.push(QueuedTask {
                priority,
                seq,
                name: Arc::from("t"),
                task: Box::new(LambdaTask::new(|| {}, priority, "t")),
                signal,
            });
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|j| j.seq)).collect();
        assert_eq!(order, vec![1, 4, 0, 3, 2]);
    }

    #[test]
    fn shutdown_drains_and_rejects_new_work() {
        let scheduler = TaskScheduler::new(2).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        for _ in 0..32 {
            let c = Arc::clone(&counter);
            scheduler
                .submit_lambda(
                    move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    },
                    TaskPriority::Normal,
                    "count",
                )
                .unwrap();
        }
        scheduler.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
        assert!(scheduler.is_shut_down());
        assert!(matches!(
            scheduler.submit_lambda(|| {}, TaskPriority::Low, "late"),
            Err(SchedulerError::ShutDown)
        ));
        scheduler.shutdown();
    }

    #[test]
    fn scheduler_error_maps_to_engine_kind() {
        let err: EngineError = SchedulerError::ShutDown.into();
        assert_eq!(err.kind, ErrorKind::InvalidState);
    }
}
