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

//! The asynchronous resource loader.
//!
//! Decoding runs on the task scheduler's workers; GPU uploads run on the GPU thread when
//! it drains the completed queue once per frame with
//! [`AsyncLoader::process_completed_tasks`].

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use prism_core::renderer::GpuContext;
use prism_core::{EngineConfig, EngineError, EngineResult, ErrorKind, Handle, Stopwatch};
use prism_data::{Mesh, ResourceManager, Shader, Texture};
use prism_lanes::asset_lane::{
    LoadError, LoadedModel, MeshLoader, ModelData, ModelLibrary, ModelLoadOptions, ModelLoader,
    TextureLoader,
};
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::task::{LoadKind, LoadStatus, LoadTask};
use crate::scheduler_agent::{TaskPriority, TaskScheduler};

/// Settled tasks kept queryable by default.
pub const DEFAULT_FINISHED_RETENTION: usize = 256;

/// Receives the outcome of a load on the GPU thread.
pub type LoadCallback<R> = Box<dyn FnOnce(EngineResult<R>) + Send>;

type UploadFn<A, R> = Box<dyn FnOnce(A, &UploadContext<'_>) -> EngineResult<R> + Send>;

/// What an upload step may touch. Only ever built on the GPU thread.
pub struct UploadContext<'a> {
    /// The GPU context.
    pub gpu: &'a GpuContext,
    /// Where uploaded resources are registered.
    pub resources: &'a ResourceManager,
    /// Where finished models are recorded.
    pub models: &'a ModelLibrary,
}

/// How often and how patiently failed decodes are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each further one.
    pub base_backoff: Duration,
    /// Upper bound of a single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

trait StagedLoad: Send {
    fn task(&self) -> &Arc<LoadTask>;
    fn finish(self: Box<Self>, cx: &UploadContext<'_>);
}

struct Staged<A, R> {
    task: Arc<LoadTask>,
    outcome: EngineResult<A>,
    upload: UploadFn<A, R>,
    callback: LoadCallback<R>,
}

impl<A: Send + 'static, R: 'static> StagedLoad for Staged<A, R> {
    fn task(&self) -> &Arc<LoadTask> {
        &self.task
    }

    fn finish(self: Box<Self>, cx: &UploadContext<'_>) {
        let Staged {
            task,
            outcome,
            upload,
            callback,
        } = *self;
        let result = outcome.and_then(|artifact| {
            task.transition(LoadStatus::Uploading);
            let uploaded = upload(artifact, cx);
            match &uploaded {
                Ok(_) => {
                    task.transition(LoadStatus::Completed);
                    log::debug!("Load '{}' completed", task.name());
                }
                Err(err) => {
                    log::warn!("Upload of '{}' failed: {err}", task.name());
                    task.fail(err.clone());
                }
            }
            uploaded
        });
        callback(result);
    }
}

/// Sleeps for `delay` in short slices. Returns `false` if cancellation arrived.
fn sleep_unless_cancelled(task: &LoadTask, delay: Duration) -> bool {
    const SLICE: Duration = Duration::from_millis(10);
    let watch = Stopwatch::new();
    while watch.elapsed() < delay {
        if task.is_cancel_requested() {
            return false;
        }
        thread::sleep(SLICE.min(delay.saturating_sub(watch.elapsed())));
    }
    !task.is_cancel_requested()
}

/// Runs `load` until it succeeds, the retries are exhausted, or the task is cancelled.
/// `None` means cancelled.
fn decode_with_retries<A>(
    task: &LoadTask,
    policy: RetryPolicy,
    load: &dyn Fn(&Path) -> Result<A, LoadError>,
) -> Option<EngineResult<A>> {
    loop {
        if task.settle_cancel() {
            return None;
        }
        let attempt = task.begin_attempt();
        task.transition(LoadStatus::Loading);
        match load(task.path()) {
            Ok(artifact) => return Some(Ok(artifact)),
            Err(err) if attempt > policy.max_retries => {
                log::warn!(
                    "Giving up on '{}' after {attempt} attempt(s): {err}",
                    task.name()
                );
                return Some(Err(EngineError::from(err)));
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                log::debug!(
                    "Load '{}' attempt {attempt} failed ({err}); retrying in {delay:?}",
                    task.name()
                );
                sleep_unless_cancelled(task, delay);
            }
        }
    }
}

/// [`decode_with_retries`], with a panicking decoder reported as a failed load instead of
/// leaving the task stuck in `Loading`.
fn decode_guarded<A>(
    task: &LoadTask,
    policy: RetryPolicy,
    load: &dyn Fn(&Path) -> Result<A, LoadError>,
) -> Option<EngineResult<A>> {
    panic::catch_unwind(AssertUnwindSafe(|| decode_with_retries(task, policy, load)))
        .unwrap_or_else(|payload| {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            log::error!("Decoder for '{}' panicked: {reason}", task.name());
            Some(Err(EngineError::new(
                ErrorKind::ResourceLoadFailed,
                format!("decoding '{}' panicked: {reason}", task.path().display()),
            )))
        })
}

/// Loads textures, meshes and models without blocking the GPU thread.
///
/// Each request gets a [`LoadTask`] and a `Handle<LoadTask>` to query or cancel it.
/// Callbacks run on the GPU thread, inside [`AsyncLoader::process_completed_tasks`],
/// exactly once per request that is not cancelled.
pub struct AsyncLoader {
    scheduler: Arc<TaskScheduler>,
    gpu: GpuContext,
    resources: Arc<ResourceManager>,
    models: Arc<ModelLibrary>,
    tasks: Mutex<HashMap<u32, Arc<LoadTask>>>,
    next_id: AtomicU32,
    completed_tx: Sender<Box<dyn StagedLoad>>,
    completed_rx: Receiver<Box<dyn StagedLoad>>,
    retry: RetryPolicy,
    uploads_per_frame: usize,
    finished_retention: usize,
}

impl fmt::Debug for AsyncLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncLoader")
            .field("in_flight", &self.in_flight())
            .field("pending_uploads", &self.pending_uploads())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl AsyncLoader {
    /// Creates a loader feeding `scheduler` and uploading through `gpu` into `resources`.
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        gpu: GpuContext,
        resources: Arc<ResourceManager>,
    ) -> Self {
        let (completed_tx, completed_rx) = crossbeam_channel::unbounded();
        Self {
            scheduler,
            gpu,
            resources,
            models: Arc::new(ModelLibrary::new()),
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            completed_tx,
            completed_rx,
            retry: RetryPolicy::default(),
            uploads_per_frame: 8,
            finished_retention: DEFAULT_FINISHED_RETENTION,
        }
    }

    /// Applies `async_loader_max_retries` and `async_loader_uploads_per_frame`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.retry.max_retries = config.async_loader_max_retries;
        self.uploads_per_frame = config.async_loader_uploads_per_frame as usize;
        self
    }

    /// Replaces the retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// How many settled tasks stay queryable through their handles before the oldest
    /// are forgotten.
    pub fn with_finished_retention(mut self, retention: usize) -> Self {
        self.finished_retention = retention;
        self
    }

    /// Records finished models in `models` instead of a private library.
    pub fn with_model_library(mut self, models: Arc<ModelLibrary>) -> Self {
        self.models = models;
        self
    }

    /// The library finished models are recorded in.
    pub fn models(&self) -> &Arc<ModelLibrary> {
        &self.models
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Decodes an image on a worker, then creates the texture on the GPU thread.
    pub fn load_texture_async(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        generate_mipmap: bool,
        callback: impl FnOnce(EngineResult<Handle<Texture>>) + Send + 'static,
        priority: f32,
    ) -> EngineResult<Handle<LoadTask>> {
        let register_as = name.to_owned();
        self.submit(
            LoadKind::Texture,
            path.as_ref(),
            name,
            priority,
            move |p: &Path| TextureLoader::decode_to_staging(p, generate_mipmap),
            move |staging, cx: &UploadContext<'_>| {
                TextureLoader::upload_staged(cx.gpu, cx.resources, &register_as, &staging)
            },
            callback,
        )
    }

    /// Parses an OBJ file on a worker, then uploads the mesh on the GPU thread.
    pub fn load_mesh_async(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        callback: impl FnOnce(EngineResult<Handle<Mesh>>) + Send + 'static,
        priority: f32,
    ) -> EngineResult<Handle<LoadTask>> {
        let register_as = name.to_owned();
        self.submit(
            LoadKind::Mesh,
            path.as_ref(),
            name,
            priority,
            MeshLoader::load_obj,
            move |mesh: Mesh, cx: &UploadContext<'_>| {
                cx.resources.create_uploaded_mesh(cx.gpu, mesh, &register_as)
            },
            callback,
        )
    }

    /// Parses a model and its material textures on a worker, then creates meshes,
    /// textures and materials on the GPU thread according to `options`.
    ///
    /// A non-empty `name` replaces the file stem as the model name.
    pub fn load_model_async(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        shader: Handle<Shader>,
        options: ModelLoadOptions,
        callback: impl FnOnce(EngineResult<Arc<LoadedModel>>) + Send + 'static,
        priority: f32,
    ) -> EngineResult<Handle<LoadTask>> {
        let loader = ModelLoader::new(true);
        let rename = name.to_owned();
        self.submit(
            LoadKind::Model,
            path.as_ref(),
            name,
            priority,
            move |p: &Path| {
                let mut data = loader.load(p)?;
                if !rename.is_empty() {
                    data.name = rename.clone();
                }
                Ok(data)
            },
            move |data: ModelData, cx: &UploadContext<'_>| {
                data.upload(cx.gpu, cx.resources, cx.models, shader, &options)
            },
            callback,
        )
    }

    /// Schedules a caller-defined load. `load` runs on a worker and must not touch the
    /// GPU; `upload` runs on the GPU thread.
    pub fn load_async<A, R, L, U>(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        priority: f32,
        load: L,
        upload: U,
        callback: impl FnOnce(EngineResult<R>) + Send + 'static,
    ) -> EngineResult<Handle<LoadTask>>
    where
        A: Send + 'static,
        R: 'static,
        L: Fn(&Path) -> Result<A, LoadError> + Send + 'static,
        U: FnOnce(A, &UploadContext<'_>) -> EngineResult<R> + Send + 'static,
    {
        self.submit(
            LoadKind::Custom,
            path.as_ref(),
            name,
            priority,
            load,
            upload,
            callback,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn submit<A, R, L, U, C>(
        &self,
        kind: LoadKind,
        path: &Path,
        name: &str,
        priority: f32,
        load: L,
        upload: U,
        callback: C,
    ) -> EngineResult<Handle<LoadTask>>
    where
        A: Send + 'static,
        R: 'static,
        L: Fn(&Path) -> Result<A, LoadError> + Send + 'static,
        U: FnOnce(A, &UploadContext<'_>) -> EngineResult<R> + Send + 'static,
        C: FnOnce(EngineResult<R>) + Send + 'static,
    {
        let upload: UploadFn<A, R> = Box::new(upload);
        let callback: LoadCallback<R> = Box::new(callback);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(LoadTask::new(id, name, path, kind));
        self.tasks.lock().insert(id, Arc::clone(&task));

        let worker_task = Arc::clone(&task);
        let tx = self.completed_tx.clone();
        let retry = self.retry;
        let job = move || {
            let Some(outcome) = decode_guarded(&worker_task, retry, &load) else {
                return;
            };
            match &outcome {
                Ok(_) => {
                    if worker_task.settle_cancel() {
                        return;
                    }
                    worker_task.transition(LoadStatus::Loaded);
                }
                Err(err) => worker_task.fail(err.clone()),
            }
            let staged: Box<dyn StagedLoad> = Box::new(Staged {
                task: Arc::clone(&worker_task),
                outcome,
                upload,
                callback,
            });
            if tx.send(staged).is_err() {
                log::warn!(
                    "Loader dropped before '{}' could be handed to the GPU thread",
                    worker_task.name()
                );
            }
        };

        let label = format!("load {kind:?} '{name}'");
        match self
            .scheduler
            .submit_lambda(job, TaskPriority::from_weight(priority), label)
        {
            Ok(handle) => {
                task.set_worker(handle);
                log::debug!("Queued {kind:?} load '{name}' from '{}'", path.display());
                Ok(Handle::new(id, 0))
            }
            Err(err) => {
                self.tasks.lock().remove(&id);
                Err(err.into())
            }
        }
    }

    /// Runs the uploads and callbacks of up to `max_per_frame` decoded requests; zero
    /// means no limit. Must run on the GPU thread. Returns the number of requests taken
    /// off the completed queue.
    pub fn process_completed_tasks(&self, max_per_frame: usize) -> usize {
        if !self
            .gpu
            .guard()
            .validate(file!(), line!(), "AsyncLoader::process_completed_tasks")
        {
            return 0;
        }
        let limit = if max_per_frame == 0 {
            usize::MAX
        } else {
            max_per_frame
        };
        let cx = UploadContext {
            gpu: &self.gpu,
            resources: &self.resources,
            models: &self.models,
        };

        let mut processed = 0;
        while processed < limit {
            let Ok(staged) = self.completed_rx.try_recv() else {
                break;
            };
            processed += 1;
            if staged.task().settle_cancel() {
                continue;
            }
            staged.finish(&cx);
        }
        if processed > 0 {
            log::trace!("Processed {processed} completed load(s)");
        }
        self.prune_settled();
        processed
    }

    /// Drops the oldest settled tasks beyond the retention window. A task is settled
    /// once it is terminal and no worker or queued upload holds it, so its callback has
    /// already run or never will.
    fn prune_settled(&self) {
        let mut tasks = self.tasks.lock();
        let mut settled: Vec<u32> = tasks
            .iter()
            .filter(|(_, task)| Arc::strong_count(task) == 1 && task.status().is_terminal())
            .map(|(&id, _)| id)
            .collect();
        if settled.len() <= self.finished_retention {
            return;
        }
        settled.sort_unstable();
        let excess = settled.len() - self.finished_retention;
        for id in &settled[..excess] {
            tasks.remove(id);
        }
        log::trace!("Forgot {excess} settled load task(s)");
    }

    /// [`AsyncLoader::process_completed_tasks`] with the configured per-frame budget.
    pub fn process_frame_uploads(&self) -> usize {
        self.process_completed_tasks(self.uploads_per_frame)
    }

    /// Requests cancellation. Returns `false` for unknown or finished tasks.
    pub fn cancel(&self, handle: Handle<LoadTask>) -> bool {
        self.task(handle).is_some_and(|task| task.request_cancel())
    }

    /// The task behind `handle`.
    pub fn task(&self, handle: Handle<LoadTask>) -> Option<Arc<LoadTask>> {
        self.tasks.lock().get(&handle.id).cloned()
    }

    /// The phase of the task behind `handle`.
    pub fn status(&self, handle: Handle<LoadTask>) -> Option<LoadStatus> {
        self.task(handle).map(|task| task.status())
    }

    /// Tasks whose handles still resolve, finished or not.
    pub fn tracked_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Requests that have not reached a terminal phase.
    pub fn in_flight(&self) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|task| !task.status().is_terminal())
            .count()
    }

    /// Decoded requests waiting for the GPU thread.
    pub fn pending_uploads(&self) -> usize {
        self.completed_rx.len()
    }

    /// Blocks until every scheduled decode has finished, or `timeout_ms` elapses.
    /// Returns `true` if all decodes finished. Uploads still need
    /// [`AsyncLoader::process_completed_tasks`].
    pub fn wait_for_decodes(&self, timeout_ms: u64) -> bool {
        let workers: Vec<_> = self
            .tasks
            .lock()
            .values()
            .filter_map(|task| task.worker())
            .collect();
        let watch = Stopwatch::new();
        workers.iter().all(|worker| {
            let spent = watch.elapsed().as_millis() as u64;
            worker.wait_for(timeout_ms.saturating_sub(spent))
        })
    }

    /// Forgets finished tasks. Their handles stop resolving.
    pub fn clear_finished(&self) -> usize {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|_, task| !task.status().is_terminal());
        before - tasks.len()
    }
}
