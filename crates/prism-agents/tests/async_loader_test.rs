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

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use anyhow::Result;
use image::{DynamicImage, RgbaImage};
use prism_agents::asset_agent::{AsyncLoader, LoadStatus, RetryPolicy, UploadContext};
use prism_agents::scheduler_agent::TaskScheduler;
use prism_core::renderer::{GpuContext, GpuThreadGuard};
use prism_core::{EngineResult, ErrorKind, Handle};
use prism_data::{ResourceManager, Texture};
use prism_infra::HeadlessDevice;
use prism_lanes::asset_lane::{LoadError, ModelLoadOptions};
use tempfile::tempdir;

const TRIANGLE_OBJ: &str = "\
v 0 0 0
v 1 0 0
v 0 1 0
f 1 2 3
";

const MODEL_OBJ: &str = "\
mtllib scene.mtl
o floor
v -1 0 -1
v 1 0 -1
v 1 0 1
v -1 0 1
usemtl brick
f 1 2 3 4
o pillar
v 0 0 0
v 0.2 0 0
v 0.2 2 0
usemtl brick
f 5 6 7
";

const MODEL_MTL: &str = "\
newmtl brick
Kd 0.8 0.3 0.2
map_Kd brick.png
";

struct Fixture {
    device: Arc<HeadlessDevice>,
    guard: Arc<GpuThreadGuard>,
    resources: Arc<ResourceManager>,
    loader: AsyncLoader,
}

impl Fixture {
    fn new(max_retries: u32) -> Result<Self> {
        let device = Arc::new(HeadlessDevice::new());
        let guard = Arc::new(GpuThreadGuard::new());
        guard.register_current()?;
        let ctx = GpuContext::new(device.clone(), Arc::clone(&guard));
        let resources = Arc::new(ResourceManager::default());
        let scheduler = Arc::new(TaskScheduler::new(2)?);
        let loader = AsyncLoader::new(scheduler, ctx, Arc::clone(&resources)).with_retry_policy(
            RetryPolicy {
                max_retries,
                base_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(4),
            },
        );
        Ok(Self {
            device,
            guard,
            resources,
            loader,
        })
    }

    /// Drives the GPU-thread side until `done` holds or five seconds pass.
    fn pump_until(&self, done: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            self.loader.process_completed_tasks(0);
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        false
    }
}

fn write_png(path: &Path, width: u32, height: u32) -> Result<()> {
    DynamicImage::ImageRgba8(RgbaImage::new(width, height)).save(path)?;
    Ok(())
}

type TextureOutcome = Arc<Mutex<Vec<(ThreadId, EngineResult<Handle<Texture>>)>>>;

#[test]
fn test_texture_callback_runs_on_gpu_thread_with_file_extent() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let path = dir.path().join("tex.png");
    write_png(&path, 32, 16)?;
    let fx = Fixture::new(3)?;
    let outcome: TextureOutcome = Arc::default();
    let sink = Arc::clone(&outcome);

    // --- 2. ACT ---
    let task = fx.loader.load_texture_async(
        &path,
        "t",
        true,
        move |result| sink.lock().unwrap().push((thread::current().id(), result)),
        0.5,
    )?;
    let delivered = fx.pump_until(|| !outcome.lock().unwrap().is_empty());

    // --- 3. ASSERT ---
    assert!(delivered);
    let calls = outcome.lock().unwrap();
    assert_eq!(calls.len(), 1);
    let (thread_id, result) = &calls[0];
    assert_eq!(*thread_id, thread::current().id());
    let handle = *result.as_ref().expect("upload succeeded");
    let texture = fx.resources.get_texture(handle).expect("registered");
    assert_eq!((texture.width(), texture.height()), (32, 16));
    assert!(texture.has_mipmap());
    assert_eq!(fx.resources.find_texture("t"), Some(handle));
    assert_eq!(fx.device.live_textures(), 1);
    assert_eq!(fx.loader.status(task), Some(LoadStatus::Completed));
    assert_eq!(fx.loader.in_flight(), 0);
    Ok(())
}

#[test]
fn test_missing_file_fails_once_after_retries() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let fx = Fixture::new(2)?;
    let calls = Arc::new(AtomicUsize::new(0));
    let kinds = Arc::new(Mutex::new(Vec::new()));
    let (counter, sink) = (Arc::clone(&calls), Arc::clone(&kinds));

    // --- 2. ACT ---
    let task = fx.loader.load_texture_async(
        dir.path().join("absent.png"),
        "absent",
        false,
        move |result| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Err(err) = result {
                sink.lock().unwrap().push(err.kind);
            }
        },
        0.9,
    )?;
    let delivered = fx.pump_until(|| calls.load(Ordering::SeqCst) > 0);
    for _ in 0..5 {
        fx.loader.process_completed_tasks(0);
    }

    // --- 3. ASSERT ---
    assert!(delivered);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(*kinds.lock().unwrap(), vec![ErrorKind::FileNotFound]);
    let state = fx.loader.task(task).expect("task is tracked");
    assert_eq!(state.status(), LoadStatus::Failed);
    assert_eq!(state.attempts(), 3);
    assert!(state.error().is_some());
    assert!(fx.resources.find_texture("absent").is_none());
    Ok(())
}

#[test]
fn test_cancelled_load_never_calls_back() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let path = dir.path().join("skip.png");
    write_png(&path, 4, 4)?;
    let fx = Fixture::new(0)?;
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    // --- 2. ACT ---
    let task = fx.loader.load_texture_async(
        &path,
        "skip",
        false,
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
        0.1,
    )?;
    let cancelled = fx.loader.cancel(task);
    assert!(fx.loader.wait_for_decodes(5_000));
    fx.loader.process_completed_tasks(0);

    // --- 3. ASSERT ---
    assert!(cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.loader.status(task), Some(LoadStatus::Cancelled));
    assert!(!fx.loader.cancel(task));
    assert!(fx.resources.find_texture("skip").is_none());
    assert_eq!(fx.device.live_textures(), 0);
    Ok(())
}

#[test]
fn test_mesh_is_parsed_off_thread_and_uploaded_on_gpu_thread() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let path = dir.path().join("tri.obj");
    std::fs::write(&path, TRIANGLE_OBJ)?;
    let fx = Fixture::new(0)?;
    let result = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&result);

    // --- 2. ACT ---
    fx.loader.load_mesh_async(
        &path,
        "tri",
        move |r| *sink.lock().unwrap() = Some(r),
        0.5,
    )?;
    let delivered = fx.pump_until(|| result.lock().unwrap().is_some());

    // --- 3. ASSERT ---
    assert!(delivered);
    let handle = result
        .lock()
        .unwrap()
        .take()
        .expect("callback fired")
        .expect("mesh uploaded");
    let mesh = fx.resources.get_mesh(handle).expect("registered");
    assert!(mesh.is_uploaded());
    assert_eq!(mesh.indices().len(), 3);
    assert_eq!(fx.resources.find_mesh("tri"), Some(handle));
    Ok(())
}

#[test]
fn test_model_load_resolves_deferred_textures_and_registers_model() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    std::fs::write(dir.path().join("scene.obj"), MODEL_OBJ)?;
    std::fs::write(dir.path().join("scene.mtl"), MODEL_MTL)?;
    write_png(&dir.path().join("brick.png"), 8, 8)?;
    let fx = Fixture::new(0)?;
    let result = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&result);

    // --- 2. ACT ---
    fx.loader.load_model_async(
        dir.path().join("scene.obj"),
        "level",
        Handle::new(1, 0),
        ModelLoadOptions::default(),
        move |r| *sink.lock().unwrap() = Some(r),
        1.0,
    )?;
    let delivered = fx.pump_until(|| result.lock().unwrap().is_some());

    // --- 3. ASSERT ---
    assert!(delivered);
    let model = result
        .lock()
        .unwrap()
        .take()
        .expect("callback fired")
        .expect("model uploaded");
    assert_eq!(model.name, "level");
    assert_eq!(model.parts.len(), 2);
    assert_eq!(model.textures.len(), 1);
    assert_eq!(fx.device.live_textures(), 1);
    assert!(fx.loader.models().get("level").is_some());
    assert_eq!(fx.resources.find_mesh("level/floor"), Some(model.parts[0].mesh));
    Ok(())
}

#[test]
fn test_upload_budget_limits_work_per_frame() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let fx = Fixture::new(0)?;
    for i in 0..3 {
        let path = dir.path().join(format!("t{i}.png"));
        write_png(&path, 2, 2)?;
        fx.loader
            .load_texture_async(&path, &format!("t{i}"), false, |_| {}, 0.5)?;
    }
    assert!(fx.loader.wait_for_decodes(5_000));

    // --- 2. ACT ---
    let first = fx.loader.process_completed_tasks(1);
    let remaining = fx.loader.pending_uploads();
    let rest = fx.loader.process_completed_tasks(0);

    // --- 3. ASSERT ---
    assert_eq!(first, 1);
    assert_eq!(remaining, 2);
    assert_eq!(rest, 2);
    assert_eq!(fx.device.live_textures(), 3);
    assert_eq!(fx.loader.clear_finished(), 3);
    Ok(())
}

#[test]
fn test_processing_off_gpu_thread_is_refused() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let path = dir.path().join("late.png");
    write_png(&path, 2, 2)?;
    let fx = Fixture::new(0)?;
    fx.loader
        .load_texture_async(&path, "late", false, |_| {}, 0.5)?;
    assert!(fx.loader.wait_for_decodes(5_000));
    let violations_before = fx.guard.violation_count();

    // --- 2. ACT ---
    let processed = thread::scope(|s| {
        s.spawn(|| fx.loader.process_completed_tasks(0))
            .join()
            .expect("worker thread")
    });

    // --- 3. ASSERT ---
    assert_eq!(processed, 0);
    assert_eq!(fx.guard.violation_count(), violations_before + 1);
    assert_eq!(fx.loader.pending_uploads(), 1);
    assert_eq!(fx.device.live_textures(), 0);
    Ok(())
}

#[test]
fn test_panicking_decoder_fails_the_task_and_calls_back_once() -> Result<()> {
    // --- 1. ARRANGE ---
    let fx = Fixture::new(3)?;
    let results: Arc<Mutex<Vec<EngineResult<u32>>>> = Arc::default();
    let sink = Arc::clone(&results);

    // --- 2. ACT ---
    let task = fx.loader.load_async(
        "broken.bin",
        "broken",
        0.5,
        |_: &Path| -> std::result::Result<u32, LoadError> { panic!("corrupt header") },
        |value: u32, _: &UploadContext<'_>| Ok(value),
        move |r| sink.lock().unwrap().push(r),
    )?;
    let delivered = fx.pump_until(|| !results.lock().unwrap().is_empty());
    fx.loader.process_completed_tasks(0);

    // --- 3. ASSERT ---
    assert!(delivered, "callback fired despite the panic");
    let results = results.lock().unwrap();
    assert_eq!(results.len(), 1);
    match &results[0] {
        Err(err) => assert_eq!(err.kind, ErrorKind::ResourceLoadFailed),
        Ok(value) => panic!("unexpected success: {value}"),
    }
    assert_eq!(fx.loader.status(task), Some(LoadStatus::Failed));
    assert_eq!(fx.loader.task(task).map(|t| t.attempts()), Some(1));
    assert_eq!(fx.loader.in_flight(), 0);
    Ok(())
}

#[test]
fn test_settled_tasks_are_pruned_beyond_retention() -> Result<()> {
    // --- 1. ARRANGE ---
    let dir = tempdir()?;
    let path = dir.path().join("tri.obj");
    std::fs::write(&path, TRIANGLE_OBJ)?;
    let fx = Fixture::new(0)?;
    let ctx = GpuContext::new(fx.device.clone(), Arc::clone(&fx.guard));
    let loader = AsyncLoader::new(
        Arc::new(TaskScheduler::new(2)?),
        ctx,
        Arc::clone(&fx.resources),
    )
    .with_finished_retention(2);
    let delivered = Arc::new(AtomicUsize::new(0));

    // --- 2. ACT ---
    let mut tasks = Vec::new();
    for i in 0..5 {
        let counter = Arc::clone(&delivered);
        tasks.push(loader.load_mesh_async(
            &path,
            &format!("tri{i}"),
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            0.5,
        )?);
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    while delivered.load(Ordering::SeqCst) < 5 && Instant::now() < deadline {
        loader.process_completed_tasks(0);
        thread::sleep(Duration::from_millis(1));
    }
    loader.process_completed_tasks(0);

    // --- 3. ASSERT ---
    assert_eq!(delivered.load(Ordering::SeqCst), 5);
    assert_eq!(loader.tracked_tasks(), 2);
    assert_eq!(loader.status(tasks[0]), None);
    assert_eq!(loader.status(tasks[4]), Some(LoadStatus::Completed));
    Ok(())
}
