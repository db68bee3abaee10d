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

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use prism_agents::render_agent::{Presenter, Renderer};
use prism_core::math::{LinearRgba, Mat4, Vec3};
use prism_core::renderer::{
    BufferTarget, GpuContext, GpuThreadGuard, ShaderStage, ShaderStageSource, UsageClass,
};
use prism_core::{BatchingMode, EngineConfig, EngineResult, Handle};
use prism_data::{Material, Mesh, Shader};
use prism_infra::graphics::headless::DrawKind;
use prism_infra::HeadlessDevice;
use prism_lanes::render_lane::{BufferDescriptor, MeshRenderable};

const BATCH_VERTEX: &str = "\
#version 430 core
layout(location = 0) in vec3 aPosition;
layout(location = 4) in mat4 aInstanceMatrix;
uniform mat4 uModel;
uniform mat4 uViewProj;
void main() { gl_Position = uViewProj * uModel * vec4(aPosition, 1.0); }
";
const LOD_VERTEX: &str = "\
#version 430 core
layout(location = 0) in vec3 aPosition;
layout(location = 6) in vec4 aInstanceRow0;
layout(location = 7) in vec4 aInstanceRow1;
layout(location = 8) in vec4 aInstanceRow2;
layout(location = 9) in vec4 aInstanceRow3;
layout(location = 10) in vec4 aInstanceColor;
layout(location = 11) in vec4 aInstanceParams;
uniform mat4 uViewProj;
void main() { gl_Position = uViewProj * vec4(aPosition, 1.0); }
";
const FRAGMENT: &str = "\
#version 430 core
out vec4 fragColor;
void main() { fragColor = vec4(1.0); }
";

#[derive(Debug, Default)]
struct Record {
    presents: u32,
    resizes: Vec<(u32, u32)>,
}

/// Presenter that records what the renderer asked of it.
struct RecordingPresenter(Arc<Mutex<Record>>);

impl Presenter for RecordingPresenter {
    fn present(&mut self) -> EngineResult<()> {
        self.0.lock().unwrap().presents += 1;
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.0.lock().unwrap().resizes.push((width, height));
    }
}

fn headless_renderer(config: EngineConfig) -> Result<(Arc<HeadlessDevice>, Renderer, Arc<Mutex<Record>>)> {
    let device = Arc::new(HeadlessDevice::new());
    let record = Arc::new(Mutex::new(Record::default()));
    let presenter = Box::new(RecordingPresenter(Arc::clone(&record)));
    // Each test thread owns its own guard; the process-wide one admits a single owner.
    let guard = Arc::new(GpuThreadGuard::new());
    guard.register_current()?;
    let ctx = GpuContext::new(device.clone(), guard);
    let renderer = Renderer::with_context(config, ctx, presenter, 800, 600)?;
    Ok((device, renderer, record))
}

fn shader(renderer: &Renderer, vertex: &str, name: &str) -> Result<Handle<Shader>> {
    let shader = Shader::from_sources(
        renderer.context(),
        &[
            ShaderStageSource::new(ShaderStage::Vertex, vertex),
            ShaderStageSource::new(ShaderStage::Fragment, FRAGMENT),
        ],
    )?;
    Ok(renderer.resources().register_shader(shader, name))
}

fn at(x: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
}

#[test]
fn test_frame_loop_instances_shared_key_once() -> Result<()> {
    // --- 1. ARRANGE ---
    let config = EngineConfig {
        batching_mode: BatchingMode::GpuInstancing,
        ..EngineConfig::default()
    };
    let (device, mut renderer, record) = headless_renderer(config)?;
    let material = Arc::new(Material::new(shader(&renderer, BATCH_VERTEX, "basic")?));
    let mesh = renderer
        .resources()
        .create_mesh_handle(Mesh::cube(1.0), "cube");

    // --- 2. ACT ---
    renderer.begin_frame();
    renderer.clear_frame();
    for i in 0..100 {
        let item = MeshRenderable::new(mesh, material.clone(), at(i as f32)).with_layer(300);
        renderer.submit(Arc::new(item));
    }
    let stats = renderer.flush_render_queue();
    renderer.end_frame();
    renderer.present()?;

    // --- 3. ASSERT ---
    assert_eq!(stats.batch_count, 1);
    assert_eq!(stats.instanced_draw_calls, 1);
    assert_eq!(stats.instanced_instances, 100);
    assert!(stats.is_consistent());
    assert_eq!(renderer.last_frame_stats(), stats);

    let draws = device.draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].kind, DrawKind::ElementsInstanced);
    assert_eq!(device.call_count("clear"), 1);
    assert_eq!(record.lock().unwrap().presents, 1);
    assert_eq!(renderer.frame_index(), 1);
    Ok(())
}

#[test]
fn test_disabled_mode_draws_each_submission() -> Result<()> {
    // --- 1. ARRANGE ---
    let (device, mut renderer, _record) = headless_renderer(EngineConfig::default())?;
    let material = Arc::new(Material::new(shader(&renderer, BATCH_VERTEX, "basic")?));
    let mesh = renderer
        .resources()
        .create_mesh_handle(Mesh::quad(1.0), "quad");
    renderer.set_batching_mode(BatchingMode::Disabled);

    // --- 2. ACT ---
    renderer.begin_frame();
    for i in 0..10 {
        renderer.submit(Arc::new(MeshRenderable::new(mesh, material.clone(), at(i as f32))));
    }
    let stats = renderer.flush_render_queue();
    renderer.end_frame();

    // --- 3. ASSERT ---
    assert_eq!(renderer.batching_mode(), BatchingMode::Disabled);
    assert_eq!(renderer.config().batching_mode, BatchingMode::Disabled);
    assert_eq!(stats.batch_count, 0);
    assert_eq!(stats.fallback_draw_calls, 10);
    assert_eq!(stats.draw_calls, 10);
    assert_eq!(device.draws().len(), 10);
    Ok(())
}

#[test]
fn test_lod_instances_drain_through_the_frame_loop() -> Result<()> {
    // --- 1. ARRANGE ---
    let config = EngineConfig {
        lod_max_instances_per_frame: 50,
        ..EngineConfig::default()
    };
    let (device, mut renderer, _record) = headless_renderer(config)?;
    let lod_shader = shader(&renderer, LOD_VERTEX, "instanced")?;
    let material = renderer
        .resources()
        .register_material(Material::new(lod_shader), "instanced");
    let mesh = renderer
        .resources()
        .create_mesh_handle(Mesh::cube(1.0), "cube");
    for entity in 0..150u64 {
        renderer
            .lod_renderer()
            .add_instance(entity, mesh, material, at(entity as f32), 0);
    }

    // --- 2. ACT ---
    let mut drawn = Vec::new();
    for _ in 0..3 {
        renderer.begin_frame();
        renderer.flush_render_queue();
        drawn.push(renderer.last_lod_stats().total_instances);
        renderer.end_frame();
    }

    // --- 3. ASSERT ---
    assert_eq!(drawn, vec![50, 50, 50]);
    assert_eq!(renderer.lod_renderer().pending_count(), 0);
    let instances: Vec<u32> = device.draws().iter().map(|d| d.instances).collect();
    assert_eq!(instances, vec![50, 50, 50]);
    Ok(())
}

#[test]
fn test_clear_elides_repeated_clear_color() -> Result<()> {
    // --- 1. ARRANGE ---
    let (device, mut renderer, _record) = headless_renderer(EngineConfig::default())?;
    let red = LinearRgba::rgb(1.0, 0.0, 0.0);
    let before = device.call_count("clear_color");

    // --- 2. ACT ---
    renderer.begin_frame();
    renderer.clear(Some(red), Some(1.0), None);
    renderer.clear(Some(red), None, None);
    renderer.clear(None, None, None);
    renderer.end_frame();

    // --- 3. ASSERT ---
    assert_eq!(device.call_count("clear_color") - before, 1);
    assert_eq!(device.call_count("clear"), 2);
    assert_eq!(device.call_count("clear_depth"), 1);
    assert_eq!(renderer.state_cache().clear_color(), Some(red));
    Ok(())
}

#[test]
fn test_resize_updates_viewport_and_presenter() -> Result<()> {
    // --- 1. ARRANGE ---
    let (device, mut renderer, record) = headless_renderer(EngineConfig::default())?;
    let viewport_calls = device.call_count("viewport");

    // --- 2. ACT ---
    renderer.resize(1280, 720);
    renderer.resize(1280, 720);

    // --- 3. ASSERT ---
    assert_eq!((renderer.width(), renderer.height()), (1280, 720));
    assert_eq!(renderer.state_cache().viewport(), Some((0, 0, 1280, 720)));
    assert_eq!(device.call_count("viewport") - viewport_calls, 1);
    assert_eq!(record.lock().unwrap().resizes, vec![(1280, 720)]);
    Ok(())
}

#[test]
fn test_delta_time_measures_between_frames() -> Result<()> {
    // --- 1. ARRANGE ---
    let (_device, mut renderer, _record) = headless_renderer(EngineConfig::default())?;

    // --- 2. ACT ---
    renderer.begin_frame();
    let first = renderer.delta_time();
    renderer.end_frame();
    thread::sleep(Duration::from_millis(10));
    renderer.begin_frame();
    let second = renderer.delta_time();
    renderer.end_frame();

    // --- 3. ASSERT ---
    assert_eq!(first, 0.0);
    assert!(second >= 0.010);
    assert_eq!(renderer.frame_index(), 2);
    Ok(())
}

#[test]
fn test_config_settings_reach_the_subsystems() -> Result<()> {
    // --- 1. ARRANGE ---
    let config = EngineConfig {
        batching_mode: BatchingMode::CpuMerge,
        gpu_thread_strict_mode: false,
        buffer_pool_memory_cap_bytes: 1 << 20,
        ..EngineConfig::default()
    };

    // --- 2. ACT ---
    let (_device, renderer, _record) = headless_renderer(config.clone())?;

    // --- 3. ASSERT ---
    assert_eq!(renderer.config(), &config);
    assert_eq!(renderer.batching_mode(), BatchingMode::CpuMerge);
    assert_eq!(renderer.buffer_pool().memory_cap(), 1 << 20);
    assert!(!renderer.context().guard().is_strict_mode());
    assert!(renderer.context().is_gpu_thread());
    assert_eq!(renderer.state_cache().viewport(), Some((0, 0, 800, 600)));
    Ok(())
}

#[test]
fn test_transient_buffers_are_reused_in_the_next_frame() -> Result<()> {
    // --- 1. ARRANGE ---
    let (device, mut renderer, _record) = headless_renderer(EngineConfig::default())?;
    let desc = BufferDescriptor::new(4096, BufferTarget::Array, UsageClass::Stream);

    // --- 2. ACT ---
    renderer.begin_frame();
    let first = renderer.buffer_pool().acquire(desc)?;
    renderer.end_frame();
    let created_after_first = device.call_count("create_buffer");

    renderer.begin_frame();
    let second = renderer.buffer_pool().acquire(desc)?;
    renderer.end_frame();

    // --- 3. ASSERT ---
    assert_eq!(first, second, "the never-released transient is handed out again");
    assert_eq!(device.call_count("create_buffer"), created_after_first);
    let stats = renderer.buffer_pool().stats();
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.reuses, 1);
    assert_eq!(stats.in_use, 1);
    Ok(())
}
