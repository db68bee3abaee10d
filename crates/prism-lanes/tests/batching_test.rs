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

use std::sync::Arc;

use prism_core::math::{Mat4, Vec3};
use prism_core::renderer::{
    GpuContext, GpuDevice, GpuThreadGuard, ShaderStage, ShaderStageSource,
};
use prism_core::{BatchingMode, Handle};
use prism_data::{Material, Mesh, PipelineState, ResourceManager, Shader};
use prism_infra::graphics::headless::DrawKind;
use prism_infra::HeadlessDevice;
use prism_lanes::render_lane::{
    BatchManager, GpuBufferPool, MeshRenderable, RenderContext, Renderable, StateCache,
};

const VERTEX: &str = "\
#version 430 core
layout(location = 0) in vec3 aPosition;
layout(location = 1) in vec3 aNormal;
layout(location = 2) in vec2 aTexCoord;
layout(location = 3) in vec4 aColor;
layout(location = 4) in mat4 aInstanceMatrix;
uniform mat4 uModel;
uniform mat4 uViewProj;
void main() { gl_Position = uViewProj * uModel * vec4(aPosition, 1.0); }
";
const FRAGMENT: &str = "\
#version 430 core
out vec4 fragColor;
void main() { fragColor = vec4(1.0); }
";

struct Fixture {
    device: Arc<HeadlessDevice>,
    state: StateCache,
    resources: ResourceManager,
    pool: GpuBufferPool,
}

impl Fixture {
    fn new() -> Self {
        let device = Arc::new(HeadlessDevice::new());
        let guard = Arc::new(GpuThreadGuard::new());
        guard.register_current().expect("fresh guard accepts the test thread");
        let ctx = GpuContext::new(device.clone(), guard);
        let resources = ResourceManager::default();
        let pool = GpuBufferPool::new(ctx.clone(), Arc::clone(resources.memory()));
        Self {
            device,
            state: StateCache::new(ctx),
            resources,
            pool,
        }
    }

    fn render_ctx(&self) -> RenderContext<'_> {
        RenderContext {
            state: &self.state,
            resources: &self.resources,
            pool: &self.pool,
        }
    }

    fn shader(&self) -> Handle<Shader> {
        let shader = Shader::from_sources(
            self.state.context(),
            &[
                ShaderStageSource::new(ShaderStage::Vertex, VERTEX),
                ShaderStageSource::new(ShaderStage::Fragment, FRAGMENT),
            ],
        )
        .expect("headless compile succeeds");
        self.resources.register_shader(shader, "basic")
    }
}

fn at(x: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
}

#[test]
fn test_gpu_instancing_draws_shared_key_once() {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let mesh = fx.resources.create_mesh_handle(Mesh::cube(1.0), "cube");
    let material = Arc::new(Material::new(fx.shader()));
    let mut manager = BatchManager::new(BatchingMode::GpuInstancing);

    // --- 2. ACT ---
    for i in 0..100 {
        let r = MeshRenderable::new(mesh, material.clone(), at(i as f32)).with_layer(300);
        manager.submit(Arc::new(r));
    }
    let stats = manager.flush(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(stats.batch_count, 1);
    assert_eq!(stats.instanced_draw_calls, 1);
    assert_eq!(stats.instanced_instances, 100);
    assert_eq!(stats.fallback_draw_calls, 0);
    assert!(stats.is_consistent());

    let draws = fx.device.draws();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].kind, DrawKind::ElementsInstanced);
    assert_eq!(draws[0].instances, 100);
    assert_eq!(draws[0].per_instance_attributes, vec![4, 5, 6, 7]);

    let gpu = fx.resources.get_mesh(mesh).and_then(|m| m.gpu()).expect("uploaded");
    let layout = fx.device.vertex_array_layout(gpu.vao);
    assert!(
        layout.iter().all(|b| !(4..8).contains(&b.attribute.location)),
        "instance columns are disabled after the draw: {layout:?}"
    );
}

#[test]
fn test_immediate_draw_after_instancing_sees_no_instance_attributes() -> anyhow::Result<()> {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let mesh = fx.resources.create_mesh_handle(Mesh::cube(1.0), "cube");
    let material = Arc::new(Material::new(fx.shader()));
    let mut manager = BatchManager::new(BatchingMode::GpuInstancing);
    for i in 0..3 {
        manager.submit(Arc::new(MeshRenderable::new(mesh, material.clone(), at(i as f32))));
    }
    let single = MeshRenderable::new(mesh, material.clone(), at(10.0)).with_batching(false);
    manager.submit(Arc::new(single));

    // --- 2. ACT ---
    let stats = manager.flush(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(stats.instanced_draw_calls, 1);
    assert_eq!(stats.fallback_draw_calls, 1);
    let draws = fx.device.draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].kind, DrawKind::ElementsInstanced);
    assert_eq!(draws[1].kind, DrawKind::Elements);
    assert_eq!(draws[0].vertex_array, draws[1].vertex_array, "both draws use the mesh VAO");
    assert!(draws[1].per_instance_attributes.is_empty());
    assert_eq!(fx.device.call_count("disable_attribute"), 4);
    Ok(())
}

#[test]
fn test_cpu_merge_bypasses_transparent_items() {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let shader = fx.shader();
    let mesh = fx.resources.create_mesh_handle(Mesh::quad(1.0), "quad");
    let opaque = Arc::new(Material::new(shader));
    let glass = Arc::new(Material::new(shader).with_pipeline(PipelineState::transparent()));
    let mut manager = BatchManager::new(BatchingMode::CpuMerge);

    // --- 2. ACT ---
    for i in 0..10 {
        manager.submit(Arc::new(MeshRenderable::new(mesh, opaque.clone(), at(i as f32))));
        manager.submit(Arc::new(MeshRenderable::new(mesh, glass.clone(), at(i as f32))));
    }
    let stats = manager.flush(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(stats.batched_draw_calls, 1);
    assert_eq!(stats.fallback_draw_calls, 10);
    assert_eq!(stats.draw_calls, 11);
    assert_eq!(stats.batched_vertices, 40);
    assert_eq!(stats.batched_triangles, 20);
    assert_eq!(fx.device.call_count("draw_elements"), 11);
}

#[test]
fn test_merged_mesh_is_reused_across_frames() {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let mesh = fx.resources.create_mesh_handle(Mesh::quad(1.0), "quad");
    let material = Arc::new(Material::new(fx.shader()));
    let mut manager = BatchManager::new(BatchingMode::CpuMerge);
    let submit_frame = |manager: &BatchManager| {
        for i in 0..4 {
            manager.submit(Arc::new(MeshRenderable::new(mesh, material.clone(), at(i as f32))));
        }
    };

    // --- 2. ACT ---
    submit_frame(&manager);
    manager.flush(&fx.render_ctx());
    let after_first = fx.resources.meshes().len();
    for _ in 0..3 {
        submit_frame(&manager);
        manager.flush(&fx.render_ctx());
    }

    // --- 3. ASSERT ---
    // One source mesh plus one merged mesh per storage of the double buffer.
    assert_eq!(after_first, 2);
    assert_eq!(fx.resources.meshes().len(), 3);
}

#[test]
fn test_disabled_mode_draws_every_item_individually() {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let mesh = fx.resources.create_mesh_handle(Mesh::cube(1.0), "cube");
    let material = Arc::new(Material::new(fx.shader()));
    let mut manager = BatchManager::new(BatchingMode::Disabled);

    // --- 2. ACT ---
    for i in 0..5 {
        manager.submit(Arc::new(MeshRenderable::new(mesh, material.clone(), at(i as f32))));
    }
    let stats = manager.flush(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(stats.fallback_draw_calls, 5);
    assert_eq!(stats.batch_count, 0);
    assert!(stats.is_consistent());
}

#[test]
fn test_layers_draw_in_ascending_order() {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let shader = fx.shader();
    let cube = fx.resources.create_mesh_handle(Mesh::cube(1.0), "cube");
    let quad = fx.resources.create_mesh_handle(Mesh::quad(1.0), "quad");
    let material = Arc::new(Material::new(shader));
    let mut manager = BatchManager::new(BatchingMode::Disabled);

    // --- 2. ACT ---
    let top: Arc<dyn Renderable> =
        Arc::new(MeshRenderable::new(quad, material.clone(), Mat4::IDENTITY).with_layer(5));
    let bottom: Arc<dyn Renderable> =
        Arc::new(MeshRenderable::new(cube, material.clone(), Mat4::IDENTITY).with_layer(1));
    manager.submit(top);
    manager.submit(bottom);
    manager.flush(&fx.render_ctx());

    // --- 3. ASSERT ---
    let draws = fx.device.draws();
    assert_eq!(draws.len(), 2);
    assert_eq!(draws[0].count, 36, "the cube on layer 1 draws first");
    assert_eq!(draws[1].count, 6);
}

#[test]
fn test_batches_draw_in_first_submission_order() {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let shader = fx.shader();
    let cube = fx.resources.create_mesh_handle(Mesh::cube(1.0), "cube");
    let quad = fx.resources.create_mesh_handle(Mesh::quad(1.0), "quad");
    let first = Arc::new(Material::new(shader));
    let second = Arc::new(Material::new(shader));
    let mut manager = BatchManager::new(BatchingMode::CpuMerge);

    // --- 2. ACT ---
    manager.submit(Arc::new(MeshRenderable::new(cube, second.clone(), at(0.0))));
    manager.submit(Arc::new(MeshRenderable::new(quad, first.clone(), at(1.0))));
    let stats = manager.flush(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(stats.batched_draw_calls, 2);
    let counts: Vec<_> = fx.device.draws().iter().map(|d| d.count).collect();
    assert_eq!(counts, vec![36, 6], "the cube batch was submitted first");
}

#[test]
fn test_immediate_draws_keep_their_place_among_batches() {
    // --- 1. ARRANGE ---
    let fx = Fixture::new();
    let shader = fx.shader();
    let cube = fx.resources.create_mesh_handle(Mesh::cube(1.0), "cube");
    let quad = fx.resources.create_mesh_handle(Mesh::quad(1.0), "quad");
    let material = Arc::new(Material::new(shader));
    let mut manager = BatchManager::new(BatchingMode::CpuMerge);

    // --- 2. ACT ---
    manager.submit(Arc::new(
        MeshRenderable::new(cube, material.clone(), at(0.0)).with_batching(false),
    ));
    manager.submit(Arc::new(MeshRenderable::new(quad, material.clone(), at(1.0))));
    let stats = manager.flush(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(stats.fallback_draw_calls, 1);
    assert_eq!(stats.batched_draw_calls, 1);
    let counts: Vec<_> = fx.device.draws().iter().map(|d| d.count).collect();
    assert_eq!(counts, vec![36, 6], "the unbatched cube was submitted first");
}
