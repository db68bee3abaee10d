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

use std::collections::HashSet;
use std::sync::Arc;

use prism_core::math::{Mat4, Vec3};
use prism_core::renderer::{
    GpuContext, GpuDevice, GpuThreadGuard, ShaderStage, ShaderStageSource, UniformValue,
};
use prism_core::Handle;
use prism_data::{Material, Mesh, ResourceManager, Shader};
use prism_infra::HeadlessDevice;
use prism_lanes::render_lane::lod::{
    CullingCamera, EntityId, InstanceData, LodInstancedRenderer, BINDING_COUNTER,
    BINDING_LOD_COUNTS, BINDING_VISIBLE, MATRIX_STRIDE, PARAMS_STRIDE, VEC4_STRIDE,
};
use prism_lanes::render_lane::{GpuBufferPool, RenderContext, StateCache};

const VERTEX: &str = "\
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

struct Fixture {
    device: Arc<HeadlessDevice>,
    state: StateCache,
    resources: ResourceManager,
    pool: GpuBufferPool,
}

impl Fixture {
    fn with_device(device: HeadlessDevice) -> Self {
        let device = Arc::new(device);
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

    fn cube_and_material(&self) -> (Handle<Mesh>, Handle<Material>) {
        let shader = Shader::from_sources(
            self.state.context(),
            &[
                ShaderStageSource::new(ShaderStage::Vertex, VERTEX),
                ShaderStageSource::new(ShaderStage::Fragment, FRAGMENT),
            ],
        )
        .expect("headless compile succeeds");
        let shader = self.resources.register_shader(shader, "instanced");
        let mesh = self.resources.create_mesh_handle(Mesh::cube(1.0), "cube");
        let material = self
            .resources
            .register_material(Material::new(shader), "instanced");
        (mesh, material)
    }
}

#[test]
fn test_pending_instances_bleed_over_three_frames() {
    // --- 1. ARRANGE ---
    let fx = Fixture::with_device(HeadlessDevice::new());
    let (mesh, material) = fx.cube_and_material();
    let mut renderer = LodInstancedRenderer::new(50);
    for entity in 0..150u64 {
        let world = Mat4::from_translation(Vec3::new(entity as f32, 0.0, 0.0));
        renderer.add_instance(entity, mesh, material, world, 0);
    }

    // --- 2. ACT ---
    let first = renderer.render_all(&fx.render_ctx());
    let first_entities = renderer.last_drawn_entities().to_vec();
    let mut drawn: Vec<EntityId> = first_entities.clone();
    for _ in 0..2 {
        renderer.render_all(&fx.render_ctx());
        drawn.extend_from_slice(renderer.last_drawn_entities());
    }

    // --- 3. ASSERT ---
    assert_eq!(first.total_instances, 50);
    assert_eq!(first.pending_count, 100);
    assert_eq!(first_entities, (0..50).collect::<Vec<_>>());
    assert_eq!(drawn.len(), 150);
    let unique: HashSet<EntityId> = drawn.iter().copied().collect();
    assert_eq!(unique.len(), 150, "every instance drawn exactly once");
    assert_eq!(renderer.pending_count(), 0);

    let instanced: Vec<u32> = fx
        .device
        .draws()
        .iter()
        .map(|d| d.instances)
        .collect();
    assert_eq!(instanced, vec![50, 50, 50]);
}

#[test]
fn test_groups_split_by_lod_level() {
    // --- 1. ARRANGE ---
    let fx = Fixture::with_device(HeadlessDevice::new());
    let (mesh, material) = fx.cube_and_material();
    let mut renderer = LodInstancedRenderer::default();
    for entity in 0..30u64 {
        renderer.add_instance(entity, mesh, material, Mat4::IDENTITY, (entity % 3) as u32);
    }

    // --- 2. ACT ---
    let stats = renderer.render_all(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(stats.group_count, 3);
    assert_eq!(stats.draw_calls, 3);
    assert_eq!(stats.instances_per_lod[..3], [10, 10, 10]);
    assert_eq!(stats.total_instances, 30);
    assert!(stats.bytes_uploaded > 0);
}

#[test]
fn test_instance_ids_travel_with_the_parameter_stream() -> anyhow::Result<()> {
    // --- 1. ARRANGE ---
    let fx = Fixture::with_device(HeadlessDevice::new());
    let (mesh, material) = fx.cube_and_material();
    let mut renderer = LodInstancedRenderer::default();
    for (entity, id) in [(1u64, 100u32), (2, 200), (3, 300)] {
        let data = InstanceData::from_matrix(Mat4::IDENTITY).with_instance_id(id);
        renderer.add_instance_data(entity, mesh, material, data, 0);
    }
    renderer.add_instance(7, mesh, material, Mat4::IDENTITY, 0);

    // --- 2. ACT ---
    let stats = renderer.render_all(&fx.render_ctx());

    // --- 3. ASSERT ---
    assert_eq!(renderer.last_drawn_instance_ids(), &[100, 200, 300, 7]);
    assert_eq!(
        stats.bytes_uploaded,
        (4 * (MATRIX_STRIDE + VEC4_STRIDE + PARAMS_STRIDE)) as u64
    );

    let draw = fx.device.draws()[0].clone();
    let vao = draw.vertex_array.ok_or_else(|| anyhow::anyhow!("no vertex array bound"))?;
    let params = fx
        .device
        .vertex_array_layout(vao)
        .into_iter()
        .find(|b| b.attribute.location == 11)
        .ok_or_else(|| anyhow::anyhow!("params attribute missing"))?;
    assert_eq!(params.attribute.stride as usize, PARAMS_STRIDE);
    assert_eq!(params.attribute.divisor, 1);

    let stored = fx
        .device
        .buffer_contents(params.buffer)
        .ok_or_else(|| anyhow::anyhow!("params buffer missing"))?;
    let id_at = |slot: usize| {
        let start = slot * PARAMS_STRIDE + 16;
        u32::from_ne_bytes([stored[start], stored[start + 1], stored[start + 2], stored[start + 3]])
    };
    assert_eq!([id_at(0), id_at(1), id_at(2), id_at(3)], [100, 200, 300, 7]);
    Ok(())
}

#[test]
fn test_gpu_culling_reads_back_visible_indices() {
    // --- 1. ARRANGE ---
    let fx = Fixture::with_device(HeadlessDevice::new());
    // Simulate the compute pass: every even instance is visible, all at LOD 0.
    fx.device.on_dispatch(|dispatch| {
        let count = match dispatch.uniform("uInstanceCount") {
            Some(UniformValue::Int(n)) => *n as u32,
            _ => 0,
        };
        let visible: Vec<u32> = (0..count).step_by(2).collect();
        if let Some(out) = dispatch.storage(BINDING_VISIBLE) {
            for (slot, index) in out.chunks_exact_mut(4).zip(&visible) {
                slot.copy_from_slice(&index.to_le_bytes());
            }
        }
        if let Some(counter) = dispatch.storage(BINDING_COUNTER) {
            counter[..4].copy_from_slice(&(visible.len() as u32).to_le_bytes());
        }
        if let Some(lods) = dispatch.storage(BINDING_LOD_COUNTS) {
            lods[..4].copy_from_slice(&(visible.len() as u32).to_le_bytes());
        }
    });
    let mut renderer = LodInstancedRenderer::default();
    renderer.enable_gpu_culling(true);
    let matrices: Vec<Mat4> = (0..300)
        .map(|i| Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)))
        .collect();
    let camera = CullingCamera::default();

    // --- 2. ACT ---
    let result = renderer.cull_instances(
        fx.state.context(),
        fx.resources.memory(),
        &camera,
        &matrices,
        &[],
    );

    // --- 3. ASSERT ---
    let result = result.expect("culling ran");
    assert_eq!(result.visible.len(), 150);
    assert_eq!(result.visible[..3], [0, 2, 4]);
    assert_eq!(result.lod_counts, [150, 0, 0, 0]);
    assert_eq!(result.lod_offsets, [0, 150, 150, 150]);
    assert_eq!(fx.device.dispatches(), vec![(2, 1, 1)]);
    assert!(renderer.is_gpu_culling_enabled());
}

#[test]
fn test_gpu_culling_disables_itself_without_compute() {
    // --- 1. ARRANGE ---
    let fx = Fixture::with_device(HeadlessDevice::legacy());
    let mut renderer = LodInstancedRenderer::default();
    renderer.enable_gpu_culling(true);

    // --- 2. ACT ---
    let result = renderer.cull_instances(
        fx.state.context(),
        fx.resources.memory(),
        &CullingCamera::default(),
        &[Mat4::IDENTITY],
        &[1.0],
    );

    // --- 3. ASSERT ---
    assert!(result.is_none());
    assert!(!renderer.is_gpu_culling_enabled());
    assert!(fx.device.dispatches().is_empty());
}
