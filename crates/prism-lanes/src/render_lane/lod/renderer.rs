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

//! The LOD instanced renderer.

use parking_lot::Mutex;
use prism_core::math::Mat4;
use prism_core::memory::MemoryTracker;
use prism_core::renderer::{
    BufferTarget, GpuContext, PrimitiveMode, UniformValue, VertexArrayId, VertexAttribute,
};
use prism_core::{EngineResult, Handle, Stopwatch};
use prism_data::resources::MeshGpu;
use prism_data::{Material, Mesh, Shader};
use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use super::culling::{CullingCamera, CullingResult, GpuCuller};
use super::group::{
    EntityId, GroupKey, GroupSet, InstanceData, PendingInstance, MAX_LOD_LEVELS,
};
use super::streams::{MeshStreams, MATRIX_STRIDE, PARAMS_STRIDE, VEC4_STRIDE};
use crate::render_lane::batch::{RenderContext, VIEW_PROJECTION_UNIFORM};
use crate::render_lane::bind_material;

/// Names of the four matrix-column attributes.
pub const INSTANCE_ROW_ATTRIBUTES: [&str; 4] =
    ["aInstanceRow0", "aInstanceRow1", "aInstanceRow2", "aInstanceRow3"];
/// Name of the per-instance color attribute.
pub const INSTANCE_COLOR_ATTRIBUTE: &str = "aInstanceColor";
/// Name of the per-instance parameter attribute.
pub const INSTANCE_PARAMS_ATTRIBUTE: &str = "aInstanceParams";
/// Locations used for the six instance attributes when a shader does not name them.
pub const FALLBACK_INSTANCE_LOCATIONS: std::ops::Range<u32> = 6..12;

/// Mesh attribute locations copied onto an instanced vertex array.
const CLONED_MESH_LOCATIONS: u32 = 6;

/// Counters for one [`LodInstancedRenderer::render_all`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LodRenderStats {
    /// Non-empty groups drawn.
    pub group_count: usize,
    /// Instances drawn.
    pub total_instances: usize,
    /// Instances drawn per LOD level; levels past the last share its bucket.
    pub instances_per_lod: [usize; MAX_LOD_LEVELS],
    /// Instanced draw calls issued.
    pub draw_calls: u32,
    /// Instances deferred to later frames.
    pub pending_count: usize,
    /// Streams refilled.
    pub vbo_uploads: u32,
    /// Bytes written into instance streams.
    pub bytes_uploaded: u64,
    /// Time spent filling streams.
    pub upload_time_ms: f64,
    /// Time spent ordering groups.
    pub sort_time_ms: f64,
    /// Time spent issuing draws.
    pub render_time_ms: f64,
    /// Bytes held by instance streams and culling buffers.
    pub total_allocated_bytes: u64,
    /// Most instances drawn in one frame so far.
    pub peak_instance_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InstanceLocations {
    rows: [u32; 4],
    color: u32,
    params: u32,
}

impl InstanceLocations {
    fn resolve(ctx: &GpuContext, shader: Option<&Shader>) -> Self {
        let mut fallback = FALLBACK_INSTANCE_LOCATIONS;
        let mut lookup = |name: &str| {
            let default = fallback.next().unwrap_or(FALLBACK_INSTANCE_LOCATIONS.end - 1);
            shader
                .and_then(|s| s.attribute_location(ctx, name))
                .unwrap_or(default)
        };
        let rows = INSTANCE_ROW_ATTRIBUTES.map(&mut lookup);
        let color = lookup(INSTANCE_COLOR_ATTRIBUTE);
        let params = lookup(INSTANCE_PARAMS_ATTRIBUTE);
        Self { rows, color, params }
    }
}

#[derive(Debug, Clone, Copy)]
struct InstancedVao {
    vao: VertexArrayId,
    locations: InstanceLocations,
}

/// Draws many copies of the same meshes with one instanced call per
/// `(mesh, material, lod)` group.
///
/// Instances are added from any thread into the build set. `render_all` swaps the build
/// set out, feeds it through a FIFO capped at `max_instances_per_frame`, uploads the
/// per-mesh instance streams and draws the groups in material sort order.
pub struct LodInstancedRenderer {
    build: Mutex<GroupSet>,
    render: GroupSet,
    pending: VecDeque<PendingInstance>,
    sequence: AtomicU64,
    max_instances_per_frame: usize,
    estimated_instances: usize,
    streams: HashMap<Handle<Mesh>, MeshStreams>,
    vaos: HashMap<(Handle<Mesh>, Handle<Material>), InstancedVao>,
    culler: Option<GpuCuller>,
    culling_enabled: bool,
    peak_instances: usize,
    last_entities: Vec<EntityId>,
    last_instance_ids: Vec<u32>,
}

impl std::fmt::Debug for LodInstancedRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LodInstancedRenderer")
            .field("pending", &self.pending.len())
            .field("max_instances_per_frame", &self.max_instances_per_frame)
            .field("meshes", &self.streams.len())
            .field("culling_enabled", &self.culling_enabled)
            .finish_non_exhaustive()
    }
}

impl Default for LodInstancedRenderer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl LodInstancedRenderer {
    /// Creates a renderer drawing at most `max_instances_per_frame` instances per call to
    /// `render_all`. Zero means unlimited.
    pub fn new(max_instances_per_frame: usize) -> Self {
        Self {
            build: Mutex::new(GroupSet::default()),
            render: GroupSet::default(),
            pending: VecDeque::new(),
            sequence: AtomicU64::new(0),
            max_instances_per_frame,
            estimated_instances: 0,
            streams: HashMap::new(),
            vaos: HashMap::new(),
            culler: None,
            culling_enabled: false,
            peak_instances: 0,
            last_entities: Vec::new(),
            last_instance_ids: Vec::new(),
        }
    }

    /// Adds an untinted instance for the next frame. Its instance id is the low 32 bits
    /// of `entity`.
    pub fn add_instance(
        &self,
        entity: EntityId,
        mesh: Handle<Mesh>,
        material: Handle<Material>,
        world_matrix: Mat4,
        lod_level: u32,
    ) {
        let data = InstanceData::from_matrix(world_matrix).with_instance_id(entity as u32);
        self.add_instance_data(entity, mesh, material, data, lod_level);
    }

    /// Adds an instance with a full payload for the next frame.
    pub fn add_instance_data(
        &self,
        entity: EntityId,
        mesh: Handle<Mesh>,
        material: Handle<Material>,
        data: InstanceData,
        lod_level: u32,
    ) {
        let key = GroupKey {
            mesh,
            material,
            lod_level,
        };
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.build.lock().insert(key, entity, data, sequence);
    }

    /// Drops every queued and pending instance.
    pub fn clear(&mut self) {
        self.build.lock().clear();
        self.render.clear();
        self.pending.clear();
    }

    /// Caps the instances drawn per frame; the rest wait in FIFO order. Zero means
    /// unlimited.
    pub fn set_max_instances_per_frame(&mut self, max: usize) {
        self.max_instances_per_frame = max;
    }

    /// Pre-sizes the pending queue and the instance streams.
    pub fn set_estimated_instance_count(&mut self, count: usize) {
        self.estimated_instances = count;
        self.pending.reserve(count.saturating_sub(self.pending.len()));
    }

    /// Pre-sizes the group tables.
    pub fn set_estimated_group_count(&mut self, count: usize) {
        self.build.lock().reserve(count);
        self.render.reserve(count);
    }

    /// Instances waiting for a later frame.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Entities drawn by the last `render_all`, in draw order.
    pub fn last_drawn_entities(&self) -> &[EntityId] {
        &self.last_entities
    }

    /// Instance ids uploaded by the last `render_all`, parallel to
    /// [`last_drawn_entities`](Self::last_drawn_entities).
    pub fn last_drawn_instance_ids(&self) -> &[u32] {
        &self.last_instance_ids
    }

    /// Turns GPU culling on or off. The compute program is built on first use; if that
    /// fails culling switches itself off again.
    pub fn enable_gpu_culling(&mut self, enabled: bool) {
        self.culling_enabled = enabled;
    }

    /// `true` while GPU culling is on.
    pub fn is_gpu_culling_enabled(&self) -> bool {
        self.culling_enabled
    }

    /// Culls `matrices` against `camera` on the GPU. Returns `None` when culling is off
    /// or the pass failed, in which case culling is disabled.
    pub fn cull_instances(
        &mut self,
        ctx: &GpuContext,
        memory: &MemoryTracker,
        camera: &CullingCamera,
        matrices: &[Mat4],
        radii: &[f32],
    ) -> Option<CullingResult> {
        if !self.culling_enabled {
            return None;
        }
        if self.culler.is_none() {
            match GpuCuller::new(ctx) {
                Ok(culler) => self.culler = Some(culler),
                Err(e) => {
                    log::warn!("GPU culling unavailable: {e}");
                    self.culling_enabled = false;
                    return None;
                }
            }
        }
        let culler = self.culler.as_mut()?;
        match culler.cull(ctx, memory, camera, matrices, radii) {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!("GPU culling failed, disabling it: {e}");
                self.culling_enabled = false;
                None
            }
        }
    }

    fn allocated_bytes(&self) -> u64 {
        let streams: usize = self.streams.values().map(MeshStreams::byte_size).sum();
        let culling = self.culler.as_ref().map_or(0, GpuCuller::allocated_bytes);
        (streams + culling) as u64
    }

    /// Moves this frame's share of queued instances into the render set.
    fn take_frame_budget(&mut self) {
        mem::swap(&mut *self.build.lock(), &mut self.render);
        self.pending.extend(self.render.drain_ordered());

        let budget = match self.max_instances_per_frame {
            0 => self.pending.len(),
            max => max.min(self.pending.len()),
        };
        for p in self.pending.drain(..budget) {
            self.render.insert(p.key, p.entity, p.data, p.sequence);
        }
    }

    /// Draws one frame and returns its statistics. Must run on the GPU thread.
    pub fn render_all(&mut self, ctx: &RenderContext<'_>) -> LodRenderStats {
        let mut stats = LodRenderStats::default();
        let mut watch = Stopwatch::new();
        self.take_frame_budget();
        self.last_entities.clear();
        self.last_instance_ids.clear();

        // Order the non-empty groups by material sort key, then LOD.
        let mut order: Vec<(u64, u32, GroupKey)> = Vec::new();
        for (key, group) in self.render.groups.iter_mut() {
            if group.instances.is_empty() {
                continue;
            }
            match ctx.resources.get_material(key.material) {
                Some(material) => {
                    group.sort_key = material.sort_key();
                    order.push((group.sort_key, key.lod_level, *key));
                }
                None => log::warn!(
                    "Dropping {} instance(s) of stale material {:?}",
                    group.instances.len(),
                    key.material
                ),
            }
        }
        order.sort_unstable();
        stats.sort_time_ms = watch.lap_ms();

        // Pack every group of a mesh into that mesh's streams.
        let mut bases: HashMap<GroupKey, usize> = HashMap::with_capacity(order.len());
        let mut per_mesh: HashMap<Handle<Mesh>, Vec<GroupKey>> = HashMap::new();
        for (_, _, key) in &order {
            per_mesh.entry(key.mesh).or_default().push(*key);
        }
        let gpu_ctx = ctx.state.context();
        let memory = ctx.resources.memory();
        for (mesh, keys) in &per_mesh {
            let mut payload: Vec<InstanceData> = Vec::new();
            let mut needs_upload = false;
            for key in keys {
                if let Some(group) = self.render.groups.get(key) {
                    bases.insert(*key, payload.len());
                    payload.extend_from_slice(&group.instances);
                    needs_upload |= group.needs_upload();
                }
            }
            if let Err(e) = self.prepare_streams(gpu_ctx, memory, *mesh, payload.len()) {
                log::warn!("Could not allocate instance streams for {mesh:?}: {e}");
                for key in keys {
                    bases.remove(key);
                }
                continue;
            }
            let Some(streams) = self.streams.get_mut(mesh) else {
                continue;
            };
            if needs_upload {
                stats.bytes_uploaded += streams.upload(gpu_ctx, &payload) as u64;
                stats.vbo_uploads += 3;
                for key in keys {
                    if let Some(group) = self.render.groups.get_mut(key) {
                        group.mark_uploaded();
                    }
                }
            }
        }
        stats.upload_time_ms = watch.lap_ms();

        for (_, lod, key) in &order {
            let Some(&base) = bases.get(key) else {
                continue;
            };
            let count = self.render.groups.get(key).map_or(0, |g| g.instances.len());
            match self.draw_group(ctx, key, base, count) {
                Ok(true) => {
                    stats.draw_calls += 1;
                    stats.group_count += 1;
                    stats.total_instances += count;
                    stats.instances_per_lod[(*lod as usize).min(MAX_LOD_LEVELS - 1)] += count;
                    if let Some(group) = self.render.groups.get(key) {
                        self.last_entities.extend_from_slice(&group.entities);
                        self.last_instance_ids
                            .extend(group.instances.iter().map(|i| i.instance_id));
                    }
                }
                Ok(false) => {}
                Err(e) => log::warn!("Instanced draw of {key:?} failed: {e}"),
            }
        }
        stats.render_time_ms = watch.lap_ms();

        self.render.clear();
        self.peak_instances = self.peak_instances.max(stats.total_instances);
        stats.peak_instance_count = self.peak_instances;
        stats.pending_count = self.pending.len();
        stats.total_allocated_bytes = self.allocated_bytes();
        log::trace!(
            "LOD frame: {} group(s), {} instance(s), {} pending",
            stats.group_count,
            stats.total_instances,
            stats.pending_count
        );
        stats
    }

    fn prepare_streams(
        &mut self,
        ctx: &GpuContext,
        memory: &MemoryTracker,
        mesh: Handle<Mesh>,
        count: usize,
    ) -> EngineResult<()> {
        match self.streams.get_mut(&mesh) {
            Some(streams) => {
                streams.ensure_capacity(ctx, memory, count)?;
            }
            None => {
                let streams = MeshStreams::new(ctx, memory, count.max(self.estimated_instances))?;
                self.streams.insert(mesh, streams);
            }
        }
        Ok(())
    }

    fn instanced_vao(
        &mut self,
        ctx: &RenderContext<'_>,
        key: &GroupKey,
        mesh_gpu: &MeshGpu,
        shader: Option<&Shader>,
    ) -> EngineResult<InstancedVao> {
        if let Some(vao) = self.vaos.get(&(key.mesh, key.material)) {
            return Ok(*vao);
        }
        let gpu_ctx = ctx.state.context();
        let gl = gpu_ctx.gl("LodInstancedRenderer::instanced_vao");
        let vao = gl.create_vertex_array()?;
        let source = gl.vertex_array_layout(mesh_gpu.vao);
        ctx.state.bind_vertex_array(Some(vao));
        for binding in source
            .iter()
            .filter(|b| b.attribute.location < CLONED_MESH_LOCATIONS)
        {
            ctx.state.bind_buffer(BufferTarget::Array, Some(binding.buffer));
            gl.configure_attribute(&VertexAttribute {
                divisor: 0,
                ..binding.attribute
            });
        }
        ctx.state.bind_buffer(BufferTarget::ElementArray, Some(mesh_gpu.ebo));

        let entry = InstancedVao {
            vao,
            locations: InstanceLocations::resolve(gpu_ctx, shader),
        };
        log::debug!(
            "Built instanced vertex array {vao:?} for {:?} / {:?} ({:?})",
            key.mesh,
            key.material,
            entry.locations
        );
        self.vaos.insert((key.mesh, key.material), entry);
        Ok(entry)
    }

    fn draw_group(
        &mut self,
        ctx: &RenderContext<'_>,
        key: &GroupKey,
        base: usize,
        count: usize,
    ) -> EngineResult<bool> {
        if count == 0 {
            return Ok(false);
        }
        let gpu_ctx = ctx.state.context();
        let Some(material) = ctx.resources.get_material(key.material) else {
            return Ok(false);
        };
        ctx.resources.upload_mesh(gpu_ctx, key.mesh)?;
        let Some(mesh) = ctx.resources.get_mesh(key.mesh) else {
            return Ok(false);
        };
        let Some(mesh_gpu) = mesh.gpu() else {
            return Ok(false);
        };
        if !bind_material(ctx.state, ctx.resources, &material) {
            return Ok(false);
        }
        let shader = ctx.resources.get_shader(material.shader());
        if let Some(shader) = &shader {
            shader.set_uniform(
                gpu_ctx,
                VIEW_PROJECTION_UNIFORM,
                &UniformValue::Mat4(ctx.view_projection().to_cols_array()),
            );
        }
        let vao = self.instanced_vao(ctx, key, &mesh_gpu, shader.as_deref())?;
        let Some(streams) = self.streams.get(&key.mesh) else {
            return Ok(false);
        };

        let gl = gpu_ctx.gl("LodInstancedRenderer::draw_group");
        ctx.state.bind_vertex_array(Some(vao.vao));
        ctx.state
            .bind_buffer(BufferTarget::Array, Some(streams.matrices.buffer()));
        let matrix_base = (base * MATRIX_STRIDE) as u32;
        for (column, location) in vao.locations.rows.iter().enumerate() {
            gl.configure_attribute(&VertexAttribute {
                location: *location,
                components: 4,
                stride: MATRIX_STRIDE as u32,
                offset: matrix_base + column as u32 * 16,
                divisor: 1,
            });
        }
        for (buffer, location, stride) in [
            (streams.colors.buffer(), vao.locations.color, VEC4_STRIDE),
            (streams.params.buffer(), vao.locations.params, PARAMS_STRIDE),
        ] {
            ctx.state.bind_buffer(BufferTarget::Array, Some(buffer));
            gl.configure_attribute(&VertexAttribute {
                location,
                components: 4,
                stride: stride as u32,
                offset: (base * stride) as u32,
                divisor: 1,
            });
        }
        gl.draw_elements_instanced(
            PrimitiveMode::Triangles,
            mesh_gpu.index_count,
            mesh.index_type(),
            0,
            count as u32,
        );
        Ok(true)
    }

    /// Deletes every GPU object the renderer owns. Must run on the GPU thread.
    pub fn release_gpu(&mut self, ctx: &GpuContext, memory: &MemoryTracker) {
        for (_, mut streams) in self.streams.drain() {
            streams.release(ctx, memory);
        }
        let gl = ctx.gl("LodInstancedRenderer::release_gpu");
        for (_, vao) in self.vaos.drain() {
            gl.delete_vertex_array(vao.vao);
        }
        if let Some(mut culler) = self.culler.take() {
            culler.release(ctx, memory);
        }
        ctx.mark_bindings_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_bleeds_in_fifo_order() {
        let mut renderer = LodInstancedRenderer::new(2);
        for entity in 0..5 {
            renderer.add_instance(entity, Handle::new(1, 0), Handle::new(1, 0), Mat4::IDENTITY, 0);
        }
        renderer.take_frame_budget();
        assert_eq!(renderer.render.instance_count(), 2);
        assert_eq!(renderer.pending_count(), 3);
        let first: Vec<EntityId> = renderer.render.drain_ordered().iter().map(|p| p.entity).collect();
        assert_eq!(first, vec![0, 1]);

        renderer.add_instance(9, Handle::new(1, 0), Handle::new(1, 0), Mat4::IDENTITY, 1);
        renderer.take_frame_budget();
        let second: Vec<EntityId> = renderer.render.drain_ordered().iter().map(|p| p.entity).collect();
        assert_eq!(second, vec![2, 3]);
        assert_eq!(renderer.pending_count(), 2);
    }

    #[test]
    fn unlimited_budget_takes_everything() {
        let mut renderer = LodInstancedRenderer::default();
        for entity in 0..100 {
            renderer.add_instance(entity, Handle::new(1, 0), Handle::new(2, 0), Mat4::IDENTITY, 0);
        }
        renderer.take_frame_budget();
        assert_eq!(renderer.render.instance_count(), 100);
        assert_eq!(renderer.pending_count(), 0);
    }
}
