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

//! Frustum and LOD classification of instances on the GPU.
//!
//! The compute pass reads every instance matrix and radius, tests the bounding sphere
//! against the six frustum planes, picks a LOD from the camera distance and appends the
//! visible indices. The CPU then reads the counters and indices back.
//!
//! Shader storage bindings:
//!
//! | binding | contents |
//! |---|---|
//! | 0 | instance matrices (`mat4[]`) |
//! | 1 | visible instance indices (`uint[]`) |
//! | 2 | visible count (`uint`) |
//! | 3 | per-LOD visible counts (`uint[4]`) |
//! | 4 | per-instance radii (`float[]`) |

use prism_core::math::{Frustum, Mat4, Vec3};
use prism_core::memory::{MemoryCategory, MemoryTracker};
use prism_core::renderer::{
    BufferId, BufferTarget, GpuContext, MemoryBarrier, ShaderStage, ShaderStageSource,
    UniformValue, UsageClass,
};
use prism_core::{EngineError, EngineResult, ErrorKind};
use prism_data::Shader;

use super::group::MAX_LOD_LEVELS;

/// Invocations per workgroup of the culling shader.
pub const CULLING_WORKGROUP_SIZE: u32 = 256;

/// Binding of the instance matrix buffer.
pub const BINDING_MATRICES: u32 = 0;
/// Binding of the visible index buffer.
pub const BINDING_VISIBLE: u32 = 1;
/// Binding of the visible counter.
pub const BINDING_COUNTER: u32 = 2;
/// Binding of the per-LOD counters.
pub const BINDING_LOD_COUNTS: u32 = 3;
/// Binding of the radius buffer.
pub const BINDING_RADII: u32 = 4;

/// GLSL source of the `instance_culling` compute program.
pub const CULLING_SHADER_SOURCE: &str = r#"#version 430 core
layout(local_size_x = 256) in;

layout(std430, binding = 0) readonly buffer Matrices { mat4 instanceMatrices[]; };
layout(std430, binding = 1) writeonly buffer Visible { uint visibleIndices[]; };
layout(std430, binding = 2) buffer Counter { uint visibleCount; };
layout(std430, binding = 3) buffer LodCounts { uint lodCounts[4]; };
layout(std430, binding = 4) readonly buffer Radii { float instanceRadii[]; };

uniform mat4 uViewProj;
uniform vec3 uCameraPos;
uniform vec4 uFrustumPlanes[6];
uniform float uLODDistances[4];
uniform float uDefaultRadius;
uniform int uInstanceCount;

void main() {
    uint index = gl_GlobalInvocationID.x;
    if (index >= uint(uInstanceCount)) {
        return;
    }
    mat4 model = instanceMatrices[index];
    vec3 center = model[3].xyz;
    float scale = max(length(model[0].xyz), max(length(model[1].xyz), length(model[2].xyz)));
    float radius = instanceRadii[index];
    if (radius <= 0.0) {
        radius = uDefaultRadius;
    }
    radius *= scale;

    for (int i = 0; i < 6; ++i) {
        if (dot(uFrustumPlanes[i].xyz, center) + uFrustumPlanes[i].w < -radius) {
            return;
        }
    }

    float distance = length(center - uCameraPos);
    uint lod = 3u;
    for (uint i = 0u; i < 4u; ++i) {
        if (distance <= uLODDistances[i]) {
            lod = i;
            break;
        }
    }

    uint slot = atomicAdd(visibleCount, 1u);
    visibleIndices[slot] = index;
    atomicAdd(lodCounts[lod], 1u);
}
"#;

/// Camera parameters for one culling pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullingCamera {
    /// View-projection matrix the frustum is extracted from.
    pub view_projection: Mat4,
    /// World-space camera position for LOD distances.
    pub position: Vec3,
    /// Upper distance bound of each LOD level.
    pub lod_distances: [f32; MAX_LOD_LEVELS],
    /// Radius used for instances whose radius is zero or negative.
    pub default_radius: f32,
}

impl Default for CullingCamera {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            position: Vec3::ZERO,
            lod_distances: [25.0, 50.0, 100.0, f32::MAX],
            default_radius: 1.0,
        }
    }
}

/// What survived a culling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CullingResult {
    /// Indices of the visible instances, in the order the GPU appended them.
    pub visible: Vec<u32>,
    /// Visible instances per LOD level.
    pub lod_counts: [u32; MAX_LOD_LEVELS],
    /// Exclusive prefix sum of `lod_counts`.
    pub lod_offsets: [u32; MAX_LOD_LEVELS],
}

impl CullingResult {
    fn from_counts(visible: Vec<u32>, lod_counts: [u32; MAX_LOD_LEVELS]) -> Self {
        let mut lod_offsets = [0; MAX_LOD_LEVELS];
        let mut running = 0;
        for (offset, count) in lod_offsets.iter_mut().zip(lod_counts) {
            *offset = running;
            running += count;
        }
        Self {
            visible,
            lod_counts,
            lod_offsets,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct StorageBuffer {
    id: BufferId,
    bytes: usize,
}

/// The compute program and its five storage buffers.
#[derive(Debug)]
pub struct GpuCuller {
    shader: Shader,
    buffers: [StorageBuffer; 5],
    capacity: usize,
}

impl GpuCuller {
    /// Compiles the culling program. Fails when the device has no compute support.
    pub fn new(ctx: &GpuContext) -> EngineResult<Self> {
        if !ctx.caps().compute_shaders {
            return Err(EngineError::new(
                ErrorKind::NotImplemented,
                "GPU culling needs compute shaders",
            ));
        }
        let shader = Shader::from_sources(
            ctx,
            &[ShaderStageSource::new(ShaderStage::Compute, CULLING_SHADER_SOURCE)],
        )?;
        let empty = StorageBuffer {
            id: BufferId(0),
            bytes: 0,
        };
        Ok(Self {
            shader,
            buffers: [empty; 5],
            capacity: 0,
        })
    }

    /// Instances the storage buffers can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes held by the storage buffers.
    pub fn allocated_bytes(&self) -> usize {
        self.buffers.iter().map(|b| b.bytes).sum()
    }

    fn ensure_capacity(
        &mut self,
        ctx: &GpuContext,
        memory: &MemoryTracker,
        count: usize,
    ) -> EngineResult<()> {
        if count <= self.capacity {
            return Ok(());
        }
        self.release_buffers(ctx, memory);
        let capacity = count.next_power_of_two().max(CULLING_WORKGROUP_SIZE as usize);
        let mut sizes = [0usize; 5];
        sizes[BINDING_MATRICES as usize] = capacity * 64;
        sizes[BINDING_VISIBLE as usize] = capacity * 4;
        sizes[BINDING_COUNTER as usize] = 4;
        sizes[BINDING_LOD_COUNTS as usize] = MAX_LOD_LEVELS * 4;
        sizes[BINDING_RADII as usize] = capacity * 4;
        let gl = ctx.gl("GpuCuller::ensure_capacity");
        for (slot, bytes) in self.buffers.iter_mut().zip(sizes) {
            let id = gl.create_buffer()?;
            gl.bind_buffer(BufferTarget::ShaderStorage, Some(id));
            gl.buffer_data_size(BufferTarget::ShaderStorage, bytes, UsageClass::Dynamic);
            memory.record_alloc(MemoryCategory::Buffer, bytes as u64);
            *slot = StorageBuffer { id, bytes };
        }
        gl.bind_buffer(BufferTarget::ShaderStorage, None);
        ctx.mark_bindings_dirty();
        self.capacity = capacity;
        Ok(())
    }

    fn release_buffers(&mut self, ctx: &GpuContext, memory: &MemoryTracker) {
        if self.capacity == 0 {
            return;
        }
        let gl = ctx.gl("GpuCuller::release");
        for buffer in &mut self.buffers {
            gl.delete_buffer(buffer.id);
            memory.record_free(MemoryCategory::Buffer, buffer.bytes as u64);
            buffer.bytes = 0;
        }
        ctx.mark_bindings_dirty();
        self.capacity = 0;
    }

    /// Deletes the program and buffers.
    pub fn release(&mut self, ctx: &GpuContext, memory: &MemoryTracker) {
        self.release_buffers(ctx, memory);
        self.shader.release_gpu(ctx);
    }

    /// Runs one culling pass over `matrices`, with `radii[i]` the object-space bounding
    /// radius of instance `i` (missing entries use the camera's default radius).
    pub fn cull(
        &mut self,
        ctx: &GpuContext,
        memory: &MemoryTracker,
        camera: &CullingCamera,
        matrices: &[Mat4],
        radii: &[f32],
    ) -> EngineResult<CullingResult> {
        let count = matrices.len();
        if count == 0 {
            return Ok(CullingResult::default());
        }
        self.ensure_capacity(ctx, memory, count)?;

        let mut padded_radii = vec![0.0f32; count];
        for (dst, src) in padded_radii.iter_mut().zip(radii) {
            *dst = *src;
        }
        let gl = ctx.gl("GpuCuller::cull");
        let upload = |binding: u32, bytes: &[u8]| {
            let buffer = self.buffers[binding as usize].id;
            gl.bind_buffer(BufferTarget::ShaderStorage, Some(buffer));
            gl.buffer_sub_data(BufferTarget::ShaderStorage, 0, bytes);
        };
        upload(BINDING_MATRICES, bytemuck::cast_slice(matrices));
        upload(BINDING_RADII, bytemuck::cast_slice(&padded_radii));
        upload(BINDING_COUNTER, bytemuck::bytes_of(&0u32));
        upload(BINDING_LOD_COUNTS, bytemuck::cast_slice(&[0u32; MAX_LOD_LEVELS]));
        for (binding, buffer) in self.buffers.iter().enumerate() {
            gl.bind_buffer_base(BufferTarget::ShaderStorage, binding as u32, Some(buffer.id));
        }

        gl.use_program(Some(self.shader.program()));
        let frustum = Frustum::from_view_projection(&camera.view_projection);
        let uniforms = [
            ("uViewProj", UniformValue::Mat4(camera.view_projection.to_cols_array())),
            ("uCameraPos", UniformValue::Vec3(camera.position.to_array())),
            ("uFrustumPlanes", UniformValue::Vec4Array(frustum.to_arrays().to_vec())),
            ("uLODDistances", UniformValue::FloatArray(camera.lod_distances.to_vec())),
            ("uDefaultRadius", UniformValue::Float(camera.default_radius)),
            ("uInstanceCount", UniformValue::Int(count as i32)),
        ];
        for (name, value) in &uniforms {
            self.shader.set_uniform(ctx, name, value);
        }

        let groups = (count as u32).div_ceil(CULLING_WORKGROUP_SIZE);
        gl.dispatch_compute(groups, 1, 1);
        gl.memory_barrier(MemoryBarrier::COMPUTE_TO_READBACK);

        let mut visible_count = 0u32;
        gl.bind_buffer(BufferTarget::ShaderStorage, Some(self.buffers[BINDING_COUNTER as usize].id));
        gl.get_buffer_sub_data(
            BufferTarget::ShaderStorage,
            0,
            bytemuck::bytes_of_mut(&mut visible_count),
        );
        let mut lod_counts = [0u32; MAX_LOD_LEVELS];
        gl.bind_buffer(
            BufferTarget::ShaderStorage,
            Some(self.buffers[BINDING_LOD_COUNTS as usize].id),
        );
        gl.get_buffer_sub_data(
            BufferTarget::ShaderStorage,
            0,
            bytemuck::cast_slice_mut(&mut lod_counts),
        );
        let visible_count = (visible_count as usize).min(count);
        let mut visible = vec![0u32; visible_count];
        if visible_count > 0 {
            gl.bind_buffer(BufferTarget::ShaderStorage, Some(self.buffers[BINDING_VISIBLE as usize].id));
            gl.get_buffer_sub_data(BufferTarget::ShaderStorage, 0, bytemuck::cast_slice_mut(&mut visible));
        }
        gl.bind_buffer(BufferTarget::ShaderStorage, None);
        gl.use_program(None);
        ctx.mark_bindings_dirty();

        if let Some(kind) = gl.get_error() {
            return Err(EngineError::new(kind, "GPU culling pass failed"));
        }
        Ok(CullingResult::from_counts(visible, lod_counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_offsets_are_an_exclusive_prefix_sum() {
        let result = CullingResult::from_counts(vec![], [3, 0, 5, 2]);
        assert_eq!(result.lod_offsets, [0, 3, 3, 8]);
    }
}
