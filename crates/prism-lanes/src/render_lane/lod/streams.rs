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

//! Per-mesh instance streams: matrices, colors and parameters.

use prism_core::memory::{MemoryCategory, MemoryTracker};
use prism_core::renderer::{
    BufferId, BufferTarget, GpuContext, MapAccess, MappedRange, UsageClass,
};
use prism_core::EngineResult;

use super::group::InstanceData;

/// Bytes per instance in the matrix stream.
pub const MATRIX_STRIDE: usize = 64;
/// Bytes per instance in the color stream.
pub const VEC4_STRIDE: usize = 16;
/// Bytes per instance in the parameter stream: four floats then the `u32` id.
pub const PARAMS_STRIDE: usize = std::mem::size_of::<ParamsEntry>();

/// One record of the parameter stream.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ParamsEntry {
    /// Shader parameters.
    pub params: [f32; 4],
    /// The instance id.
    pub instance_id: u32,
}

impl From<&InstanceData> for ParamsEntry {
    fn from(data: &InstanceData) -> Self {
        Self {
            params: data.params.to_array(),
            instance_id: data.instance_id,
        }
    }
}

const MIN_CAPACITY: usize = 64;

/// One GPU buffer holding a fixed-stride attribute for up to `capacity` instances.
#[derive(Debug)]
pub struct InstanceStream {
    buffer: BufferId,
    stride: usize,
    capacity: usize,
    mapping: Option<MappedRange>,
}

impl InstanceStream {
    fn create(ctx: &GpuContext, memory: &MemoryTracker, stride: usize, capacity: usize) -> EngineResult<Self> {
        let gl = ctx.gl("InstanceStream::create");
        let bytes = stride * capacity;
        let buffer = gl.create_buffer()?;
        gl.bind_buffer(BufferTarget::Array, Some(buffer));
        let mapping = if ctx.caps().persistent_mapping && ctx.caps().coherent_mapping {
            gl.buffer_storage(BufferTarget::Array, bytes, None, MapAccess::PERSISTENT_WRITE)
                .ok()
                .and_then(|()| {
                    gl.map_buffer_range(BufferTarget::Array, 0, bytes, MapAccess::PERSISTENT_WRITE)
                })
        } else {
            None
        };
        if mapping.is_none() {
            gl.buffer_data_size(BufferTarget::Array, bytes, UsageClass::Stream);
        }
        gl.bind_buffer(BufferTarget::Array, None);
        ctx.mark_bindings_dirty();
        memory.record_alloc(MemoryCategory::Buffer, bytes as u64);
        Ok(Self {
            buffer,
            stride,
            capacity,
            mapping,
        })
    }

    fn destroy(&mut self, ctx: &GpuContext, memory: &MemoryTracker) {
        let gl = ctx.gl("InstanceStream::destroy");
        if self.mapping.take().is_some() {
            gl.bind_buffer(BufferTarget::Array, Some(self.buffer));
            gl.unmap_buffer(BufferTarget::Array);
            gl.bind_buffer(BufferTarget::Array, None);
        }
        gl.delete_buffer(self.buffer);
        ctx.mark_bindings_dirty();
        memory.record_free(MemoryCategory::Buffer, self.byte_size() as u64);
    }

    /// The GL buffer.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Instances the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocated bytes.
    pub fn byte_size(&self) -> usize {
        self.stride * self.capacity
    }

    /// `true` when writes go through a persistent mapping.
    pub fn is_persistent(&self) -> bool {
        self.mapping.is_some()
    }

    fn write(&self, ctx: &GpuContext, data: &[u8]) {
        if let Some(mapping) = &self.mapping {
            if mapping.write(0, data) {
                return;
            }
            log::warn!("Instance stream write of {} bytes overran its mapping", data.len());
        }
        let gl = ctx.gl("InstanceStream::write");
        gl.bind_buffer(BufferTarget::Array, Some(self.buffer));
        // Orphan the old storage so the driver does not stall on in-flight draws.
        gl.buffer_data_size(BufferTarget::Array, self.byte_size(), UsageClass::Stream);
        gl.buffer_sub_data(BufferTarget::Array, 0, data);
        gl.bind_buffer(BufferTarget::Array, None);
        ctx.mark_bindings_dirty();
    }
}

/// The three instance streams of one source mesh, sized to its high-water mark.
#[derive(Debug)]
pub struct MeshStreams {
    /// Model matrices.
    pub matrices: InstanceStream,
    /// Tints.
    pub colors: InstanceStream,
    /// Shader parameters.
    pub params: InstanceStream,
    high_water: usize,
}

impl MeshStreams {
    /// Allocates streams for at least `capacity` instances.
    pub fn new(ctx: &GpuContext, memory: &MemoryTracker, capacity: usize) -> EngineResult<Self> {
        let capacity = capacity.max(MIN_CAPACITY);
        Ok(Self {
            matrices: InstanceStream::create(ctx, memory, MATRIX_STRIDE, capacity)?,
            colors: InstanceStream::create(ctx, memory, VEC4_STRIDE, capacity)?,
            params: InstanceStream::create(ctx, memory, PARAMS_STRIDE, capacity)?,
            high_water: 0,
        })
    }

    /// Instances the streams can hold.
    pub fn capacity(&self) -> usize {
        self.matrices.capacity()
    }

    /// Most instances ever uploaded at once.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Allocated bytes over all three streams.
    pub fn byte_size(&self) -> usize {
        self.matrices.byte_size() + self.colors.byte_size() + self.params.byte_size()
    }

    /// Grows the streams by 1.5x steps until `count` instances fit. Growing recreates
    /// the buffers and their mappings. Returns `true` if the buffers changed.
    pub fn ensure_capacity(
        &mut self,
        ctx: &GpuContext,
        memory: &MemoryTracker,
        count: usize,
    ) -> EngineResult<bool> {
        if count <= self.capacity() {
            return Ok(false);
        }
        let mut capacity = self.capacity().max(MIN_CAPACITY);
        while capacity < count {
            capacity += capacity / 2;
        }
        log::debug!("Growing instance streams {} -> {capacity}", self.capacity());
        let grown = MeshStreams::new(ctx, memory, capacity)?;
        self.release(ctx, memory);
        let high_water = self.high_water;
        *self = grown;
        self.high_water = high_water;
        Ok(true)
    }

    /// Writes `instances` at the start of each stream. Returns the bytes written.
    pub fn upload(&mut self, ctx: &GpuContext, instances: &[InstanceData]) -> usize {
        let matrices: Vec<f32> = instances
            .iter()
            .flat_map(|i| i.matrix.to_cols_array())
            .collect();
        let colors: Vec<[f32; 4]> = instances.iter().map(|i| i.color.to_array()).collect();
        let params: Vec<ParamsEntry> = instances.iter().map(ParamsEntry::from).collect();

        let matrix_bytes: &[u8] = bytemuck::cast_slice(&matrices);
        let color_bytes: &[u8] = bytemuck::cast_slice(&colors);
        let param_bytes: &[u8] = bytemuck::cast_slice(&params);
        self.matrices.write(ctx, matrix_bytes);
        self.colors.write(ctx, color_bytes);
        self.params.write(ctx, param_bytes);

        self.high_water = self.high_water.max(instances.len());
        matrix_bytes.len() + color_bytes.len() + param_bytes.len()
    }

    /// Deletes the three buffers.
    pub fn release(&mut self, ctx: &GpuContext, memory: &MemoryTracker) {
        self.matrices.destroy(ctx, memory);
        self.colors.destroy(ctx, memory);
        self.params.destroy(ctx, memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::math::{Mat4, Vec3};
    use prism_core::renderer::GpuThreadGuard;
    use prism_infra::HeadlessDevice;
    use std::sync::Arc;

    fn context(device: Arc<HeadlessDevice>) -> GpuContext {
        let guard = Arc::new(GpuThreadGuard::new());
        guard.register_current().unwrap();
        GpuContext::new(device, guard)
    }

    #[test]
    fn persistent_streams_write_through_the_mapping() {
        let device = Arc::new(HeadlessDevice::new());
        let ctx = context(device.clone());
        let memory = MemoryTracker::new();
        let mut streams = MeshStreams::new(&ctx, &memory, 4).unwrap();
        assert!(streams.matrices.is_persistent());

        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let bytes = streams.upload(&ctx, &[InstanceData::from_matrix(m)]);
        assert_eq!(bytes, MATRIX_STRIDE + VEC4_STRIDE + PARAMS_STRIDE);
        assert_eq!(device.call_count("buffer_sub_data"), 0);

        let stored = device.buffer_contents(streams.matrices.buffer()).unwrap();
        let floats: &[f32] = bytemuck::cast_slice(&stored[..MATRIX_STRIDE]);
        assert_eq!(floats, &m.to_cols_array()[..]);
    }

    #[test]
    fn params_stream_carries_the_instance_id() {
        let device = Arc::new(HeadlessDevice::new());
        let ctx = context(device.clone());
        let memory = MemoryTracker::new();
        let mut streams = MeshStreams::new(&ctx, &memory, 4).unwrap();
        assert_eq!(PARAMS_STRIDE, 20);

        let mut first = InstanceData::default().with_instance_id(41);
        first.params = prism_core::math::Vec4::new(1.0, 2.0, 3.0, 4.0);
        let second = InstanceData::default().with_instance_id(0xDEAD_BEEF);
        streams.upload(&ctx, &[first, second]);

        let stored = device.buffer_contents(streams.params.buffer()).unwrap();
        let entry = |i: usize| -> ParamsEntry {
            bytemuck::pod_read_unaligned(&stored[i * PARAMS_STRIDE..(i + 1) * PARAMS_STRIDE])
        };
        assert_eq!(entry(0).params, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(entry(0).instance_id, 41);
        assert_eq!(entry(1).instance_id, 0xDEAD_BEEF);
        assert_eq!(&stored[PARAMS_STRIDE + 16..2 * PARAMS_STRIDE], &0xDEAD_BEEF_u32.to_ne_bytes());
    }

    #[test]
    fn legacy_streams_orphan_and_grow() {
        let device = Arc::new(HeadlessDevice::legacy());
        let ctx = context(device.clone());
        let memory = MemoryTracker::new();
        let mut streams = MeshStreams::new(&ctx, &memory, 1).unwrap();
        assert!(!streams.matrices.is_persistent());
        assert_eq!(streams.capacity(), MIN_CAPACITY);

        assert!(streams.ensure_capacity(&ctx, &memory, 100).unwrap());
        assert_eq!(streams.capacity(), 144);
        assert_eq!(memory.current_bytes(MemoryCategory::Buffer), streams.byte_size() as u64);

        streams.upload(&ctx, &vec![InstanceData::default(); 100]);
        assert_eq!(device.call_count("buffer_sub_data"), 3);
        assert_eq!(streams.high_water(), 100);
    }
}
