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

//! CPU mesh data and its GPU buffers.

use parking_lot::Mutex;
use prism_core::math::{Aabb, LinearRgba, Vec2, Vec3};
use prism_core::memory::{MemoryCategory, MemoryTracker};
use prism_core::renderer::{
    BufferId, BufferTarget, GpuContext, IndexType, PrimitiveMode, UsageClass, VertexArrayId,
    VertexAttribute,
};
use prism_core::{EngineError, EngineResult, ErrorKind};

/// Attribute location of [`Vertex::position`].
pub const ATTRIB_POSITION: u32 = 0;
/// Attribute location of [`Vertex::normal`].
pub const ATTRIB_NORMAL: u32 = 1;
/// Attribute location of [`Vertex::uv`].
pub const ATTRIB_UV: u32 = 2;
/// Attribute location of [`Vertex::color`].
pub const ATTRIB_COLOR: u32 = 3;

/// The interleaved vertex format every engine mesh uses.
///
/// It occupies attribute locations 0 to 3; instance streams start above that.
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Texture coordinate.
    pub uv: [f32; 2],
    /// Linear RGBA vertex color.
    pub color: [f32; 4],
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            normal: [0.0, 0.0, 1.0],
            uv: [0.0; 2],
            color: LinearRgba::WHITE.to_array(),
        }
    }
}

impl Vertex {
    /// Size of one vertex in bytes.
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    /// Creates a white vertex.
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv: [uv.x, uv.y],
            color: LinearRgba::WHITE.to_array(),
        }
    }

    /// The position as a vector.
    #[inline]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }

    /// The normal as a vector.
    #[inline]
    pub fn normal(&self) -> Vec3 {
        Vec3::new(self.normal[0], self.normal[1], self.normal[2])
    }

    /// The four attributes describing this layout, sourced from one buffer.
    pub fn attributes() -> [VertexAttribute; 4] {
        let attr = |location, components, offset| VertexAttribute {
            location,
            components,
            stride: Self::STRIDE,
            offset,
            divisor: 0,
        };
        [
            attr(ATTRIB_POSITION, 3, 0),
            attr(ATTRIB_NORMAL, 3, 12),
            attr(ATTRIB_UV, 2, 24),
            attr(ATTRIB_COLOR, 4, 32),
        ]
    }
}

/// GPU objects backing an uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshGpu {
    /// Vertex buffer.
    pub vbo: BufferId,
    /// Index buffer.
    pub ebo: BufferId,
    /// Vertex array with the [`Vertex`] layout and the index buffer attached.
    pub vao: VertexArrayId,
    /// Bytes stored in `vbo`.
    pub vertex_bytes: u64,
    /// Bytes stored in `ebo`.
    pub index_bytes: u64,
    /// Number of indices uploaded.
    pub index_count: u32,
}

impl MeshGpu {
    /// Total GPU bytes held.
    pub fn total_bytes(&self) -> u64 {
        self.vertex_bytes + self.index_bytes
    }
}

/// An indexed triangle mesh.
///
/// CPU data is immutable once the mesh is built. The GPU side is filled in by
/// [`Mesh::upload`] on the GPU thread; until then `is_uploaded()` is `false`.
#[derive(Debug, Default)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    primitive: PrimitiveMode,
    bounds: Option<Aabb>,
    gpu: Mutex<Option<MeshGpu>>,
}

impl Clone for Mesh {
    /// Clones the CPU data only; the clone is not uploaded.
    fn clone(&self) -> Self {
        Self {
            vertices: self.vertices.clone(),
            indices: self.indices.clone(),
            primitive: self.primitive,
            bounds: self.bounds,
            gpu: Mutex::new(None),
        }
    }
}

impl Mesh {
    /// Creates a triangle mesh from vertices and indices.
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        let positions: Vec<Vec3> = vertices.iter().map(Vertex::position).collect();
        Self {
            bounds: Aabb::from_points(&positions),
            vertices,
            indices,
            primitive: PrimitiveMode::Triangles,
            gpu: Mutex::new(None),
        }
    }

    /// A unit quad in the XY plane facing +Z.
    pub fn quad(size: f32) -> Self {
        let h = size * 0.5;
        let n = Vec3::Z;
        let vertices = vec![
            Vertex::new(Vec3::new(-h, -h, 0.0), n, Vec2::new(0.0, 0.0)),
            Vertex::new(Vec3::new(h, -h, 0.0), n, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec3::new(h, h, 0.0), n, Vec2::new(1.0, 1.0)),
            Vertex::new(Vec3::new(-h, h, 0.0), n, Vec2::new(0.0, 1.0)),
        ];
        Self::new(vertices, vec![0, 1, 2, 2, 3, 0])
    }

    /// An axis-aligned cube centered on the origin with per-face normals.
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        let faces: [(Vec3, Vec3, Vec3); 6] = [
            (Vec3::X, Vec3::Y, -Vec3::Z),
            (-Vec3::X, Vec3::Y, Vec3::Z),
            (Vec3::Y, -Vec3::Z, Vec3::X),
            (-Vec3::Y, Vec3::Z, Vec3::X),
            (Vec3::Z, Vec3::Y, Vec3::X),
            (-Vec3::Z, Vec3::Y, -Vec3::X),
        ];
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for (normal, up, right) in faces {
            let base = vertices.len() as u32;
            let center = normal * h;
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (u, v) in corners {
                let p = center + right * (u * h) + up * (v * h);
                vertices.push(Vertex::new(
                    p,
                    normal,
                    Vec2::new((u + 1.0) * 0.5, (v + 1.0) * 0.5),
                ));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        Self::new(vertices, indices)
    }

    /// The vertices.
    #[inline]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// The indices.
    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// The primitive topology.
    #[inline]
    pub fn primitive(&self) -> PrimitiveMode {
        self.primitive
    }

    /// Object-space bounds, `None` for an empty mesh.
    #[inline]
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    /// Radius of a sphere around the origin-centered bounds; used as the culling radius.
    pub fn bounding_radius(&self) -> f32 {
        self.bounds.map_or(0.0, |b| b.bounding_radius())
    }

    /// Number of triangles described by the indices.
    #[inline]
    pub fn triangle_count(&self) -> u64 {
        self.indices.len() as u64 / 3
    }

    /// Returns `true` once the mesh has GPU buffers.
    pub fn is_uploaded(&self) -> bool {
        self.gpu.lock().is_some()
    }

    /// The GPU objects, if uploaded.
    pub fn gpu(&self) -> Option<MeshGpu> {
        *self.gpu.lock()
    }

    /// Creates (or refills) the vertex buffer, index buffer and vertex array.
    ///
    /// Must run on the GPU thread. Uploading twice refills the existing buffers.
    pub fn upload(&self, ctx: &GpuContext, memory: &MemoryTracker) -> EngineResult<MeshGpu> {
        let existing = self.gpu.lock().take();
        let gpu = self.upload_into(ctx, memory, existing)?;
        *self.gpu.lock() = Some(gpu);
        Ok(gpu)
    }

    /// Uploads into GPU objects that previously belonged to another mesh, reusing them.
    pub fn upload_reusing(
        &self,
        ctx: &GpuContext,
        memory: &MemoryTracker,
        previous: Option<MeshGpu>,
    ) -> EngineResult<MeshGpu> {
        let gpu = self.upload_into(ctx, memory, previous)?;
        *self.gpu.lock() = Some(gpu);
        Ok(gpu)
    }

    /// Detaches the GPU objects without deleting them, so another mesh can reuse them.
    pub fn take_gpu(&self) -> Option<MeshGpu> {
        self.gpu.lock().take()
    }

    fn upload_into(
        &self,
        ctx: &GpuContext,
        memory: &MemoryTracker,
        existing: Option<MeshGpu>,
    ) -> EngineResult<MeshGpu> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(EngineError::new(
                ErrorKind::MeshUploadFailed,
                "cannot upload a mesh without vertices or indices",
            ));
        }

        let gl = ctx.gl("Mesh::upload");
        let (vbo, ebo, vao) = match existing {
            Some(prev) => {
                memory.record_free(MemoryCategory::Mesh, prev.total_bytes());
                (prev.vbo, prev.ebo, prev.vao)
            }
            None => {
                let vbo = gl.create_buffer()?;
                let ebo = match gl.create_buffer() {
                    Ok(ebo) => ebo,
                    Err(e) => {
                        gl.delete_buffer(vbo);
                        return Err(e);
                    }
                };
                let vao = match gl.create_vertex_array() {
                    Ok(vao) => vao,
                    Err(e) => {
                        gl.delete_buffer(vbo);
                        gl.delete_buffer(ebo);
                        return Err(e);
                    }
                };
                (vbo, ebo, vao)
            }
        };

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&self.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&self.indices);

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(BufferTarget::Array, Some(vbo));
        gl.buffer_data(BufferTarget::Array, vertex_bytes, UsageClass::Static);
        for attribute in Vertex::attributes() {
            gl.configure_attribute(&attribute);
        }
        gl.bind_buffer(BufferTarget::ElementArray, Some(ebo));
        gl.buffer_data(BufferTarget::ElementArray, index_bytes, UsageClass::Static);
        gl.bind_vertex_array(None);
        gl.bind_buffer(BufferTarget::Array, None);
        ctx.mark_bindings_dirty();

        if let Some(kind) = gl.get_error() {
            log::warn!("GL error {kind} while uploading mesh ({} vertices)", self.vertices.len());
            if kind == ErrorKind::GlOutOfMemory {
                return Err(EngineError::new(ErrorKind::MeshUploadFailed, "GPU out of memory"));
            }
        }

        let gpu = MeshGpu {
            vbo,
            ebo,
            vao,
            vertex_bytes: vertex_bytes.len() as u64,
            index_bytes: index_bytes.len() as u64,
            index_count: self.indices.len() as u32,
        };
        memory.record_alloc(MemoryCategory::Mesh, gpu.total_bytes());
        log::trace!(
            "Uploaded mesh: {} vertices, {} indices into vao {:?}",
            self.vertices.len(),
            self.indices.len(),
            vao
        );
        Ok(gpu)
    }

    /// Deletes the GPU objects. Must run on the GPU thread.
    pub fn release_gpu(&self, ctx: &GpuContext, memory: &MemoryTracker) {
        if let Some(gpu) = self.gpu.lock().take() {
            let gl = ctx.gl("Mesh::release_gpu");
            gl.delete_vertex_array(gpu.vao);
            gl.delete_buffer(gpu.vbo);
            gl.delete_buffer(gpu.ebo);
            ctx.mark_bindings_dirty();
            memory.record_free(MemoryCategory::Mesh, gpu.total_bytes());
        }
    }

    /// The index format used for draws.
    #[inline]
    pub fn index_type(&self) -> IndexType {
        IndexType::U32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_is_tightly_packed() {
        assert_eq!(Vertex::STRIDE, 48);
        let attrs = Vertex::attributes();
        assert_eq!(attrs[3].offset, 32);
        assert!(attrs.iter().all(|a| a.location <= ATTRIB_COLOR));
    }

    #[test]
    fn cube_has_outward_normals() {
        let cube = Mesh::cube(2.0);
        assert_eq!(cube.vertices().len(), 24);
        assert_eq!(cube.triangle_count(), 12);
        for v in cube.vertices() {
            assert!(v.position().dot(v.normal()) > 0.0);
        }
        let b = cube.bounds().unwrap();
        assert_eq!(b.max, Vec3::ONE);
    }

    #[test]
    fn clone_drops_gpu_state() {
        let quad = Mesh::quad(1.0);
        assert!(!quad.clone().is_uploaded());
        assert_eq!(quad.clone().indices(), quad.indices());
    }
}
