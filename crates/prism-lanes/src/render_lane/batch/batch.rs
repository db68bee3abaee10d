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

//! A single batch: the items sharing a key, and how they reach the GPU.

use prism_core::math::{Mat3, Mat4, Vec3};
use prism_core::renderer::{
    BufferTarget, FrameStats, PrimitiveMode, UniformValue, UsageClass, VertexAttribute,
};
use prism_core::{EngineError, EngineResult, ErrorKind, Handle};
use prism_data::transform::{transform_normals_with, transform_points_with};
use prism_data::{Material, Mesh, ResourceId, Vertex};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::key::BatchKey;
use super::renderable::{
    validated_matrix, BatchableItem, RenderContext, Renderable, MODEL_UNIFORM,
    VIEW_PROJECTION_UNIFORM,
};
use crate::render_lane::{bind_material, bucket_size, BufferDescriptor};

/// Name of the per-instance model matrix attribute in instancing shaders.
pub const INSTANCE_MATRIX_ATTRIBUTE: &str = "aInstanceMatrix";
/// First of the four locations used when a shader does not declare
/// [`INSTANCE_MATRIX_ATTRIBUTE`].
pub const FALLBACK_INSTANCE_MATRIX_LOCATION: u32 = 4;

const MATRIX_BYTES: u32 = std::mem::size_of::<Mat4>() as u32;

static MERGED_MESH_SEQ: AtomicU64 = AtomicU64::new(0);

/// One item inside a batch.
#[derive(Clone)]
pub struct BatchEntry {
    /// The submitted renderable, drawn on its own if the batch fails.
    pub renderable: Arc<dyn Renderable>,
    /// Source mesh.
    pub mesh: Handle<Mesh>,
    /// Object-to-world matrix.
    pub model: Mat4,
}

/// Items that share a [`BatchKey`] and are drawn together.
pub struct Batch {
    key: BatchKey,
    material: Arc<Material>,
    entries: Vec<BatchEntry>,
    instanced: bool,
    merged_mesh: Option<Handle<Mesh>>,
    idle_frames: u32,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("key", &self.key)
            .field("entries", &self.entries.len())
            .field("instanced", &self.instanced)
            .field("merged_mesh", &self.merged_mesh)
            .finish()
    }
}

impl Batch {
    /// Starts a batch from its first item.
    pub(crate) fn new(key: BatchKey, material: Arc<Material>, instanced: bool) -> Self {
        Self {
            key,
            material,
            entries: Vec::new(),
            instanced,
            merged_mesh: None,
            idle_frames: 0,
        }
    }

    /// The key shared by every item.
    pub fn key(&self) -> &BatchKey {
        &self.key
    }

    /// Items recorded this frame.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// `true` when drawn with one instanced call.
    pub fn is_instanced(&self) -> bool {
        self.instanced
    }

    /// The merged mesh built for this batch, if any.
    pub fn merged_mesh(&self) -> Option<Handle<Mesh>> {
        self.merged_mesh
    }

    pub(crate) fn push(&mut self, item: &BatchableItem, mesh: Handle<Mesh>) {
        self.entries.push(BatchEntry {
            renderable: item.renderable.clone(),
            mesh,
            model: item.model,
        });
    }

    /// Clears the items, keeping GPU state. Returns `true` if the batch was used since
    /// the previous call.
    pub(crate) fn recycle(&mut self) -> bool {
        let used = !self.entries.is_empty();
        if let Some(first) = self.entries.first() {
            if let Some(material) = first.renderable.material() {
                self.material = material.clone();
            }
        }
        self.entries.clear();
        if used {
            self.idle_frames = 0;
        } else {
            self.idle_frames += 1;
        }
        used
    }

    pub(crate) fn idle_frames(&self) -> u32 {
        self.idle_frames
    }

    /// Draws the batch, falling back to per-item draws when the batched path fails.
    pub fn execute(&mut self, ctx: &RenderContext<'_>, stats: &mut FrameStats) {
        if self.entries.is_empty() {
            return;
        }
        if let Some(material) = self.entries[0].renderable.material() {
            self.material = material.clone();
        }
        let result = if self.instanced {
            self.draw_instanced(ctx, stats)
        } else {
            self.draw_merged(ctx, stats)
        };
        match result {
            Ok(()) => stats.batch_count += 1,
            Err(e) => {
                log::warn!(
                    "Batch on layer {} failed ({e}); drawing {} item(s) individually",
                    self.key.pipeline.layer_id,
                    self.entries.len()
                );
                for entry in &self.entries {
                    if entry.renderable.render(ctx) {
                        stats.record_fallback_draw();
                    }
                }
            }
        }
    }

    fn bind(&self, ctx: &RenderContext<'_>, model: Option<&Mat4>) -> EngineResult<()> {
        if !bind_material(ctx.state, ctx.resources, &self.material) {
            return Err(EngineError::new(
                ErrorKind::ResourceNotFound,
                "batch material has no usable shader",
            ));
        }
        if let Some(shader) = ctx.resources.get_shader(self.material.shader()) {
            let gpu_ctx = ctx.state.context();
            if let Some(model) = model {
                shader.set_uniform(gpu_ctx, MODEL_UNIFORM, &UniformValue::Mat4(model.to_cols_array()));
            }
            shader.set_uniform(
                gpu_ctx,
                VIEW_PROJECTION_UNIFORM,
                &UniformValue::Mat4(ctx.view_projection().to_cols_array()),
            );
        }
        Ok(())
    }

    // --- CPU merge ---

    fn build_merged(&self, ctx: &RenderContext<'_>) -> EngineResult<Mesh> {
        let mut vertices: Vec<Vertex> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut positions: Vec<Vec3> = Vec::new();
        let mut normals: Vec<Vec3> = Vec::new();

        for entry in &self.entries {
            let Some(mesh) = ctx.resources.get_mesh(entry.mesh) else {
                log::warn!("Batch item references stale mesh {:?}", entry.mesh);
                continue;
            };
            let model = validated_matrix(&entry.model);
            let normal_matrix = Mat3::normal_matrix(&model).unwrap_or_else(|| {
                log::warn!("Singular model matrix; normals left untransformed");
                Mat3::IDENTITY
            });

            let src = mesh.vertices();
            let src_positions: Vec<Vec3> = src.iter().map(Vertex::position).collect();
            let src_normals: Vec<Vec3> = src.iter().map(Vertex::normal).collect();
            positions.clear();
            positions.resize(src.len(), Vec3::ZERO);
            normals.clear();
            normals.resize(src.len(), Vec3::ZERO);
            transform_points_with(&model, &src_positions, &mut positions);
            transform_normals_with(&normal_matrix, &src_normals, &mut normals);

            let base = u32::try_from(vertices.len()).map_err(|_| {
                EngineError::new(ErrorKind::MeshUploadFailed, "merged batch exceeds u32 indices")
            })?;
            vertices.extend(src.iter().zip(positions.iter().zip(&normals)).map(
                |(v, (p, n))| Vertex {
                    position: p.to_array(),
                    normal: n.to_array(),
                    ..*v
                },
            ));
            indices.extend(mesh.indices().iter().map(|i| i + base));
        }

        if indices.is_empty() {
            return Err(EngineError::new(
                ErrorKind::MeshUploadFailed,
                "no geometry left to merge",
            ));
        }
        Ok(Mesh::new(vertices, indices))
    }

    fn upload_merged(&mut self, ctx: &RenderContext<'_>, merged: Mesh) -> EngineResult<Arc<Mesh>> {
        let gpu_ctx = ctx.state.context();
        let existing = self
            .merged_mesh
            .filter(|h| ctx.resources.meshes().is_valid(*h));
        let handle = match existing {
            Some(handle) => {
                ctx.resources.reload_mesh(gpu_ctx, handle, merged)?;
                handle
            }
            None => {
                let name = format!("batch-merged-{}", MERGED_MESH_SEQ.fetch_add(1, Ordering::Relaxed));
                let handle = ctx.resources.create_mesh_handle(merged, &name);
                if let Err(e) = ctx.resources.upload_mesh(gpu_ctx, handle) {
                    ctx.resources.free_mesh(gpu_ctx, handle);
                    return Err(e);
                }
                let sources: BTreeSet<Handle<Mesh>> = self.entries.iter().map(|e| e.mesh).collect();
                for source in sources {
                    ctx.resources
                        .add_dependency(ResourceId::Mesh(handle), ResourceId::Mesh(source));
                }
                self.merged_mesh = Some(handle);
                handle
            }
        };
        // Reading back through the store also refreshes the idle timer used by cleanup.
        ctx.resources
            .get_mesh(handle)
            .ok_or_else(|| EngineError::not_found(format!("merged mesh {handle:?}")))
    }

    fn draw_merged(&mut self, ctx: &RenderContext<'_>, stats: &mut FrameStats) -> EngineResult<()> {
        let merged = self.build_merged(ctx)?;
        let triangles = merged.triangle_count();
        let vertex_count = merged.vertices().len() as u64;
        let mesh = self.upload_merged(ctx, merged)?;
        let gpu = mesh
            .gpu()
            .ok_or_else(|| EngineError::new(ErrorKind::MeshUploadFailed, "merged mesh not uploaded"))?;

        self.bind(ctx, Some(&Mat4::IDENTITY))?;
        ctx.state.bind_vertex_array(Some(gpu.vao));
        ctx.state.context().gl("Batch::draw_merged").draw_elements(
            PrimitiveMode::Triangles,
            gpu.index_count,
            mesh.index_type(),
            0,
        );
        stats.record_batched_draw(triangles, vertex_count);
        log::trace!(
            "Merged {} item(s) into one draw ({triangles} triangles)",
            self.entries.len()
        );
        Ok(())
    }

    // --- GPU instancing ---

    fn instance_matrix_location(&self, ctx: &RenderContext<'_>) -> u32 {
        ctx.resources
            .get_shader(self.material.shader())
            .and_then(|s| s.attribute_location(ctx.state.context(), INSTANCE_MATRIX_ATTRIBUTE))
            .unwrap_or(FALLBACK_INSTANCE_MATRIX_LOCATION)
    }

    fn draw_instanced(&mut self, ctx: &RenderContext<'_>, stats: &mut FrameStats) -> EngineResult<()> {
        let handle = self
            .key
            .mesh
            .ok_or_else(|| EngineError::invalid_state("instanced batch without a mesh"))?;
        ctx.resources.upload_mesh(ctx.state.context(), handle)?;
        let mesh = ctx
            .resources
            .get_mesh(handle)
            .ok_or_else(|| EngineError::not_found(format!("mesh {handle:?}")))?;
        let gpu = mesh
            .gpu()
            .ok_or_else(|| EngineError::new(ErrorKind::MeshUploadFailed, "mesh not uploaded"))?;

        let matrices: Vec<Mat4> = self
            .entries
            .iter()
            .map(|e| validated_matrix(&e.model))
            .collect();
        let payload: &[u8] = bytemuck::cast_slice(&matrices);
        let descriptor = BufferDescriptor::new(
            bucket_size(payload.len()),
            BufferTarget::Array,
            UsageClass::Stream,
        );
        let instance_buffer = ctx.pool.acquire(descriptor)?;

        let location = self.instance_matrix_location(ctx);
        let result = self.bind(ctx, None).map(|()| {
            let gl = ctx.state.context().gl("Batch::draw_instanced");
            ctx.state.bind_vertex_array(Some(gpu.vao));
            ctx.state.bind_buffer(BufferTarget::Array, Some(instance_buffer));
            gl.buffer_sub_data(BufferTarget::Array, 0, payload);
            for column in 0..4 {
                gl.configure_attribute(&VertexAttribute {
                    location: location + column,
                    components: 4,
                    stride: MATRIX_BYTES,
                    offset: column * 16,
                    divisor: 1,
                });
            }
            gl.draw_elements_instanced(
                PrimitiveMode::Triangles,
                gpu.index_count,
                mesh.index_type(),
                0,
                matrices.len() as u32,
            );
            // The VAO is the mesh's own, shared with non-instanced draws.
            for column in 0..4 {
                gl.disable_attribute(location + column);
            }
        });
        ctx.pool.release(instance_buffer);
        result?;

        stats.record_instanced_draw(
            mesh.triangle_count(),
            mesh.vertices().len() as u64,
            matrices.len() as u64,
        );
        Ok(())
    }
}
