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

//! Things that can be submitted to the renderer, and how the batcher classifies them.

use prism_core::math::Mat4;
use prism_core::renderer::{PrimitiveMode, UniformValue};
use prism_core::{BatchingMode, Handle};
use prism_data::{Material, Mesh, ResourceManager};
use std::sync::Arc;

use super::key::{PipelineKey, RenderableKind};
use crate::render_lane::{bind_material, GpuBufferPool, StateCache};

/// Uniform receiving the model matrix of a single draw.
pub const MODEL_UNIFORM: &str = "uModel";
/// Uniform receiving the camera's view-projection matrix.
pub const VIEW_PROJECTION_UNIFORM: &str = "uViewProj";

/// Everything a renderable needs to draw itself on the GPU thread.
#[derive(Clone, Copy)]
pub struct RenderContext<'a> {
    /// The GL state mirror.
    pub state: &'a StateCache,
    /// Meshes, shaders, textures and materials.
    pub resources: &'a ResourceManager,
    /// Transient GPU buffers.
    pub pool: &'a GpuBufferPool,
}

impl RenderContext<'_> {
    /// The current view-projection matrix, identity when no camera was set.
    pub fn view_projection(&self) -> Mat4 {
        self.state.view_projection().unwrap_or(Mat4::IDENTITY)
    }
}

/// An object submitted to the renderer for one frame.
///
/// Implementors must be shareable: classification happens on the binning worker, while
/// [`Renderable::render`] runs on the GPU thread.
pub trait Renderable: Send + Sync {
    /// Producer kind, used by the batching rules.
    fn kind(&self) -> RenderableKind;

    /// Draw layer. Lower layers draw first.
    fn layer(&self) -> u32 {
        0
    }

    /// The material to draw with, if any. Renderables without one are never batched.
    fn material(&self) -> Option<&Arc<Material>>;

    /// The source mesh, if the renderable draws one.
    fn mesh(&self) -> Option<Handle<Mesh>> {
        None
    }

    /// Object-to-world matrix.
    fn model_matrix(&self) -> Mat4 {
        Mat4::IDENTITY
    }

    /// `false` opts the renderable out of every batching path.
    fn is_batchable(&self) -> bool {
        true
    }

    /// Hash of per-object state that changes how the material draws. Renderables with
    /// different hashes never share a batch.
    fn override_hash(&self) -> u64 {
        0
    }

    /// Draws the renderable on its own. Returns `true` if a draw call was issued.
    fn render(&self, ctx: &RenderContext<'_>) -> bool;
}

/// A mesh drawn with a material at a world transform.
#[derive(Debug, Clone)]
pub struct MeshRenderable {
    mesh: Handle<Mesh>,
    material: Arc<Material>,
    transform: Mat4,
    layer: u32,
    kind: RenderableKind,
    batchable: bool,
}

impl MeshRenderable {
    /// Creates a batchable mesh renderable on layer 0.
    pub fn new(mesh: Handle<Mesh>, material: Arc<Material>, transform: Mat4) -> Self {
        Self {
            mesh,
            material,
            transform,
            layer: 0,
            kind: RenderableKind::Mesh,
            batchable: true,
        }
    }

    /// Sets the draw layer.
    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }

    /// Reports a different producer kind; sprites and text runs are meshes too.
    pub fn with_kind(mut self, kind: RenderableKind) -> Self {
        self.kind = kind;
        self
    }

    /// Opts in or out of batching.
    pub fn with_batching(mut self, batchable: bool) -> Self {
        self.batchable = batchable;
        self
    }

    /// Moves the renderable.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform = transform;
    }
}

impl Renderable for MeshRenderable {
    fn kind(&self) -> RenderableKind {
        self.kind
    }

    fn layer(&self) -> u32 {
        self.layer
    }

    fn material(&self) -> Option<&Arc<Material>> {
        Some(&self.material)
    }

    fn mesh(&self) -> Option<Handle<Mesh>> {
        Some(self.mesh)
    }

    fn model_matrix(&self) -> Mat4 {
        self.transform
    }

    fn is_batchable(&self) -> bool {
        self.batchable
    }

    fn render(&self, ctx: &RenderContext<'_>) -> bool {
        let Some(mesh) = ctx.resources.get_mesh(self.mesh) else {
            log::warn!("Skipping draw of stale mesh {:?}", self.mesh);
            return false;
        };
        let gpu = match mesh.gpu() {
            Some(gpu) => gpu,
            None => match mesh.upload(ctx.state.context(), ctx.resources.memory()) {
                Ok(gpu) => gpu,
                Err(e) => {
                    log::warn!("Could not upload mesh {:?}: {e}", self.mesh);
                    return false;
                }
            },
        };
        if !bind_material(ctx.state, ctx.resources, &self.material) {
            return false;
        }
        if let Some(shader) = ctx.resources.get_shader(self.material.shader()) {
            let gpu_ctx = ctx.state.context();
            shader.set_uniform(
                gpu_ctx,
                MODEL_UNIFORM,
                &UniformValue::Mat4(validated_matrix(&self.transform).to_cols_array()),
            );
            shader.set_uniform(
                gpu_ctx,
                VIEW_PROJECTION_UNIFORM,
                &UniformValue::Mat4(ctx.view_projection().to_cols_array()),
            );
        }
        ctx.state.bind_vertex_array(Some(gpu.vao));
        ctx.state
            .context()
            .gl("MeshRenderable::render")
            .draw_elements(PrimitiveMode::Triangles, gpu.index_count, mesh.index_type(), 0);
        true
    }
}

/// Replaces a matrix holding NaN or infinity with the identity.
pub(crate) fn validated_matrix(matrix: &Mat4) -> Mat4 {
    if matrix.is_finite() {
        *matrix
    } else {
        log::warn!("Non-finite model matrix replaced with identity");
        Mat4::IDENTITY
    }
}

/// Where the batch manager sends a classified submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchRoute {
    /// Drawn on its own, in submission order.
    Immediate,
    /// Merged into one vertex/index buffer with others sharing its key.
    Merge,
    /// Drawn with one instanced call per mesh and key.
    Instance,
}

/// A submission after classification on the binning worker.
#[derive(Clone)]
pub struct BatchableItem {
    /// The submitted renderable.
    pub renderable: Arc<dyn Renderable>,
    /// Producer kind.
    pub kind: RenderableKind,
    /// Render-state identity.
    pub key: PipelineKey,
    /// Source mesh.
    pub mesh: Option<Handle<Mesh>>,
    /// Object-to-world matrix at submission time.
    pub model: Mat4,
    /// The renderable allows batching.
    pub batchable: bool,
    /// The material blends.
    pub is_transparent: bool,
    /// The item can be drawn as one instance of its mesh.
    pub instance_eligible: bool,
}

impl std::fmt::Debug for BatchableItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchableItem")
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("mesh", &self.mesh)
            .field("batchable", &self.batchable)
            .field("is_transparent", &self.is_transparent)
            .field("instance_eligible", &self.instance_eligible)
            .finish_non_exhaustive()
    }
}

impl BatchableItem {
    /// Classifies a submission. Returns `None` for renderables without a material.
    pub fn classify(renderable: Arc<dyn Renderable>) -> Option<Self> {
        let material = renderable.material()?;
        let kind = renderable.kind();
        let mesh = renderable.mesh();
        let key = PipelineKey::from_material(
            kind,
            material,
            renderable.layer(),
            renderable.override_hash(),
        );
        let is_transparent = material.is_transparent();
        let batchable = renderable.is_batchable() && mesh.is_some();
        let instance_eligible =
            batchable && kind == RenderableKind::Mesh && !is_transparent;
        let model = renderable.model_matrix();
        Some(Self {
            renderable,
            kind,
            key,
            mesh,
            model,
            batchable,
            is_transparent,
            instance_eligible,
        })
    }

    /// Applies the batching rules of `mode` to this item.
    pub fn route(&self, mode: BatchingMode) -> BatchRoute {
        let supported = self.kind != RenderableKind::Unsupported;
        match mode {
            BatchingMode::Disabled => BatchRoute::Immediate,
            BatchingMode::CpuMerge
                if self.batchable
                    && supported
                    && (self.kind == RenderableKind::Text || !self.is_transparent) =>
            {
                BatchRoute::Merge
            }
            BatchingMode::GpuInstancing if self.instance_eligible && supported => {
                BatchRoute::Instance
            }
            _ => BatchRoute::Immediate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_data::PipelineState;

    fn item(kind: RenderableKind, transparent: bool) -> BatchableItem {
        let mut material = Material::new(Handle::new(1, 0));
        if transparent {
            material = material.with_pipeline(PipelineState::transparent());
        }
        let r: Arc<dyn Renderable> = Arc::new(
            MeshRenderable::new(Handle::new(2, 0), Arc::new(material), Mat4::IDENTITY)
                .with_kind(kind),
        );
        BatchableItem::classify(r).unwrap()
    }

    #[test]
    fn transparent_meshes_bypass_cpu_merge() {
        assert_eq!(item(RenderableKind::Mesh, false).route(BatchingMode::CpuMerge), BatchRoute::Merge);
        assert_eq!(
            item(RenderableKind::Mesh, true).route(BatchingMode::CpuMerge),
            BatchRoute::Immediate
        );
    }

    #[test]
    fn transparent_text_still_merges() {
        assert_eq!(item(RenderableKind::Text, true).route(BatchingMode::CpuMerge), BatchRoute::Merge);
    }

    #[test]
    fn only_opaque_meshes_instance() {
        assert_eq!(
            item(RenderableKind::Mesh, false).route(BatchingMode::GpuInstancing),
            BatchRoute::Instance
        );
        assert_eq!(
            item(RenderableKind::Sprite, false).route(BatchingMode::GpuInstancing),
            BatchRoute::Immediate
        );
        assert_eq!(
            item(RenderableKind::Mesh, true).route(BatchingMode::GpuInstancing),
            BatchRoute::Immediate
        );
    }

    #[test]
    fn unsupported_and_disabled_are_immediate() {
        assert_eq!(
            item(RenderableKind::Unsupported, false).route(BatchingMode::CpuMerge),
            BatchRoute::Immediate
        );
        assert_eq!(item(RenderableKind::Mesh, false).route(BatchingMode::Disabled), BatchRoute::Immediate);
    }

    #[test]
    fn non_finite_matrices_become_identity() {
        let mut m = Mat4::from_translation(prism_core::math::Vec3::X);
        assert_eq!(validated_matrix(&m), m);
        m.cols[3].x = f32::NAN;
        assert_eq!(validated_matrix(&m), Mat4::IDENTITY);
    }
}
