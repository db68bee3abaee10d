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

//! The pipeline key that decides which submissions may share a draw call.

use prism_core::renderer::{BlendMode, CompareFunc, CullMode};
use prism_core::Handle;
use prism_data::{Material, Mesh};

/// What kind of renderable produced a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RenderableKind {
    /// An indexed triangle mesh.
    #[default]
    Mesh,
    /// A textured quad.
    Sprite,
    /// A run of glyph quads.
    Text,
    /// Anything the batcher does not understand; always drawn on its own.
    Unsupported,
}

/// Render-state identity of a submission.
///
/// Equality means two submissions can share a batch. Every field takes part in both
/// hashing and ordering, and `layer_id` is declared first so the derived order sorts
/// by layer before anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey {
    /// Draw layer; lower layers draw first.
    pub layer_id: u32,
    /// Producer kind.
    pub kind: RenderableKind,
    /// Shader slot id.
    pub shader_id: u32,
    /// Material stable id.
    pub material_stable_id: u64,
    /// Blend preset.
    pub blend_mode: BlendMode,
    /// Face culling.
    pub cull_face: CullMode,
    /// Depth testing.
    pub depth_test: bool,
    /// Depth writes.
    pub depth_write: bool,
    /// Depth comparison.
    pub depth_func: CompareFunc,
    /// Material pipeline flags.
    pub pipeline_flags: u32,
    /// Hash of per-renderable overrides that change how the material draws.
    pub material_override_hash: u64,
}

impl PipelineKey {
    /// Builds the key for a submission using `material`.
    pub fn from_material(
        kind: RenderableKind,
        material: &Material,
        layer_id: u32,
        material_override_hash: u64,
    ) -> Self {
        let p = material.pipeline();
        Self {
            layer_id,
            kind,
            shader_id: material.shader().id,
            material_stable_id: material.stable_id(),
            blend_mode: p.blend_mode,
            cull_face: p.cull_mode,
            depth_test: p.depth_test,
            depth_write: p.depth_write,
            depth_func: p.depth_func,
            pipeline_flags: p.flags,
            material_override_hash,
        }
    }

    /// Returns `true` if the key enables blending.
    pub fn is_transparent(&self) -> bool {
        self.blend_mode.is_blending()
    }
}

/// Where a batched item lands: its pipeline key, plus the source mesh when the
/// batch is drawn instanced (one instanced draw per mesh and key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchKey {
    /// The pipeline identity.
    pub pipeline: PipelineKey,
    /// The instanced mesh; `None` for merged batches.
    pub mesh: Option<Handle<Mesh>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_data::PipelineState;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(key: &PipelineKey) -> u64 {
        let mut h = DefaultHasher::new();
        key.hash(&mut h);
        h.finish()
    }

    #[test]
    fn layer_participates_in_hash_and_order() {
        let material = Material::new(Handle::new(1, 0));
        let low = PipelineKey::from_material(RenderableKind::Mesh, &material, 1, 0);
        let high = PipelineKey::from_material(RenderableKind::Mesh, &material, 2, 0);
        assert_ne!(low, high);
        assert_ne!(hash_of(&low), hash_of(&high));
        assert!(low < high);
    }

    #[test]
    fn layer_dominates_other_fields() {
        let a = Material::new(Handle::new(9, 0));
        let b = Material::new(Handle::new(1, 0)).with_pipeline(PipelineState::transparent());
        let early = PipelineKey::from_material(RenderableKind::Text, &a, 0, 99);
        let late = PipelineKey::from_material(RenderableKind::Mesh, &b, 1, 0);
        assert!(early < late);
        assert!(late.is_transparent());
    }

    #[test]
    fn equal_inputs_give_equal_keys() {
        let material = Material::new(Handle::new(3, 1));
        let a = PipelineKey::from_material(RenderableKind::Mesh, &material, 300, 7);
        let b = PipelineKey::from_material(RenderableKind::Mesh, &material, 300, 7);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }
}
