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

//! Materials: a shader, bound textures, uniform parameters and pipeline overrides.

use prism_core::math::{LinearRgba, Mat4, Vec3};
use prism_core::renderer::{BlendMode, CompareFunc, CullMode, UniformValue};
use prism_core::Handle;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{Shader, Texture};

static NEXT_MATERIAL_ID: AtomicU64 = AtomicU64::new(1);

/// Pipeline state a material imposes on its draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineState {
    /// Blend preset.
    pub blend_mode: BlendMode,
    /// Face culling.
    pub cull_mode: CullMode,
    /// Depth testing enabled.
    pub depth_test: bool,
    /// Depth writes enabled.
    pub depth_write: bool,
    /// Depth comparison.
    pub depth_func: CompareFunc,
    /// Free-form flags interpreted by custom renderables.
    pub flags: u32,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            blend_mode: BlendMode::None,
            cull_mode: CullMode::Back,
            depth_test: true,
            depth_write: true,
            depth_func: CompareFunc::Less,
            flags: 0,
        }
    }
}

impl PipelineState {
    /// Alpha blending with depth writes off: the usual transparent setup.
    pub fn transparent() -> Self {
        Self {
            blend_mode: BlendMode::Alpha,
            depth_write: false,
            ..Self::default()
        }
    }
}

/// A material.
///
/// Cloning keeps the stable id: a clone describes the same material (for example a
/// copy being edited before it replaces the original through a reload).
#[derive(Debug, Clone)]
pub struct Material {
    stable_id: u64,
    shader: Handle<Shader>,
    textures: BTreeMap<u32, Handle<Texture>>,
    params: BTreeMap<String, UniformValue>,
    pipeline: PipelineState,
}

/// Uniform name of the sampler bound to texture slot `slot`.
pub fn sampler_uniform_name(slot: u32) -> String {
    format!("uTexture{slot}")
}

impl Material {
    /// Creates a material with a fresh stable id and default pipeline state.
    pub fn new(shader: Handle<Shader>) -> Self {
        Self {
            stable_id: NEXT_MATERIAL_ID.fetch_add(1, Ordering::Relaxed),
            shader,
            textures: BTreeMap::new(),
            params: BTreeMap::new(),
            pipeline: PipelineState::default(),
        }
    }

    /// Builder-style texture binding.
    pub fn with_texture(mut self, slot: u32, texture: Handle<Texture>) -> Self {
        self.set_texture(slot, texture);
        self
    }

    /// Builder-style parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: UniformValue) -> Self {
        self.set_param(name, value);
        self
    }

    /// Builder-style pipeline state.
    pub fn with_pipeline(mut self, pipeline: PipelineState) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// The process-unique id assigned at creation.
    #[inline]
    pub fn stable_id(&self) -> u64 {
        self.stable_id
    }

    /// The shader.
    #[inline]
    pub fn shader(&self) -> Handle<Shader> {
        self.shader
    }

    /// Replaces the shader.
    pub fn set_shader(&mut self, shader: Handle<Shader>) {
        self.shader = shader;
    }

    /// Binds `texture` to `slot`.
    pub fn set_texture(&mut self, slot: u32, texture: Handle<Texture>) {
        self.textures.insert(slot, texture);
    }

    /// Unbinds a slot.
    pub fn remove_texture(&mut self, slot: u32) -> Option<Handle<Texture>> {
        self.textures.remove(&slot)
    }

    /// Texture slots in ascending order.
    pub fn textures(&self) -> &BTreeMap<u32, Handle<Texture>> {
        &self.textures
    }

    /// Sets a uniform parameter.
    pub fn set_param(&mut self, name: impl Into<String>, value: UniformValue) {
        self.params.insert(name.into(), value);
    }

    /// Convenience for a `vec4` color parameter.
    pub fn set_color(&mut self, name: impl Into<String>, color: LinearRgba) {
        self.set_param(name, UniformValue::Vec4(color.to_array()));
    }

    /// Convenience for a `vec3` parameter.
    pub fn set_vec3(&mut self, name: impl Into<String>, v: Vec3) {
        self.set_param(name, UniformValue::Vec3(v.to_array()));
    }

    /// Convenience for a `mat4` parameter.
    pub fn set_mat4(&mut self, name: impl Into<String>, m: &Mat4) {
        self.set_param(name, UniformValue::Mat4(m.to_cols_array()));
    }

    /// A parameter by name.
    pub fn param(&self, name: &str) -> Option<&UniformValue> {
        self.params.get(name)
    }

    /// Every parameter in name order.
    pub fn params(&self) -> &BTreeMap<String, UniformValue> {
        &self.params
    }

    /// The pipeline state.
    #[inline]
    pub fn pipeline(&self) -> &PipelineState {
        &self.pipeline
    }

    /// Mutable pipeline state.
    #[inline]
    pub fn pipeline_mut(&mut self) -> &mut PipelineState {
        &mut self.pipeline
    }

    /// Returns `true` if drawing this material blends with the framebuffer.
    pub fn is_transparent(&self) -> bool {
        self.pipeline.blend_mode.is_blending()
    }

    /// A 64-bit key ordering draws to minimise state changes.
    ///
    /// Layout, most significant first: 4 bits blend mode (opaque sorts first), 20 bits
    /// shader id, 32 bits material stable id, 2 bits cull mode, 1 bit depth test,
    /// 1 bit depth write, 4 bits depth function.
    pub fn sort_key(&self) -> u64 {
        let p = &self.pipeline;
        let blend = u64::from(p.blend_mode.ordinal()) & 0xF;
        let shader = u64::from(self.shader.id) & 0xF_FFFF;
        let material = self.stable_id & 0xFFFF_FFFF;
        let cull = u64::from(p.cull_mode.ordinal()) & 0x3;
        let depth_test = u64::from(p.depth_test);
        let depth_write = u64::from(p.depth_write);
        let depth_func = p.depth_func as u64 & 0xF;

        (blend << 60)
            | (shader << 40)
            | (material << 8)
            | (cull << 6)
            | (depth_test << 5)
            | (depth_write << 4)
            | depth_func
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_ids_are_unique_and_survive_clone() {
        let shader = Handle::new(1, 0);
        let a = Material::new(shader);
        let b = Material::new(shader);
        assert_ne!(a.stable_id(), b.stable_id());
        assert_eq!(a.clone().stable_id(), a.stable_id());
    }

    #[test]
    fn opaque_sorts_before_transparent() {
        let shader = Handle::new(7, 0);
        let opaque = Material::new(shader);
        let glass = Material::new(shader).with_pipeline(PipelineState::transparent());
        assert!(opaque.sort_key() < glass.sort_key());
        assert!(glass.is_transparent());
    }

    #[test]
    fn sort_key_groups_by_shader_then_material() {
        let a = Material::new(Handle::new(1, 0));
        let b = Material::new(Handle::new(2, 0));
        let a2 = Material::new(Handle::new(1, 0));
        assert!(a.sort_key() < b.sort_key());
        assert!(a2.sort_key() < b.sort_key());
        assert_ne!(a.sort_key(), a2.sort_key());
    }

    #[test]
    fn texture_slots_are_ordered() {
        let m = Material::new(Handle::new(0, 0))
            .with_texture(3, Handle::new(30, 0))
            .with_texture(0, Handle::new(10, 0));
        let slots: Vec<_> = m.textures().keys().copied().collect();
        assert_eq!(slots, vec![0, 3]);
        assert_eq!(sampler_uniform_name(3), "uTexture3");
    }
}
