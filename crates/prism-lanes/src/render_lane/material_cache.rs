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

//! Binding materials, with a thread-local record of the last one bound.

use prism_core::renderer::UniformValue;
use prism_data::resources::sampler_uniform_name;
use prism_data::{Material, ResourceManager};
use std::cell::RefCell;

use super::StateCache;

thread_local! {
    static MATERIAL_CACHE: RefCell<MaterialStateCache> = RefCell::new(MaterialStateCache::default());
}

/// Remembers which material this thread bound last so consecutive draws with the same
/// material skip rebinding. Reset at every frame boundary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaterialStateCache {
    last_material: Option<u64>,
    binds: u64,
    skipped: u64,
}

impl MaterialStateCache {
    /// Runs `f` with this thread's cache.
    pub fn with<R>(f: impl FnOnce(&mut MaterialStateCache) -> R) -> R {
        MATERIAL_CACHE.with(|cache| f(&mut cache.borrow_mut()))
    }

    /// Forgets the last material and zeroes the counters for this thread.
    pub fn reset() {
        Self::with(|cache| *cache = MaterialStateCache::default());
    }

    /// Forgets the last material so the next bind goes through. Needed after editing a
    /// material mid-frame.
    pub fn invalidate() {
        Self::with(|cache| cache.last_material = None);
    }

    /// The stable id of the last material bound on this thread.
    pub fn last_material() -> Option<u64> {
        Self::with(|cache| cache.last_material)
    }

    /// `(binds, skipped)` on this thread since the last reset.
    pub fn counters() -> (u64, u64) {
        Self::with(|cache| (cache.binds, cache.skipped))
    }
}

/// Binds `material`: program, pipeline state, textures and parameters.
///
/// Returns `false` when the material's shader is gone; the draw should be skipped.
#[track_caller]
pub fn bind_material(state: &StateCache, resources: &ResourceManager, material: &Material) -> bool {
    let Some(shader) = resources.get_shader(material.shader()) else {
        log::warn!(
            "Material {} references a missing shader {:?}",
            material.stable_id(),
            material.shader()
        );
        return false;
    };

    let already_bound = MaterialStateCache::with(|cache| {
        cache.last_material == Some(material.stable_id())
    }) && state.current_program() == Some(Some(shader.program()));
    if already_bound {
        MaterialStateCache::with(|cache| cache.skipped += 1);
        return true;
    }

    let ctx = state.context();
    state.use_program(Some(shader.program()));
    state.apply_pipeline(material.pipeline());

    for (&slot, &texture) in material.textures() {
        match resources.get_texture(texture) {
            Some(tex) => {
                state.bind_texture(slot, Some(tex.id()));
                shader.set_uniform(ctx, &sampler_uniform_name(slot), &UniformValue::Int(slot as i32));
            }
            None => log::trace!("Texture slot {slot} of material {} is empty", material.stable_id()),
        }
    }
    for (name, value) in material.params() {
        shader.set_uniform(ctx, name, value);
    }

    MaterialStateCache::with(|cache| {
        cache.last_material = Some(material.stable_id());
        cache.binds += 1;
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::renderer::{
        GpuContext, GpuThreadGuard, ShaderStage, ShaderStageSource,
    };
    use prism_data::Shader;
    use prism_infra::HeadlessDevice;
    use std::sync::Arc;

    #[test]
    fn same_material_binds_once_per_frame() {
        let device = Arc::new(HeadlessDevice::new());
        let guard = Arc::new(GpuThreadGuard::new());
        guard.register_current().unwrap();
        let ctx = GpuContext::new(device.clone(), guard);
        let state = StateCache::new(ctx.clone());
        let resources = ResourceManager::default();

        let shader = Shader::from_sources(
            &ctx,
            &[
                ShaderStageSource::new(ShaderStage::Vertex, "uniform vec4 uTint;\nvoid main() {}"),
                ShaderStageSource::new(ShaderStage::Fragment, "void main() {}"),
            ],
        )
        .unwrap();
        let shader = resources.register_shader(shader, "tint");
        let material = Material::new(shader).with_param("uTint", UniformValue::Vec4([1.0; 4]));

        MaterialStateCache::reset();
        assert!(bind_material(&state, &resources, &material));
        assert!(bind_material(&state, &resources, &material));
        assert_eq!(MaterialStateCache::counters(), (1, 1));
        assert_eq!(device.call_count("set_uniform"), 1);

        MaterialStateCache::reset();
        assert!(bind_material(&state, &resources, &material));
        assert_eq!(MaterialStateCache::counters(), (1, 0));
    }

    #[test]
    fn missing_shader_refuses_to_bind() {
        let device = Arc::new(HeadlessDevice::new());
        let guard = Arc::new(GpuThreadGuard::new());
        guard.register_current().unwrap();
        let state = StateCache::new(GpuContext::new(device, guard));
        let resources = ResourceManager::default();
        let material = Material::new(prism_core::Handle::new(42, 0));
        assert!(!bind_material(&state, &resources, &material));
    }
}
