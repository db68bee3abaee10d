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

//! A mirror of the GL state machine that elides redundant calls.
//!
//! Every cached field starts out unknown, so the first setter after construction or
//! an invalidation always reaches the GPU. Binding state is also dropped whenever the
//! context's binding epoch moves, which happens when resource uploads bind objects
//! behind the cache's back.

use parking_lot::RwLock;
use prism_core::math::{LinearRgba, Mat4};
use prism_core::renderer::{
    BlendMode, BufferId, BufferTarget, Capability, ClearFlags, CompareFunc, CullMode,
    GpuContext, GpuDevice, ProgramId, TextureId, VertexArrayId, MAX_TEXTURE_UNITS,
};
use prism_core::ErrorKind;
use prism_data::PipelineState;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, Default)]
struct CachedState {
    depth_test: Option<bool>,
    depth_func: Option<CompareFunc>,
    depth_mask: Option<bool>,
    blend: Option<BlendMode>,
    cull: Option<CullMode>,
    clear_color: Option<LinearRgba>,
    viewport: Option<(i32, i32, i32, i32)>,
    active_unit: Option<u32>,
    textures: [Option<Option<TextureId>>; MAX_TEXTURE_UNITS],
    vertex_array: Option<Option<VertexArrayId>>,
    buffers: [Option<Option<BufferId>>; 4],
    program: Option<Option<ProgramId>>,
    view: Option<Mat4>,
    projection: Option<Mat4>,
    binding_epoch: u64,
}

impl CachedState {
    fn forget_textures(&mut self) {
        self.active_unit = None;
        self.textures = [None; MAX_TEXTURE_UNITS];
    }

    fn forget_buffers(&mut self) {
        self.vertex_array = None;
        self.buffers = [None; 4];
    }

    fn forget_bindings(&mut self) {
        self.forget_textures();
        self.forget_buffers();
        self.program = None;
    }
}

/// Counters describing how effective the cache is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCacheStats {
    /// Setter calls forwarded to the GPU.
    pub issued: u64,
    /// Setter calls skipped because the value was already current.
    pub elided: u64,
    /// GL errors observed through [`StateCache::check_gl_error`].
    pub gpu_errors: u64,
}

/// The render state cache.
///
/// Getters take a shared lock and may be called from any thread. Setters take the
/// exclusive lock and issue GL calls while holding it, so they belong on the GPU
/// thread.
#[derive(Debug)]
pub struct StateCache {
    ctx: GpuContext,
    state: RwLock<CachedState>,
    strict: AtomicBool,
    issued: AtomicU64,
    elided: AtomicU64,
    gpu_errors: AtomicU64,
}

impl StateCache {
    /// Creates a cache with every field unknown.
    pub fn new(ctx: GpuContext) -> Self {
        let state = CachedState {
            binding_epoch: ctx.binding_epoch(),
            ..CachedState::default()
        };
        Self {
            ctx,
            state: RwLock::new(state),
            strict: AtomicBool::new(false),
            issued: AtomicU64::new(0),
            elided: AtomicU64::new(0),
            gpu_errors: AtomicU64::new(0),
        }
    }

    /// The context the cache issues calls through.
    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// When enabled, every setter reaches the GPU regardless of the cached value.
    pub fn set_strict_mode(&self, strict: bool) {
        self.strict.store(strict, Ordering::Relaxed);
    }

    /// Returns `true` if caching is disabled.
    pub fn is_strict_mode(&self) -> bool {
        self.strict.load(Ordering::Relaxed)
    }

    /// Cache effectiveness counters.
    pub fn stats(&self) -> StateCacheStats {
        StateCacheStats {
            issued: self.issued.load(Ordering::Relaxed),
            elided: self.elided.load(Ordering::Relaxed),
            gpu_errors: self.gpu_errors.load(Ordering::Relaxed),
        }
    }

    /// Number of GL errors seen so far.
    pub fn gpu_error_count(&self) -> u64 {
        self.gpu_errors.load(Ordering::Relaxed)
    }

    #[track_caller]
    fn update<T: PartialEq + Copy>(
        &self,
        field: impl FnOnce(&mut CachedState) -> &mut Option<T>,
        value: T,
        function: &str,
        apply: impl FnOnce(&dyn GpuDevice),
    ) {
        let mut state = self.state.write();
        let slot = field(&mut *state);
        if !self.is_strict_mode() && *slot == Some(value) {
            self.elided.fetch_add(1, Ordering::Relaxed);
            return;
        }
        apply(self.ctx.gl(function));
        *slot = Some(value);
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    #[track_caller]
    fn update_binding<T: PartialEq + Copy>(
        &self,
        field: impl FnOnce(&mut CachedState) -> &mut Option<T>,
        value: T,
        function: &str,
        apply: impl FnOnce(&dyn GpuDevice),
    ) {
        self.sync_binding_epoch();
        self.update(field, value, function, apply);
    }

    fn sync_binding_epoch(&self) {
        let epoch = self.ctx.binding_epoch();
        if self.state.read().binding_epoch == epoch {
            return;
        }
        let mut state = self.state.write();
        if state.binding_epoch != epoch {
            state.forget_bindings();
            state.binding_epoch = epoch;
        }
    }

    // --- Fixed-function state ---

    /// Enables or disables depth testing.
    #[track_caller]
    pub fn set_depth_test(&self, enabled: bool) {
        self.update(|s| &mut s.depth_test, enabled, "StateCache::set_depth_test", |gl| {
            if enabled {
                gl.enable(Capability::DepthTest);
            } else {
                gl.disable(Capability::DepthTest);
            }
        });
    }

    /// Sets the depth comparison.
    #[track_caller]
    pub fn set_depth_func(&self, func: CompareFunc) {
        self.update(|s| &mut s.depth_func, func, "StateCache::set_depth_func", |gl| {
            gl.depth_func(func)
        });
    }

    /// Enables or disables depth writes.
    #[track_caller]
    pub fn set_depth_mask(&self, write: bool) {
        self.update(|s| &mut s.depth_mask, write, "StateCache::set_depth_mask", |gl| {
            gl.depth_mask(write)
        });
    }

    /// Sets the blend mode; [`BlendMode::None`] disables blending.
    #[track_caller]
    pub fn set_blend_mode(&self, mode: BlendMode) {
        self.update(|s| &mut s.blend, mode, "StateCache::set_blend_mode", |gl| {
            match mode.factors() {
                Some((src, dst)) => {
                    gl.enable(Capability::Blend);
                    gl.blend_func(src, dst);
                }
                None => gl.disable(Capability::Blend),
            }
        });
    }

    /// Sets face culling; [`CullMode::None`] disables it.
    #[track_caller]
    pub fn set_cull_mode(&self, mode: CullMode) {
        self.update(|s| &mut s.cull, mode, "StateCache::set_cull_mode", |gl| {
            if mode == CullMode::None {
                gl.disable(Capability::CullFace);
            } else {
                gl.enable(Capability::CullFace);
                gl.cull_face(mode);
            }
        });
    }

    /// Sets the clear color.
    #[track_caller]
    pub fn set_clear_color(&self, color: LinearRgba) {
        self.update(|s| &mut s.clear_color, color, "StateCache::set_clear_color", |gl| {
            gl.clear_color(color)
        });
    }

    /// Sets the viewport rectangle.
    #[track_caller]
    pub fn set_viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.update(
            |s| &mut s.viewport,
            (x, y, width, height),
            "StateCache::set_viewport",
            |gl| gl.viewport(x, y, width, height),
        );
    }

    /// Applies every field of a material's pipeline state.
    #[track_caller]
    pub fn apply_pipeline(&self, pipeline: &PipelineState) {
        self.set_depth_test(pipeline.depth_test);
        self.set_depth_mask(pipeline.depth_write);
        self.set_depth_func(pipeline.depth_func);
        self.set_blend_mode(pipeline.blend_mode);
        self.set_cull_mode(pipeline.cull_mode);
    }

    /// Clears the selected framebuffer planes. Never elided.
    #[track_caller]
    pub fn clear(&self, flags: ClearFlags) {
        if flags.is_empty() {
            return;
        }
        let _state = self.state.write();
        self.ctx.gl("StateCache::clear").clear(flags);
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    // --- Bindings ---

    /// Selects the active texture unit.
    #[track_caller]
    pub fn set_active_texture_unit(&self, unit: u32) {
        if unit as usize >= MAX_TEXTURE_UNITS {
            log::warn!("Texture unit {unit} is out of range (max {MAX_TEXTURE_UNITS})");
            return;
        }
        self.update_binding(|s| &mut s.active_unit, unit, "StateCache::set_active_texture_unit", |gl| {
            gl.active_texture(unit)
        });
    }

    /// Binds `texture` to `unit`, switching the active unit if needed.
    #[track_caller]
    pub fn bind_texture(&self, unit: u32, texture: Option<TextureId>) {
        if unit as usize >= MAX_TEXTURE_UNITS {
            log::warn!("Texture unit {unit} is out of range (max {MAX_TEXTURE_UNITS})");
            return;
        }
        self.sync_binding_epoch();
        let mut state = self.state.write();
        let strict = self.is_strict_mode();
        if !strict && state.textures[unit as usize] == Some(texture) {
            self.elided.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let gl = self.ctx.gl("StateCache::bind_texture");
        if strict || state.active_unit != Some(unit) {
            gl.active_texture(unit);
            state.active_unit = Some(unit);
            self.issued.fetch_add(1, Ordering::Relaxed);
        }
        gl.bind_texture(texture);
        state.textures[unit as usize] = Some(texture);
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Binds a vertex array. The element buffer binding is part of VAO state, so its
    /// cached value is dropped when the VAO changes.
    #[track_caller]
    pub fn bind_vertex_array(&self, vao: Option<VertexArrayId>) {
        self.sync_binding_epoch();
        let mut state = self.state.write();
        if !self.is_strict_mode() && state.vertex_array == Some(vao) {
            self.elided.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.ctx.gl("StateCache::bind_vertex_array").bind_vertex_array(vao);
        state.vertex_array = Some(vao);
        state.buffers[BufferTarget::ElementArray.index()] = None;
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Binds a buffer to a target.
    #[track_caller]
    pub fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferId>) {
        self.update_binding(
            |s| &mut s.buffers[target.index()],
            buffer,
            "StateCache::bind_buffer",
            |gl| gl.bind_buffer(target, buffer),
        );
    }

    /// Binds a buffer to an indexed binding point. Also changes the generic binding of
    /// `target`, which the cache records.
    #[track_caller]
    pub fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: Option<BufferId>) {
        self.sync_binding_epoch();
        let mut state = self.state.write();
        self.ctx
            .gl("StateCache::bind_buffer_base")
            .bind_buffer_base(target, index, buffer);
        state.buffers[target.index()] = Some(buffer);
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Makes `program` current.
    #[track_caller]
    pub fn use_program(&self, program: Option<ProgramId>) {
        self.update_binding(|s| &mut s.program, program, "StateCache::use_program", |gl| {
            gl.use_program(program)
        });
    }

    // --- Camera matrices ---

    /// Stores the view matrix for renderables that need it.
    pub fn set_view_matrix(&self, view: Mat4) {
        self.state.write().view = Some(view);
    }

    /// Stores the projection matrix.
    pub fn set_projection_matrix(&self, projection: Mat4) {
        self.state.write().projection = Some(projection);
    }

    /// The view matrix, if one was set.
    pub fn view_matrix(&self) -> Option<Mat4> {
        self.state.read().view
    }

    /// The projection matrix, if one was set.
    pub fn projection_matrix(&self) -> Option<Mat4> {
        self.state.read().projection
    }

    /// `projection * view`, when both are set.
    pub fn view_projection(&self) -> Option<Mat4> {
        let state = self.state.read();
        Some(state.projection? * state.view?)
    }

    // --- Getters ---

    /// Cached depth-test flag; `None` when unknown.
    pub fn depth_test(&self) -> Option<bool> {
        self.state.read().depth_test
    }

    /// Cached depth function.
    pub fn depth_func(&self) -> Option<CompareFunc> {
        self.state.read().depth_func
    }

    /// Cached depth-write flag.
    pub fn depth_mask(&self) -> Option<bool> {
        self.state.read().depth_mask
    }

    /// Cached blend mode.
    pub fn blend_mode(&self) -> Option<BlendMode> {
        self.state.read().blend
    }

    /// Cached cull mode.
    pub fn cull_mode(&self) -> Option<CullMode> {
        self.state.read().cull
    }

    /// Cached clear color.
    pub fn clear_color(&self) -> Option<LinearRgba> {
        self.state.read().clear_color
    }

    /// Cached viewport.
    pub fn viewport(&self) -> Option<(i32, i32, i32, i32)> {
        self.state.read().viewport
    }

    /// Cached active texture unit.
    pub fn active_texture_unit(&self) -> Option<u32> {
        self.state.read().active_unit
    }

    /// Cached texture on `unit`. The outer `None` means unknown.
    pub fn bound_texture(&self, unit: u32) -> Option<Option<TextureId>> {
        self.state.read().textures.get(unit as usize).copied().flatten()
    }

    /// Cached vertex array.
    pub fn bound_vertex_array(&self) -> Option<Option<VertexArrayId>> {
        self.state.read().vertex_array
    }

    /// Cached buffer for `target`.
    pub fn bound_buffer(&self, target: BufferTarget) -> Option<Option<BufferId>> {
        self.state.read().buffers[target.index()]
    }

    /// Cached program.
    pub fn current_program(&self) -> Option<Option<ProgramId>> {
        self.state.read().program
    }

    // --- Invalidation ---

    /// Forgets everything; the next setter of every field reaches the GPU.
    pub fn invalidate_cache(&self) {
        let mut state = self.state.write();
        let (view, projection) = (state.view, state.projection);
        *state = CachedState {
            view,
            projection,
            binding_epoch: self.ctx.binding_epoch(),
            ..CachedState::default()
        };
        log::debug!("State cache invalidated");
    }

    /// Forgets texture bindings and the active unit.
    pub fn invalidate_texture_cache(&self) {
        self.state.write().forget_textures();
    }

    /// Forgets buffer and vertex array bindings.
    pub fn invalidate_buffer_cache(&self) {
        self.state.write().forget_buffers();
    }

    /// Forgets the current program.
    pub fn invalidate_shader_cache(&self) {
        self.state.write().program = None;
    }

    /// Reads the real GL state back into the cache, after third-party code ran.
    #[track_caller]
    pub fn sync_from_gl(&self) {
        let mut state = self.state.write();
        let snapshot = self.ctx.gl("StateCache::sync_from_gl").query_state();
        state.depth_test = Some(snapshot.depth_test);
        state.depth_func = Some(snapshot.depth_func);
        state.depth_mask = Some(snapshot.depth_mask);
        state.blend = Some(if snapshot.blend {
            let (src, dst) = snapshot.blend_factors;
            blend_mode_from_factors(src, dst)
        } else {
            BlendMode::None
        });
        state.cull = Some(snapshot.cull);
        state.clear_color = Some(snapshot.clear_color);
        state.viewport = Some(snapshot.viewport);
        state.active_unit = Some(snapshot.active_texture_unit);
        for (cached, bound) in state.textures.iter_mut().zip(snapshot.bound_textures) {
            *cached = Some(bound);
        }
        state.vertex_array = Some(snapshot.vertex_array);
        for (cached, bound) in state.buffers.iter_mut().zip(snapshot.buffers) {
            *cached = Some(bound);
        }
        state.program = Some(snapshot.program);
        state.binding_epoch = self.ctx.binding_epoch();
        log::debug!("State cache synchronized from GL");
    }

    /// Polls the GL error flag. A raised error is logged and counted, and the cache is
    /// invalidated since the failed call may have left state half-applied.
    #[track_caller]
    pub fn check_gl_error(&self, operation: &str) -> Option<ErrorKind> {
        let kind = self.ctx.gl("StateCache::check_gl_error").get_error()?;
        self.gpu_errors.fetch_add(1, Ordering::Relaxed);
        log::error!("GL error {kind} after {operation}");
        self.invalidate_cache();
        Some(kind)
    }
}

fn blend_mode_from_factors(
    src: prism_core::renderer::BlendFactor,
    dst: prism_core::renderer::BlendFactor,
) -> BlendMode {
    [
        BlendMode::Alpha,
        BlendMode::Additive,
        BlendMode::Multiply,
        BlendMode::Premultiplied,
    ]
    .into_iter()
    .find(|mode| mode.factors() == Some((src, dst)))
    .unwrap_or(BlendMode::Custom { src, dst })
}
