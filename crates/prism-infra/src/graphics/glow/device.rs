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

//! The OpenGL 4.3 backend, built on `glow`.

use glow::{HasContext, PixelUnpackData};
use parking_lot::Mutex;
use prism_core::error::ErrorKind;
use prism_core::math::LinearRgba;
use prism_core::renderer::api::*;
use prism_core::renderer::GpuDevice;
use prism_core::{EngineError, EngineResult};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;

use super::conversions::*;

#[derive(Debug, Default)]
struct Tracked {
    vertex_array: Option<VertexArrayId>,
    array_buffer: Option<BufferId>,
    layouts: HashMap<VertexArrayId, Vec<VertexAttributeBinding>>,
}

/// A [`GpuDevice`] issuing real GL calls through a `glow::Context`.
///
/// The context must be current on the thread that registered with the GPU thread
/// guard, and every call must come from that thread; [`GpuContext`] enforces the
/// latter.
///
/// [`GpuContext`]: prism_core::renderer::GpuContext
pub struct GlowDevice {
    gl: glow::Context,
    caps: GpuCaps,
    tracked: Mutex<Tracked>,
}

// SAFETY: `glow::Context` is only a table of function pointers plus cached metadata.
// GL itself requires calls from the thread owning the context; the engine routes every
// call through `GpuContext::gl`, which checks the calling thread.
unsafe impl Send for GlowDevice {}
// SAFETY: see above.
unsafe impl Sync for GlowDevice {}

impl fmt::Debug for GlowDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlowDevice")
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

fn gl_size(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn optional_id<T>(raw: i32, wrap: impl FnOnce(u32) -> T) -> Option<T> {
    (raw > 0).then(|| wrap(raw as u32))
}

impl GlowDevice {
    /// Wraps a loaded context and queries its capabilities.
    pub fn new(gl: glow::Context) -> Self {
        // SAFETY: parameter queries on the current context.
        let caps = unsafe {
            let version = gl.version();
            let (major, minor) = (version.major, version.minor);
            let at_least = |maj: u32, min: u32| (major, minor) >= (maj, min);
            let extensions = gl.supported_extensions();
            let persistent =
                at_least(4, 4) || extensions.contains("GL_ARB_buffer_storage");
            GpuCaps {
                version_major: major,
                version_minor: minor,
                persistent_mapping: persistent,
                coherent_mapping: persistent,
                compute_shaders: at_least(4, 3) || extensions.contains("GL_ARB_compute_shader"),
                max_texture_units: (gl.get_parameter_i32(glow::MAX_COMBINED_TEXTURE_IMAGE_UNITS)
                    as u32)
                    .min(MAX_TEXTURE_UNITS as u32),
                max_vertex_attribs: gl.get_parameter_i32(glow::MAX_VERTEX_ATTRIBS) as u32,
            }
        };
        log::info!(
            "OpenGL {}.{} (persistent mapping: {}, compute: {})",
            caps.version_major,
            caps.version_minor,
            caps.persistent_mapping,
            caps.compute_shaders
        );
        Self {
            gl,
            caps,
            tracked: Mutex::new(Tracked::default()),
        }
    }

    /// The underlying context, for collaborators such as a UI overlay.
    pub fn raw(&self) -> &glow::Context {
        &self.gl
    }

    fn compile_stage(&self, stage: &ShaderStageSource) -> EngineResult<glow::NativeShader> {
        // SAFETY: shader object calls on the current context.
        unsafe {
            let shader = self.gl.create_shader(stage.stage.into_gl()).map_err(|e| {
                EngineError::new(ErrorKind::ShaderCompileFailed, e)
            })?;
            self.gl.shader_source(shader, &stage.source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let info = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(EngineError::new(
                    ErrorKind::ShaderCompileFailed,
                    format!("{:?} stage: {info}", stage.stage),
                ));
            }
            Ok(shader)
        }
    }
}

impl GpuDevice for GlowDevice {
    fn caps(&self) -> GpuCaps {
        self.caps
    }

    fn get_error(&self) -> Option<ErrorKind> {
        // SAFETY: glGetError has no preconditions.
        let code = unsafe { self.gl.get_error() };
        ErrorKind::from_gl_error(code)
    }

    fn query_state(&self) -> GpuStateSnapshot {
        let gl = &self.gl;
        // SAFETY: state queries on the current context. The active texture unit is
        // restored after walking the units.
        unsafe {
            let mut clear = [0.0f32; 4];
            gl.get_parameter_f32_slice(glow::COLOR_CLEAR_VALUE, &mut clear);
            let mut viewport = [0i32; 4];
            gl.get_parameter_i32_slice(glow::VIEWPORT, &mut viewport);

            let active = gl.get_parameter_i32(glow::ACTIVE_TEXTURE) as u32 - glow::TEXTURE0;
            let mut bound_textures = [None; MAX_TEXTURE_UNITS];
            for (unit, slot) in bound_textures
                .iter_mut()
                .enumerate()
                .take(self.caps.max_texture_units as usize)
            {
                gl.active_texture(glow::TEXTURE0 + unit as u32);
                *slot = optional_id(gl.get_parameter_i32(glow::TEXTURE_BINDING_2D), TextureId);
            }
            gl.active_texture(glow::TEXTURE0 + active);

            let buffer_binding = |pname| optional_id(gl.get_parameter_i32(pname), BufferId);
            let vertex_array =
                optional_id(gl.get_parameter_i32(glow::VERTEX_ARRAY_BINDING), VertexArrayId);
            let array_buffer = buffer_binding(glow::ARRAY_BUFFER_BINDING);
            {
                let mut tracked = self.tracked.lock();
                tracked.vertex_array = vertex_array;
                tracked.array_buffer = array_buffer;
            }

            GpuStateSnapshot {
                depth_test: gl.is_enabled(glow::DEPTH_TEST),
                depth_func: compare_func_from_gl(gl.get_parameter_i32(glow::DEPTH_FUNC) as u32),
                depth_mask: gl.get_parameter_i32(glow::DEPTH_WRITEMASK) != 0,
                blend: gl.is_enabled(glow::BLEND),
                blend_factors: (
                    blend_factor_from_gl(gl.get_parameter_i32(glow::BLEND_SRC_RGB) as u32),
                    blend_factor_from_gl(gl.get_parameter_i32(glow::BLEND_DST_RGB) as u32),
                ),
                cull: if gl.is_enabled(glow::CULL_FACE) {
                    cull_mode_from_gl(gl.get_parameter_i32(glow::CULL_FACE_MODE) as u32)
                } else {
                    CullMode::None
                },
                clear_color: LinearRgba::new(clear[0], clear[1], clear[2], clear[3]),
                viewport: (viewport[0], viewport[1], viewport[2], viewport[3]),
                active_texture_unit: active,
                bound_textures,
                vertex_array,
                buffers: [
                    array_buffer,
                    buffer_binding(glow::ELEMENT_ARRAY_BUFFER_BINDING),
                    buffer_binding(glow::UNIFORM_BUFFER_BINDING),
                    buffer_binding(glow::SHADER_STORAGE_BUFFER_BINDING),
                ],
                program: optional_id(gl.get_parameter_i32(glow::CURRENT_PROGRAM), ProgramId),
            }
        }
    }

    fn enable(&self, cap: Capability) {
        // SAFETY: plain state call.
        unsafe { self.gl.enable(cap.into_gl()) }
    }

    fn disable(&self, cap: Capability) {
        // SAFETY: plain state call.
        unsafe { self.gl.disable(cap.into_gl()) }
    }

    fn depth_func(&self, func: CompareFunc) {
        // SAFETY: plain state call.
        unsafe { self.gl.depth_func(func.into_gl()) }
    }

    fn depth_mask(&self, write: bool) {
        // SAFETY: plain state call.
        unsafe { self.gl.depth_mask(write) }
    }

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        // SAFETY: plain state call.
        unsafe { self.gl.blend_func(src.into_gl(), dst.into_gl()) }
    }

    fn cull_face(&self, mode: CullMode) {
        // SAFETY: plain state call.
        unsafe { self.gl.cull_face(mode.into_gl()) }
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        // SAFETY: plain state call.
        unsafe { self.gl.viewport(x, y, width, height) }
    }

    fn clear_color(&self, color: LinearRgba) {
        // SAFETY: plain state call.
        unsafe { self.gl.clear_color(color.r, color.g, color.b, color.a) }
    }

    fn clear_depth(&self, depth: f32) {
        // SAFETY: plain state call.
        unsafe { self.gl.clear_depth_f32(depth) }
    }

    fn clear_stencil(&self, stencil: i32) {
        // SAFETY: plain state call.
        unsafe { self.gl.clear_stencil(stencil) }
    }

    fn clear(&self, flags: ClearFlags) {
        // SAFETY: plain state call.
        unsafe { self.gl.clear(flags.into_gl()) }
    }

    fn active_texture(&self, unit: u32) {
        // SAFETY: plain state call.
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn bind_texture(&self, texture: Option<TextureId>) {
        // SAFETY: the name was produced by `create_texture` or is `None`.
        unsafe {
            self.gl
                .bind_texture(glow::TEXTURE_2D, texture.and_then(native_texture))
        }
    }

    fn bind_vertex_array(&self, vao: Option<VertexArrayId>) {
        self.tracked.lock().vertex_array = vao;
        // SAFETY: the name was produced by `create_vertex_array` or is `None`.
        unsafe { self.gl.bind_vertex_array(vao.and_then(native_vertex_array)) }
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferId>) {
        if target == BufferTarget::Array {
            self.tracked.lock().array_buffer = buffer;
        }
        // SAFETY: the name was produced by `create_buffer` or is `None`.
        unsafe {
            self.gl
                .bind_buffer(target.into_gl(), buffer.and_then(native_buffer))
        }
    }

    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: Option<BufferId>) {
        // SAFETY: the name was produced by `create_buffer` or is `None`.
        unsafe {
            self.gl
                .bind_buffer_base(target.into_gl(), index, buffer.and_then(native_buffer))
        }
    }

    fn use_program(&self, program: Option<ProgramId>) {
        // SAFETY: the name was produced by `create_program` or is `None`.
        unsafe { self.gl.use_program(program.and_then(native_program)) }
    }

    fn create_buffer(&self) -> EngineResult<BufferId> {
        // SAFETY: object creation on the current context.
        unsafe { self.gl.create_buffer() }
            .map(|b| BufferId(b.0.get()))
            .map_err(|e| EngineError::new(ErrorKind::GlOutOfMemory, e))
    }

    fn delete_buffer(&self, buffer: BufferId) {
        if let Some(b) = native_buffer(buffer) {
            // SAFETY: deleting a name we created.
            unsafe { self.gl.delete_buffer(b) }
        }
    }

    fn buffer_data_size(&self, target: BufferTarget, size: usize, usage: UsageClass) {
        // SAFETY: allocation on the bound buffer.
        unsafe {
            self.gl
                .buffer_data_size(target.into_gl(), gl_size(size), usage.into_gl())
        }
    }

    fn buffer_data(&self, target: BufferTarget, data: &[u8], usage: UsageClass) {
        // SAFETY: the slice is valid for the duration of the call.
        unsafe {
            self.gl
                .buffer_data_u8_slice(target.into_gl(), data, usage.into_gl())
        }
    }

    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]) {
        // SAFETY: the slice is valid for the duration of the call.
        unsafe {
            self.gl
                .buffer_sub_data_u8_slice(target.into_gl(), gl_size(offset), data)
        }
    }

    fn buffer_storage(
        &self,
        target: BufferTarget,
        size: usize,
        data: Option<&[u8]>,
        flags: MapAccess,
    ) -> EngineResult<()> {
        if !self.caps.persistent_mapping {
            return Err(EngineError::new(
                ErrorKind::NotImplemented,
                "GL_ARB_buffer_storage is not available",
            ));
        }
        // SAFETY: immutable allocation on the bound buffer.
        unsafe {
            self.gl
                .buffer_storage(target.into_gl(), gl_size(size), data, flags.into_gl());
        }
        match self.get_error() {
            None => Ok(()),
            Some(kind) => Err(EngineError::new(kind, "glBufferStorage failed")),
        }
    }

    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        access: MapAccess,
    ) -> Option<MappedRange> {
        // SAFETY: mapping the bound buffer; a null return is handled below.
        let ptr = unsafe {
            self.gl.map_buffer_range(
                target.into_gl(),
                gl_size(offset),
                gl_size(length),
                access.into_gl(),
            )
        };
        let ptr = NonNull::new(ptr)?;
        // SAFETY: GL guarantees `length` bytes at `ptr` until the buffer is unmapped.
        Some(unsafe { MappedRange::new(ptr, length) })
    }

    fn unmap_buffer(&self, target: BufferTarget) -> bool {
        // SAFETY: unmapping the bound buffer.
        unsafe { self.gl.unmap_buffer(target.into_gl()) };
        self.get_error().is_none()
    }

    fn flush_mapped_range(&self, target: BufferTarget, offset: usize, length: usize) {
        // SAFETY: the range lies inside the current mapping.
        unsafe {
            self.gl
                .flush_mapped_buffer_range(target.into_gl(), gl_size(offset), gl_size(length))
        }
    }

    fn get_buffer_sub_data(&self, target: BufferTarget, offset: usize, out: &mut [u8]) {
        // SAFETY: `out` is valid for writes of its length.
        unsafe {
            self.gl
                .get_buffer_sub_data(target.into_gl(), gl_size(offset), out)
        }
    }

    fn create_vertex_array(&self) -> EngineResult<VertexArrayId> {
        // SAFETY: object creation on the current context.
        let vao = unsafe { self.gl.create_vertex_array() }
            .map(|v| VertexArrayId(v.0.get()))
            .map_err(|e| EngineError::new(ErrorKind::GlOutOfMemory, e))?;
        self.tracked.lock().layouts.insert(vao, Vec::new());
        Ok(vao)
    }

    fn delete_vertex_array(&self, vao: VertexArrayId) {
        {
            let mut tracked = self.tracked.lock();
            tracked.layouts.remove(&vao);
            if tracked.vertex_array == Some(vao) {
                tracked.vertex_array = None;
            }
        }
        if let Some(v) = native_vertex_array(vao) {
            // SAFETY: deleting a name we created.
            unsafe { self.gl.delete_vertex_array(v) }
        }
    }

    fn configure_attribute(&self, attribute: &VertexAttribute) {
        let loc = attribute.location;
        // SAFETY: attribute setup on the bound VAO, sourcing the bound array buffer.
        unsafe {
            self.gl.enable_vertex_attrib_array(loc);
            self.gl.vertex_attrib_pointer_f32(
                loc,
                i32::from(attribute.components),
                glow::FLOAT,
                false,
                attribute.stride as i32,
                attribute.offset as i32,
            );
            self.gl.vertex_attrib_divisor(loc, attribute.divisor);
        }

        let mut tracked = self.tracked.lock();
        if let (Some(vao), Some(buffer)) = (tracked.vertex_array, tracked.array_buffer) {
            let layout = tracked.layouts.entry(vao).or_default();
            layout.retain(|b| b.attribute.location != loc);
            layout.push(VertexAttributeBinding {
                attribute: *attribute,
                buffer,
            });
            layout.sort_by_key(|b| b.attribute.location);
        }
    }

    fn disable_attribute(&self, location: u32) {
        // SAFETY: attribute state of the bound VAO.
        unsafe {
            self.gl.vertex_attrib_divisor(location, 0);
            self.gl.disable_vertex_attrib_array(location);
        }
        let mut tracked = self.tracked.lock();
        let bound = tracked.vertex_array;
        if let Some(layout) = bound.and_then(|vao| tracked.layouts.get_mut(&vao)) {
            layout.retain(|b| b.attribute.location != location);
        }
    }

    fn vertex_array_layout(&self, vao: VertexArrayId) -> Vec<VertexAttributeBinding> {
        self.tracked
            .lock()
            .layouts
            .get(&vao)
            .cloned()
            .unwrap_or_default()
    }

    fn create_texture(&self) -> EngineResult<TextureId> {
        // SAFETY: object creation on the current context.
        unsafe { self.gl.create_texture() }
            .map(|t| TextureId(t.0.get()))
            .map_err(|e| EngineError::new(ErrorKind::GlOutOfMemory, e))
    }

    fn delete_texture(&self, texture: TextureId) {
        if let Some(t) = native_texture(texture) {
            // SAFETY: deleting a name we created.
            unsafe { self.gl.delete_texture(t) }
        }
    }

    fn tex_image_2d(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: Option<&[u8]>,
    ) -> EngineResult<()> {
        let (internal, fmt, ty) = texture_format_triple(format);
        // SAFETY: upload to the bound texture; the slice outlives the call.
        unsafe {
            let gl = &self.gl;
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                glow::LINEAR_MIPMAP_LINEAR as i32,
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAG_FILTER,
                glow::LINEAR as i32,
            );
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                internal,
                width as i32,
                height as i32,
                0,
                fmt,
                ty,
                PixelUnpackData::Slice(pixels),
            );
        }
        match self.get_error() {
            None => Ok(()),
            Some(kind) => Err(EngineError::new(
                kind,
                format!("glTexImage2D {width}x{height} {format:?} failed"),
            )),
        }
    }

    fn generate_mipmap(&self) {
        // SAFETY: operates on the bound texture.
        unsafe { self.gl.generate_mipmap(glow::TEXTURE_2D) }
    }

    fn create_program(&self, stages: &[ShaderStageSource]) -> EngineResult<ProgramId> {
        let mut shaders = Vec::with_capacity(stages.len());
        for stage in stages {
            match self.compile_stage(stage) {
                Ok(s) => shaders.push(s),
                Err(e) => {
                    // SAFETY: deleting shader objects we created.
                    unsafe {
                        for s in shaders {
                            self.gl.delete_shader(s);
                        }
                    }
                    return Err(e);
                }
            }
        }

        // SAFETY: program object calls on the current context.
        unsafe {
            let program = self
                .gl
                .create_program()
                .map_err(|e| EngineError::new(ErrorKind::ShaderLinkFailed, e))?;
            for &s in &shaders {
                self.gl.attach_shader(program, s);
            }
            self.gl.link_program(program);
            let linked = self.gl.get_program_link_status(program);
            for s in shaders {
                self.gl.detach_shader(program, s);
                self.gl.delete_shader(s);
            }
            if !linked {
                let info = self.gl.get_program_info_log(program);
                self.gl.delete_program(program);
                return Err(EngineError::new(ErrorKind::ShaderLinkFailed, info));
            }
            Ok(ProgramId(program.0.get()))
        }
    }

    fn delete_program(&self, program: ProgramId) {
        if let Some(p) = native_program(program) {
            // SAFETY: deleting a name we created.
            unsafe { self.gl.delete_program(p) }
        }
    }

    fn get_attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let p = native_program(program)?;
        // SAFETY: query on a linked program.
        unsafe { self.gl.get_attrib_location(p, name) }
    }

    fn get_uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let p = native_program(program)?;
        // SAFETY: query on a linked program.
        unsafe { self.gl.get_uniform_location(p, name) }.map(|l| UniformLocation(l.0))
    }

    fn set_uniform(&self, location: UniformLocation, value: &UniformValue) {
        let loc = glow::NativeUniformLocation(location.0);
        let loc = Some(&loc);
        // SAFETY: uniform upload to the program in use.
        unsafe {
            let gl = &self.gl;
            match value {
                UniformValue::Int(v) => gl.uniform_1_i32(loc, *v),
                UniformValue::Float(v) => gl.uniform_1_f32(loc, *v),
                UniformValue::Vec2(v) => gl.uniform_2_f32(loc, v[0], v[1]),
                UniformValue::Vec3(v) => gl.uniform_3_f32(loc, v[0], v[1], v[2]),
                UniformValue::Vec4(v) => gl.uniform_4_f32(loc, v[0], v[1], v[2], v[3]),
                UniformValue::Mat3(m) => gl.uniform_matrix_3_f32_slice(loc, false, m),
                UniformValue::Mat4(m) => gl.uniform_matrix_4_f32_slice(loc, false, m),
                UniformValue::FloatArray(v) => gl.uniform_1_f32_slice(loc, v),
                UniformValue::Vec4Array(v) => {
                    gl.uniform_4_f32_slice(loc, bytemuck::cast_slice(v.as_slice()))
                }
            }
        }
    }

    fn draw_arrays(&self, mode: PrimitiveMode, first: u32, count: u32) {
        // SAFETY: draw with the bound VAO and program.
        unsafe {
            self.gl
                .draw_arrays(mode.into_gl(), first as i32, count as i32)
        }
    }

    fn draw_elements(&self, mode: PrimitiveMode, count: u32, index_type: IndexType, offset: usize) {
        // SAFETY: draw with the bound VAO, element buffer and program.
        unsafe {
            self.gl.draw_elements(
                mode.into_gl(),
                count as i32,
                index_type.into_gl(),
                gl_size(offset),
            )
        }
    }

    fn draw_elements_instanced(
        &self,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        offset: usize,
        instances: u32,
    ) {
        // SAFETY: draw with the bound VAO, element buffer and program.
        unsafe {
            self.gl.draw_elements_instanced(
                mode.into_gl(),
                count as i32,
                index_type.into_gl(),
                gl_size(offset),
                instances as i32,
            )
        }
    }

    fn dispatch_compute(&self, groups_x: u32, groups_y: u32, groups_z: u32) {
        // SAFETY: dispatch with the compute program in use.
        unsafe { self.gl.dispatch_compute(groups_x, groups_y, groups_z) }
    }

    fn memory_barrier(&self, barrier: MemoryBarrier) {
        // SAFETY: plain synchronization call.
        unsafe { self.gl.memory_barrier(barrier.into_gl()) }
    }
}
