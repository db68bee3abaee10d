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

//! A `GpuDevice` that simulates GL objects in memory and records every call.

use parking_lot::Mutex;
use prism_core::error::ErrorKind;
use prism_core::math::LinearRgba;
use prism_core::renderer::api::*;
use prism_core::renderer::GpuDevice;
use prism_core::{EngineError, EngineResult};
use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;

use super::reflect::{reflect, ProgramReflection};

/// The kind of a recorded draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawKind {
    /// `glDrawArrays`.
    Arrays,
    /// `glDrawElements`.
    Elements,
    /// `glDrawElementsInstanced`.
    ElementsInstanced,
}

/// One draw call as the device saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Which entry point.
    pub kind: DrawKind,
    /// Topology.
    pub mode: PrimitiveMode,
    /// Vertex or index count.
    pub count: u32,
    /// Instance count (1 for non-instanced draws).
    pub instances: u32,
    /// The vertex array bound at draw time.
    pub vertex_array: Option<VertexArrayId>,
    /// The program in use at draw time.
    pub program: Option<ProgramId>,
    /// Locations with a non-zero divisor on the bound vertex array.
    pub per_instance_attributes: Vec<u32>,
}

#[derive(Debug)]
struct SimBuffer {
    data: Box<[u8]>,
    immutable: bool,
    mapped: bool,
}

/// What the headless device knows about a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
    /// Whether `generate_mipmap` ran on it.
    pub mipmapped: bool,
}

#[derive(Debug)]
struct SimProgram {
    reflection: ProgramReflection,
    uniform_locations: HashMap<String, UniformLocation>,
    uniform_values: HashMap<UniformLocation, UniformValue>,
    compute: bool,
}

/// Mutable access to the shader storage buffers during a simulated dispatch.
pub struct DispatchContext<'a> {
    groups: (u32, u32, u32),
    bindings: &'a HashMap<u32, BufferId>,
    buffers: &'a mut HashMap<BufferId, SimBuffer>,
    uniforms: Option<&'a HashMap<String, UniformValue>>,
}

impl DispatchContext<'_> {
    /// Workgroup counts of the dispatch.
    pub fn groups(&self) -> (u32, u32, u32) {
        self.groups
    }

    /// The contents of the buffer bound at shader storage `binding`.
    pub fn storage(&mut self, binding: u32) -> Option<&mut [u8]> {
        let id = self.bindings.get(&binding)?;
        self.buffers.get_mut(id).map(|b| &mut b.data[..])
    }

    /// The last value uploaded to a uniform of the running program.
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms?.get(name)
    }
}

type DispatchHook = Box<dyn Fn(&mut DispatchContext<'_>) + Send + Sync>;

#[derive(Debug, Default)]
struct Bindings {
    state: GpuStateSnapshot,
    cull_enabled: bool,
    cull_mode: CullMode,
    indexed: HashMap<(BufferTarget, u32), BufferId>,
}

#[derive(Debug, Default)]
struct Objects {
    next_id: u32,
    buffers: HashMap<BufferId, SimBuffer>,
    vertex_arrays: HashMap<VertexArrayId, Vec<VertexAttributeBinding>>,
    textures: HashMap<TextureId, TextureInfo>,
    programs: HashMap<ProgramId, SimProgram>,
}

impl Objects {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
struct Inner {
    bindings: Bindings,
    objects: Objects,
    calls: HashMap<&'static str, u64>,
    draws: Vec<DrawRecord>,
    dispatches: Vec<(u32, u32, u32)>,
    errors: Vec<ErrorKind>,
    fail_buffer_creation: bool,
}

/// An in-memory GL simulation for tests and CI.
///
/// Buffers hold real bytes (mapping hands out pointers into them), vertex arrays remember
/// their attribute layout, programs get locations by scanning their GLSL, and every
/// entry point increments a call counter readable with [`HeadlessDevice::call_count`].
pub struct HeadlessDevice {
    caps: GpuCaps,
    inner: Mutex<Inner>,
    dispatch_hook: Mutex<Option<DispatchHook>>,
}

impl fmt::Debug for HeadlessDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("HeadlessDevice")
            .field("caps", &self.caps)
            .field("buffers", &inner.objects.buffers.len())
            .field("textures", &inner.objects.textures.len())
            .field("programs", &inner.objects.programs.len())
            .field("draws", &inner.draws.len())
            .finish()
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// A device advertising full GL 4.3 capabilities with persistent mapping.
    pub fn new() -> Self {
        Self::with_caps(GpuCaps::default())
    }

    /// A device advertising `caps`.
    pub fn with_caps(caps: GpuCaps) -> Self {
        Self {
            caps,
            inner: Mutex::new(Inner::default()),
            dispatch_hook: Mutex::new(None),
        }
    }

    /// A GL 3.3 device: no persistent mapping, no compute.
    pub fn legacy() -> Self {
        Self::with_caps(GpuCaps {
            version_major: 3,
            version_minor: 3,
            persistent_mapping: false,
            coherent_mapping: false,
            compute_shaders: false,
            ..GpuCaps::default()
        })
    }

    fn record(&self, inner: &mut Inner, name: &'static str) {
        *inner.calls.entry(name).or_insert(0) += 1;
    }

    // --- Test inspection ---

    /// How many times the entry point `name` (e.g. `"bind_vertex_array"`) was called.
    pub fn call_count(&self, name: &str) -> u64 {
        self.inner.lock().calls.get(name).copied().unwrap_or(0)
    }

    /// Total number of recorded calls.
    pub fn total_calls(&self) -> u64 {
        self.inner.lock().calls.values().sum()
    }

    /// Clears the call counters, draw log and dispatch log.
    pub fn reset_counters(&self) {
        let mut inner = self.inner.lock();
        inner.calls.clear();
        inner.draws.clear();
        inner.dispatches.clear();
    }

    /// Every draw since the last reset.
    pub fn draws(&self) -> Vec<DrawRecord> {
        self.inner.lock().draws.clone()
    }

    /// Every compute dispatch since the last reset.
    pub fn dispatches(&self) -> Vec<(u32, u32, u32)> {
        self.inner.lock().dispatches.clone()
    }

    /// A copy of a buffer's contents.
    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .objects
            .buffers
            .get(&buffer)
            .map(|b| b.data.to_vec())
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.inner.lock().objects.buffers.len()
    }

    /// Number of live textures.
    pub fn live_textures(&self) -> usize {
        self.inner.lock().objects.textures.len()
    }

    /// Number of live vertex arrays.
    pub fn live_vertex_arrays(&self) -> usize {
        self.inner.lock().objects.vertex_arrays.len()
    }

    /// Number of live programs.
    pub fn live_programs(&self) -> usize {
        self.inner.lock().objects.programs.len()
    }

    /// Size and format of a texture.
    pub fn texture_info(&self, texture: TextureId) -> Option<TextureInfo> {
        self.inner.lock().objects.textures.get(&texture).copied()
    }

    /// The last value uploaded to `name` in `program`.
    pub fn uniform_value(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        let inner = self.inner.lock();
        let p = inner.objects.programs.get(&program)?;
        let loc = p.uniform_locations.get(name)?;
        p.uniform_values.get(loc).cloned()
    }

    /// Queues an error returned by the next `get_error` calls, oldest first.
    pub fn inject_error(&self, kind: ErrorKind) {
        self.inner.lock().errors.push(kind);
    }

    /// Makes `create_buffer` fail until reset with `false`.
    pub fn set_fail_buffer_creation(&self, fail: bool) {
        self.inner.lock().fail_buffer_creation = fail;
    }

    /// Installs a CPU stand-in for compute programs, run on every dispatch.
    pub fn on_dispatch(&self, hook: impl Fn(&mut DispatchContext<'_>) + Send + Sync + 'static) {
        *self.dispatch_hook.lock() = Some(Box::new(hook));
    }

    fn bound_buffer_mut<'a>(
        inner: &'a mut Inner,
        target: BufferTarget,
    ) -> Option<&'a mut SimBuffer> {
        let id = inner.bindings.state.buffers[target.index()]?;
        inner.objects.buffers.get_mut(&id)
    }

    fn invalid_operation(inner: &mut Inner, what: &str) {
        log::trace!("headless: GL_INVALID_OPERATION ({what})");
        inner.errors.push(ErrorKind::GlInvalidOperation);
    }

    fn push_draw(inner: &mut Inner, kind: DrawKind, mode: PrimitiveMode, count: u32, instances: u32) {
        let vertex_array = inner.bindings.state.vertex_array;
        let per_instance_attributes = vertex_array
            .and_then(|vao| inner.objects.vertex_arrays.get(&vao))
            .map(|layout| {
                layout
                    .iter()
                    .filter(|b| b.attribute.divisor > 0)
                    .map(|b| b.attribute.location)
                    .collect()
            })
            .unwrap_or_default();
        let record = DrawRecord {
            kind,
            mode,
            count,
            instances,
            vertex_array,
            program: inner.bindings.state.program,
            per_instance_attributes,
        };
        inner.draws.push(record);
    }
}

impl GpuDevice for HeadlessDevice {
    fn caps(&self) -> GpuCaps {
        self.caps
    }

    fn get_error(&self) -> Option<ErrorKind> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "get_error");
        if inner.errors.is_empty() {
            None
        } else {
            Some(inner.errors.remove(0))
        }
    }

    fn query_state(&self) -> GpuStateSnapshot {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "query_state");
        let mut state = inner.bindings.state.clone();
        state.cull = if inner.bindings.cull_enabled {
            inner.bindings.cull_mode
        } else {
            CullMode::None
        };
        state
    }

    fn enable(&self, cap: Capability) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "enable");
        match cap {
            Capability::DepthTest => inner.bindings.state.depth_test = true,
            Capability::Blend => inner.bindings.state.blend = true,
            Capability::CullFace => inner.bindings.cull_enabled = true,
            Capability::ScissorTest | Capability::StencilTest => {}
        }
    }

    fn disable(&self, cap: Capability) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "disable");
        match cap {
            Capability::DepthTest => inner.bindings.state.depth_test = false,
            Capability::Blend => inner.bindings.state.blend = false,
            Capability::CullFace => inner.bindings.cull_enabled = false,
            Capability::ScissorTest | Capability::StencilTest => {}
        }
    }

    fn depth_func(&self, func: CompareFunc) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "depth_func");
        inner.bindings.state.depth_func = func;
    }

    fn depth_mask(&self, write: bool) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "depth_mask");
        inner.bindings.state.depth_mask = write;
    }

    fn blend_func(&self, src: BlendFactor, dst: BlendFactor) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "blend_func");
        inner.bindings.state.blend_factors = (src, dst);
    }

    fn cull_face(&self, mode: CullMode) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "cull_face");
        if mode == CullMode::None {
            inner.errors.push(ErrorKind::GlInvalidEnum);
        } else {
            inner.bindings.cull_mode = mode;
        }
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "viewport");
        inner.bindings.state.viewport = (x, y, width, height);
    }

    fn clear_color(&self, color: LinearRgba) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "clear_color");
        inner.bindings.state.clear_color = color;
    }

    fn clear_depth(&self, _depth: f32) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "clear_depth");
    }

    fn clear_stencil(&self, _stencil: i32) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "clear_stencil");
    }

    fn clear(&self, _flags: ClearFlags) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "clear");
    }

    fn active_texture(&self, unit: u32) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "active_texture");
        if unit as usize >= MAX_TEXTURE_UNITS {
            inner.errors.push(ErrorKind::GlInvalidEnum);
            return;
        }
        inner.bindings.state.active_texture_unit = unit;
    }

    fn bind_texture(&self, texture: Option<TextureId>) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "bind_texture");
        let unit = inner.bindings.state.active_texture_unit as usize;
        inner.bindings.state.bound_textures[unit] = texture;
    }

    fn bind_vertex_array(&self, vao: Option<VertexArrayId>) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "bind_vertex_array");
        inner.bindings.state.vertex_array = vao;
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferId>) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "bind_buffer");
        inner.bindings.state.buffers[target.index()] = buffer;
    }

    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: Option<BufferId>) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "bind_buffer_base");
        match buffer {
            Some(id) => {
                inner.bindings.indexed.insert((target, index), id);
            }
            None => {
                inner.bindings.indexed.remove(&(target, index));
            }
        }
        // glBindBufferBase also binds the generic binding point.
        inner.bindings.state.buffers[target.index()] = buffer;
    }

    fn use_program(&self, program: Option<ProgramId>) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "use_program");
        inner.bindings.state.program = program;
    }

    fn create_buffer(&self) -> EngineResult<BufferId> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "create_buffer");
        if inner.fail_buffer_creation {
            return Err(EngineError::new(
                ErrorKind::GlOutOfMemory,
                "simulated buffer allocation failure",
            ));
        }
        let id = BufferId(inner.objects.next());
        inner.objects.buffers.insert(
            id,
            SimBuffer {
                data: Box::new([]),
                immutable: false,
                mapped: false,
            },
        );
        Ok(id)
    }

    fn delete_buffer(&self, buffer: BufferId) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "delete_buffer");
        inner.objects.buffers.remove(&buffer);
        for slot in inner.bindings.state.buffers.iter_mut() {
            if *slot == Some(buffer) {
                *slot = None;
            }
        }
        inner.bindings.indexed.retain(|_, b| *b != buffer);
    }

    fn buffer_data_size(&self, target: BufferTarget, size: usize, _usage: UsageClass) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "buffer_data");
        let ok = match Self::bound_buffer_mut(&mut inner, target) {
            Some(b) if !b.immutable => {
                b.data = vec![0; size].into_boxed_slice();
                b.mapped = false;
                true
            }
            _ => false,
        };
        if !ok {
            Self::invalid_operation(&mut inner, "buffer_data on unbound or immutable buffer");
        }
    }

    fn buffer_data(&self, target: BufferTarget, data: &[u8], _usage: UsageClass) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "buffer_data");
        let ok = match Self::bound_buffer_mut(&mut inner, target) {
            Some(b) if !b.immutable => {
                b.data = data.to_vec().into_boxed_slice();
                b.mapped = false;
                true
            }
            _ => false,
        };
        if !ok {
            Self::invalid_operation(&mut inner, "buffer_data on unbound or immutable buffer");
        }
    }

    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "buffer_sub_data");
        let ok = match Self::bound_buffer_mut(&mut inner, target) {
            Some(b) => match offset.checked_add(data.len()) {
                Some(end) if end <= b.data.len() => {
                    b.data[offset..end].copy_from_slice(data);
                    true
                }
                _ => false,
            },
            None => false,
        };
        if !ok {
            inner.errors.push(ErrorKind::GlInvalidValue);
        }
    }

    fn buffer_storage(
        &self,
        target: BufferTarget,
        size: usize,
        data: Option<&[u8]>,
        _flags: MapAccess,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "buffer_storage");
        if !self.caps.persistent_mapping {
            return Err(EngineError::new(
                ErrorKind::NotImplemented,
                "buffer storage is not supported by this device",
            ));
        }
        let Some(b) = Self::bound_buffer_mut(&mut inner, target) else {
            return Err(EngineError::invalid_state("no buffer bound for storage"));
        };
        if b.immutable {
            return Err(EngineError::new(
                ErrorKind::GlInvalidOperation,
                "buffer storage is immutable",
            ));
        }
        let mut bytes = vec![0; size];
        if let Some(data) = data {
            let n = data.len().min(size);
            bytes[..n].copy_from_slice(&data[..n]);
        }
        b.data = bytes.into_boxed_slice();
        b.immutable = true;
        Ok(())
    }

    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        access: MapAccess,
    ) -> Option<MappedRange> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "map_buffer_range");
        if access.persistent && !self.caps.persistent_mapping {
            return None;
        }
        let b = Self::bound_buffer_mut(&mut inner, target)?;
        let end = offset.checked_add(length)?;
        if end > b.data.len() || length == 0 || b.mapped {
            return None;
        }
        b.mapped = true;
        let ptr = NonNull::new(b.data[offset..].as_mut_ptr())?;
        // SAFETY: the boxed storage is never reallocated while mapped; `buffer_data`
        // replaces it only after clearing the mapping, as GL orphaning does.
        Some(unsafe { MappedRange::new(ptr, length) })
    }

    fn unmap_buffer(&self, target: BufferTarget) -> bool {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "unmap_buffer");
        let ok = match Self::bound_buffer_mut(&mut inner, target) {
            Some(b) if b.mapped => {
                b.mapped = false;
                true
            }
            _ => false,
        };
        if !ok {
            Self::invalid_operation(&mut inner, "unmap of an unmapped buffer");
        }
        ok
    }

    fn flush_mapped_range(&self, _target: BufferTarget, _offset: usize, _length: usize) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "flush_mapped_range");
    }

    fn get_buffer_sub_data(&self, target: BufferTarget, offset: usize, out: &mut [u8]) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "get_buffer_sub_data");
        let ok = match Self::bound_buffer_mut(&mut inner, target) {
            Some(b) => match offset.checked_add(out.len()) {
                Some(end) if end <= b.data.len() => {
                    out.copy_from_slice(&b.data[offset..end]);
                    true
                }
                _ => false,
            },
            None => false,
        };
        if !ok {
            inner.errors.push(ErrorKind::GlInvalidValue);
        }
    }

    fn create_vertex_array(&self) -> EngineResult<VertexArrayId> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "create_vertex_array");
        let id = VertexArrayId(inner.objects.next());
        inner.objects.vertex_arrays.insert(id, Vec::new());
        Ok(id)
    }

    fn delete_vertex_array(&self, vao: VertexArrayId) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "delete_vertex_array");
        inner.objects.vertex_arrays.remove(&vao);
        if inner.bindings.state.vertex_array == Some(vao) {
            inner.bindings.state.vertex_array = None;
        }
    }

    fn configure_attribute(&self, attribute: &VertexAttribute) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "configure_attribute");
        let vao = inner.bindings.state.vertex_array;
        let buffer = inner.bindings.state.buffers[BufferTarget::Array.index()];
        let (Some(vao), Some(buffer)) = (vao, buffer) else {
            Self::invalid_operation(&mut inner, "attribute without bound VAO and array buffer");
            return;
        };
        if attribute.location >= self.caps.max_vertex_attribs {
            inner.errors.push(ErrorKind::GlInvalidValue);
            return;
        }
        if let Some(layout) = inner.objects.vertex_arrays.get_mut(&vao) {
            layout.retain(|b| b.attribute.location != attribute.location);
            layout.push(VertexAttributeBinding {
                attribute: *attribute,
                buffer,
            });
            layout.sort_by_key(|b| b.attribute.location);
        }
    }

    fn disable_attribute(&self, location: u32) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "disable_attribute");
        let Some(vao) = inner.bindings.state.vertex_array else {
            Self::invalid_operation(&mut inner, "attribute disable without bound VAO");
            return;
        };
        if let Some(layout) = inner.objects.vertex_arrays.get_mut(&vao) {
            layout.retain(|b| b.attribute.location != location);
        }
    }

    fn vertex_array_layout(&self, vao: VertexArrayId) -> Vec<VertexAttributeBinding> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "vertex_array_layout");
        inner
            .objects
            .vertex_arrays
            .get(&vao)
            .cloned()
            .unwrap_or_default()
    }

    fn create_texture(&self) -> EngineResult<TextureId> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "create_texture");
        let id = TextureId(inner.objects.next());
        inner.objects.textures.insert(
            id,
            TextureInfo {
                width: 0,
                height: 0,
                format: TextureFormat::Rgba,
                mipmapped: false,
            },
        );
        Ok(id)
    }

    fn delete_texture(&self, texture: TextureId) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "delete_texture");
        inner.objects.textures.remove(&texture);
        for slot in inner.bindings.state.bound_textures.iter_mut() {
            if *slot == Some(texture) {
                *slot = None;
            }
        }
    }

    fn tex_image_2d(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: Option<&[u8]>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "tex_image_2d");
        let unit = inner.bindings.state.active_texture_unit as usize;
        let Some(id) = inner.bindings.state.bound_textures[unit] else {
            return Err(EngineError::invalid_state("no texture bound"));
        };
        if let Some(pixels) = pixels {
            let expected = width as usize * height as usize * format.bytes_per_pixel();
            if pixels.len() < expected {
                return Err(EngineError::new(
                    ErrorKind::GlInvalidValue,
                    format!("{} bytes supplied, {expected} required", pixels.len()),
                ));
            }
        }
        let info = inner
            .objects
            .textures
            .get_mut(&id)
            .ok_or_else(|| EngineError::not_found(format!("texture {id:?}")))?;
        info.width = width;
        info.height = height;
        info.format = format;
        info.mipmapped = false;
        Ok(())
    }

    fn generate_mipmap(&self) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "generate_mipmap");
        let unit = inner.bindings.state.active_texture_unit as usize;
        if let Some(id) = inner.bindings.state.bound_textures[unit] {
            if let Some(info) = inner.objects.textures.get_mut(&id) {
                info.mipmapped = true;
            }
        }
    }

    fn create_program(&self, stages: &[ShaderStageSource]) -> EngineResult<ProgramId> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "create_program");
        if stages.is_empty() {
            return Err(EngineError::new(
                ErrorKind::ShaderLinkFailed,
                "program has no stages",
            ));
        }
        if let Some(bad) = stages.iter().find(|s| s.source.contains("#error")) {
            return Err(EngineError::new(
                ErrorKind::ShaderCompileFailed,
                format!("{:?} stage: #error directive", bad.stage),
            ));
        }
        let compute = stages.iter().any(|s| s.stage == ShaderStage::Compute);
        let vertex = stages
            .iter()
            .find(|s| s.stage == ShaderStage::Vertex)
            .map(|s| s.source.as_str());
        let all: Vec<&str> = stages.iter().map(|s| s.source.as_str()).collect();
        let reflection = reflect(vertex, &all);

        let base = inner.objects.next() * 100;
        let uniform_locations = reflection
            .uniforms
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), UniformLocation(base + i as u32)))
            .collect();
        let id = ProgramId(inner.objects.next());
        inner.objects.programs.insert(
            id,
            SimProgram {
                reflection,
                uniform_locations,
                uniform_values: HashMap::new(),
                compute,
            },
        );
        Ok(id)
    }

    fn delete_program(&self, program: ProgramId) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "delete_program");
        inner.objects.programs.remove(&program);
        if inner.bindings.state.program == Some(program) {
            inner.bindings.state.program = None;
        }
    }

    fn get_attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "get_attrib_location");
        inner
            .objects
            .programs
            .get(&program)?
            .reflection
            .attributes
            .get(name)
            .copied()
    }

    fn get_uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "get_uniform_location");
        inner
            .objects
            .programs
            .get(&program)?
            .uniform_locations
            .get(name)
            .copied()
    }

    fn set_uniform(&self, location: UniformLocation, value: &UniformValue) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "set_uniform");
        let Some(program) = inner.bindings.state.program else {
            Self::invalid_operation(&mut inner, "uniform upload without a program");
            return;
        };
        if let Some(p) = inner.objects.programs.get_mut(&program) {
            p.uniform_values.insert(location, value.clone());
        }
    }

    fn draw_arrays(&self, mode: PrimitiveMode, _first: u32, count: u32) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "draw_arrays");
        Self::push_draw(&mut inner, DrawKind::Arrays, mode, count, 1);
    }

    fn draw_elements(
        &self,
        mode: PrimitiveMode,
        count: u32,
        _index_type: IndexType,
        _offset: usize,
    ) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "draw_elements");
        Self::push_draw(&mut inner, DrawKind::Elements, mode, count, 1);
    }

    fn draw_elements_instanced(
        &self,
        mode: PrimitiveMode,
        count: u32,
        _index_type: IndexType,
        _offset: usize,
        instances: u32,
    ) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "draw_elements_instanced");
        Self::push_draw(&mut inner, DrawKind::ElementsInstanced, mode, count, instances);
    }

    fn dispatch_compute(&self, groups_x: u32, groups_y: u32, groups_z: u32) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "dispatch_compute");
        let program = inner.bindings.state.program;
        let is_compute = program
            .and_then(|p| inner.objects.programs.get(&p))
            .is_some_and(|p| p.compute);
        if !is_compute || !self.caps.compute_shaders {
            Self::invalid_operation(&mut inner, "dispatch without a compute program");
            return;
        }
        inner.dispatches.push((groups_x, groups_y, groups_z));

        let hook = self.dispatch_hook.lock();
        if let Some(hook) = hook.as_ref() {
            let Inner {
                bindings, objects, ..
            } = &mut *inner;
            let storage: HashMap<u32, BufferId> = bindings
                .indexed
                .iter()
                .filter(|((target, _), _)| *target == BufferTarget::ShaderStorage)
                .map(|((_, index), id)| (*index, *id))
                .collect();
            let uniforms: Option<HashMap<String, UniformValue>> =
                program.and_then(|p| objects.programs.get(&p)).map(|p| {
                    p.uniform_locations
                        .iter()
                        .filter_map(|(name, loc)| {
                            p.uniform_values.get(loc).map(|v| (name.clone(), v.clone()))
                        })
                        .collect()
                });
            let mut ctx = DispatchContext {
                groups: (groups_x, groups_y, groups_z),
                bindings: &storage,
                buffers: &mut objects.buffers,
                uniforms: uniforms.as_ref(),
            };
            hook(&mut ctx);
        }
    }

    fn memory_barrier(&self, _barrier: MemoryBarrier) {
        let mut inner = self.inner.lock();
        self.record(&mut inner, "memory_barrier");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_hold_bytes_and_map() {
        let dev = HeadlessDevice::new();
        let b = dev.create_buffer().unwrap();
        dev.bind_buffer(BufferTarget::Array, Some(b));
        dev.buffer_storage(BufferTarget::Array, 16, None, MapAccess::PERSISTENT_WRITE)
            .unwrap();
        let map = dev
            .map_buffer_range(BufferTarget::Array, 0, 16, MapAccess::PERSISTENT_WRITE)
            .unwrap();
        assert!(map.write(4, &[9, 8, 7]));
        assert_eq!(&dev.buffer_contents(b).unwrap()[4..7], &[9, 8, 7]);

        let mut out = [0u8; 3];
        dev.get_buffer_sub_data(BufferTarget::Array, 4, &mut out);
        assert_eq!(out, [9, 8, 7]);
        assert!(dev.unmap_buffer(BufferTarget::Array));
    }

    #[test]
    fn legacy_device_refuses_persistent_mapping() {
        let dev = HeadlessDevice::legacy();
        let b = dev.create_buffer().unwrap();
        dev.bind_buffer(BufferTarget::Array, Some(b));
        assert!(dev
            .buffer_storage(BufferTarget::Array, 16, None, MapAccess::PERSISTENT_WRITE)
            .is_err());
    }

    #[test]
    fn vertex_array_records_layout() {
        let dev = HeadlessDevice::new();
        let vao = dev.create_vertex_array().unwrap();
        let vbo = dev.create_buffer().unwrap();
        dev.bind_vertex_array(Some(vao));
        dev.bind_buffer(BufferTarget::Array, Some(vbo));
        let attr = VertexAttribute {
            location: 2,
            components: 4,
            stride: 16,
            offset: 0,
            divisor: 1,
        };
        dev.configure_attribute(&attr);
        assert_eq!(
            dev.vertex_array_layout(vao),
            vec![VertexAttributeBinding {
                attribute: attr,
                buffer: vbo
            }]
        );
        assert_eq!(dev.call_count("configure_attribute"), 1);
    }

    #[test]
    fn programs_expose_reflected_locations() {
        let dev = HeadlessDevice::new();
        let p = dev
            .create_program(&[
                ShaderStageSource::new(
                    ShaderStage::Vertex,
                    "layout(location = 0) in vec3 aPosition;\nuniform mat4 uModel;",
                ),
                ShaderStageSource::new(ShaderStage::Fragment, "uniform vec4 uColor;"),
            ])
            .unwrap();
        assert_eq!(dev.get_attrib_location(p, "aPosition"), Some(0));
        assert!(dev.get_attrib_location(p, "aInstanceRow0").is_none());
        let loc = dev.get_uniform_location(p, "uColor").unwrap();
        dev.use_program(Some(p));
        dev.set_uniform(loc, &UniformValue::Float(2.0));
        assert_eq!(dev.uniform_value(p, "uColor"), Some(UniformValue::Float(2.0)));

        let err = dev
            .create_program(&[ShaderStageSource::new(ShaderStage::Vertex, "#error nope")])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::ShaderCompileFailed);
    }

    #[test]
    fn injected_errors_drain_in_order() {
        let dev = HeadlessDevice::new();
        dev.inject_error(ErrorKind::GlInvalidEnum);
        dev.inject_error(ErrorKind::GlOutOfMemory);
        assert_eq!(dev.get_error(), Some(ErrorKind::GlInvalidEnum));
        assert_eq!(dev.get_error(), Some(ErrorKind::GlOutOfMemory));
        assert_eq!(dev.get_error(), None);
    }
}
