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

//! Value types exchanged with a [`GpuDevice`](super::GpuDevice).
//!
//! These mirror the subset of OpenGL 4.3 state and objects the render core touches.
//! Object ids are thin wrappers over the raw GL names; `0` is never a valid id.

use crate::math::LinearRgba;
use std::ptr::NonNull;

/// Maximum number of texture units mirrored by the state cache.
pub const MAX_TEXTURE_UNITS: usize = 32;

macro_rules! gpu_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

gpu_id!(
    /// A GL buffer object name.
    BufferId
);
gpu_id!(
    /// A GL texture object name.
    TextureId
);
gpu_id!(
    /// A GL vertex array object name.
    VertexArrayId
);
gpu_id!(
    /// A linked GL program name.
    ProgramId
);
gpu_id!(
    /// A uniform location inside a linked program.
    UniformLocation
);

/// The binding points the render core uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferTarget {
    /// `GL_ARRAY_BUFFER`.
    Array,
    /// `GL_ELEMENT_ARRAY_BUFFER`.
    ElementArray,
    /// `GL_UNIFORM_BUFFER`.
    Uniform,
    /// `GL_SHADER_STORAGE_BUFFER`.
    ShaderStorage,
}

impl BufferTarget {
    /// Every target, in cache-slot order.
    pub const ALL: [BufferTarget; 4] = [
        BufferTarget::Array,
        BufferTarget::ElementArray,
        BufferTarget::Uniform,
        BufferTarget::ShaderStorage,
    ];

    /// The cache slot of this target.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            BufferTarget::Array => 0,
            BufferTarget::ElementArray => 1,
            BufferTarget::Uniform => 2,
            BufferTarget::ShaderStorage => 3,
        }
    }
}

/// How often a buffer's contents are expected to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UsageClass {
    /// Written once (`GL_STATIC_DRAW`).
    Static,
    /// Rewritten occasionally (`GL_DYNAMIC_DRAW`).
    Dynamic,
    /// Rewritten every frame (`GL_STREAM_DRAW`).
    Stream,
}

impl UsageClass {
    /// Every usage class, in pool order.
    pub const ALL: [UsageClass; 3] = [UsageClass::Static, UsageClass::Dynamic, UsageClass::Stream];

    /// The pool slot of this class.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            UsageClass::Static => 0,
            UsageClass::Dynamic => 1,
            UsageClass::Stream => 2,
        }
    }
}

/// Fixed-function toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `GL_DEPTH_TEST`.
    DepthTest,
    /// `GL_BLEND`.
    Blend,
    /// `GL_CULL_FACE`.
    CullFace,
    /// `GL_SCISSOR_TEST`.
    ScissorTest,
    /// `GL_STENCIL_TEST`.
    StencilTest,
}

/// Depth comparison functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum CompareFunc {
    /// Never passes.
    Never,
    /// Passes if the incoming value is less.
    #[default]
    Less,
    /// Passes if equal.
    Equal,
    /// Passes if less or equal.
    LessEqual,
    /// Passes if greater.
    Greater,
    /// Passes if not equal.
    NotEqual,
    /// Passes if greater or equal.
    GreaterEqual,
    /// Always passes.
    Always,
}

/// Source/destination blend factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlendFactor {
    /// `GL_ZERO`.
    Zero,
    /// `GL_ONE`.
    One,
    /// `GL_SRC_COLOR`.
    SrcColor,
    /// `GL_ONE_MINUS_SRC_COLOR`.
    OneMinusSrcColor,
    /// `GL_DST_COLOR`.
    DstColor,
    /// `GL_ONE_MINUS_DST_COLOR`.
    OneMinusDstColor,
    /// `GL_SRC_ALPHA`.
    SrcAlpha,
    /// `GL_ONE_MINUS_SRC_ALPHA`.
    OneMinusSrcAlpha,
    /// `GL_DST_ALPHA`.
    DstAlpha,
    /// `GL_ONE_MINUS_DST_ALPHA`.
    OneMinusDstAlpha,
}

/// High-level blend presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum BlendMode {
    /// Blending disabled.
    #[default]
    None,
    /// `src_alpha, 1 - src_alpha`.
    Alpha,
    /// `src_alpha, one`.
    Additive,
    /// `dst_color, zero`.
    Multiply,
    /// `one, 1 - src_alpha`.
    Premultiplied,
    /// Explicit factors.
    Custom {
        /// Source factor.
        src: BlendFactor,
        /// Destination factor.
        dst: BlendFactor,
    },
}

impl BlendMode {
    /// The factors to program, or `None` when blending is off.
    pub fn factors(self) -> Option<(BlendFactor, BlendFactor)> {
        match self {
            BlendMode::None => None,
            BlendMode::Alpha => Some((BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha)),
            BlendMode::Additive => Some((BlendFactor::SrcAlpha, BlendFactor::One)),
            BlendMode::Multiply => Some((BlendFactor::DstColor, BlendFactor::Zero)),
            BlendMode::Premultiplied => Some((BlendFactor::One, BlendFactor::OneMinusSrcAlpha)),
            BlendMode::Custom { src, dst } => Some((src, dst)),
        }
    }

    /// Small integer used when packing sort keys.
    pub fn ordinal(self) -> u8 {
        match self {
            BlendMode::None => 0,
            BlendMode::Alpha => 1,
            BlendMode::Additive => 2,
            BlendMode::Multiply => 3,
            BlendMode::Premultiplied => 4,
            BlendMode::Custom { .. } => 5,
        }
    }

    /// Returns `true` for every mode that reads the destination color.
    pub fn is_blending(self) -> bool {
        self != BlendMode::None
    }
}

/// Face culling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum CullMode {
    /// Culling disabled.
    None,
    /// Cull back faces.
    #[default]
    Back,
    /// Cull front faces.
    Front,
    /// Cull everything.
    FrontAndBack,
}

impl CullMode {
    /// Small integer used when packing sort keys.
    pub fn ordinal(self) -> u8 {
        match self {
            CullMode::None => 0,
            CullMode::Back => 1,
            CullMode::Front => 2,
            CullMode::FrontAndBack => 3,
        }
    }
}

/// Texel formats a texture may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// One 8-bit channel.
    R,
    /// Two 8-bit channels.
    Rg,
    /// Three 8-bit channels.
    Rgb,
    /// Four 8-bit channels.
    Rgba,
    /// 24-bit depth.
    Depth,
    /// 24-bit depth plus 8-bit stencil.
    DepthStencil,
}

impl TextureFormat {
    /// Bytes per texel of the uploaded data.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::R => 1,
            TextureFormat::Rg => 2,
            TextureFormat::Rgb => 3,
            TextureFormat::Rgba | TextureFormat::Depth | TextureFormat::DepthStencil => 4,
        }
    }

    /// The color format matching a channel count, if any.
    pub fn from_channels(channels: u8) -> Option<Self> {
        match channels {
            1 => Some(TextureFormat::R),
            2 => Some(TextureFormat::Rg),
            3 => Some(TextureFormat::Rgb),
            4 => Some(TextureFormat::Rgba),
            _ => None,
        }
    }
}

/// Primitive topology for draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveMode {
    /// Independent triangles.
    #[default]
    Triangles,
    /// Triangle strip.
    TriangleStrip,
    /// Independent lines.
    Lines,
    /// Points.
    Points,
}

/// Width of the indices in an element buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IndexType {
    /// 16-bit indices.
    U16,
    /// 32-bit indices.
    #[default]
    U32,
}

impl IndexType {
    /// Size in bytes of one index.
    pub fn size(self) -> usize {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}

/// A float vertex attribute sourced from the currently bound array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader attribute location.
    pub location: u32,
    /// Number of `f32` components (1 to 4).
    pub components: u8,
    /// Distance in bytes between consecutive elements.
    pub stride: u32,
    /// Byte offset of the first element.
    pub offset: u32,
    /// `0` for per-vertex data, `1` for per-instance data.
    pub divisor: u32,
}

/// An attribute recorded on a vertex array together with its source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeBinding {
    /// The attribute format.
    pub attribute: VertexAttribute,
    /// The array buffer bound when the attribute was configured.
    pub buffer: BufferId,
}

/// Access flags for buffer mapping and immutable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapAccess {
    /// `GL_MAP_READ_BIT`.
    pub read: bool,
    /// `GL_MAP_WRITE_BIT`.
    pub write: bool,
    /// `GL_MAP_PERSISTENT_BIT`.
    pub persistent: bool,
    /// `GL_MAP_COHERENT_BIT`.
    pub coherent: bool,
    /// `GL_MAP_INVALIDATE_BUFFER_BIT`.
    pub invalidate_buffer: bool,
    /// `GL_MAP_UNSYNCHRONIZED_BIT`.
    pub unsynchronized: bool,
    /// `GL_MAP_FLUSH_EXPLICIT_BIT`.
    pub flush_explicit: bool,
}

impl MapAccess {
    /// Write-only, persistent and coherent: the streaming configuration.
    pub const PERSISTENT_WRITE: Self = Self {
        read: false,
        write: true,
        persistent: true,
        coherent: true,
        invalidate_buffer: false,
        unsynchronized: false,
        flush_explicit: false,
    };

    /// Write-only, persistent, with explicit flushes instead of coherency.
    pub const PERSISTENT_FLUSHED_WRITE: Self = Self {
        read: false,
        write: true,
        persistent: true,
        coherent: false,
        invalidate_buffer: false,
        unsynchronized: false,
        flush_explicit: true,
    };

    /// A one-shot read mapping.
    pub const READ: Self = Self {
        read: true,
        write: false,
        persistent: false,
        coherent: false,
        invalidate_buffer: false,
        unsynchronized: false,
        flush_explicit: false,
    };
}

/// A CPU pointer into a mapped buffer range.
///
/// The pointer stays valid until the buffer is unmapped or deleted. The owner of the
/// buffer is responsible for not using a range past that point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappedRange {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the range is only a pointer plus a length; all accesses go through `write`
// and `read`, which are only used by the owner of the buffer on the GPU thread.
unsafe impl Send for MappedRange {}
// SAFETY: see above.
unsafe impl Sync for MappedRange {}

impl MappedRange {
    /// Wraps a raw mapping.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes until the buffer is
    /// unmapped.
    pub unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// The mapped length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` for an empty mapping.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies `data` into the mapping at `offset`. Returns `false` if it does not fit.
    pub fn write(&self, offset: usize, data: &[u8]) -> bool {
        let Some(end) = offset.checked_add(data.len()) else {
            return false;
        };
        if end > self.len {
            return false;
        }
        // SAFETY: bounds checked above; the constructor guarantees validity.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.as_ptr().add(offset), data.len());
        }
        true
    }

    /// Copies bytes out of the mapping. Returns `false` if the range is out of bounds.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> bool {
        let Some(end) = offset.checked_add(out.len()) else {
            return false;
        };
        if end > self.len {
            return false;
        }
        // SAFETY: bounds checked above; the constructor guarantees validity.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.as_ptr().add(offset), out.as_mut_ptr(), out.len());
        }
        true
    }
}

/// Barrier bits for `glMemoryBarrier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemoryBarrier {
    /// `GL_SHADER_STORAGE_BARRIER_BIT`.
    pub shader_storage: bool,
    /// `GL_VERTEX_ATTRIB_ARRAY_BARRIER_BIT`.
    pub vertex_attrib_array: bool,
    /// `GL_BUFFER_UPDATE_BARRIER_BIT`.
    pub buffer_update: bool,
}

impl MemoryBarrier {
    /// Everything a culling dispatch writes and the CPU then reads back.
    pub const COMPUTE_TO_READBACK: Self = Self {
        shader_storage: true,
        vertex_attrib_array: false,
        buffer_update: true,
    };
}

/// Buffers to clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClearFlags {
    /// Color buffer.
    pub color: bool,
    /// Depth buffer.
    pub depth: bool,
    /// Stencil buffer.
    pub stencil: bool,
}

impl ClearFlags {
    /// Color and depth, the usual per-frame clear.
    pub const COLOR_DEPTH: Self = Self {
        color: true,
        depth: true,
        stencil: false,
    };

    /// Returns `true` when nothing is selected.
    pub fn is_empty(&self) -> bool {
        !(self.color || self.depth || self.stencil)
    }
}

/// Programmable pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Fragment shader.
    Fragment,
    /// Compute shader.
    Compute,
}

/// GLSL source for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageSource {
    /// The stage.
    pub stage: ShaderStage,
    /// The GLSL text.
    pub source: String,
}

impl ShaderStageSource {
    /// Creates a stage source.
    pub fn new(stage: ShaderStage, source: impl Into<String>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// A typed uniform value.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    /// `int` or sampler unit.
    Int(i32),
    /// `float`.
    Float(f32),
    /// `vec2`.
    Vec2([f32; 2]),
    /// `vec3`.
    Vec3([f32; 3]),
    /// `vec4`.
    Vec4([f32; 4]),
    /// `mat3`, column-major.
    Mat3([f32; 9]),
    /// `mat4`, column-major.
    Mat4([f32; 16]),
    /// `float[]`.
    FloatArray(Vec<f32>),
    /// `vec4[]`.
    Vec4Array(Vec<[f32; 4]>),
}

/// What the driver can do. Queried once per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCaps {
    /// GL major version.
    pub version_major: u32,
    /// GL minor version.
    pub version_minor: u32,
    /// `ARB_buffer_storage`: immutable storage with persistent mapping.
    pub persistent_mapping: bool,
    /// Coherent persistent mapping without explicit flushes.
    pub coherent_mapping: bool,
    /// `ARB_compute_shader` plus shader storage buffers.
    pub compute_shaders: bool,
    /// Number of combined texture image units.
    pub max_texture_units: u32,
    /// Number of vertex attribute locations.
    pub max_vertex_attribs: u32,
}

impl Default for GpuCaps {
    fn default() -> Self {
        Self {
            version_major: 4,
            version_minor: 3,
            persistent_mapping: true,
            coherent_mapping: true,
            compute_shaders: true,
            max_texture_units: MAX_TEXTURE_UNITS as u32,
            max_vertex_attribs: 16,
        }
    }
}

/// The live GL state, as read back by `GpuDevice::query_state`.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuStateSnapshot {
    /// `GL_DEPTH_TEST` enabled.
    pub depth_test: bool,
    /// Current depth function.
    pub depth_func: CompareFunc,
    /// Depth writes enabled.
    pub depth_mask: bool,
    /// `GL_BLEND` enabled.
    pub blend: bool,
    /// Current blend factors.
    pub blend_factors: (BlendFactor, BlendFactor),
    /// Current cull configuration (`CullMode::None` when culling is disabled).
    pub cull: CullMode,
    /// Current clear color.
    pub clear_color: LinearRgba,
    /// Current viewport `(x, y, width, height)`.
    pub viewport: (i32, i32, i32, i32),
    /// Active texture unit index.
    pub active_texture_unit: u32,
    /// 2D texture bound on each unit.
    pub bound_textures: [Option<TextureId>; MAX_TEXTURE_UNITS],
    /// Bound vertex array.
    pub vertex_array: Option<VertexArrayId>,
    /// Bound buffer per [`BufferTarget`] slot.
    pub buffers: [Option<BufferId>; 4],
    /// Program in use.
    pub program: Option<ProgramId>,
}

impl Default for GpuStateSnapshot {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_func: CompareFunc::Less,
            depth_mask: true,
            blend: false,
            blend_factors: (BlendFactor::One, BlendFactor::Zero),
            cull: CullMode::None,
            clear_color: LinearRgba::TRANSPARENT,
            viewport: (0, 0, 0, 0),
            active_texture_unit: 0,
            bound_textures: [None; MAX_TEXTURE_UNITS],
            vertex_array: None,
            buffers: [None; 4],
            program: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_presets_map_to_factors() {
        assert_eq!(BlendMode::None.factors(), None);
        assert_eq!(
            BlendMode::Alpha.factors(),
            Some((BlendFactor::SrcAlpha, BlendFactor::OneMinusSrcAlpha))
        );
        assert!(BlendMode::Additive.is_blending());
    }

    #[test]
    fn mapped_range_bounds_checks() {
        let mut backing = vec![0u8; 8];
        let ptr = NonNull::new(backing.as_mut_ptr()).unwrap();
        let range = unsafe { MappedRange::new(ptr, backing.len()) };
        assert!(range.write(4, &[1, 2, 3, 4]));
        assert!(!range.write(6, &[1, 2, 3]));
        let mut out = [0u8; 2];
        assert!(range.read(4, &mut out));
        assert_eq!(out, [1, 2]);
        drop(range);
        assert_eq!(&backing[4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn texture_format_channels() {
        assert_eq!(TextureFormat::from_channels(3), Some(TextureFormat::Rgb));
        assert_eq!(TextureFormat::from_channels(5), None);
        assert_eq!(TextureFormat::Rgba.bytes_per_pixel(), 4);
    }
}
