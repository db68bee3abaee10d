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

//! Conversions from engine value types to GL enums and glow object names.

use prism_core::renderer::api::*;
use std::num::NonZeroU32;

/// A local extension trait to convert engine types into GL constants.
/// This keeps an idiomatic `.into_gl()` syntax without orphan-rule trouble.
pub trait IntoGl<T> {
    /// Consumes self and converts it into a GL-compatible value.
    fn into_gl(self) -> T;
}

impl IntoGl<u32> for BufferTarget {
    fn into_gl(self) -> u32 {
        match self {
            BufferTarget::Array => glow::ARRAY_BUFFER,
            BufferTarget::ElementArray => glow::ELEMENT_ARRAY_BUFFER,
            BufferTarget::Uniform => glow::UNIFORM_BUFFER,
            BufferTarget::ShaderStorage => glow::SHADER_STORAGE_BUFFER,
        }
    }
}

impl IntoGl<u32> for UsageClass {
    fn into_gl(self) -> u32 {
        match self {
            UsageClass::Static => glow::STATIC_DRAW,
            UsageClass::Dynamic => glow::DYNAMIC_DRAW,
            UsageClass::Stream => glow::STREAM_DRAW,
        }
    }
}

impl IntoGl<u32> for Capability {
    fn into_gl(self) -> u32 {
        match self {
            Capability::DepthTest => glow::DEPTH_TEST,
            Capability::Blend => glow::BLEND,
            Capability::CullFace => glow::CULL_FACE,
            Capability::ScissorTest => glow::SCISSOR_TEST,
            Capability::StencilTest => glow::STENCIL_TEST,
        }
    }
}

impl IntoGl<u32> for CompareFunc {
    fn into_gl(self) -> u32 {
        match self {
            CompareFunc::Never => glow::NEVER,
            CompareFunc::Less => glow::LESS,
            CompareFunc::Equal => glow::EQUAL,
            CompareFunc::LessEqual => glow::LEQUAL,
            CompareFunc::Greater => glow::GREATER,
            CompareFunc::NotEqual => glow::NOTEQUAL,
            CompareFunc::GreaterEqual => glow::GEQUAL,
            CompareFunc::Always => glow::ALWAYS,
        }
    }
}

impl IntoGl<u32> for BlendFactor {
    fn into_gl(self) -> u32 {
        match self {
            BlendFactor::Zero => glow::ZERO,
            BlendFactor::One => glow::ONE,
            BlendFactor::SrcColor => glow::SRC_COLOR,
            BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
            BlendFactor::DstColor => glow::DST_COLOR,
            BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
            BlendFactor::SrcAlpha => glow::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
            BlendFactor::DstAlpha => glow::DST_ALPHA,
            BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
        }
    }
}

impl IntoGl<u32> for CullMode {
    fn into_gl(self) -> u32 {
        match self {
            // Never passed to glCullFace; callers disable GL_CULL_FACE instead.
            CullMode::None | CullMode::Back => glow::BACK,
            CullMode::Front => glow::FRONT,
            CullMode::FrontAndBack => glow::FRONT_AND_BACK,
        }
    }
}

impl IntoGl<u32> for PrimitiveMode {
    fn into_gl(self) -> u32 {
        match self {
            PrimitiveMode::Triangles => glow::TRIANGLES,
            PrimitiveMode::TriangleStrip => glow::TRIANGLE_STRIP,
            PrimitiveMode::Lines => glow::LINES,
            PrimitiveMode::Points => glow::POINTS,
        }
    }
}

impl IntoGl<u32> for IndexType {
    fn into_gl(self) -> u32 {
        match self {
            IndexType::U16 => glow::UNSIGNED_SHORT,
            IndexType::U32 => glow::UNSIGNED_INT,
        }
    }
}

impl IntoGl<u32> for ShaderStage {
    fn into_gl(self) -> u32 {
        match self {
            ShaderStage::Vertex => glow::VERTEX_SHADER,
            ShaderStage::Fragment => glow::FRAGMENT_SHADER,
            ShaderStage::Compute => glow::COMPUTE_SHADER,
        }
    }
}

impl IntoGl<u32> for MapAccess {
    fn into_gl(self) -> u32 {
        let mut bits = 0;
        if self.read {
            bits |= glow::MAP_READ_BIT;
        }
        if self.write {
            bits |= glow::MAP_WRITE_BIT;
        }
        if self.persistent {
            bits |= glow::MAP_PERSISTENT_BIT;
        }
        if self.coherent {
            bits |= glow::MAP_COHERENT_BIT;
        }
        if self.invalidate_buffer {
            bits |= glow::MAP_INVALIDATE_BUFFER_BIT;
        }
        if self.unsynchronized {
            bits |= glow::MAP_UNSYNCHRONIZED_BIT;
        }
        if self.flush_explicit {
            bits |= glow::MAP_FLUSH_EXPLICIT_BIT;
        }
        bits
    }
}

impl IntoGl<u32> for MemoryBarrier {
    fn into_gl(self) -> u32 {
        let mut bits = 0;
        if self.shader_storage {
            bits |= glow::SHADER_STORAGE_BARRIER_BIT;
        }
        if self.vertex_attrib_array {
            bits |= glow::VERTEX_ATTRIB_ARRAY_BARRIER_BIT;
        }
        if self.buffer_update {
            bits |= glow::BUFFER_UPDATE_BARRIER_BIT;
        }
        bits
    }
}

impl IntoGl<u32> for ClearFlags {
    fn into_gl(self) -> u32 {
        let mut bits = 0;
        if self.color {
            bits |= glow::COLOR_BUFFER_BIT;
        }
        if self.depth {
            bits |= glow::DEPTH_BUFFER_BIT;
        }
        if self.stencil {
            bits |= glow::STENCIL_BUFFER_BIT;
        }
        bits
    }
}

/// `(internal_format, format, type)` for `glTexImage2D`.
pub fn texture_format_triple(format: TextureFormat) -> (i32, u32, u32) {
    match format {
        TextureFormat::R => (glow::R8 as i32, glow::RED, glow::UNSIGNED_BYTE),
        TextureFormat::Rg => (glow::RG8 as i32, glow::RG, glow::UNSIGNED_BYTE),
        TextureFormat::Rgb => (glow::RGB8 as i32, glow::RGB, glow::UNSIGNED_BYTE),
        TextureFormat::Rgba => (glow::RGBA8 as i32, glow::RGBA, glow::UNSIGNED_BYTE),
        TextureFormat::Depth => (
            glow::DEPTH_COMPONENT24 as i32,
            glow::DEPTH_COMPONENT,
            glow::UNSIGNED_INT,
        ),
        TextureFormat::DepthStencil => (
            glow::DEPTH24_STENCIL8 as i32,
            glow::DEPTH_STENCIL,
            glow::UNSIGNED_INT_24_8,
        ),
    }
}

pub(crate) fn compare_func_from_gl(value: u32) -> CompareFunc {
    match value {
        glow::NEVER => CompareFunc::Never,
        glow::EQUAL => CompareFunc::Equal,
        glow::LEQUAL => CompareFunc::LessEqual,
        glow::GREATER => CompareFunc::Greater,
        glow::NOTEQUAL => CompareFunc::NotEqual,
        glow::GEQUAL => CompareFunc::GreaterEqual,
        glow::ALWAYS => CompareFunc::Always,
        _ => CompareFunc::Less,
    }
}

pub(crate) fn blend_factor_from_gl(value: u32) -> BlendFactor {
    match value {
        glow::ZERO => BlendFactor::Zero,
        glow::SRC_COLOR => BlendFactor::SrcColor,
        glow::ONE_MINUS_SRC_COLOR => BlendFactor::OneMinusSrcColor,
        glow::DST_COLOR => BlendFactor::DstColor,
        glow::ONE_MINUS_DST_COLOR => BlendFactor::OneMinusDstColor,
        glow::SRC_ALPHA => BlendFactor::SrcAlpha,
        glow::ONE_MINUS_SRC_ALPHA => BlendFactor::OneMinusSrcAlpha,
        glow::DST_ALPHA => BlendFactor::DstAlpha,
        glow::ONE_MINUS_DST_ALPHA => BlendFactor::OneMinusDstAlpha,
        _ => BlendFactor::One,
    }
}

pub(crate) fn cull_mode_from_gl(value: u32) -> CullMode {
    match value {
        glow::FRONT => CullMode::Front,
        glow::FRONT_AND_BACK => CullMode::FrontAndBack,
        _ => CullMode::Back,
    }
}

// --- Object names ---

pub(crate) fn native_buffer(id: BufferId) -> Option<glow::NativeBuffer> {
    NonZeroU32::new(id.0).map(glow::NativeBuffer)
}

pub(crate) fn native_texture(id: TextureId) -> Option<glow::NativeTexture> {
    NonZeroU32::new(id.0).map(glow::NativeTexture)
}

pub(crate) fn native_vertex_array(id: VertexArrayId) -> Option<glow::NativeVertexArray> {
    NonZeroU32::new(id.0).map(glow::NativeVertexArray)
}

pub(crate) fn native_program(id: ProgramId) -> Option<glow::NativeProgram> {
    NonZeroU32::new(id.0).map(glow::NativeProgram)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_access_bits() {
        let bits: u32 = MapAccess::PERSISTENT_WRITE.into_gl();
        assert_eq!(
            bits,
            glow::MAP_WRITE_BIT | glow::MAP_PERSISTENT_BIT | glow::MAP_COHERENT_BIT
        );
    }

    #[test]
    fn compare_func_round_trips_through_gl() {
        for f in [
            CompareFunc::Never,
            CompareFunc::Less,
            CompareFunc::LessEqual,
            CompareFunc::Always,
        ] {
            assert_eq!(compare_func_from_gl(f.into_gl()), f);
        }
    }

    #[test]
    fn zero_ids_have_no_native_name() {
        assert!(native_buffer(BufferId(0)).is_none());
        assert!(native_buffer(BufferId(7)).is_some());
    }
}
