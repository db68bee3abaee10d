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

//! The `GpuDevice` contract: the immediate-mode GL surface the render core is written
//! against.
//!
//! The trait is deliberately thin. Each method maps onto one (or a tiny fixed sequence
//! of) GL entry points so that the state cache above it can reason about exactly which
//! calls reach the driver. Implementations live in `prism-infra`.

use std::fmt::Debug;

use super::api::*;
use crate::error::{EngineResult, ErrorKind};
use crate::math::LinearRgba;

/// A backend able to execute GL commands.
///
/// All methods take `&self`; backends use interior mutability. Callers must only use a
/// device from the thread that owns the GL context, which is what
/// [`GpuContext`](super::GpuContext) enforces.
pub trait GpuDevice: Send + Sync + Debug + 'static {
    // --- Capabilities ---

    /// Driver capabilities, queried at creation.
    fn caps(&self) -> GpuCaps;

    /// Polls `glGetError`. Returns `None` for `GL_NO_ERROR`.
    fn get_error(&self) -> Option<ErrorKind>;

    /// Reads back the bindings and fixed-function state the state cache mirrors.
    fn query_state(&self) -> GpuStateSnapshot;

    // --- Fixed-function state ---

    /// `glEnable`.
    fn enable(&self, cap: Capability);
    /// `glDisable`.
    fn disable(&self, cap: Capability);
    /// `glDepthFunc`.
    fn depth_func(&self, func: CompareFunc);
    /// `glDepthMask`.
    fn depth_mask(&self, write: bool);
    /// `glBlendFunc`.
    fn blend_func(&self, src: BlendFactor, dst: BlendFactor);
    /// `glCullFace`. `CullMode::None` is not a valid argument; disable the capability instead.
    fn cull_face(&self, mode: CullMode);
    /// `glViewport`.
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    /// `glClearColor`.
    fn clear_color(&self, color: LinearRgba);
    /// `glClearDepth`.
    fn clear_depth(&self, depth: f32);
    /// `glClearStencil`.
    fn clear_stencil(&self, stencil: i32);
    /// `glClear`.
    fn clear(&self, flags: ClearFlags);

    // --- Bindings ---

    /// `glActiveTexture(GL_TEXTURE0 + unit)`.
    fn active_texture(&self, unit: u32);
    /// `glBindTexture(GL_TEXTURE_2D, ..)` on the active unit.
    fn bind_texture(&self, texture: Option<TextureId>);
    /// `glBindVertexArray`.
    fn bind_vertex_array(&self, vao: Option<VertexArrayId>);
    /// `glBindBuffer`.
    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferId>);
    /// `glBindBufferBase` for indexed targets (uniform and shader storage).
    fn bind_buffer_base(&self, target: BufferTarget, index: u32, buffer: Option<BufferId>);
    /// `glUseProgram`.
    fn use_program(&self, program: Option<ProgramId>);

    // --- Buffers ---

    /// `glGenBuffers`.
    fn create_buffer(&self) -> EngineResult<BufferId>;
    /// `glDeleteBuffers`.
    fn delete_buffer(&self, buffer: BufferId);
    /// `glBufferData(target, size, NULL, usage)` on the buffer bound to `target`.
    fn buffer_data_size(&self, target: BufferTarget, size: usize, usage: UsageClass);
    /// `glBufferData(target, data.len(), data, usage)`.
    fn buffer_data(&self, target: BufferTarget, data: &[u8], usage: UsageClass);
    /// `glBufferSubData`.
    fn buffer_sub_data(&self, target: BufferTarget, offset: usize, data: &[u8]);
    /// `glBufferStorage`: immutable storage, mappable with `flags`.
    fn buffer_storage(
        &self,
        target: BufferTarget,
        size: usize,
        data: Option<&[u8]>,
        flags: MapAccess,
    ) -> EngineResult<()>;
    /// `glMapBufferRange`. Returns `None` if the driver refuses the mapping.
    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        access: MapAccess,
    ) -> Option<MappedRange>;
    /// `glUnmapBuffer`. Returns `false` when the store was corrupted and must be refilled.
    fn unmap_buffer(&self, target: BufferTarget) -> bool;
    /// `glFlushMappedBufferRange`.
    fn flush_mapped_range(&self, target: BufferTarget, offset: usize, length: usize);
    /// `glGetBufferSubData`.
    fn get_buffer_sub_data(&self, target: BufferTarget, offset: usize, out: &mut [u8]);

    // --- Vertex arrays ---

    /// `glGenVertexArrays`.
    fn create_vertex_array(&self) -> EngineResult<VertexArrayId>;
    /// `glDeleteVertexArrays`.
    fn delete_vertex_array(&self, vao: VertexArrayId);
    /// Enables and describes a float attribute on the bound vertex array, sourcing it
    /// from the bound array buffer, and sets its divisor.
    fn configure_attribute(&self, attribute: &VertexAttribute);
    /// Disables `location` on the bound vertex array and resets its divisor.
    fn disable_attribute(&self, location: u32);
    /// The enabled attributes of `vao` and the buffers they read from.
    fn vertex_array_layout(&self, vao: VertexArrayId) -> Vec<VertexAttributeBinding>;

    // --- Textures ---

    /// `glGenTextures`.
    fn create_texture(&self) -> EngineResult<TextureId>;
    /// `glDeleteTextures`.
    fn delete_texture(&self, texture: TextureId);
    /// `glTexImage2D` on the texture bound to the active unit, with linear filtering and
    /// repeat wrapping.
    fn tex_image_2d(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: Option<&[u8]>,
    ) -> EngineResult<()>;
    /// `glGenerateMipmap` on the bound texture.
    fn generate_mipmap(&self);

    // --- Programs ---

    /// Compiles every stage, links them and deletes the stage objects.
    fn create_program(&self, stages: &[ShaderStageSource]) -> EngineResult<ProgramId>;
    /// `glDeleteProgram`.
    fn delete_program(&self, program: ProgramId);
    /// `glGetAttribLocation`. `None` for an inactive or unknown attribute.
    fn get_attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;
    /// `glGetUniformLocation`. `None` for an inactive or unknown uniform.
    fn get_uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    /// `glUniform*` on the program in use.
    fn set_uniform(&self, location: UniformLocation, value: &UniformValue);

    // --- Draws and compute ---

    /// `glDrawArrays`.
    fn draw_arrays(&self, mode: PrimitiveMode, first: u32, count: u32);
    /// `glDrawElements` with a byte offset into the bound element buffer.
    fn draw_elements(&self, mode: PrimitiveMode, count: u32, index_type: IndexType, offset: usize);
    /// `glDrawElementsInstanced`.
    fn draw_elements_instanced(
        &self,
        mode: PrimitiveMode,
        count: u32,
        index_type: IndexType,
        offset: usize,
        instances: u32,
    );
    /// `glDispatchCompute`.
    fn dispatch_compute(&self, groups_x: u32, groups_y: u32, groups_z: u32);
    /// `glMemoryBarrier`.
    fn memory_barrier(&self, barrier: MemoryBarrier);
}
