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

//! Rendering lane - hot path for GL submission.
//!
//! Everything in here runs on the GPU thread except the recording half of the
//! [`BatchManager`], which accepts submissions from any thread.

mod buffer_pool;
mod material_cache;
mod state_cache;

pub mod batch;
pub mod lod;

pub use batch::{
    BatchKey, BatchManager, BatchRoute, MeshRenderable, PipelineKey, RenderContext, Renderable,
    RenderableKind,
};
pub use buffer_pool::{
    bucket_size, AccessPattern, BufferDescriptor, BufferPoolStats, GpuBufferPool,
    MappingStrategy, PooledBuffer, UNSYNCHRONIZED_MIN_BYTES,
};
pub use lod::{CullingCamera, CullingResult, GpuCuller, LodInstancedRenderer, LodRenderStats};
pub use material_cache::{bind_material, MaterialStateCache};
pub use state_cache::{StateCache, StateCacheStats};
