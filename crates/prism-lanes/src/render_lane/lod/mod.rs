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

//! Instanced rendering of pre-selected LOD levels, with optional GPU culling.

mod culling;
mod group;
mod renderer;
mod streams;

pub use self::culling::{
    CullingCamera, CullingResult, GpuCuller, BINDING_COUNTER, BINDING_LOD_COUNTS,
    BINDING_MATRICES, BINDING_RADII, BINDING_VISIBLE, CULLING_SHADER_SOURCE,
    CULLING_WORKGROUP_SIZE,
};
pub use self::group::{EntityId, GroupKey, InstanceData, LodGroup, MAX_LOD_LEVELS};
pub use self::renderer::{
    LodInstancedRenderer, LodRenderStats, FALLBACK_INSTANCE_LOCATIONS,
    INSTANCE_COLOR_ATTRIBUTE, INSTANCE_PARAMS_ATTRIBUTE, INSTANCE_ROW_ATTRIBUTES,
};
pub use self::streams::{InstanceStream, MeshStreams, ParamsEntry, MATRIX_STRIDE, PARAMS_STRIDE, VEC4_STRIDE};
