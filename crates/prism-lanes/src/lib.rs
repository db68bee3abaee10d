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

//! # Prism Lanes
//!
//! The hot paths of the render core. Render lanes cache GL state, recycle buffers,
//! batch and instance draws; asset lanes decode files on worker threads and stage them
//! for upload on the GPU thread.

#![warn(missing_docs)]

pub mod asset_lane;
pub mod render_lane;

pub use asset_lane::{
    AssetLoaderLane, LoadError, LoadedModel, MeshLoader, ModelData, ModelLibrary,
    ModelLoadOptions, ModelLoader, TextureLoader,
};
pub use render_lane::{
    BatchManager, GpuBufferPool, LodInstancedRenderer, MeshRenderable, RenderContext, Renderable,
    StateCache,
};
