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

//! # Prism Data
//!
//! The CPU-side data model: generational handle stores, the GPU-backed resource types,
//! the resource manager with its dependency graph and hot-reload queue, and the
//! transform hierarchy.

#![warn(missing_docs)]

pub mod dependency;
pub mod handle_store;
pub mod hot_reload;
pub mod resource_manager;
pub mod resources;
pub mod transform;

pub use dependency::{DependencyGraph, ResourceId};
pub use handle_store::HandleStore;
pub use hot_reload::HotReloadWatcher;
pub use resource_manager::{ReloadRequest, ResourceManager, ResourceStats, TextureDecoder};
pub use resources::{Material, Mesh, PipelineState, Shader, Texture, TextureStaging, Vertex};
pub use transform::{Space, Transform, TransformHierarchy, TransformValue, WorldTransform};
