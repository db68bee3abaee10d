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

//! Submission batching.
//!
//! Renderables are classified on a worker thread into immediate draws, CPU-merged
//! batches or GPU-instanced batches according to the [`BatchingMode`], then drawn on
//! the GPU thread by [`BatchManager::flush`].
//!
//! [`BatchingMode`]: prism_core::BatchingMode

mod batch;
mod key;
mod manager;
mod renderable;
mod storage;

pub use self::batch::{
    Batch, BatchEntry, FALLBACK_INSTANCE_MATRIX_LOCATION, INSTANCE_MATRIX_ATTRIBUTE,
};
pub use self::key::{BatchKey, PipelineKey, RenderableKind};
pub use self::manager::BatchManager;
pub use self::renderable::{
    BatchRoute, BatchableItem, MeshRenderable, RenderContext, Renderable, MODEL_UNIFORM,
    VIEW_PROJECTION_UNIFORM,
};
pub use self::storage::{BatchStorage, RenderCommand, DEFAULT_MAX_IDLE_FRAMES};
