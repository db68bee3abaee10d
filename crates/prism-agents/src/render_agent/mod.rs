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

//! Acts as the **[A]gent** for the rendering subsystem.
//!
//! The [`Renderer`] owns the per-frame loop and delegates the GPU work to the render
//! lanes: the state cache, the buffer pool, the batch manager and the LOD instanced
//! renderer. Making the finished frame visible is the job of a [`Presenter`] supplied by
//! the windowing layer.

mod presenter;
mod renderer;

pub use presenter::*;
pub use renderer::*;
