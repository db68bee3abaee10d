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

//! Asset lane - CPU-side decoding of texture, mesh and model files.
//!
//! Decoding never touches the GPU and may run on any worker thread. Each lane pairs its
//! decode step with an upload step that must run on the GPU thread.

mod loader;
mod loading;

pub use loader::{AssetLoaderLane, LoadError};
pub use loading::*;
