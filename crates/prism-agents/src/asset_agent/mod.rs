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

//! Acts as the **[A]gent** for the asset pipeline.
//!
//! Requests are split in two: a decode step that runs on the task scheduler and never
//! touches the GPU, and an upload step that runs on the GPU-owner thread when it drains
//! the loader's completed queue. Decoding itself is delegated to the `asset_lane`
//! loaders.

mod loader;
mod task;

pub use loader::*;
pub use task::*;
