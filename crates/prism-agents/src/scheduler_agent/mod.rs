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

//! Acts as the **[A]gent** for CPU work: a priority thread pool shared by the asset
//! pipeline and any other background job.
//!
//! Tasks never touch the GPU. Anything that must reach the GPU is handed back to the
//! GPU-owner thread, the way the async loader does with its upload queue.

mod scheduler;
mod task;

pub use scheduler::*;
pub use task::*;
