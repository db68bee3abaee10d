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

//! Backend-agnostic rendering contracts.
//!
//! This module defines the vocabulary shared by the lanes and agents: the
//! [`GpuDevice`] trait and its value types, the [`GpuThreadGuard`] that pins GPU work
//! to one thread, the [`GpuContext`] that combines them, and the per-frame
//! [`FrameStats`]. Concrete backends live in `prism-infra`.

pub mod api;
pub mod context;
pub mod device;
pub mod stats;
pub mod thread_guard;

pub use self::api::*;
pub use self::context::GpuContext;
pub use self::device::GpuDevice;
pub use self::stats::FrameStats;
pub use self::thread_guard::GpuThreadGuard;
