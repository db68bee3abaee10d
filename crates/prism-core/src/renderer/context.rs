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

//! Pairs a [`GpuDevice`] with the [`GpuThreadGuard`] that polices it.

use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::{GpuCaps, GpuDevice, GpuThreadGuard};

/// The handle every GPU-touching component holds.
///
/// Cloning is cheap; all clones share the same device and guard.
#[derive(Debug, Clone)]
pub struct GpuContext {
    device: Arc<dyn GpuDevice>,
    guard: Arc<GpuThreadGuard>,
    caps: GpuCaps,
    binding_epoch: Arc<AtomicU64>,
}

impl GpuContext {
    /// Creates a context. The caps are queried once here.
    pub fn new(device: Arc<dyn GpuDevice>, guard: Arc<GpuThreadGuard>) -> Self {
        let caps = device.caps();
        Self {
            device,
            guard,
            caps,
            binding_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Validates the calling thread, then returns the device.
    ///
    /// `function` names the engine operation for the violation log; file and line come
    /// from the caller. The device is returned even on violation so that non-strict
    /// builds keep running.
    #[track_caller]
    pub fn gl(&self, function: &str) -> &dyn GpuDevice {
        let loc = Location::caller();
        self.guard.validate(loc.file(), loc.line(), function);
        self.device.as_ref()
    }

    /// Returns `true` if the calling thread owns the context.
    pub fn is_gpu_thread(&self) -> bool {
        self.guard.is_gpu_thread()
    }

    /// The device capabilities.
    pub fn caps(&self) -> &GpuCaps {
        &self.caps
    }

    /// The thread guard.
    pub fn guard(&self) -> &Arc<GpuThreadGuard> {
        &self.guard
    }

    /// Signals that bindings were changed without going through the state cache
    /// (resource uploads, third-party code). The state cache compares this epoch on
    /// every binding call and drops its binding mirror when it moved.
    pub fn mark_bindings_dirty(&self) {
        self.binding_epoch.fetch_add(1, Ordering::Release);
    }

    /// The current binding epoch.
    pub fn binding_epoch(&self) -> u64 {
        self.binding_epoch.load(Ordering::Acquire)
    }

    /// The device, without thread validation. For read-only queries and tests.
    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }
}
