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

//! GPU memory accounting.
//!
//! A [`MemoryTracker`] is a set of atomic counters that the resource manager and the
//! buffer pool update on every GPU allocation and free. Any thread may read a
//! consistent-enough [`GpuMemoryStats`] snapshot without taking a lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// The kind of GPU object an allocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryCategory {
    /// Pooled or standalone buffer objects (instance streams, SSBOs, merged batches).
    Buffer,
    /// Texture storage.
    Texture,
    /// Vertex and index buffers owned by meshes.
    Mesh,
}

impl MemoryCategory {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        match self {
            MemoryCategory::Buffer => 0,
            MemoryCategory::Texture => 1,
            MemoryCategory::Mesh => 2,
        }
    }
}

#[derive(Debug, Default)]
struct CategoryCounters {
    current_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
}

/// A point-in-time view of one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryStats {
    /// Bytes currently allocated.
    pub current_bytes: u64,
    /// Highest value `current_bytes` has reached.
    pub peak_bytes: u64,
    /// Number of allocations recorded.
    pub allocations: u64,
    /// Number of frees recorded.
    pub frees: u64,
}

/// A snapshot of every category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuMemoryStats {
    /// Buffer objects.
    pub buffers: CategoryStats,
    /// Textures.
    pub textures: CategoryStats,
    /// Mesh vertex/index storage.
    pub meshes: CategoryStats,
}

impl GpuMemoryStats {
    /// Bytes currently allocated across all categories.
    pub fn total_current_bytes(&self) -> u64 {
        self.buffers.current_bytes + self.textures.current_bytes + self.meshes.current_bytes
    }
}

/// Lock-free GPU allocation counters.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    categories: [CategoryCounters; MemoryCategory::COUNT],
}

impl MemoryTracker {
    /// Creates a tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an allocation of `bytes` in `category`.
    pub fn record_alloc(&self, category: MemoryCategory, bytes: u64) {
        let c = &self.categories[category.index()];
        let now = c.current_bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        c.peak_bytes.fetch_max(now, Ordering::Relaxed);
        c.allocations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a free of `bytes` in `category`. Never underflows.
    pub fn record_free(&self, category: MemoryCategory, bytes: u64) {
        let c = &self.categories[category.index()];
        let _ = c
            .current_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(bytes))
            });
        c.frees.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes currently allocated in `category`.
    pub fn current_bytes(&self, category: MemoryCategory) -> u64 {
        self.categories[category.index()]
            .current_bytes
            .load(Ordering::Relaxed)
    }

    fn category_stats(&self, category: MemoryCategory) -> CategoryStats {
        let c = &self.categories[category.index()];
        CategoryStats {
            current_bytes: c.current_bytes.load(Ordering::Relaxed),
            peak_bytes: c.peak_bytes.load(Ordering::Relaxed),
            allocations: c.allocations.load(Ordering::Relaxed),
            frees: c.frees.load(Ordering::Relaxed),
        }
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> GpuMemoryStats {
        GpuMemoryStats {
            buffers: self.category_stats(MemoryCategory::Buffer),
            textures: self.category_stats(MemoryCategory::Texture),
            meshes: self.category_stats(MemoryCategory::Mesh),
        }
    }
}
