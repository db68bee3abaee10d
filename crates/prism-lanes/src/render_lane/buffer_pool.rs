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

//! Recycles GL buffer objects between frames.
//!
//! Buffers are grouped by usage class and matched by exact descriptor. The pool
//! lock is never held across a GL call: entries are resolved first, the lock is
//! released, then the GPU is touched with the resolved id.

use parking_lot::Mutex;
use prism_core::memory::{MemoryCategory, MemoryTracker};
use prism_core::renderer::{
    BufferId, BufferTarget, GpuContext, MapAccess, MappedRange, UsageClass,
};
use prism_core::{EngineError, EngineResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Streaming buffers at least this large may use unsynchronized mapping when
/// persistent mapping is unavailable.
pub const UNSYNCHRONIZED_MIN_BYTES: usize = 64 * 1024;

/// What a buffer is allocated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDescriptor {
    /// Size in bytes.
    pub size: usize,
    /// Binding target used for allocation.
    pub target: BufferTarget,
    /// Usage hint.
    pub usage: UsageClass,
}

impl BufferDescriptor {
    /// Shorthand constructor.
    pub const fn new(size: usize, target: BufferTarget, usage: UsageClass) -> Self {
        Self {
            size,
            target,
            usage,
        }
    }
}

/// How the CPU will touch a buffer's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPattern {
    /// Written once, drawn many times.
    WriteOnce,
    /// Rewritten every frame, never read back.
    StreamingWrite,
    /// Written by the GPU and read by the CPU.
    ReadBack,
    /// Both directions.
    ReadWrite,
}

/// How a buffer should be mapped for CPU writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingStrategy {
    /// Mapped once, kept mapped, explicitly flushed.
    Persistent,
    /// Mapped once, kept mapped, coherent with the GPU.
    Coherent,
    /// Remapped per write without synchronization.
    Unsynchronized,
    /// `glBufferData`/`glBufferSubData`.
    Traditional,
}

impl MappingStrategy {
    /// Returns `true` for the strategies that keep a mapping alive.
    pub fn is_persistent(self) -> bool {
        matches!(self, MappingStrategy::Persistent | MappingStrategy::Coherent)
    }
}

/// A pooled buffer handed out by [`GpuBufferPool::acquire_mapped`].
#[derive(Debug, Clone, Copy)]
pub struct PooledBuffer {
    /// The GL buffer.
    pub id: BufferId,
    /// The descriptor it was allocated with.
    pub descriptor: BufferDescriptor,
    /// The persistent mapping, when the buffer has one.
    pub mapping: Option<MappedRange>,
}

#[derive(Debug)]
struct Entry {
    id: BufferId,
    descriptor: BufferDescriptor,
    in_use: bool,
    last_used_frame: u64,
    mapping: Option<MappedRange>,
}

impl Entry {
    fn is_persistent(&self) -> bool {
        self.mapping.is_some()
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Entries currently owned by the pool.
    pub total_buffers: usize,
    /// Entries handed out and not yet released.
    pub in_use: usize,
    /// Buffers created since startup.
    pub allocations: u64,
    /// Acquires served by an existing entry.
    pub reuses: u64,
    /// Buffers deleted by cleanup.
    pub evictions: u64,
    /// Bytes held by the pool.
    pub total_bytes: u64,
    /// Highest `total_bytes` seen.
    pub peak_bytes: u64,
}

#[derive(Debug, Default)]
struct Inner {
    pools: [Vec<Entry>; 3],
    frame: u64,
    stats: BufferPoolStats,
}

impl Inner {
    fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.pools.iter().flatten()
    }

    fn find_mut(&mut self, id: BufferId) -> Option<&mut Entry> {
        self.pools.iter_mut().flatten().find(|e| e.id == id)
    }

    fn refresh_counts(&mut self) {
        self.stats.total_buffers = self.pools.iter().map(Vec::len).sum();
        self.stats.in_use = self.entries().filter(|e| e.in_use).count();
        self.stats.total_bytes = self.entries().map(|e| e.descriptor.size as u64).sum();
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.total_bytes);
    }
}

type PressureCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// The GPU buffer pool.
pub struct GpuBufferPool {
    ctx: GpuContext,
    memory: Arc<MemoryTracker>,
    inner: Mutex<Inner>,
    memory_cap: AtomicU64,
    on_pressure: Mutex<Option<PressureCallback>>,
}

impl std::fmt::Debug for GpuBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuBufferPool")
            .field("stats", &self.stats())
            .field("memory_cap", &self.memory_cap())
            .finish_non_exhaustive()
    }
}

impl GpuBufferPool {
    /// Creates an empty pool.
    pub fn new(ctx: GpuContext, memory: Arc<MemoryTracker>) -> Self {
        Self {
            ctx,
            memory,
            inner: Mutex::new(Inner::default()),
            memory_cap: AtomicU64::new(0),
            on_pressure: Mutex::new(None),
        }
    }

    /// Sets the total-byte cap checked by [`GpuBufferPool::cleanup_unused`]. Zero
    /// means unlimited.
    pub fn set_memory_cap(&self, bytes: u64) {
        self.memory_cap.store(bytes, Ordering::Relaxed);
    }

    /// The memory cap; zero means unlimited.
    pub fn memory_cap(&self) -> u64 {
        self.memory_cap.load(Ordering::Relaxed)
    }

    /// Installs the callback invoked with `(current_bytes, cap)` when the pool stays
    /// above its cap after evicting everything it can.
    pub fn set_pressure_callback(&self, callback: impl Fn(u64, u64) + Send + Sync + 'static) {
        *self.on_pressure.lock() = Some(Box::new(callback));
    }

    /// Records the frame used for idle tracking.
    pub fn begin_frame(&self, frame: u64) {
        self.inner.lock().frame = frame;
    }

    /// Returns a buffer matching `desc`, reusing a released one when possible.
    #[track_caller]
    pub fn acquire(&self, desc: BufferDescriptor) -> EngineResult<BufferId> {
        if let Some((id, _)) = self.reuse(desc, false) {
            return Ok(id);
        }
        let id = self.create(desc)?;
        self.insert(desc, id, None);
        Ok(id)
    }

    /// Like [`GpuBufferPool::acquire`], but allocates immutable storage with a
    /// persistent write mapping when the device supports it. Falls back to a plain
    /// buffer with no mapping otherwise.
    #[track_caller]
    pub fn acquire_mapped(&self, desc: BufferDescriptor) -> EngineResult<PooledBuffer> {
        let strategy =
            self.select_mapping_strategy(desc.target, desc.usage, desc.size, AccessPattern::StreamingWrite);
        if !strategy.is_persistent() {
            let id = self.acquire(desc)?;
            return Ok(PooledBuffer {
                id,
                descriptor: desc,
                mapping: None,
            });
        }

        if let Some((id, mapping)) = self.reuse(desc, true) {
            return Ok(PooledBuffer {
                id,
                descriptor: desc,
                mapping,
            });
        }

        let access = if strategy == MappingStrategy::Coherent {
            MapAccess::PERSISTENT_WRITE
        } else {
            MapAccess::PERSISTENT_FLUSHED_WRITE
        };
        let gl = self.ctx.gl("GpuBufferPool::acquire_mapped");
        let id = gl.create_buffer()?;
        gl.bind_buffer(desc.target, Some(id));
        let mapping = gl
            .buffer_storage(desc.target, desc.size, None, access)
            .ok()
            .and_then(|()| gl.map_buffer_range(desc.target, 0, desc.size, access));
        gl.bind_buffer(desc.target, None);
        self.ctx.mark_bindings_dirty();

        let Some(mapping) = mapping else {
            gl.delete_buffer(id);
            log::warn!("Persistent mapping of {} bytes failed; using a plain buffer", desc.size);
            let id = self.acquire(desc)?;
            return Ok(PooledBuffer {
                id,
                descriptor: desc,
                mapping: None,
            });
        };

        self.memory.record_alloc(MemoryCategory::Buffer, desc.size as u64);
        self.insert(desc, id, Some(mapping));
        Ok(PooledBuffer {
            id,
            descriptor: desc,
            mapping: Some(mapping),
        })
    }

    fn reuse(
        &self,
        desc: BufferDescriptor,
        persistent: bool,
    ) -> Option<(BufferId, Option<MappedRange>)> {
        let mut inner = self.inner.lock();
        let frame = inner.frame;
        let entry = inner.pools[desc.usage.index()]
            .iter_mut()
            .find(|e| !e.in_use && e.is_persistent() == persistent && e.descriptor == desc)?;
        entry.in_use = true;
        entry.last_used_frame = frame;
        let (id, mapping) = (entry.id, entry.mapping);
        inner.stats.reuses += 1;
        inner.refresh_counts();
        log::trace!("Reused pooled buffer {id:?} ({} bytes)", desc.size);
        Some((id, mapping))
    }

    #[track_caller]
    fn create(&self, desc: BufferDescriptor) -> EngineResult<BufferId> {
        if desc.size == 0 {
            return Err(EngineError::invalid_argument("cannot pool a zero-sized buffer"));
        }
        let gl = self.ctx.gl("GpuBufferPool::acquire");
        let id = gl.create_buffer()?;
        gl.bind_buffer(desc.target, Some(id));
        gl.buffer_data_size(desc.target, desc.size, desc.usage);
        gl.bind_buffer(desc.target, None);
        self.ctx.mark_bindings_dirty();
        if let Some(kind) = gl.get_error() {
            gl.delete_buffer(id);
            return Err(EngineError::new(
                kind,
                format!("allocating a {}-byte {:?} buffer", desc.size, desc.target),
            ));
        }
        self.memory.record_alloc(MemoryCategory::Buffer, desc.size as u64);
        Ok(id)
    }

    fn insert(&self, desc: BufferDescriptor, id: BufferId, mapping: Option<MappedRange>) {
        let mut inner = self.inner.lock();
        let frame = inner.frame;
        inner.pools[desc.usage.index()].push(Entry {
            id,
            descriptor: desc,
            in_use: true,
            last_used_frame: frame,
            mapping,
        });
        inner.stats.allocations += 1;
        inner.refresh_counts();
        log::trace!("Allocated pooled buffer {id:?} ({} bytes, {:?})", desc.size, desc.usage);
    }

    /// Returns a buffer to the pool. The GL object is kept for reuse.
    pub fn release(&self, id: BufferId) -> bool {
        let mut inner = self.inner.lock();
        let frame = inner.frame;
        let Some(entry) = inner.find_mut(id) else {
            log::warn!("Released buffer {id:?} does not belong to the pool");
            return false;
        };
        entry.in_use = false;
        entry.last_used_frame = frame;
        inner.refresh_counts();
        true
    }

    /// Marks every entry as free. Called once per frame.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.pools.iter_mut().flatten() {
            entry.in_use = false;
        }
        inner.refresh_counts();
    }

    /// Deletes free entries idle for more than `threshold_frames`, then, if the pool
    /// is still above its memory cap, the least recently used free entries. Invokes
    /// the pressure callback when the cap cannot be met. Must run on the GPU thread.
    #[track_caller]
    pub fn cleanup_unused(&self, threshold_frames: u64) -> usize {
        let cap = self.memory_cap();
        let (evicted, remaining) = {
            let mut inner = self.inner.lock();
            let frame = inner.frame;
            let mut evicted = Vec::new();
            for pool in &mut inner.pools {
                let mut i = 0;
                while i < pool.len() {
                    let e = &pool[i];
                    if !e.in_use && frame.saturating_sub(e.last_used_frame) > threshold_frames {
                        evicted.push(pool.swap_remove(i));
                    } else {
                        i += 1;
                    }
                }
            }

            if cap > 0 {
                let mut total: u64 = inner.entries().map(|e| e.descriptor.size as u64).sum();
                while total > cap {
                    let lru = inner
                        .pools
                        .iter()
                        .enumerate()
                        .flat_map(|(p, pool)| pool.iter().enumerate().map(move |(i, e)| (p, i, e)))
                        .filter(|(_, _, e)| !e.in_use)
                        .min_by_key(|(_, _, e)| e.last_used_frame)
                        .map(|(p, i, _)| (p, i));
                    let Some((p, i)) = lru else { break };
                    let entry = inner.pools[p].swap_remove(i);
                    total -= entry.descriptor.size as u64;
                    evicted.push(entry);
                }
            }

            inner.stats.evictions += evicted.len() as u64;
            inner.refresh_counts();
            (evicted, inner.stats.total_bytes)
        };

        if !evicted.is_empty() {
            let gl = self.ctx.gl("GpuBufferPool::cleanup_unused");
            for entry in &evicted {
                if entry.is_persistent() {
                    gl.bind_buffer(entry.descriptor.target, Some(entry.id));
                    gl.unmap_buffer(entry.descriptor.target);
                    gl.bind_buffer(entry.descriptor.target, None);
                }
                gl.delete_buffer(entry.id);
                self.memory
                    .record_free(MemoryCategory::Buffer, entry.descriptor.size as u64);
            }
            self.ctx.mark_bindings_dirty();
            log::debug!("Buffer pool evicted {} buffer(s)", evicted.len());
        }

        if cap > 0 && remaining > cap {
            log::warn!("Buffer pool holds {remaining} bytes, above its cap of {cap}");
            if let Some(callback) = self.on_pressure.lock().as_ref() {
                callback(remaining, cap);
            }
        }
        evicted.len()
    }

    /// Chooses how to map a buffer, given the device caps and the access pattern.
    pub fn select_mapping_strategy(
        &self,
        target: BufferTarget,
        usage: UsageClass,
        size: usize,
        access: AccessPattern,
    ) -> MappingStrategy {
        let caps = self.ctx.caps();
        let strategy = match access {
            AccessPattern::ReadBack | AccessPattern::ReadWrite => MappingStrategy::Traditional,
            AccessPattern::WriteOnce => MappingStrategy::Traditional,
            AccessPattern::StreamingWrite if usage == UsageClass::Static => {
                MappingStrategy::Traditional
            }
            AccessPattern::StreamingWrite if caps.persistent_mapping => {
                if caps.coherent_mapping {
                    MappingStrategy::Coherent
                } else {
                    MappingStrategy::Persistent
                }
            }
            AccessPattern::StreamingWrite
                if usage == UsageClass::Stream && size >= UNSYNCHRONIZED_MIN_BYTES =>
            {
                MappingStrategy::Unsynchronized
            }
            AccessPattern::StreamingWrite => MappingStrategy::Traditional,
        };
        log::trace!("Mapping strategy for {size} bytes {target:?}/{usage:?} ({access:?}): {strategy:?}");
        strategy
    }

    /// Preallocates free entries for common sizes.
    #[track_caller]
    pub fn prewarm(&self, descriptors: &[BufferDescriptor]) -> EngineResult<usize> {
        let mut created = 0;
        for &desc in descriptors {
            let id = self.create(desc)?;
            self.insert(desc, id, None);
            self.release(id);
            created += 1;
        }
        log::debug!("Prewarmed {created} pooled buffer(s)");
        Ok(created)
    }

    /// Current counters.
    pub fn stats(&self) -> BufferPoolStats {
        self.inner.lock().stats
    }

    /// Deletes every buffer. Must run on the GPU thread.
    #[track_caller]
    pub fn clear(&self) {
        let entries: Vec<Entry> = {
            let mut inner = self.inner.lock();
            let drained = inner.pools.iter_mut().flat_map(|p| p.drain(..)).collect();
            inner.refresh_counts();
            drained
        };
        if entries.is_empty() {
            return;
        }
        let gl = self.ctx.gl("GpuBufferPool::clear");
        for entry in entries {
            gl.delete_buffer(entry.id);
            self.memory
                .record_free(MemoryCategory::Buffer, entry.descriptor.size as u64);
        }
        self.ctx.mark_bindings_dirty();
    }
}

/// Maps a requested size onto a power-of-two bucket so streaming buffers of
/// slightly different sizes share pool entries.
pub fn bucket_size(bytes: usize) -> usize {
    bytes.max(256).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::renderer::GpuThreadGuard;
    use prism_infra::HeadlessDevice;

    fn pool_with(device: HeadlessDevice) -> (Arc<HeadlessDevice>, GpuBufferPool) {
        let device = Arc::new(device);
        let guard = Arc::new(GpuThreadGuard::new());
        guard.register_current().unwrap();
        let ctx = GpuContext::new(device.clone(), guard);
        (device, GpuBufferPool::new(ctx, Arc::new(MemoryTracker::new())))
    }

    const DESC: BufferDescriptor =
        BufferDescriptor::new(4096, BufferTarget::Array, UsageClass::Stream);

    #[test]
    fn release_then_acquire_returns_same_buffer() {
        let (device, pool) = pool_with(HeadlessDevice::new());
        let a = pool.acquire(DESC).unwrap();
        assert!(pool.release(a));
        let b = pool.acquire(DESC).unwrap();
        assert_eq!(a, b);
        assert_eq!(device.call_count("create_buffer"), 1);
        assert_eq!(pool.stats().reuses, 1);
    }

    #[test]
    fn in_use_entries_are_not_shared() {
        let (_device, pool) = pool_with(HeadlessDevice::new());
        let a = pool.acquire(DESC).unwrap();
        let b = pool.acquire(DESC).unwrap();
        assert_ne!(a, b);
        pool.reset();
        assert_eq!(pool.stats().in_use, 0);
    }

    #[test]
    fn cleanup_evicts_idle_entries() {
        let (device, pool) = pool_with(HeadlessDevice::new());
        let a = pool.acquire(DESC).unwrap();
        pool.release(a);
        pool.begin_frame(10);
        assert_eq!(pool.cleanup_unused(5), 1);
        assert_eq!(device.live_buffers(), 0);
        assert_ne!(pool.acquire(DESC).unwrap(), a);
    }

    #[test]
    fn memory_cap_evicts_then_reports_pressure() {
        let (_device, pool) = pool_with(HeadlessDevice::new());
        pool.set_memory_cap(6000);
        let reports = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&reports);
        pool.set_pressure_callback(move |current, cap| {
            assert!(current > cap);
            seen.fetch_add(1, Ordering::Relaxed);
        });

        let a = pool.acquire(DESC).unwrap();
        let _b = pool.acquire(DESC).unwrap();
        let _c = pool.acquire(DESC).unwrap();
        pool.release(a);
        assert_eq!(pool.cleanup_unused(1000), 1);
        assert_eq!(pool.stats().total_bytes, 8192);
        assert_eq!(reports.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn mapping_strategy_follows_caps_and_access() {
        let (_device, pool) = pool_with(HeadlessDevice::new());
        let t = BufferTarget::Array;
        assert_eq!(
            pool.select_mapping_strategy(t, UsageClass::Stream, 1024, AccessPattern::StreamingWrite),
            MappingStrategy::Coherent
        );
        assert_eq!(
            pool.select_mapping_strategy(t, UsageClass::Stream, 1024, AccessPattern::ReadBack),
            MappingStrategy::Traditional
        );

        let (_legacy, pool) = pool_with(HeadlessDevice::legacy());
        assert_eq!(
            pool.select_mapping_strategy(t, UsageClass::Stream, 1 << 20, AccessPattern::StreamingWrite),
            MappingStrategy::Unsynchronized
        );
        assert_eq!(
            pool.select_mapping_strategy(t, UsageClass::Dynamic, 1024, AccessPattern::StreamingWrite),
            MappingStrategy::Traditional
        );
    }

    #[test]
    fn mapped_acquire_keeps_mapping_across_reuse() {
        let (device, pool) = pool_with(HeadlessDevice::new());
        let first = pool.acquire_mapped(DESC).unwrap();
        let mapping = first.mapping.expect("persistent caps map the buffer");
        assert!(mapping.write(0, &[1, 2, 3, 4]));
        pool.release(first.id);

        let again = pool.acquire_mapped(DESC).unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(device.buffer_contents(first.id).unwrap()[..4], [1, 2, 3, 4]);

        let plain = pool.acquire(DESC).unwrap();
        assert_ne!(plain, first.id, "plain acquires never take persistent entries");
    }

    #[test]
    fn prewarmed_entries_serve_first_acquire() {
        let (device, pool) = pool_with(HeadlessDevice::new());
        assert_eq!(pool.prewarm(&[DESC, DESC]).unwrap(), 2);
        device.reset_counters();
        pool.acquire(DESC).unwrap();
        assert_eq!(device.call_count("create_buffer"), 0);
        assert_eq!(bucket_size(3000), 4096);
    }
}
