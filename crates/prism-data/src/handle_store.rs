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

//! A generational slot store for shared resources.
//!
//! Each slot keeps its resource behind an `Arc` so that readers can hold on to a
//! resource after releasing the store lock. A freed slot bumps its generation and goes
//! on a free list; the next allocation reuses the id with the new generation, which
//! makes every handle to the previous occupant permanently stale. A slot whose
//! generation is exhausted is retired instead of reused, so generations never wrap.

use parking_lot::Mutex;
use prism_core::Handle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct Slot<T> {
    resource: Option<Arc<T>>,
    generation: u32,
    name: String,
    last_access_frame: u64,
}

impl<T> Slot<T> {
    #[inline]
    fn is_active(&self) -> bool {
        self.resource.is_some()
    }

    /// Bumps the generation of an emptied slot. Returns `false` when the generation is
    /// exhausted; the slot is then retired and must not go back on the free list.
    fn vacate(&mut self) -> bool {
        self.name.clear();
        match self.generation.checked_add(1) {
            Some(next) => {
                self.generation = next;
                true
            }
            None => {
                log::debug!("Retiring slot with exhausted generation {}", self.generation);
                false
            }
        }
    }
}

#[derive(Debug)]
struct Inner<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    live: usize,
}

/// A thread-safe, generation-checked store of `Arc<T>` resources.
#[derive(Debug)]
pub struct HandleStore<T> {
    inner: Mutex<Inner<T>>,
    current_frame: AtomicU64,
}

impl<T> Default for HandleStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleStore<T> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free_list: Vec::new(),
                live: 0,
            }),
            current_frame: AtomicU64::new(0),
        }
    }

    /// Sets the frame number stamped on slots when they are accessed.
    pub fn set_current_frame(&self, frame: u64) {
        self.current_frame.store(frame, Ordering::Relaxed);
    }

    /// The frame number stamped on accesses.
    pub fn current_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Relaxed)
    }

    /// Stores `resource` and returns its handle. Freed ids are reused first.
    pub fn allocate(&self, resource: T, name: impl Into<String>, frame: u64) -> Handle<T> {
        self.allocate_shared(Arc::new(resource), name, frame)
    }

    /// Stores an already shared resource.
    pub fn allocate_shared(
        &self,
        resource: Arc<T>,
        name: impl Into<String>,
        frame: u64,
    ) -> Handle<T> {
        let name = name.into();
        let mut inner = self.inner.lock();
        inner.live += 1;
        if let Some(id) = inner.free_list.pop() {
            let slot = &mut inner.slots[id as usize];
            slot.resource = Some(resource);
            slot.name = name;
            slot.last_access_frame = frame;
            return Handle::new(id, slot.generation);
        }

        let id = inner.slots.len() as u32;
        inner.slots.push(Slot {
            resource: Some(resource),
            generation: 0,
            name,
            last_access_frame: frame,
        });
        Handle::new(id, 0)
    }

    /// Frees the slot `handle` points to and returns the resource it held.
    ///
    /// Freeing a stale handle is a no-op that returns `None`.
    pub fn free(&self, handle: Handle<T>) -> Option<Arc<T>> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(handle.id as usize)?;
        if slot.generation != handle.generation || !slot.is_active() {
            return None;
        }
        let resource = slot.resource.take();
        let reusable = slot.vacate();
        if reusable {
            inner.free_list.push(handle.id);
        }
        inner.live -= 1;
        resource
    }

    fn resolve<'a>(inner: &'a mut Inner<T>, handle: Handle<T>) -> Option<&'a mut Slot<T>> {
        inner
            .slots
            .get_mut(handle.id as usize)
            .filter(|slot| slot.generation == handle.generation && slot.is_active())
    }

    /// Returns a shared reference to the resource, or `None` for a stale handle.
    pub fn get(&self, handle: Handle<T>) -> Option<Arc<T>> {
        let frame = self.current_frame();
        let mut inner = self.inner.lock();
        let slot = Self::resolve(&mut inner, handle)?;
        slot.last_access_frame = frame;
        slot.resource.clone()
    }

    /// Same as [`HandleStore::get`]; the name makes the ownership transfer explicit.
    #[inline]
    pub fn get_shared(&self, handle: Handle<T>) -> Option<Arc<T>> {
        self.get(handle)
    }

    /// Runs `f` on the resource while the store lock is held.
    ///
    /// `f` must not call back into the same store.
    pub fn with<R>(&self, handle: Handle<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        let frame = self.current_frame();
        let mut inner = self.inner.lock();
        let slot = Self::resolve(&mut inner, handle)?;
        slot.last_access_frame = frame;
        slot.resource.as_deref().map(f)
    }

    /// Returns `true` if `handle` points at a live resource.
    pub fn is_valid(&self, handle: Handle<T>) -> bool {
        let mut inner = self.inner.lock();
        Self::resolve(&mut inner, handle).is_some()
    }

    /// Replaces the resource behind `handle`, keeping its id and generation.
    ///
    /// Returns the previous resource, or `None` (and drops `resource`) for a stale
    /// handle.
    pub fn reload(&self, handle: Handle<T>, resource: T) -> Option<Arc<T>> {
        let frame = self.current_frame();
        let mut inner = self.inner.lock();
        let slot = Self::resolve(&mut inner, handle)?;
        slot.last_access_frame = frame;
        slot.resource.replace(Arc::new(resource))
    }

    /// The label given at allocation.
    pub fn name_of(&self, handle: Handle<T>) -> Option<String> {
        let mut inner = self.inner.lock();
        Self::resolve(&mut inner, handle).map(|slot| slot.name.clone())
    }

    /// Frees every slot idle for more than `threshold` frames that nobody outside the
    /// store still references. Returns the evicted resources.
    pub fn cleanup_unused_collect(
        &self,
        current_frame: u64,
        threshold: u64,
    ) -> Vec<(Handle<T>, Arc<T>)> {
        let mut inner = self.inner.lock();
        let mut evicted = Vec::new();
        let Inner {
            slots,
            free_list,
            live,
        } = &mut *inner;

        for (id, slot) in slots.iter_mut().enumerate() {
            let idle = current_frame.saturating_sub(slot.last_access_frame);
            let unshared = slot
                .resource
                .as_ref()
                .is_some_and(|r| Arc::strong_count(r) == 1);
            if idle > threshold && unshared {
                let handle = Handle::new(id as u32, slot.generation);
                if let Some(resource) = slot.resource.take() {
                    if slot.vacate() {
                        free_list.push(id as u32);
                    }
                    *live -= 1;
                    evicted.push((handle, resource));
                }
            }
        }
        evicted
    }

    /// Like [`HandleStore::cleanup_unused_collect`], returning only the count.
    pub fn cleanup_unused(&self, current_frame: u64, threshold: u64) -> usize {
        self.cleanup_unused_collect(current_frame, threshold).len()
    }

    /// Calls `f` for every live resource. The store lock is released before `f` runs,
    /// so `f` may use the store.
    pub fn for_each(&self, mut f: impl FnMut(Handle<T>, &T)) {
        for (handle, resource) in self.snapshot() {
            f(handle, &resource);
        }
    }

    /// Handles and resources of every live slot.
    pub fn snapshot(&self) -> Vec<(Handle<T>, Arc<T>)> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                slot.resource
                    .as_ref()
                    .map(|r| (Handle::new(id as u32, slot.generation), Arc::clone(r)))
            })
            .collect()
    }

    /// Number of live resources.
    pub fn len(&self) -> usize {
        self.inner.lock().live
    }

    /// Returns `true` if no resource is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> HandleStore<T> {
    /// Mutates the resource in place (cloning it first if other owners still hold it).
    /// Returns `None` for a stale handle.
    pub fn update<R>(&self, handle: Handle<T>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let frame = self.current_frame();
        let mut inner = self.inner.lock();
        let slot = Self::resolve(&mut inner, handle)?;
        slot.last_access_frame = frame;
        slot.resource.as_mut().map(|r| f(Arc::make_mut(r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn freed_slot_is_reused_with_new_generation() {
        let store = HandleStore::new();
        let t = store.allocate(1u32, "tex", 0);
        assert_eq!(store.free(t).as_deref(), Some(&1));
        let t2 = store.allocate(2u32, "tex2", 0);

        assert_eq!(t.id, t2.id);
        assert_eq!(t2.generation, t.generation + 1);
        assert!(store.get(t).is_none());
        assert_eq!(store.get(t2).as_deref(), Some(&2));
        assert_ne!(t, t2);
    }

    #[test]
    fn exhausted_generation_retires_the_slot() {
        let store = HandleStore::new();
        let old = store.allocate(1u32, "old", 0);
        store.inner.lock().slots[old.id as usize].generation = u32::MAX - 1;
        let near_end = Handle::new(old.id, u32::MAX - 1);

        store.free(near_end);
        let last = store.allocate(2u32, "last", 0);
        assert_eq!(last.id, old.id);
        assert_eq!(last.generation, u32::MAX);

        assert_eq!(store.free(last).as_deref(), Some(&2));
        let fresh = store.allocate(3u32, "fresh", 0);
        assert_ne!(fresh.id, old.id, "an exhausted slot is never handed out again");
        assert_eq!(fresh.generation, 0);
        for stale in [old, near_end, last, Handle::new(old.id, 0)] {
            assert!(!store.is_valid(stale));
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn eviction_retires_an_exhausted_slot() {
        let store = HandleStore::new();
        let h = store.allocate(7u32, "idle", 0);
        store.inner.lock().slots[h.id as usize].generation = u32::MAX;
        let h = Handle::new(h.id, u32::MAX);

        assert_eq!(store.cleanup_unused(10, 1), 1);
        let next = store.allocate(8u32, "next", 10);
        assert_ne!(next.id, h.id);
        assert!(!store.is_valid(h));
    }

    #[test]
    fn double_free_is_idempotent() {
        let store = HandleStore::new();
        let h = store.allocate("a".to_string(), "a", 0);
        assert!(store.free(h).is_some());
        assert!(store.free(h).is_none());
        assert!(!store.is_valid(h));
        assert_eq!(store.len(), 0);
        assert!(store.reload(h, "b".to_string()).is_none());
    }

    #[test]
    fn reload_keeps_handle_identity() {
        let store = HandleStore::new();
        let h = store.allocate(10u32, "n", 0);
        let old = store.reload(h, 11).unwrap();
        assert_eq!(*old, 10);
        assert_eq!(store.get(h).as_deref(), Some(&11));
        assert!(store.is_valid(h));
        assert_eq!(store.name_of(h).as_deref(), Some("n"));
    }

    #[test]
    fn cleanup_skips_recent_and_referenced_slots() {
        let store = HandleStore::new();
        let idle = store.allocate(1u32, "idle", 0);
        let held = store.allocate(2u32, "held", 0);
        let fresh = store.allocate(3u32, "fresh", 95);
        let keep_alive = store.get(held).unwrap();

        store.set_current_frame(0);
        let evicted = store.cleanup_unused_collect(100, 10);
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].0, idle);
        assert!(!store.is_valid(idle));
        assert!(store.is_valid(held));
        assert!(store.is_valid(fresh));
        drop(keep_alive);
    }

    #[test]
    fn update_mutates_in_place() {
        let store = HandleStore::new();
        let h = store.allocate(vec![1, 2], "v", 0);
        store.update(h, |v| v.push(3));
        assert_eq!(store.with(h, |v| v.len()), Some(3));
    }

    #[test]
    fn concurrent_allocations_are_distinct() {
        let store = Arc::new(HandleStore::new());
        let workers: Vec<_> = (0..4)
            .map(|w| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..250)
                        .map(|i| store.allocate(w * 1000 + i, "", 0))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut handles: Vec<_> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
        handles.sort();
        handles.dedup();
        assert_eq!(handles.len(), 1000);
        assert_eq!(store.len(), 1000);

        let mut count = 0;
        store.for_each(|_, _| count += 1);
        assert_eq!(count, 1000);
    }
}
