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

//! Defines the generational `Handle<T>` used to refer to every engine resource.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A typed reference to a resource slot.
///
/// It combines a slot id with a generation count. When a slot is freed its id can be
/// recycled, but the generation is incremented, so handles to the previous occupant
/// stop resolving. The type parameter only ties the handle to a resource kind; it is
/// never stored.
pub struct Handle<T> {
    /// The index of the slot in its store.
    pub id: u32,
    /// The generation of the slot at allocation time.
    pub generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// A handle that never resolves.
    pub const INVALID: Self = Self::new(u32::MAX, u32::MAX);

    /// Creates a handle from raw parts.
    #[inline]
    pub const fn new(id: u32, generation: u32) -> Self {
        Self {
            id,
            generation,
            _marker: PhantomData,
        }
    }

    /// Returns `true` if this is [`Handle::INVALID`].
    #[inline]
    pub fn is_null(&self) -> bool {
        self.id == u32::MAX && self.generation == u32::MAX
    }

    /// Packs the handle into a single `u64` (`generation << 32 | id`).
    #[inline]
    pub fn to_bits(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.id)
    }

    /// Reinterprets the handle as a handle to another resource kind.
    #[inline]
    pub fn cast<U>(self) -> Handle<U> {
        Handle::new(self.id, self.generation)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.generation.hash(state);
    }
}

impl<T> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.id, self.generation).cmp(&(other.id, other.generation))
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = std::any::type_name::<T>();
        let short = full.rsplit("::").next().unwrap_or(full);
        write!(f, "Handle<{short}>({}v{})", self.id, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Dummy;

    #[test]
    fn equality_uses_id_and_generation() {
        let a: Handle<Dummy> = Handle::new(3, 0);
        let b: Handle<Dummy> = Handle::new(3, 1);
        assert_ne!(a, b);
        assert_eq!(a, Handle::new(3, 0));

        let set: HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn invalid_handle_is_null() {
        assert!(Handle::<Dummy>::INVALID.is_null());
        assert!(Handle::<Dummy>::default().is_null());
        assert!(!Handle::<Dummy>::new(0, 0).is_null());
    }

    #[test]
    fn bits_pack_generation_high() {
        let h: Handle<Dummy> = Handle::new(7, 2);
        assert_eq!(h.to_bits(), (2u64 << 32) | 7);
        assert!(format!("{h:?}").contains("Dummy"));
    }
}
