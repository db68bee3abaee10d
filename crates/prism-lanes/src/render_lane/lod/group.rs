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

//! Per-instance payloads and the groups they are binned into.

use prism_core::math::{LinearRgba, Mat4, Vec4};
use prism_core::Handle;
use prism_data::{Material, Mesh};
use std::collections::HashMap;

/// Identifier of the scene entity an instance belongs to.
pub type EntityId = u64;

/// Number of LOD levels tracked by statistics and GPU culling.
pub const MAX_LOD_LEVELS: usize = 4;

/// The data streamed for one instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceData {
    /// Object-to-world matrix, column-major.
    pub matrix: Mat4,
    /// Per-instance tint.
    pub color: LinearRgba,
    /// Free-form shader parameters.
    pub params: Vec4,
    /// Identifier stored after `params`, for passes that map a drawn slot back to
    /// its instance.
    pub instance_id: u32,
}

impl InstanceData {
    /// An untinted instance at `matrix`.
    pub fn from_matrix(matrix: Mat4) -> Self {
        Self {
            matrix,
            color: LinearRgba::WHITE,
            params: Vec4::ZERO,
            instance_id: 0,
        }
    }

    /// Replaces the instance id.
    pub fn with_instance_id(mut self, instance_id: u32) -> Self {
        self.instance_id = instance_id;
        self
    }
}

impl Default for InstanceData {
    fn default() -> Self {
        Self::from_matrix(Mat4::IDENTITY)
    }
}

/// What instances must share to be drawn by one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    /// Source mesh.
    pub mesh: Handle<Mesh>,
    /// Material.
    pub material: Handle<Material>,
    /// LOD level chosen by the caller.
    pub lod_level: u32,
}

/// The instances of one `(mesh, material, lod)` combination for a frame.
#[derive(Debug, Clone)]
pub struct LodGroup {
    /// Identity.
    pub key: GroupKey,
    /// Material sort key, refreshed before drawing.
    pub sort_key: u64,
    /// Payloads in submission order.
    pub instances: Vec<InstanceData>,
    /// Owning entity of each payload.
    pub entities: Vec<EntityId>,
    /// Set when instances change; cleared after upload.
    pub dirty: bool,
    /// Instance count at the last upload.
    pub last_uploaded_count: usize,
}

impl LodGroup {
    fn new(key: GroupKey) -> Self {
        Self {
            key,
            sort_key: 0,
            instances: Vec::new(),
            entities: Vec::new(),
            dirty: false,
            last_uploaded_count: 0,
        }
    }

    /// Appends one instance.
    pub fn push(&mut self, entity: EntityId, data: InstanceData) {
        self.instances.push(data);
        self.entities.push(entity);
        self.dirty = true;
    }

    /// `true` if the GPU copy is out of date.
    pub fn needs_upload(&self) -> bool {
        self.dirty || self.last_uploaded_count != self.instances.len()
    }

    /// Records a completed upload.
    pub fn mark_uploaded(&mut self) {
        self.dirty = false;
        self.last_uploaded_count = self.instances.len();
    }

    /// Drops the instances, keeping capacity.
    pub fn clear(&mut self) {
        if !self.instances.is_empty() {
            self.dirty = true;
        }
        self.instances.clear();
        self.entities.clear();
    }
}

/// An instance waiting in the per-frame FIFO.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingInstance {
    pub key: GroupKey,
    pub entity: EntityId,
    pub data: InstanceData,
    pub sequence: u64,
}

/// One side of the double-buffered group set.
#[derive(Debug, Default)]
pub(crate) struct GroupSet {
    pub groups: HashMap<GroupKey, LodGroup>,
    pub sequence: Vec<u64>,
    pub order: Vec<GroupKey>,
}

impl GroupSet {
    pub fn reserve(&mut self, groups: usize) {
        self.groups.reserve(groups);
    }

    pub fn insert(&mut self, key: GroupKey, entity: EntityId, data: InstanceData, sequence: u64) {
        self.groups
            .entry(key)
            .or_insert_with(|| LodGroup::new(key))
            .push(entity, data);
        self.order.push(key);
        self.sequence.push(sequence);
    }

    pub fn instance_count(&self) -> usize {
        self.order.len()
    }

    /// Empties every group and returns the instances in submission order.
    pub fn drain_ordered(&mut self) -> Vec<PendingInstance> {
        let mut cursors: HashMap<GroupKey, usize> = HashMap::with_capacity(self.groups.len());
        let mut out = Vec::with_capacity(self.order.len());
        for (key, sequence) in self.order.drain(..).zip(self.sequence.drain(..)) {
            let Some(group) = self.groups.get(&key) else {
                continue;
            };
            let cursor = cursors.entry(key).or_insert(0);
            if let (Some(data), Some(entity)) =
                (group.instances.get(*cursor), group.entities.get(*cursor))
            {
                out.push(PendingInstance {
                    key,
                    entity: *entity,
                    data: *data,
                    sequence,
                });
            }
            *cursor += 1;
        }
        self.clear();
        out
    }

    pub fn clear(&mut self) {
        for group in self.groups.values_mut() {
            group.clear();
        }
        self.order.clear();
        self.sequence.clear();
    }
}
