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

//! The transform hierarchy.
//!
//! Every node stores its local position, rotation and scale plus lazily computed world
//! caches. Nodes live in a [`HandleStore`], and parent and child links are handles, so
//! a destroyed node can never be reached through a stale link.
//!
//! Each node has its own re-entrant lock. Mutators hold a single node lock at a time.
//! World-space getters lock the node first and then its ancestors, one level at a time,
//! so locks are always taken child-before-parent. Since the hierarchy is acyclic, no
//! two threads can wait on each other.

use parking_lot::{Mutex, ReentrantMutex};
use prism_core::math::{Mat3, Mat4, Quaternion, Vec3};
use prism_core::Handle;
use rayon::prelude::*;
use std::cell::RefCell;

use crate::handle_store::HandleStore;

/// Maximum parent chain length accepted by [`TransformHierarchy::set_parent`].
pub const MAX_HIERARCHY_DEPTH: usize = 1000;

/// Above this many elements, the batch point and direction transforms run on rayon.
pub const PARALLEL_TRANSFORM_THRESHOLD: usize = 4096;

/// The frame of reference for relative transform operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Space {
    /// Relative to the node's own axes.
    #[default]
    Local,
    /// Relative to the world axes.
    World,
}

/// A position, rotation and scale triple.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformValue {
    /// Translation.
    pub position: Vec3,
    /// Rotation, always normalized when stored in a hierarchy.
    pub rotation: Quaternion,
    /// Per-axis scale.
    pub scale: Vec3,
}

impl Default for TransformValue {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl TransformValue {
    /// No translation, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quaternion::IDENTITY,
        scale: Vec3::ONE,
    };

    /// A value with only a translation.
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    /// Creates a value from its three components.
    pub fn new(position: Vec3, rotation: Quaternion, scale: Vec3) -> Self {
        Self {
            position,
            rotation,
            scale,
        }
    }

    /// The `T * R * S` matrix.
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_trs(self.position, self.rotation, self.scale)
    }

    /// Returns `true` if every component is finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }

    /// Linear interpolation of position and scale, normalized-linear for rotation.
    pub fn lerp(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            position: a.position.lerp(b.position, t),
            rotation: Quaternion::nlerp(a.rotation, b.rotation, t),
            scale: a.scale.lerp(b.scale, t),
        }
    }

    /// Like [`TransformValue::lerp`] with spherical interpolation of the rotation.
    pub fn slerp(a: &Self, b: &Self, t: f32) -> Self {
        Self {
            position: a.position.lerp(b.position, t),
            rotation: Quaternion::slerp(a.rotation, b.rotation, t),
            scale: a.scale.lerp(b.scale, t),
        }
    }
}

/// World-space values of a node, computed together under the node lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldTransform {
    /// The full world matrix.
    pub matrix: Mat4,
    /// World position.
    pub position: Vec3,
    /// World rotation.
    pub rotation: Quaternion,
    /// World scale (exact for uniform parent scale).
    pub scale: Vec3,
}

#[derive(Debug)]
struct NodeState {
    local: TransformValue,
    parent: Option<Handle<Transform>>,
    children: Vec<Handle<Transform>>,
    dirty_local: bool,
    dirty_world: bool,
    local_matrix: Mat4,
    world: WorldTransform,
}

impl NodeState {
    fn new(local: TransformValue) -> Self {
        Self {
            local,
            parent: None,
            children: Vec::new(),
            dirty_local: true,
            dirty_world: true,
            local_matrix: Mat4::IDENTITY,
            world: WorldTransform {
                matrix: Mat4::IDENTITY,
                position: Vec3::ZERO,
                rotation: Quaternion::IDENTITY,
                scale: Vec3::ONE,
            },
        }
    }

    fn local_matrix(&mut self) -> Mat4 {
        if self.dirty_local {
            self.local_matrix = self.local.to_mat4();
            self.dirty_local = false;
        }
        self.local_matrix
    }
}

/// One node of a [`TransformHierarchy`]. Only reachable through a `Handle<Transform>`.
#[derive(Debug)]
pub struct Transform {
    state: ReentrantMutex<RefCell<NodeState>>,
}

impl Transform {
    fn new(local: TransformValue) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(NodeState::new(local))),
        }
    }
}

/// A forest of transforms with cached world matrices.
///
/// Every operation takes a handle and returns `None`/`false` when the handle is stale.
/// Non-finite inputs are rejected with a warning.
#[derive(Debug, Default)]
pub struct TransformHierarchy {
    nodes: HandleStore<Transform>,
    // Serializes re-parenting and destruction so cycle checks see a stable topology.
    topology: Mutex<()>,
}

impl TransformHierarchy {
    /// Creates an empty hierarchy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a root node.
    pub fn create(&self, local: TransformValue) -> Handle<Transform> {
        let local = if local.is_finite() {
            TransformValue {
                rotation: local.rotation.normalize(),
                ..local
            }
        } else {
            log::warn!("Rejected non-finite initial transform {local:?}; using identity");
            TransformValue::IDENTITY
        };
        self.nodes.allocate(Transform::new(local), "", 0)
    }

    /// Destroys a node. Its children become roots with their world caches invalidated,
    /// and it is removed from its parent's child list.
    pub fn destroy(&self, handle: Handle<Transform>) -> bool {
        let _topology = self.topology.lock();
        let Some(node) = self.nodes.free(handle) else {
            return false;
        };
        let (parent, children) = {
            let guard = node.state.lock();
            let mut s = guard.borrow_mut();
            (s.parent.take(), std::mem::take(&mut s.children))
        };

        for &child in &children {
            if let Some(child_node) = self.nodes.get(child) {
                let guard = child_node.state.lock();
                let mut s = guard.borrow_mut();
                s.parent = None;
                s.dirty_world = true;
            }
        }
        self.mark_world_dirty(children);

        if let Some(parent) = parent.and_then(|p| self.nodes.get(p)) {
            let guard = parent.state.lock();
            guard.borrow_mut().children.retain(|c| *c != handle);
        }
        true
    }

    /// Returns `true` if `handle` refers to a live node.
    pub fn is_valid(&self, handle: Handle<Transform>) -> bool {
        self.nodes.is_valid(handle)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if the hierarchy has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn read<R>(&self, handle: Handle<Transform>, f: impl FnOnce(&NodeState) -> R) -> Option<R> {
        let node = self.nodes.get(handle)?;
        let guard = node.state.lock();
        let state = guard.borrow();
        Some(f(&state))
    }

    /// Applies `f` to the node's local value, then invalidates the node and its subtree.
    fn mutate_local(
        &self,
        handle: Handle<Transform>,
        f: impl FnOnce(&mut TransformValue),
    ) -> bool {
        let Some(node) = self.nodes.get(handle) else {
            return false;
        };
        let children = {
            let guard = node.state.lock();
            let mut s = guard.borrow_mut();
            let mut next = s.local;
            f(&mut next);
            if !next.is_finite() {
                log::warn!("Rejected non-finite transform update on {handle:?}");
                return false;
            }
            next.rotation = next.rotation.normalize();
            s.local = next;
            s.dirty_local = true;
            s.dirty_world = true;
            s.children.clone()
        };
        self.mark_world_dirty(children);
        true
    }

    fn mark_world_dirty(&self, mut stack: Vec<Handle<Transform>>) {
        while let Some(h) = stack.pop() {
            if let Some(node) = self.nodes.get(h) {
                let guard = node.state.lock();
                let mut s = guard.borrow_mut();
                s.dirty_world = true;
                stack.extend_from_slice(&s.children);
            }
        }
    }

    // --- Local accessors ---

    /// The full local value.
    pub fn local(&self, handle: Handle<Transform>) -> Option<TransformValue> {
        self.read(handle, |s| s.local)
    }

    /// Replaces the full local value.
    pub fn set_local(&self, handle: Handle<Transform>, value: TransformValue) -> bool {
        self.mutate_local(handle, |v| *v = value)
    }

    /// Local position.
    pub fn position(&self, handle: Handle<Transform>) -> Option<Vec3> {
        self.read(handle, |s| s.local.position)
    }

    /// Sets the local position.
    pub fn set_position(&self, handle: Handle<Transform>, position: Vec3) -> bool {
        self.mutate_local(handle, |v| v.position = position)
    }

    /// Local rotation.
    pub fn rotation(&self, handle: Handle<Transform>) -> Option<Quaternion> {
        self.read(handle, |s| s.local.rotation)
    }

    /// Sets the local rotation. The quaternion is normalized before it is stored.
    pub fn set_rotation(&self, handle: Handle<Transform>, rotation: Quaternion) -> bool {
        self.mutate_local(handle, |v| v.rotation = rotation)
    }

    /// Local rotation as Euler angles in radians.
    pub fn euler_angles(&self, handle: Handle<Transform>) -> Option<Vec3> {
        self.read(handle, |s| s.local.rotation.to_euler())
    }

    /// Sets the local rotation from Euler angles in radians.
    pub fn set_euler_angles(&self, handle: Handle<Transform>, euler: Vec3) -> bool {
        if !euler.is_finite() {
            log::warn!("Rejected non-finite Euler angles {euler:?} on {handle:?}");
            return false;
        }
        self.set_rotation(handle, Quaternion::from_euler(euler))
    }

    /// Local scale.
    pub fn scale(&self, handle: Handle<Transform>) -> Option<Vec3> {
        self.read(handle, |s| s.local.scale)
    }

    /// Sets the local scale.
    pub fn set_scale(&self, handle: Handle<Transform>, scale: Vec3) -> bool {
        self.mutate_local(handle, |v| v.scale = scale)
    }

    // --- Relative motion ---

    /// Moves the node by `delta`, expressed in `space`.
    pub fn translate(&self, handle: Handle<Transform>, delta: Vec3, space: Space) -> bool {
        let delta = match space {
            Space::Local => match self.rotation(handle) {
                Some(rotation) => rotation * delta,
                None => return false,
            },
            Space::World => match self.parent_world(handle) {
                Some(Some(parent)) => match parent.matrix.inverse() {
                    Some(inv) => inv.transform_vector(delta),
                    None => {
                        log::warn!("Cannot translate {handle:?} in world space: singular parent");
                        return false;
                    }
                },
                Some(None) => delta,
                None => return false,
            },
        };
        self.mutate_local(handle, |v| v.position += delta)
    }

    /// Applies `rotation` in `space`.
    pub fn rotate(&self, handle: Handle<Transform>, rotation: Quaternion, space: Space) -> bool {
        if !rotation.is_finite() {
            log::warn!("Rejected non-finite rotation {rotation:?} on {handle:?}");
            return false;
        }
        match space {
            Space::Local => self.mutate_local(handle, |v| v.rotation = v.rotation * rotation),
            Space::World => {
                let parent_rotation = match self.parent_world(handle) {
                    Some(parent) => parent.map_or(Quaternion::IDENTITY, |p| p.rotation),
                    None => return false,
                };
                let in_parent = parent_rotation.inverse() * rotation * parent_rotation;
                self.mutate_local(handle, |v| v.rotation = in_parent * v.rotation)
            }
        }
    }

    /// Rotates by `angle` radians around `axis`, expressed in `space`.
    pub fn rotate_around(
        &self,
        handle: Handle<Transform>,
        axis: Vec3,
        angle: f32,
        space: Space,
    ) -> bool {
        if !axis.is_finite() || !angle.is_finite() {
            log::warn!("Rejected non-finite axis/angle on {handle:?}");
            return false;
        }
        self.rotate(handle, Quaternion::from_axis_angle(axis, angle), space)
    }

    /// Orients the node so its `-Z` axis points at the world-space `target`.
    /// Returns `false` when the direction is degenerate.
    pub fn look_at(&self, handle: Handle<Transform>, target: Vec3, up: Vec3) -> bool {
        let Some(world) = self.world(handle) else {
            return false;
        };
        let Some(desired) = Quaternion::look_rotation(target - world.position, up) else {
            log::debug!("look_at on {handle:?} ignored: degenerate direction");
            return false;
        };
        let parent_rotation = match self.parent_world(handle) {
            Some(parent) => parent.map_or(Quaternion::IDENTITY, |p| p.rotation),
            None => return false,
        };
        self.set_rotation(handle, parent_rotation.inverse() * desired)
    }

    /// Moves the local value towards `target` with exponential smoothing.
    /// Larger `smoothness` converges faster.
    pub fn smooth_to(
        &self,
        handle: Handle<Transform>,
        target: &TransformValue,
        smoothness: f32,
        dt: f32,
    ) -> bool {
        let t = (1.0 - (-smoothness.max(0.0) * dt.max(0.0)).exp()).clamp(0.0, 1.0);
        self.mutate_local(handle, |v| *v = TransformValue::slerp(v, target, t))
    }

    // --- Hierarchy ---

    /// Re-parents `child` under `parent` (or makes it a root with `None`). The local
    /// value is kept, so the world placement changes with the new parent.
    ///
    /// Refuses self-parenting, cycles and chains deeper than [`MAX_HIERARCHY_DEPTH`].
    pub fn set_parent(&self, child: Handle<Transform>, parent: Option<Handle<Transform>>) -> bool {
        let _topology = self.topology.lock();
        if !self.nodes.is_valid(child) {
            return false;
        }

        if let Some(p) = parent {
            if p == child {
                log::warn!("Refused to parent {child:?} to itself");
                return false;
            }
            if !self.nodes.is_valid(p) {
                log::warn!("Refused to parent {child:?} to stale handle {p:?}");
                return false;
            }
            // The moved subtree keeps its shape, so its height counts towards the limit.
            let mut depth = 1 + self.subtree_height(child);
            let mut cursor = Some(p);
            while let Some(ancestor) = cursor {
                if ancestor == child {
                    log::warn!("Refused to parent {child:?} to {p:?}: would create a cycle");
                    return false;
                }
                depth += 1;
                if depth > MAX_HIERARCHY_DEPTH {
                    log::warn!(
                        "Refused to parent {child:?} to {p:?}: depth exceeds {MAX_HIERARCHY_DEPTH}"
                    );
                    return false;
                }
                cursor = self.read(ancestor, |s| s.parent).flatten();
            }
        }

        let Some(previous) = self.read(child, |s| s.parent) else {
            return false;
        };
        if previous == parent {
            return true;
        }
        if let Some(old) = previous.and_then(|h| self.nodes.get(h)) {
            let guard = old.state.lock();
            guard.borrow_mut().children.retain(|c| *c != child);
        }
        if let Some(new) = parent.and_then(|h| self.nodes.get(h)) {
            let guard = new.state.lock();
            guard.borrow_mut().children.push(child);
        }
        if let Some(node) = self.nodes.get(child) {
            let guard = node.state.lock();
            let mut s = guard.borrow_mut();
            s.parent = parent;
            s.dirty_world = true;
        }
        self.mark_world_dirty(vec![child]);
        true
    }

    /// Levels below `handle` in its subtree; zero for a leaf.
    fn subtree_height(&self, handle: Handle<Transform>) -> usize {
        let mut height = 0;
        let mut level = self.children(handle);
        while !level.is_empty() {
            height += 1;
            level = level.into_iter().flat_map(|c| self.children(c)).collect();
        }
        height
    }

    /// The parent of a node. `Some(None)` for a root, `None` for a stale handle.
    pub fn parent(&self, handle: Handle<Transform>) -> Option<Option<Handle<Transform>>> {
        self.read(handle, |s| s.parent)
    }

    /// Returns `true` if the node has a parent.
    pub fn has_parent(&self, handle: Handle<Transform>) -> bool {
        self.parent(handle).flatten().is_some()
    }

    /// Direct children of a node.
    pub fn children(&self, handle: Handle<Transform>) -> Vec<Handle<Transform>> {
        self.read(handle, |s| s.children.clone()).unwrap_or_default()
    }

    /// Returns `true` if the node's world cache is stale.
    pub fn is_world_dirty(&self, handle: Handle<Transform>) -> Option<bool> {
        self.read(handle, |s| s.dirty_world)
    }

    // --- World space ---

    fn parent_world(&self, handle: Handle<Transform>) -> Option<Option<WorldTransform>> {
        let parent = self.read(handle, |s| s.parent)?;
        Some(parent.and_then(|p| self.world(p)))
    }

    /// All world-space values of a node, recomputed if stale.
    pub fn world(&self, handle: Handle<Transform>) -> Option<WorldTransform> {
        let node = self.nodes.get(handle)?;
        let guard = node.state.lock();
        let parent = {
            let s = guard.borrow();
            if !s.dirty_world {
                return Some(s.world);
            }
            s.parent
        };

        // The node stays locked while its ancestors are resolved.
        let parent_world = parent.and_then(|p| self.world(p));

        let mut s = guard.borrow_mut();
        let local_matrix = s.local_matrix();
        let local = s.local;
        s.world = match parent_world {
            Some(pw) => WorldTransform {
                matrix: pw.matrix * local_matrix,
                position: pw.matrix.transform_point(local.position),
                rotation: (pw.rotation * local.rotation).normalize(),
                scale: pw.scale.mul_elements(local.scale),
            },
            None => WorldTransform {
                matrix: local_matrix,
                position: local.position,
                rotation: local.rotation,
                scale: local.scale,
            },
        };
        s.dirty_world = false;
        Some(s.world)
    }

    /// World position.
    pub fn world_position(&self, handle: Handle<Transform>) -> Option<Vec3> {
        self.world(handle).map(|w| w.position)
    }

    /// World rotation.
    pub fn world_rotation(&self, handle: Handle<Transform>) -> Option<Quaternion> {
        self.world(handle).map(|w| w.rotation)
    }

    /// World scale.
    pub fn world_scale(&self, handle: Handle<Transform>) -> Option<Vec3> {
        self.world(handle).map(|w| w.scale)
    }

    /// The cached `T * R * S` local matrix.
    pub fn local_matrix(&self, handle: Handle<Transform>) -> Option<Mat4> {
        let node = self.nodes.get(handle)?;
        let guard = node.state.lock();
        let matrix = guard.borrow_mut().local_matrix();
        Some(matrix)
    }

    /// `parent.world_matrix() * local_matrix()`, or the local matrix for a root.
    pub fn world_matrix(&self, handle: Handle<Transform>) -> Option<Mat4> {
        self.world(handle).map(|w| w.matrix)
    }

    /// Local point to world space.
    pub fn transform_point(&self, handle: Handle<Transform>, point: Vec3) -> Option<Vec3> {
        self.world_matrix(handle).map(|m| m.transform_point(point))
    }

    /// Local direction to world space. Only rotation applies, so lengths are preserved.
    pub fn transform_direction(&self, handle: Handle<Transform>, direction: Vec3) -> Option<Vec3> {
        self.world_rotation(handle).map(|r| r * direction)
    }

    /// World point to local space. `None` if the world matrix is singular.
    pub fn inverse_transform_point(&self, handle: Handle<Transform>, point: Vec3) -> Option<Vec3> {
        self.world_matrix(handle)?
            .inverse()
            .map(|inv| inv.transform_point(point))
    }

    /// World direction to local space.
    pub fn inverse_transform_direction(
        &self,
        handle: Handle<Transform>,
        direction: Vec3,
    ) -> Option<Vec3> {
        self.world_rotation(handle).map(|r| r.inverse() * direction)
    }

    /// Transforms `src` local points into `dst` world points. Returns how many points
    /// were written (`min(src.len(), dst.len())`).
    pub fn transform_points(
        &self,
        handle: Handle<Transform>,
        src: &[Vec3],
        dst: &mut [Vec3],
    ) -> Option<usize> {
        let matrix = self.world_matrix(handle)?;
        Some(transform_points_with(&matrix, src, dst))
    }

    /// Batch version of [`TransformHierarchy::transform_direction`].
    pub fn transform_directions(
        &self,
        handle: Handle<Transform>,
        src: &[Vec3],
        dst: &mut [Vec3],
    ) -> Option<usize> {
        let rotation = Mat3::from_quat(self.world_rotation(handle)?);
        Some(transform_directions_with(&rotation, src, dst))
    }
}

/// Applies `matrix` to each point of `src`, writing into `dst`. Large inputs are split
/// across the rayon pool.
pub fn transform_points_with(matrix: &Mat4, src: &[Vec3], dst: &mut [Vec3]) -> usize {
    let n = src.len().min(dst.len());
    let (src, dst) = (&src[..n], &mut dst[..n]);
    if n > PARALLEL_TRANSFORM_THRESHOLD {
        dst.par_iter_mut()
            .zip(src.par_iter())
            .for_each(|(d, s)| *d = matrix.transform_point(*s));
    } else {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = matrix.transform_point(*s);
        }
    }
    n
}

/// Applies a 3x3 linear map to each direction of `src`, writing into `dst`.
pub fn transform_directions_with(linear: &Mat3, src: &[Vec3], dst: &mut [Vec3]) -> usize {
    let n = src.len().min(dst.len());
    let (src, dst) = (&src[..n], &mut dst[..n]);
    if n > PARALLEL_TRANSFORM_THRESHOLD {
        dst.par_iter_mut()
            .zip(src.par_iter())
            .for_each(|(d, s)| *d = *linear * *s);
    } else {
        for (d, s) in dst.iter_mut().zip(src) {
            *d = *linear * *s;
        }
    }
    n
}

/// Like [`transform_directions_with`], renormalizing each result. Used for normals
/// with the inverse-transpose matrix.
pub fn transform_normals_with(normal_matrix: &Mat3, src: &[Vec3], dst: &mut [Vec3]) -> usize {
    let n = transform_directions_with(normal_matrix, src, dst);
    for d in &mut dst[..n] {
        *d = d.normalize();
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use prism_core::math::FRAC_PI_2;
    use std::sync::Arc;
    use std::thread;

    fn assert_vec_eq(a: Vec3, b: Vec3) {
        assert_relative_eq!(a.x, b.x, epsilon = 1e-4);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-4);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-4);
    }

    fn assert_mat_eq(a: Mat4, b: Mat4) {
        for (x, y) in a.to_cols_array().iter().zip(b.to_cols_array().iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-4);
        }
    }

    #[test]
    fn world_matrix_composes_parent_and_local() {
        // --- 1. ARRANGE ---
        let h = TransformHierarchy::new();
        let parent = h.create(TransformValue::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quaternion::from_axis_angle(Vec3::Y, 0.5),
            Vec3::splat(2.0),
        ));
        let child = h.create(TransformValue::from_position(Vec3::new(0.0, 2.0, 1.0)));
        assert!(h.set_parent(child, Some(parent)));

        // --- 2. ACT ---
        let world = h.world_matrix(child).unwrap();

        // --- 3. ASSERT ---
        let expected = h.world_matrix(parent).unwrap() * h.local_matrix(child).unwrap();
        assert_mat_eq(world, expected);
        assert_mat_eq(h.world_matrix(child).unwrap(), world);
        assert_vec_eq(h.world_position(child).unwrap(), world.translation());
    }

    #[test]
    fn parent_mutation_invalidates_descendants() {
        let h = TransformHierarchy::new();
        let a = h.create(TransformValue::default());
        let b = h.create(TransformValue::default());
        let c = h.create(TransformValue::from_position(Vec3::X));
        h.set_parent(b, Some(a));
        h.set_parent(c, Some(b));
        assert_vec_eq(h.world_position(c).unwrap(), Vec3::X);
        assert_eq!(h.is_world_dirty(c), Some(false));

        h.set_position(a, Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(h.is_world_dirty(c), Some(true));
        assert_vec_eq(h.world_position(c).unwrap(), Vec3::new(1.0, 5.0, 0.0));
    }

    #[test]
    fn set_parent_rejects_self_and_cycles() {
        let h = TransformHierarchy::new();
        let a = h.create(TransformValue::default());
        let b = h.create(TransformValue::default());
        let c = h.create(TransformValue::default());
        assert!(!h.set_parent(a, Some(a)));
        assert!(h.set_parent(b, Some(a)));
        assert!(h.set_parent(c, Some(b)));
        assert!(!h.set_parent(a, Some(c)));
        assert_eq!(h.parent(a), Some(None));
    }

    #[test]
    fn set_parent_rejects_excessive_depth() {
        let h = TransformHierarchy::new();
        let mut last = h.create(TransformValue::default());
        for _ in 1..MAX_HIERARCHY_DEPTH {
            let next = h.create(TransformValue::default());
            assert!(h.set_parent(next, Some(last)));
            last = next;
        }
        let extra = h.create(TransformValue::default());
        assert!(!h.set_parent(extra, Some(last)));
    }

    #[test]
    fn set_parent_counts_the_moved_subtree_towards_depth() {
        let h = TransformHierarchy::new();
        let chain = |len: usize| {
            let root = h.create(TransformValue::default());
            let mut tip = root;
            for _ in 1..len {
                let next = h.create(TransformValue::default());
                assert!(h.set_parent(next, Some(tip)));
                tip = next;
            }
            (root, tip)
        };
        let (_, a_tip) = chain(600);
        let (b_root, _) = chain(600);
        assert!(!h.set_parent(b_root, Some(a_tip)));
        assert_eq!(h.parent(b_root), Some(None));

        let (c_root, _) = chain(400);
        assert!(h.set_parent(c_root, Some(a_tip)));
    }

    #[test]
    fn destroying_parent_orphans_children() {
        let h = TransformHierarchy::new();
        let parent = h.create(TransformValue::from_position(Vec3::new(3.0, 0.0, 0.0)));
        let child = h.create(TransformValue::from_position(Vec3::Y));
        h.set_parent(child, Some(parent));
        assert_vec_eq(h.world_position(child).unwrap(), Vec3::new(3.0, 1.0, 0.0));

        assert!(h.destroy(parent));
        assert!(!h.destroy(parent));
        assert_eq!(h.parent(child), Some(None));
        assert_eq!(h.is_world_dirty(child), Some(true));
        assert_vec_eq(h.world_position(child).unwrap(), Vec3::Y);
        assert!(h.world_matrix(parent).is_none());
    }

    #[test]
    fn non_finite_input_is_rejected() {
        let h = TransformHierarchy::new();
        let t = h.create(TransformValue::default());
        assert!(!h.set_position(t, Vec3::new(f32::NAN, 0.0, 0.0)));
        assert!(!h.set_rotation(t, Quaternion::new(f32::INFINITY, 0.0, 0.0, 1.0)));
        assert_eq!(h.position(t), Some(Vec3::ZERO));

        assert!(h.set_rotation(t, Quaternion::new(0.0, 0.0, 2.0, 2.0)));
        let q = h.rotation(t).unwrap();
        assert_relative_eq!(q.magnitude_squared(), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn inverse_point_round_trip() {
        let h = TransformHierarchy::new();
        let parent = h.create(TransformValue::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quaternion::from_euler(Vec3::new(0.3, 0.9, -0.4)),
            Vec3::new(2.0, 2.0, 2.0),
        ));
        let child = h.create(TransformValue::from_position(Vec3::new(-4.0, 0.5, 0.0)));
        h.set_parent(child, Some(parent));

        let p = Vec3::new(0.7, -1.5, 9.0);
        let world = h.transform_point(child, p).unwrap();
        assert_vec_eq(h.inverse_transform_point(child, world).unwrap(), p);

        let d = Vec3::new(0.0, 0.0, -1.0);
        let wd = h.transform_direction(child, d).unwrap();
        assert_vec_eq(h.inverse_transform_direction(child, wd).unwrap(), d);
    }

    #[test]
    fn translate_and_rotate_in_both_spaces() {
        let h = TransformHierarchy::new();
        let parent = h.create(TransformValue::new(
            Vec3::ZERO,
            Quaternion::from_axis_angle(Vec3::Y, FRAC_PI_2),
            Vec3::ONE,
        ));
        let child = h.create(TransformValue::default());
        h.set_parent(child, Some(parent));

        assert!(h.translate(child, Vec3::X, Space::World));
        assert_vec_eq(h.world_position(child).unwrap(), Vec3::X);

        assert!(h.rotate_around(child, Vec3::Z, FRAC_PI_2, Space::World));
        let up_in_world = h.transform_direction(child, Vec3::X).unwrap();
        let expected = Quaternion::from_axis_angle(Vec3::Z, FRAC_PI_2)
            * (Quaternion::from_axis_angle(Vec3::Y, FRAC_PI_2) * Vec3::X);
        assert_vec_eq(up_in_world, expected);
    }

    #[test]
    fn look_at_points_forward_at_target() {
        let h = TransformHierarchy::new();
        let t = h.create(TransformValue::from_position(Vec3::new(0.0, 0.0, 5.0)));
        assert!(h.look_at(t, Vec3::ZERO, Vec3::Y));
        let forward = h.transform_direction(t, -Vec3::Z).unwrap();
        assert_vec_eq(forward, -Vec3::Z);
        assert!(!h.look_at(t, Vec3::new(0.0, 0.0, 5.0), Vec3::Y));
    }

    #[test]
    fn interpolation_endpoints_and_monotonicity() {
        let a = TransformValue::new(
            Vec3::ZERO,
            Quaternion::from_axis_angle(Vec3::Y, 0.1),
            Vec3::ONE,
        );
        let b = TransformValue::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quaternion::from_axis_angle(Vec3::Y, 2.0),
            Vec3::splat(3.0),
        );
        assert!(TransformValue::slerp(&a, &b, 0.0).rotation.same_rotation(a.rotation, 1e-5));
        assert!(TransformValue::slerp(&a, &b, 1.0).rotation.same_rotation(b.rotation, 1e-5));

        let mut previous = -1.0;
        for i in 0..=10 {
            let v = TransformValue::lerp(&a, &b, i as f32 / 10.0);
            assert!(v.position.x > previous);
            previous = v.position.x;
        }
    }

    #[test]
    fn smooth_to_converges() {
        let h = TransformHierarchy::new();
        let t = h.create(TransformValue::default());
        let target = TransformValue::from_position(Vec3::new(4.0, 0.0, 0.0));
        for _ in 0..200 {
            h.smooth_to(t, &target, 10.0, 1.0 / 60.0);
        }
        assert_vec_eq(h.position(t).unwrap(), target.position);
    }

    #[test]
    fn batch_transform_matches_single_point_path() {
        let m = Mat4::from_trs(
            Vec3::new(1.0, -2.0, 0.5),
            Quaternion::from_axis_angle(Vec3::X, 0.7),
            Vec3::splat(1.5),
        );
        let src: Vec<Vec3> = (0..PARALLEL_TRANSFORM_THRESHOLD + 10)
            .map(|i| Vec3::new(i as f32, 1.0, -(i as f32)))
            .collect();
        let mut dst = vec![Vec3::ZERO; src.len()];
        assert_eq!(transform_points_with(&m, &src, &mut dst), src.len());
        for i in [0, 17, PARALLEL_TRANSFORM_THRESHOLD + 5] {
            assert_vec_eq(dst[i], m.transform_point(src[i]));
        }

        let mut short = vec![Vec3::ZERO; 3];
        assert_eq!(transform_points_with(&m, &src, &mut short), 3);
    }

    #[test]
    fn concurrent_readers_and_writers_do_not_deadlock() {
        let h = Arc::new(TransformHierarchy::new());
        let root = h.create(TransformValue::default());
        let mut chain = vec![root];
        for _ in 0..16 {
            let n = h.create(TransformValue::from_position(Vec3::X));
            h.set_parent(n, chain.last().copied());
            chain.push(n);
        }
        let leaf = *chain.last().unwrap();

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let h = Arc::clone(&h);
                let node = chain[i * 4];
                thread::spawn(move || {
                    for k in 0..200 {
                        h.set_scale(node, Vec3::splat(1.0 + (k % 3) as f32 * 0.1));
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let h = Arc::clone(&h);
                thread::spawn(move || {
                    for _ in 0..200 {
                        assert!(h.world_matrix(leaf).is_some());
                    }
                })
            })
            .collect();
        for t in writers.into_iter().chain(readers) {
            t.join().unwrap();
        }
    }
}
