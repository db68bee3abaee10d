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

//! Bounding volumes and view-frustum planes.

use super::{Mat4, Vec3, Vec4};

/// A plane `dot(normal, p) + d = 0`, stored as a `Vec4`-compatible block so a plane
/// array can be uploaded to a shader storage buffer unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Plane {
    /// The plane normal. Points towards the inside of a frustum.
    pub normal: Vec3,
    /// The signed distance term.
    pub d: f32,
}

impl Plane {
    /// Creates a plane from raw coefficients.
    #[inline]
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self {
            normal: Vec3::new(a, b, c),
            d,
        }
    }

    fn from_vec4(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }

    /// Returns the plane with a unit-length normal. Degenerate planes are returned as-is.
    pub fn normalized(self) -> Self {
        let len = self.normal.length();
        if len > 0.0 {
            Self {
                normal: self.normal / len,
                d: self.d / len,
            }
        } else {
            self
        }
    }

    /// Signed distance from `point` to the plane (positive on the normal's side).
    #[inline]
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.d
    }

    /// Returns the plane as `[a, b, c, d]`.
    #[inline]
    pub fn to_array(&self) -> [f32; 4] {
        [self.normal.x, self.normal.y, self.normal.z, self.d]
    }
}

/// The six clipping planes of a camera, in the order left, right, bottom, top, near, far.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Frustum {
    /// Inward-facing, normalized planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Extracts the planes of a column-major view-projection matrix (OpenGL clip space).
    pub fn from_view_projection(view_proj: &Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        Self {
            planes: [
                Plane::from_vec4(r3 + r0).normalized(),
                Plane::from_vec4(r3 - r0).normalized(),
                Plane::from_vec4(r3 + r1).normalized(),
                Plane::from_vec4(r3 - r1).normalized(),
                Plane::from_vec4(r3 + r2).normalized(),
                Plane::from_vec4(r3 - r2).normalized(),
            ],
        }
    }

    /// Returns `true` when a sphere is at least partly inside all six planes.
    pub fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|p| p.signed_distance(center) >= -radius)
    }

    /// Returns the planes flattened for upload.
    pub fn to_arrays(&self) -> [[f32; 4]; 6] {
        let mut out = [[0.0; 4]; 6];
        for (dst, plane) in out.iter_mut().zip(self.planes.iter()) {
            *dst = plane.to_array();
        }
        out
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Creates a box from its corners.
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// The smallest box containing every point, or `None` for an empty slice.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut min = *first;
        let mut max = *first;
        for p in rest {
            min = Vec3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z));
            max = Vec3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z));
        }
        Some(Self { min, max })
    }

    /// The center of the box.
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Radius of the sphere centered on `center()` that encloses the box.
    #[inline]
    pub fn bounding_radius(&self) -> f32 {
        (self.max - self.min).length() * 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::FRAC_PI_2;

    #[test]
    fn perspective_frustum_contains_points_in_front() {
        // Camera at the origin looking down -Z.
        let proj = Mat4::perspective_rh_gl(FRAC_PI_2, 1.0, 0.1, 100.0);
        let frustum = Frustum::from_view_projection(&proj);

        assert!(frustum.contains_sphere(Vec3::new(0.0, 0.0, -10.0), 0.5));
        assert!(!frustum.contains_sphere(Vec3::new(0.0, 0.0, 10.0), 0.5));
        assert!(!frustum.contains_sphere(Vec3::new(0.0, 0.0, -200.0), 1.0));
        // Straddling the left plane still counts as visible.
        assert!(frustum.contains_sphere(Vec3::new(-10.5, 0.0, -10.0), 1.0));
    }

    #[test]
    fn aabb_bounds_points() {
        let b = Aabb::from_points(&[Vec3::new(-1.0, 0.0, 2.0), Vec3::new(1.0, 2.0, -2.0)])
            .unwrap();
        assert_eq!(b.center(), Vec3::new(0.0, 1.0, 0.0));
        assert!(Aabb::from_points(&[]).is_none());
    }
}
