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

//! Provides a Quaternion type for representing 3D rotations.

use serde::{Deserialize, Serialize};
use std::ops::{Mul, Neg};

use super::{Mat3, Vec3, EPSILON};

/// A rotation quaternion stored as `(x, y, z, w)` where `w` is the scalar part.
///
/// Rotations should be unit quaternions; the transform core normalizes every value it
/// stores.
#[derive(
    Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable, Serialize, Deserialize,
)]
#[repr(C)]
pub struct Quaternion {
    /// The x component of the vector part.
    pub x: f32,
    /// The y component of the vector part.
    pub y: f32,
    /// The z component of the vector part.
    pub z: f32,
    /// The scalar (real) part.
    pub w: f32,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    /// The identity quaternion, representing no rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Creates a new quaternion from its raw components. The result is not normalized.
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Creates a rotation of `angle_radians` around `axis`. The axis is normalized first.
    pub fn from_axis_angle(axis: Vec3, angle_radians: f32) -> Self {
        let axis = axis.normalize();
        let (s, c) = (angle_radians * 0.5).sin_cos();
        Self::new(axis.x * s, axis.y * s, axis.z * s, c)
    }

    /// Creates a rotation from Euler angles in radians (`x` = pitch, `y` = yaw, `z` = roll).
    ///
    /// The rotations are applied in Z, then X, then Y order (`yaw * pitch * roll`).
    pub fn from_euler(euler: Vec3) -> Self {
        let pitch = Self::from_axis_angle(Vec3::X, euler.x);
        let yaw = Self::from_axis_angle(Vec3::Y, euler.y);
        let roll = Self::from_axis_angle(Vec3::Z, euler.z);
        (yaw * pitch * roll).normalize()
    }

    /// Returns the Euler angles (pitch, yaw, roll) in radians, inverting
    /// [`Quaternion::from_euler`]. At gimbal lock the roll is folded into the yaw.
    pub fn to_euler(&self) -> Vec3 {
        let m = Mat3::from_quat(self.normalize());
        let m12 = m.cols[2].y;
        let pitch = (-m12).clamp(-1.0, 1.0).asin();
        if m12.abs() < 1.0 - EPSILON {
            let yaw = m.cols[2].x.atan2(m.cols[2].z);
            let roll = m.cols[0].y.atan2(m.cols[1].y);
            Vec3::new(pitch, yaw, roll)
        } else {
            let yaw = (-m.cols[0].z).atan2(m.cols[0].x);
            Vec3::new(pitch, yaw, 0.0)
        }
    }

    /// Creates a quaternion from an orthonormal rotation matrix.
    pub fn from_mat3(m: &Mat3) -> Self {
        let (m00, m10, m20) = (m.cols[0].x, m.cols[0].y, m.cols[0].z);
        let (m01, m11, m21) = (m.cols[1].x, m.cols[1].y, m.cols[1].z);
        let (m02, m12, m22) = (m.cols[2].x, m.cols[2].y, m.cols[2].z);
        let trace = m00 + m11 + m22;

        let q = if trace > 0.0 {
            let s = 2.0 * (trace + 1.0).sqrt();
            Self::new((m21 - m12) / s, (m02 - m20) / s, (m10 - m01) / s, 0.25 * s)
        } else if m00 > m11 && m00 > m22 {
            let s = 2.0 * (1.0 + m00 - m11 - m22).sqrt();
            Self::new(0.25 * s, (m01 + m10) / s, (m02 + m20) / s, (m21 - m12) / s)
        } else if m11 > m22 {
            let s = 2.0 * (1.0 + m11 - m00 - m22).sqrt();
            Self::new((m01 + m10) / s, 0.25 * s, (m12 + m21) / s, (m02 - m20) / s)
        } else {
            let s = 2.0 * (1.0 + m22 - m00 - m11).sqrt();
            Self::new((m02 + m20) / s, (m12 + m21) / s, 0.25 * s, (m10 - m01) / s)
        };
        q.normalize()
    }

    /// Creates a rotation whose local `-Z` axis points along `forward` with `up` as the
    /// approximate up direction. Returns `None` when `forward` is degenerate or parallel
    /// to `up`.
    pub fn look_rotation(forward: Vec3, up: Vec3) -> Option<Self> {
        let f = forward.normalize();
        if f == Vec3::ZERO {
            return None;
        }
        let right = f.cross(up).normalize();
        if right == Vec3::ZERO {
            return None;
        }
        let true_up = right.cross(f);
        Some(Self::from_mat3(&Mat3::from_cols(right, true_up, -f)))
    }

    /// Returns the squared magnitude.
    #[inline]
    pub fn magnitude_squared(&self) -> f32 {
        self.dot(*self)
    }

    /// Returns the four-dimensional dot product.
    #[inline]
    pub fn dot(&self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Returns a unit quaternion. A near-zero quaternion normalizes to the identity.
    pub fn normalize(&self) -> Self {
        let mag_sq = self.magnitude_squared();
        if mag_sq > EPSILON * EPSILON {
            let inv = 1.0 / mag_sq.sqrt();
            Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
        } else {
            Self::IDENTITY
        }
    }

    /// Returns the conjugate, which is the inverse of a unit quaternion.
    #[inline]
    pub fn conjugate(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Returns the multiplicative inverse, or the identity for a degenerate quaternion.
    pub fn inverse(&self) -> Self {
        let mag_sq = self.magnitude_squared();
        if mag_sq > EPSILON * EPSILON {
            let c = self.conjugate();
            let inv = 1.0 / mag_sq;
            Self::new(c.x * inv, c.y * inv, c.z * inv, c.w * inv)
        } else {
            Self::IDENTITY
        }
    }

    /// Returns `true` if all four components are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    /// Rotates a vector by this quaternion.
    pub fn rotate_vec3(&self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    /// Spherical linear interpolation along the shortest arc.
    ///
    /// `slerp(a, b, 0) == a` and `slerp(a, b, 1) == b` up to sign (both represent the
    /// same rotation).
    pub fn slerp(a: Self, b: Self, t: f32) -> Self {
        let mut cos_theta = a.dot(b);
        let mut end = b;
        if cos_theta < 0.0 {
            end = -b;
            cos_theta = -cos_theta;
        }

        if cos_theta > 1.0 - EPSILON {
            return Self::nlerp(a, end, t);
        }

        let theta = cos_theta.acos();
        let sin_theta = theta.sin();
        let wa = ((1.0 - t) * theta).sin() / sin_theta;
        let wb = (t * theta).sin() / sin_theta;
        Self::new(
            a.x * wa + end.x * wb,
            a.y * wa + end.y * wb,
            a.z * wa + end.z * wb,
            a.w * wa + end.w * wb,
        )
        .normalize()
    }

    /// Normalized linear interpolation.
    pub fn nlerp(a: Self, b: Self, t: f32) -> Self {
        Self::new(
            a.x + (b.x - a.x) * t,
            a.y + (b.y - a.y) * t,
            a.z + (b.z - a.z) * t,
            a.w + (b.w - a.w) * t,
        )
        .normalize()
    }

    /// Returns `true` if both quaternions describe the same rotation within `epsilon`.
    pub fn same_rotation(&self, other: Self, epsilon: f32) -> bool {
        (1.0 - self.dot(other).abs()) < epsilon
    }
}

impl Mul for Quaternion {
    type Output = Self;

    /// Hamilton product. `a * b` applies `b` first, then `a`.
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}

impl Mul<Vec3> for Quaternion {
    type Output = Vec3;

    fn mul(self, rhs: Vec3) -> Vec3 {
        self.rotate_vec3(rhs)
    }
}

impl Neg for Quaternion {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, -self.w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::FRAC_PI_2;
    use approx::assert_relative_eq;

    #[test]
    fn axis_angle_rotates_x_into_y() {
        let q = Quaternion::from_axis_angle(Vec3::Z, FRAC_PI_2);
        let v = q * Vec3::X;
        assert_relative_eq!(v.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(v.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn slerp_endpoints() {
        let a = Quaternion::from_axis_angle(Vec3::Y, 0.3);
        let b = Quaternion::from_axis_angle(Vec3::Y, 1.7);
        assert!(Quaternion::slerp(a, b, 0.0).same_rotation(a, 1e-5));
        assert!(Quaternion::slerp(a, b, 1.0).same_rotation(b, 1e-5));
    }

    #[test]
    fn mat3_round_trip() {
        let q = Quaternion::from_euler(Vec3::new(0.2, -0.7, 1.1));
        let back = Quaternion::from_mat3(&Mat3::from_quat(q));
        assert!(back.same_rotation(q, 1e-5));
    }

    #[test]
    fn euler_round_trip() {
        let angles = Vec3::new(0.3, -1.2, 0.8);
        let back = Quaternion::from_euler(angles).to_euler();
        assert_relative_eq!(back.x, angles.x, epsilon = 1e-4);
        assert_relative_eq!(back.y, angles.y, epsilon = 1e-4);
        assert_relative_eq!(back.z, angles.z, epsilon = 1e-4);
    }

    #[test]
    fn look_rotation_points_minus_z_at_target() {
        let q = Quaternion::look_rotation(Vec3::X, Vec3::Y).unwrap();
        let fwd = q * -Vec3::Z;
        assert_relative_eq!(fwd.x, 1.0, epsilon = 1e-5);
        assert!(Quaternion::look_rotation(Vec3::Y, Vec3::Y).is_none());
    }
}
