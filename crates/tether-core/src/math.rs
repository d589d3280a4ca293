// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Deterministic vector and quaternion math for truth-state payloads.
//!
//! Transcendentals go through `libm` so identical inputs produce identical
//! bits on every supported platform. The engine stores rotations as
//! quaternions only; Euler angles are an actuator-boundary concern and never
//! enter this module.

use core::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Three-component `f32` vector (position, velocity).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f32,
    /// Y component.
    pub y: f32,
    /// Z component.
    pub z: f32,
}

impl Vec3 {
    /// The zero vector.
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Constructs a vector from components.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Dot product.
    #[inline]
    #[must_use]
    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Euclidean length.
    #[inline]
    #[must_use]
    pub fn length(self) -> f32 {
        libm::sqrtf(self.dot(self))
    }

    /// Euclidean distance to `rhs`.
    #[inline]
    #[must_use]
    pub fn distance(self, rhs: Self) -> f32 {
        (self - rhs).length()
    }

    /// Component-wise scale.
    #[inline]
    #[must_use]
    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Linear interpolation by `u ∈ [0, 1]` (not clamped here; callers clamp).
    #[inline]
    #[must_use]
    pub fn lerp(self, rhs: Self, u: f32) -> Self {
        self + (rhs - self).scale(u)
    }

    /// Replaces non-finite components with zero.
    ///
    /// Observations arrive from untrusted sources; NaN and infinity must not
    /// survive normalisation into the truth log.
    #[must_use]
    pub fn sanitized(self) -> Self {
        let fix = |v: f32| if v.is_finite() { v } else { 0.0 };
        Self::new(fix(self.x), fix(self.y), fix(self.z))
    }

    /// True when every component is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: f32) -> Self {
        self.scale(rhs)
    }
}

/// Unit quaternion rotation, `(x, y, z, w)` with `w` as the scalar part.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    /// Vector part, x.
    pub x: f32,
    /// Vector part, y.
    pub y: f32,
    /// Vector part, z.
    pub z: f32,
    /// Scalar part.
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    /// Constructs a quaternion from components. No normalisation is applied.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Four-component dot product.
    #[inline]
    #[must_use]
    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    /// Quaternion norm.
    #[inline]
    #[must_use]
    pub fn length(self) -> f32 {
        libm::sqrtf(self.dot(self))
    }

    /// Returns the normalised quaternion, or identity when degenerate.
    ///
    /// A zero or non-finite quaternion has no meaningful direction; identity
    /// is the only rotation every consumer can absorb.
    #[must_use]
    pub fn normalized(self) -> Self {
        if !(self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite())
        {
            return Self::IDENTITY;
        }
        let len = self.length();
        if len <= f32::EPSILON {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
    }

    /// Conjugate (inverse for unit quaternions).
    #[inline]
    #[must_use]
    pub fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Hamilton product `self * rhs`.
    #[must_use]
    pub fn mul_quat(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    /// Rotates a vector by this quaternion.
    #[must_use]
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let qv = Vec3::new(self.x, self.y, self.z);
        let uv = cross(qv, v);
        let uuv = cross(qv, uv);
        v + uv.scale(2.0 * self.w) + uuv.scale(2.0)
    }

    /// Spherical interpolation by `u ∈ [0, 1]`.
    ///
    /// Takes the shortest arc. Falls back to normalised lerp when the inputs
    /// are nearly parallel, where the sine denominator loses precision.
    #[must_use]
    pub fn slerp(self, rhs: Self, u: f32) -> Self {
        let mut cos_theta = self.dot(rhs);
        let mut end = rhs;
        if cos_theta < 0.0 {
            cos_theta = -cos_theta;
            end = Self::new(-rhs.x, -rhs.y, -rhs.z, -rhs.w);
        }
        if cos_theta > 0.9995 {
            return Self::new(
                self.x + (end.x - self.x) * u,
                self.y + (end.y - self.y) * u,
                self.z + (end.z - self.z) * u,
                self.w + (end.w - self.w) * u,
            )
            .normalized();
        }
        let theta = libm::acosf(cos_theta.clamp(-1.0, 1.0));
        let sin_theta = libm::sinf(theta);
        let a = libm::sinf((1.0 - u) * theta) / sin_theta;
        let b = libm::sinf(u * theta) / sin_theta;
        Self::new(
            self.x * a + end.x * b,
            self.y * a + end.y * b,
            self.z * a + end.z * b,
            self.w * a + end.w * b,
        )
        .normalized()
    }

    /// Angular distance to `rhs` in radians.
    #[must_use]
    pub fn angle_to(self, rhs: Self) -> f32 {
        let d = self.dot(rhs).abs().clamp(-1.0, 1.0);
        2.0 * libm::acosf(d)
    }
}

#[inline]
fn cross(a: Vec3, b: Vec3) -> Vec3 {
    Vec3::new(
        a.y * b.z - a.z * b.y,
        a.z * b.x - a.x * b.z,
        a.x * b.y - a.y * b.x,
    )
}

/// Deterministic `e^x` for confidence decay curves.
#[inline]
#[must_use]
pub fn exp_f32(x: f32) -> f32 {
    libm::expf(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lerp_midpoint_is_average() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(10.0, -4.0, 2.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(5.0, -2.0, 1.0));
    }

    #[test]
    fn normalized_degenerate_is_identity() {
        assert_eq!(Quat::new(0.0, 0.0, 0.0, 0.0).normalized(), Quat::IDENTITY);
        assert_eq!(
            Quat::new(f32::NAN, 0.0, 0.0, 1.0).normalized(),
            Quat::IDENTITY
        );
    }

    #[test]
    fn slerp_endpoints_round_trip() {
        let a = Quat::IDENTITY;
        // 90° about Z.
        let s = libm::sinf(core::f32::consts::FRAC_PI_4);
        let c = libm::cosf(core::f32::consts::FRAC_PI_4);
        let b = Quat::new(0.0, 0.0, s, c);
        let at_zero = a.slerp(b, 0.0);
        let at_one = a.slerp(b, 1.0);
        assert!(at_zero.angle_to(a) < 1e-4);
        assert!(at_one.angle_to(b) < 1e-4);
    }

    #[test]
    fn rotate_by_identity_is_noop() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(Quat::IDENTITY.rotate(v), v);
    }

    #[test]
    fn sanitized_zeroes_non_finite_components() {
        let v = Vec3::new(f32::NAN, f32::INFINITY, 3.0).sanitized();
        assert_eq!(v, Vec3::new(0.0, 0.0, 3.0));
    }
}
