//! Math types.
//!
//! Plain `f32` value types that travel over the wire as `{"x":..,"y":..}`
//! objects. Heavy math lives in the physics engine; these only carry poses
//! between the engine, the command layer and clients.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// True when every component is a finite number.
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

/// Unit quaternion, `w` last to match the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Builds a rotation from Euler angles in radians.
    ///
    /// `roll` turns about X, `pitch` about Y, `yaw` about Z, applied in that
    /// order about the fixed axes (equivalently `q = qz * qy * qx`).
    pub fn from_euler(roll: f32, pitch: f32, yaw: f32) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();

        Self {
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
            w: cr * cp * cy + sr * sp * sy,
        }
    }

    /// Same as [`Quat::from_euler`] with the angles packed in a vector.
    pub fn from_euler_vec(angles: Vec3) -> Self {
        Self::from_euler(angles.x, angles.y, angles.z)
    }
}

/// Hamilton product: `a * b` applies `b` first, then `a`.
impl std::ops::Mul for Quat {
    type Output = Quat;

    fn mul(self, rhs: Quat) -> Quat {
        Quat {
            x: self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            y: self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            z: self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            w: self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn dot(a: Quat, b: Quat) -> f32 {
        a.x * b.x + a.y * b.y + a.z * b.z + a.w * b.w
    }

    fn approx(a: Quat, b: Quat) -> bool {
        // q and -q encode the same rotation.
        (dot(a, b).abs() - 1.0).abs() < 1e-5
    }

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn zero_euler_is_identity() {
        assert_eq!(Quat::from_euler(0.0, 0.0, 0.0), Quat::IDENTITY);
    }

    #[test]
    fn single_axis_rotations() {
        let h = FRAC_PI_2 * 0.5;
        assert!(approx(
            Quat::from_euler(FRAC_PI_2, 0.0, 0.0),
            Quat::new(h.sin(), 0.0, 0.0, h.cos())
        ));
        assert!(approx(
            Quat::from_euler(0.0, FRAC_PI_2, 0.0),
            Quat::new(0.0, h.sin(), 0.0, h.cos())
        ));
        assert!(approx(
            Quat::from_euler(0.0, 0.0, FRAC_PI_2),
            Quat::new(0.0, 0.0, h.sin(), h.cos())
        ));
    }

    #[test]
    fn euler_matches_yaw_pitch_roll_product() {
        let (roll, pitch, yaw) = (0.4, -0.7, 1.9);
        let composed = Quat::from_euler(0.0, 0.0, yaw)
            * Quat::from_euler(0.0, pitch, 0.0)
            * Quat::from_euler(roll, 0.0, 0.0);
        assert!(approx(Quat::from_euler(roll, pitch, yaw), composed));
    }

    #[test]
    fn euler_result_is_unit_length() {
        let q = Quat::from_euler_vec(Vec3::new(0.3, -1.2, 2.5));
        assert!((dot(q, q) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn non_finite_components_are_detected() {
        assert!(Vec3::new(1.0, 2.0, 3.0).is_finite());
        assert!(!Vec3::new(f32::NAN, 0.0, 0.0).is_finite());
        assert!(!Vec3::new(0.0, f32::INFINITY, 0.0).is_finite());
    }
}
