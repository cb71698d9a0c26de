//! Cylinder command builder.
//!
//! Defaults match what a user gets from the creation form: a unit-radius,
//! two-unit-tall cylinder standing on the ground at the origin.

use simcast_shared::{command::CreateCylinder, math::Vec3};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CylinderShape {
    radius_top: f32,
    radius_bottom: f32,
    height: f32,
    position: Option<Vec3>,
    rotation: Vec3,
}

impl Default for CylinderShape {
    fn default() -> Self {
        Self {
            radius_top: 1.0,
            radius_bottom: 1.0,
            height: 2.0,
            position: None,
            rotation: Vec3::ZERO,
        }
    }
}

impl CylinderShape {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn radii(mut self, top: f32, bottom: f32) -> Self {
        self.radius_top = top;
        self.radius_bottom = bottom;
        self
    }

    pub fn height(mut self, h: f32) -> Self {
        self.height = h;
        self
    }

    pub fn position(mut self, p: Vec3) -> Self {
        self.position = Some(p);
        self
    }

    /// Euler angles in radians (roll, pitch, yaw).
    pub fn rotation(mut self, r: Vec3) -> Self {
        self.rotation = r;
        self
    }

    /// Without an explicit position the cylinder rests on the ground at the
    /// origin.
    pub fn build(self) -> CreateCylinder {
        CreateCylinder {
            radius_top: self.radius_top,
            radius_bottom: self.radius_bottom,
            height: self.height,
            position: self
                .position
                .unwrap_or(Vec3::new(0.0, 0.0, self.height / 2.0)),
            rotation_euler: self.rotation,
        }
    }
}
