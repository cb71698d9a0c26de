//! Physics engine interface.
//!
//! The server never does physics math itself. It drives an engine through
//! [`PhysicsEngine`] and addresses bodies by the engine's opaque handle.

use std::fmt::Debug;

use thiserror::Error;

use crate::{
    config::AnchorMode,
    math::{Quat, Vec3},
};

/// Collision shape families the world knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Cylinder,
}

/// Position and orientation of a body in world space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

/// A fixed-base body: a massless anchor carrying one revolute-jointed link.
///
/// The joint axis is the anchor's local Z. The link carries the shape with its
/// axis along the same local Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointedBodySpec {
    pub shape: ShapeSpec,
    /// Mass of the link carrying the shape.
    pub link_mass: f32,
    /// World pose of the anchor (and of the link at rest).
    pub pose: Pose,
    pub anchor: AnchorMode,
}

/// Concrete collision shape with dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShapeSpec {
    Cylinder { radius: f32, height: f32 },
}

impl ShapeSpec {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Cylinder { .. } => ShapeKind::Cylinder,
        }
    }
}

/// Errors raised by an engine call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("unknown body handle {0}")]
    UnknownHandle(String),
    #[error("body has no joint {0}")]
    NoSuchJoint(usize),
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("engine failure: {0}")]
    Backend(String),
}

/// The rigid-body engine collaborator.
///
/// Calls that mutate (`step`, `create_body`, `set_joint_velocity`) take
/// `&mut self`; callers serialize them. `body_pose` only reads committed state.
pub trait PhysicsEngine: Send + Sync {
    type Handle: Copy + Send + Sync + Debug;

    /// Advances the world by one fixed step.
    fn step(&mut self) -> Result<(), EngineError>;

    /// Creates a body and returns the engine's handle for it.
    fn create_body(&mut self, spec: &JointedBodySpec) -> Result<Self::Handle, EngineError>;

    /// Current pose of the body's link.
    fn body_pose(&self, handle: Self::Handle) -> Result<Pose, EngineError>;

    /// Puts joint `joint_index` into velocity control.
    fn set_joint_velocity(
        &mut self,
        handle: Self::Handle,
        joint_index: usize,
        target_velocity: f32,
        max_force: f32,
    ) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_kind_follows_spec() {
        let shape = ShapeSpec::Cylinder {
            radius: 1.0,
            height: 2.0,
        };
        assert_eq!(shape.kind(), ShapeKind::Cylinder);
    }

    #[test]
    fn default_pose_is_origin_identity() {
        let pose = Pose::default();
        assert_eq!(pose.position, Vec3::ZERO);
        assert_eq!(pose.orientation, Quat::IDENTITY);
    }
}
