//! Command processing.
//!
//! Turns validated client commands into world mutations. Runs on the session
//! tasks; the world's write lock serializes it against the simulation step and
//! against other sessions.

use std::sync::Arc;

use simcast_shared::{
    command::CreateCylinder,
    config::{AnchorMode, ServerConfig, SpinConfig},
    math::Quat,
    net::BodyId,
    physics::{JointedBodySpec, PhysicsEngine, Pose, ShapeSpec},
};
use tracing::debug;

use crate::{error::CommandError, world::WorldState};

/// Mass of the link carrying the shape. The anchor is massless.
pub const LINK_MASS: f32 = 1.0;

/// The revolute joint every created body is driven through.
pub const SPIN_JOINT: usize = 0;

/// Applies client commands to the world.
pub struct CommandProcessor<E: PhysicsEngine> {
    world: Arc<WorldState<E>>,
    anchor: AnchorMode,
    spin: SpinConfig,
}

impl<E: PhysicsEngine> CommandProcessor<E> {
    pub fn new(world: Arc<WorldState<E>>, cfg: &ServerConfig) -> Self {
        Self {
            world,
            anchor: cfg.anchor,
            spin: cfg.spin,
        }
    }

    /// Creates a spinning cylinder and returns its id.
    ///
    /// The id is the number of bodies that existed before this one. The
    /// joint is already driven when the body becomes visible to broadcasts.
    pub fn handle_create_cylinder(&self, cmd: &CreateCylinder) -> Result<BodyId, CommandError> {
        cmd.validate()?;

        let shape = ShapeSpec::Cylinder {
            radius: cmd.effective_radius(),
            height: cmd.height,
        };
        let spec = JointedBodySpec {
            shape,
            link_mass: LINK_MASS,
            pose: Pose {
                position: cmd.position,
                orientation: Quat::from_euler_vec(cmd.rotation_euler),
            },
            anchor: self.anchor,
        };
        let spin = self.spin;

        let id = self.world.create_with(shape.kind(), |engine| {
            let handle = engine.create_body(&spec)?;
            engine.set_joint_velocity(handle, SPIN_JOINT, spin.target_velocity, spin.max_force)?;
            Ok(handle)
        })?;

        debug!(body = %id, ?shape, position = ?cmd.position, "cylinder created");
        Ok(id)
    }
}
