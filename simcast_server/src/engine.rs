//! Raw `rapier3d` physics backend.
//!
//! We own the [`PhysicsPipeline`] and every set it steps. The world is Z-up
//! with a ground half-space at z = 0. A created body is an anchor plus a
//! dynamic link joined by a revolute joint about the anchor's local Z; poses
//! reported to clients are the link's.

use std::f32::consts::FRAC_PI_2;

use rapier3d::{
    na::{Isometry3, Quaternion, Translation3, UnitQuaternion},
    prelude::*,
};
use simcast_shared::{
    config::{AnchorMode, ServerConfig},
    math::{Quat, Vec3},
    physics::{EngineError, JointedBodySpec, PhysicsEngine, Pose, ShapeSpec},
};

/// Mass given to a free anchor so gravity acts on it. Rotation stays locked.
const FREE_ANCHOR_MASS: Real = 0.1;

/// Velocity motor gain.
const MOTOR_DAMPING: Real = 1.0;

/// Engine handle: the three rapier objects that make up one body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RapierHandle {
    anchor: RigidBodyHandle,
    link: RigidBodyHandle,
    joint: ImpulseJointHandle,
}

pub struct RapierEngine {
    gravity: Vector<Real>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
}

impl RapierEngine {
    /// Empty world with a ground plane, stepping `dt` seconds per tick.
    pub fn new(gravity: Vec3, dt: f32) -> Self {
        let params = IntegrationParameters {
            dt,
            ..IntegrationParameters::default()
        };

        let mut colliders = ColliderSet::new();
        colliders.insert(ColliderBuilder::halfspace(Vector::z_axis()).build());

        Self {
            gravity: vector![gravity.x, gravity.y, gravity.z],
            params,
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders,
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
        }
    }

    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self::new(cfg.gravity, cfg.tick_interval().as_secs_f32())
    }

    fn unknown(handle: RapierHandle) -> EngineError {
        EngineError::UnknownHandle(format!("{handle:?}"))
    }
}

fn to_isometry(pose: &Pose) -> Isometry<Real> {
    let q = pose.orientation;
    Isometry3::from_parts(
        Translation3::new(pose.position.x, pose.position.y, pose.position.z),
        UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z)),
    )
}

impl PhysicsEngine for RapierEngine {
    type Handle = RapierHandle;

    fn step(&mut self) -> Result<(), EngineError> {
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            None,
            &(),
            &(),
        );

        if let Some((handle, _)) = self
            .bodies
            .iter()
            .find(|(_, b)| !b.translation().iter().all(|c| c.is_finite()))
        {
            return Err(EngineError::Backend(format!(
                "simulation diverged at {handle:?}"
            )));
        }
        Ok(())
    }

    fn create_body(&mut self, spec: &JointedBodySpec) -> Result<RapierHandle, EngineError> {
        let ShapeSpec::Cylinder { radius, height } = spec.shape;
        if !(radius > 0.0 && height > 0.0) {
            return Err(EngineError::InvalidShape(format!(
                "cylinder radius={radius} height={height}"
            )));
        }
        let iso = to_isometry(&spec.pose);

        let anchor = match spec.anchor {
            AnchorMode::Fixed => RigidBodyBuilder::fixed(),
            AnchorMode::Free => RigidBodyBuilder::dynamic()
                .additional_mass(FREE_ANCHOR_MASS)
                .lock_rotations(),
        };
        let anchor = self.bodies.insert(anchor.position(iso));
        let link = self.bodies.insert(RigidBodyBuilder::dynamic().position(iso));

        // rapier cylinders stand on Y; tip the collider so its axis is the link's Z.
        let collider = ColliderBuilder::cylinder(height * 0.5, radius)
            .rotation(Vector::x() * FRAC_PI_2)
            .mass(spec.link_mass);
        self.colliders
            .insert_with_parent(collider, link, &mut self.bodies);

        let joint = RevoluteJointBuilder::new(Vector::z_axis());
        let joint = self.impulse_joints.insert(anchor, link, joint, true);

        Ok(RapierHandle {
            anchor,
            link,
            joint,
        })
    }

    fn body_pose(&self, handle: RapierHandle) -> Result<Pose, EngineError> {
        let link = self
            .bodies
            .get(handle.link)
            .ok_or_else(|| Self::unknown(handle))?;
        let t = link.translation();
        let r = link.rotation();
        Ok(Pose {
            position: Vec3::new(t.x, t.y, t.z),
            orientation: Quat::new(r.i, r.j, r.k, r.w),
        })
    }

    fn set_joint_velocity(
        &mut self,
        handle: RapierHandle,
        joint_index: usize,
        target_velocity: f32,
        max_force: f32,
    ) -> Result<(), EngineError> {
        if joint_index != 0 {
            return Err(EngineError::NoSuchJoint(joint_index));
        }
        if self.bodies.get(handle.anchor).is_none() {
            return Err(Self::unknown(handle));
        }
        let joint = self
            .impulse_joints
            .get_mut(handle.joint, true)
            .ok_or_else(|| Self::unknown(handle))?;
        // A revolute joint's free axis is its local X in joint space.
        joint
            .data
            .set_motor_velocity(JointAxis::AngX, target_velocity, MOTOR_DAMPING)
            .set_motor_max_force(JointAxis::AngX, max_force);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(anchor: AnchorMode, z: f32) -> JointedBodySpec {
        JointedBodySpec {
            shape: ShapeSpec::Cylinder {
                radius: 1.0,
                height: 2.0,
            },
            link_mass: 1.0,
            pose: Pose {
                position: Vec3::new(0.0, 0.0, z),
                orientation: Quat::IDENTITY,
            },
            anchor,
        }
    }

    fn engine() -> RapierEngine {
        RapierEngine::from_config(&ServerConfig::default())
    }

    #[test]
    fn free_body_falls_onto_the_ground() {
        let mut engine = engine();
        let h = engine.create_body(&spec(AnchorMode::Free, 5.0)).unwrap();
        engine.set_joint_velocity(h, 0, 1.0, 10.0).unwrap();

        let start = engine.body_pose(h).unwrap().position.z;
        for _ in 0..120 {
            engine.step().unwrap();
        }
        let mid = engine.body_pose(h).unwrap().position.z;
        assert!(mid < start - 0.5, "z went {start} -> {mid}");

        for _ in 0..960 {
            engine.step().unwrap();
        }
        let rest = engine.body_pose(h).unwrap().position.z;
        assert!((rest - 1.0).abs() < 0.2, "resting z = {rest}");
    }

    #[test]
    fn fixed_body_spins_in_place() {
        let mut engine = engine();
        let h = engine.create_body(&spec(AnchorMode::Fixed, 3.0)).unwrap();
        engine.set_joint_velocity(h, 0, 1.0, 10.0).unwrap();

        for _ in 0..240 {
            engine.step().unwrap();
        }
        let pose = engine.body_pose(h).unwrap();
        assert!((pose.position.z - 3.0).abs() < 0.05, "z = {}", pose.position.z);
        assert!(pose.orientation.z.abs() > 0.05, "not spinning: {:?}", pose.orientation);
    }

    #[test]
    fn rejects_bad_shape_and_joint() {
        let mut engine = engine();
        let mut bad = spec(AnchorMode::Fixed, 1.0);
        bad.shape = ShapeSpec::Cylinder {
            radius: 0.0,
            height: 1.0,
        };
        assert!(matches!(
            engine.create_body(&bad),
            Err(EngineError::InvalidShape(_))
        ));

        let h = engine.create_body(&spec(AnchorMode::Fixed, 1.0)).unwrap();
        assert_eq!(
            engine.set_joint_velocity(h, 3, 1.0, 1.0).unwrap_err(),
            EngineError::NoSuchJoint(3)
        );
    }

    #[test]
    fn creation_pose_is_reported_before_stepping() {
        let mut engine = engine();
        let mut s = spec(AnchorMode::Fixed, 2.0);
        s.pose.orientation = Quat::from_euler(0.0, 0.0, FRAC_PI_2);
        let h = engine.create_body(&s).unwrap();
        let pose = engine.body_pose(h).unwrap();
        assert_eq!(pose.position, Vec3::new(0.0, 0.0, 2.0));
        assert!((pose.orientation.z - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }
}
