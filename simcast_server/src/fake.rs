//! Scriptable stand-in engine for tests.
//!
//! Free-anchored bodies fall ballistically until their base touches z = 0,
//! fixed ones stay put; every driven joint turns the link about its local Z.
//! [`FakeControls`] injects failures at runtime.

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use simcast_shared::{
    config::AnchorMode,
    math::{Quat, Vec3},
    physics::{EngineError, JointedBodySpec, PhysicsEngine, Pose, ShapeSpec},
};

/// Handle into a [`FakeEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FakeHandle(pub usize);

#[derive(Debug, Clone, Copy)]
struct FakeBody {
    position: Vec3,
    base_orientation: Quat,
    fall_speed: f32,
    rest_z: f32,
    anchor: AnchorMode,
    spin: f32,
    angle: f32,
}

#[derive(Debug, Default)]
struct ControlState {
    failing_poses: HashSet<usize>,
    fail_step: bool,
    fail_create: bool,
}

/// Shared switches for failure injection.
#[derive(Debug, Clone, Default)]
pub struct FakeControls {
    state: Arc<Mutex<ControlState>>,
}

impl FakeControls {
    /// Makes pose lookups for `handle` fail (or succeed again).
    pub fn fail_pose(&self, handle: usize, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_poses.insert(handle);
        } else {
            state.failing_poses.remove(&handle);
        }
    }

    pub fn fail_step(&self, fail: bool) {
        self.state.lock().fail_step = fail;
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.lock().fail_create = fail;
    }
}

/// Minimal engine with the same contract as the real one.
#[derive(Debug)]
pub struct FakeEngine {
    bodies: Vec<FakeBody>,
    gravity_z: f32,
    dt: f32,
    controls: FakeControls,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new(-9.8, 1.0 / 240.0)
    }
}

impl FakeEngine {
    pub fn new(gravity_z: f32, dt: f32) -> Self {
        Self {
            bodies: Vec::new(),
            gravity_z,
            dt,
            controls: FakeControls::default(),
        }
    }

    pub fn controls(&self) -> FakeControls {
        self.controls.clone()
    }

    fn body_mut(&mut self, handle: FakeHandle) -> Result<&mut FakeBody, EngineError> {
        self.bodies
            .get_mut(handle.0)
            .ok_or_else(|| EngineError::UnknownHandle(format!("{handle:?}")))
    }
}

impl PhysicsEngine for FakeEngine {
    type Handle = FakeHandle;

    fn step(&mut self) -> Result<(), EngineError> {
        if self.controls.state.lock().fail_step {
            return Err(EngineError::Backend("injected step failure".into()));
        }
        let (g, dt) = (self.gravity_z, self.dt);
        for body in &mut self.bodies {
            if body.anchor == AnchorMode::Free && body.position.z > body.rest_z {
                body.fall_speed += g * dt;
                body.position.z = (body.position.z + body.fall_speed * dt).max(body.rest_z);
                if body.position.z <= body.rest_z {
                    body.fall_speed = 0.0;
                }
            }
            body.angle += body.spin * dt;
        }
        Ok(())
    }

    fn create_body(&mut self, spec: &JointedBodySpec) -> Result<FakeHandle, EngineError> {
        if self.controls.state.lock().fail_create {
            return Err(EngineError::Backend("injected create failure".into()));
        }
        let ShapeSpec::Cylinder { radius, height } = spec.shape;
        if radius <= 0.0 || height <= 0.0 {
            return Err(EngineError::InvalidShape(format!(
                "cylinder radius={radius} height={height}"
            )));
        }
        self.bodies.push(FakeBody {
            position: spec.pose.position,
            base_orientation: spec.pose.orientation,
            fall_speed: 0.0,
            rest_z: height * 0.5,
            anchor: spec.anchor,
            spin: 0.0,
            angle: 0.0,
        });
        Ok(FakeHandle(self.bodies.len() - 1))
    }

    fn body_pose(&self, handle: FakeHandle) -> Result<Pose, EngineError> {
        if self.controls.state.lock().failing_poses.contains(&handle.0) {
            return Err(EngineError::UnknownHandle(format!("{handle:?} (stale)")));
        }
        let body = self
            .bodies
            .get(handle.0)
            .ok_or_else(|| EngineError::UnknownHandle(format!("{handle:?}")))?;
        Ok(Pose {
            position: body.position,
            orientation: body.base_orientation * Quat::from_euler(0.0, 0.0, body.angle),
        })
    }

    fn set_joint_velocity(
        &mut self,
        handle: FakeHandle,
        joint_index: usize,
        target_velocity: f32,
        _max_force: f32,
    ) -> Result<(), EngineError> {
        if joint_index != 0 {
            return Err(EngineError::NoSuchJoint(joint_index));
        }
        self.body_mut(handle)?.spin = target_velocity;
        Ok(())
    }
}
