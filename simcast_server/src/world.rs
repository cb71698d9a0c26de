//! Authoritative world state.
//!
//! The engine and the body sequence live together behind one `RwLock`:
//! - stepping and creation take the write lock, so they never overlap;
//! - pose reads and count snapshots take the read lock.
//!
//! Bodies are an append-only arena. A body's id is its index, assigned under
//! the same write lock that creates it in the engine, so a reader either sees
//! the whole body or nothing. Deleting bodies would need generation-tagged ids.
//!
//! The lock is never held across an `.await`.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use simcast_shared::{
    net::BodyId,
    physics::{EngineError, PhysicsEngine, Pose, ShapeKind},
};
use thiserror::Error;

use crate::error::{EngineFatalError, EngineOp};

/// One simulated body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body<H> {
    pub id: BodyId,
    pub engine_handle: H,
    pub shape: ShapeKind,
    /// Creation sequence number, strictly increasing across the world's
    /// lifetime.
    pub created_at: u64,
    /// Simulation tick at which the body was created.
    pub created_tick: u64,
}

/// Why a pose could not be sampled. Never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoseError {
    #[error("no body with id {0}")]
    UnknownBody(BodyId),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

struct Inner<E: PhysicsEngine> {
    engine: E,
    bodies: Vec<Body<E::Handle>>,
    next_seq: u64,
}

/// The single shared world.
pub struct WorldState<E: PhysicsEngine> {
    inner: RwLock<Inner<E>>,
    ticks: AtomicU64,
}

impl<E: PhysicsEngine> WorldState<E> {
    pub fn new(engine: E) -> Self {
        Self {
            inner: RwLock::new(Inner {
                engine,
                bodies: Vec::new(),
                next_seq: 0,
            }),
            ticks: AtomicU64::new(0),
        }
    }

    /// Advances the engine one step. Returns the new tick count.
    pub fn step(&self) -> Result<u64, EngineFatalError> {
        let mut inner = self.inner.write();
        inner
            .engine
            .step()
            .map_err(|e| EngineFatalError::new(EngineOp::Step, e))?;
        Ok(self.ticks.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Creates a body with `build` and appends it, all under one write lock.
    ///
    /// `build` gets exclusive access to the engine and returns the handle of
    /// the body it made. Any engine error is fatal.
    pub fn create_with<F>(&self, shape: ShapeKind, build: F) -> Result<BodyId, EngineFatalError>
    where
        F: FnOnce(&mut E) -> Result<E::Handle, EngineError>,
    {
        let mut inner = self.inner.write();
        let engine_handle =
            build(&mut inner.engine).map_err(|e| EngineFatalError::new(EngineOp::CreateBody, e))?;

        let id = BodyId::from_index(inner.bodies.len());
        let created_at = inner.next_seq;
        inner.next_seq += 1;
        inner.bodies.push(Body {
            id,
            engine_handle,
            shape,
            created_at,
            created_tick: self.ticks.load(Ordering::Acquire),
        });
        Ok(id)
    }

    /// Number of bodies created so far.
    pub fn len(&self) -> usize {
        self.inner.read().bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ticks stepped since start.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Copy of every body, in id order.
    pub fn bodies(&self) -> Vec<Body<E::Handle>> {
        self.inner.read().bodies.clone()
    }

    /// Current pose of a body, read from the engine.
    pub fn pose(&self, id: BodyId) -> Result<Pose, PoseError> {
        let inner = self.inner.read();
        let body = id
            .index()
            .and_then(|i| inner.bodies.get(i))
            .ok_or(PoseError::UnknownBody(id))?;
        Ok(inner.engine.body_pose(body.engine_handle)?)
    }
}
