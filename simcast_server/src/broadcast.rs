//! Per-session transform broadcast.
//!
//! Each session owns one publisher. A cycle snapshots the body count, then
//! samples bodies one by one in id order, each under its own short read lock.
//! Bodies created mid-cycle wait for the next cycle. Poses within a cycle are
//! not from a single instant: the clock may step between two samples.

use std::{sync::Arc, time::Duration};

use simcast_shared::{
    net::{BodyId, ServerMsg, TransformUpdate, TransportError},
    physics::PhysicsEngine,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep_until, Instant},
};
use tracing::{debug, trace};

use crate::{session::SessionId, world::WorldState};

/// Outcome of one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub sent: usize,
    pub skipped: usize,
}

/// Samples the world for one session at a fixed cadence.
pub struct BroadcastPublisher<E: PhysicsEngine> {
    world: Arc<WorldState<E>>,
    interval: Duration,
}

impl<E: PhysicsEngine> BroadcastPublisher<E> {
    pub fn new(world: Arc<WorldState<E>>, interval: Duration) -> Self {
        Self { world, interval }
    }

    /// Pushes one update per body into `out`.
    ///
    /// A body whose pose cannot be read is skipped. A closed `out` ends the
    /// cycle with [`TransportError::Closed`].
    pub async fn run_cycle(
        &self,
        out: &mpsc::Sender<ServerMsg>,
    ) -> Result<CycleReport, TransportError> {
        let count = self.world.len();
        let mut report = CycleReport::default();

        for index in 0..count {
            let id = BodyId::from_index(index);
            let pose = match self.world.pose(id) {
                Ok(pose) => pose,
                Err(e) => {
                    debug!(body = %id, error = %e, "pose unavailable, skipping body this cycle");
                    report.skipped += 1;
                    continue;
                }
            };

            let update = TransformUpdate {
                id,
                position: pose.position,
                orientation: pose.orientation,
            };
            out.send(ServerMsg::Transform(update))
                .await
                .map_err(|_| TransportError::Closed)?;
            report.sent += 1;
        }

        Ok(report)
    }

    /// Runs cycles until `stop` fires (or its sender is dropped).
    pub async fn run(
        self,
        session: SessionId,
        out: mpsc::Sender<ServerMsg>,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<(), TransportError> {
        let mut next = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                res = self.run_cycle(&out) => {
                    let report = res?;
                    trace!(session = ?session, sent = report.sent, skipped = report.skipped, "broadcast cycle");
                }
            }

            next += self.interval;
            let now = Instant::now();
            if now > next + self.interval {
                next = now;
            }

            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = sleep_until(next) => {}
            }
        }

        debug!(session = ?session, "broadcast stopped");
        Ok(())
    }
}
