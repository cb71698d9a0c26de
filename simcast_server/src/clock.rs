//! Fixed-rate simulation clock.
//!
//! Runs on its own OS thread, never on the async runtime: each iteration steps
//! the engine under the world's write lock, then sleeps until the next
//! deadline. Deadlines advance by a fixed period so sleep jitter does not
//! accumulate; after a stall longer than one period the schedule restarts from
//! "now" instead of bursting to catch up.
//!
//! A failed step is fatal. The thread reports it and exits.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use simcast_shared::physics::PhysicsEngine;
use tracing::{error, info};

use crate::{error::FatalReporter, world::WorldState};

/// Drives a world at a fixed tick rate.
pub struct SimulationClock<E: PhysicsEngine> {
    world: Arc<WorldState<E>>,
    interval: Duration,
}

impl<E: PhysicsEngine + 'static> SimulationClock<E> {
    pub fn new(world: Arc<WorldState<E>>, interval: Duration) -> Self {
        Self { world, interval }
    }

    /// Starts the clock thread.
    pub fn spawn(self, fatal: FatalReporter) -> std::io::Result<ClockHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = std::thread::Builder::new()
            .name("sim-clock".to_string())
            .spawn(move || self.run(&flag, &fatal))?;
        Ok(ClockHandle {
            stop,
            thread: Some(thread),
        })
    }

    fn run(self, stop: &AtomicBool, fatal: &FatalReporter) {
        info!(interval = ?self.interval, "simulation clock started");
        let mut next = Instant::now();

        while !stop.load(Ordering::Acquire) {
            if let Err(e) = self.world.step() {
                error!(error = %e, tick = self.world.ticks(), "simulation step failed");
                fatal.report(e);
                return;
            }

            next += self.interval;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else if now - next > self.interval {
                next = now;
            }
        }

        info!(ticks = self.world.ticks(), "simulation clock stopped");
    }
}

/// Owner handle of the clock thread. Dropping it asks the thread to stop.
#[derive(Debug)]
pub struct ClockHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl ClockHandle {
    /// False once the thread has exited (stopped or failed).
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the clock and waits for the thread to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("simulation thread panicked");
            }
        }
    }
}

impl Drop for ClockHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
