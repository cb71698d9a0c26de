//! Server error types.
//!
//! A failed engine step or body creation leaves the world in an unknown state,
//! so those are fatal for the whole process. Anything that notices one hands it
//! to the [`FatalReporter`]; the binary exits when the receiver yields.

use std::fmt;

use simcast_shared::{command::ValidationError, physics::EngineError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Engine operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOp {
    Step,
    CreateBody,
}

impl fmt::Display for EngineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineOp::Step => f.write_str("step"),
            EngineOp::CreateBody => f.write_str("create body"),
        }
    }
}

/// An engine failure the process cannot continue after.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("engine {op} failed: {source}")]
pub struct EngineFatalError {
    pub op: EngineOp,
    #[source]
    pub source: EngineError,
}

impl EngineFatalError {
    pub fn new(op: EngineOp, source: EngineError) -> Self {
        Self { op, source }
    }
}

/// Failure of a client command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    /// Bad input; goes back to the sender only.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Fatal(#[from] EngineFatalError),
}

/// Sending side of the process-wide fatal channel.
#[derive(Debug, Clone)]
pub struct FatalReporter {
    tx: mpsc::UnboundedSender<EngineFatalError>,
}

impl FatalReporter {
    pub fn report(&self, err: EngineFatalError) {
        // The receiver only goes away during shutdown.
        let _ = self.tx.send(err);
    }
}

/// Creates the fatal channel. Usable from plain threads and async tasks alike.
pub fn fatal_channel() -> (FatalReporter, mpsc::UnboundedReceiver<EngineFatalError>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (FatalReporter { tx }, rx)
}
