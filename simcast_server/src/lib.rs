//! `simcast_server`
//!
//! Server-side systems:
//! - Authoritative world (append-only body arena + physics engine)
//! - Fixed-rate simulation clock on a dedicated thread
//! - Command processing (body creation)
//! - Per-session transform broadcast at an independent cadence
//! - Connection sessions over framed TCP
//!
//! Threading model:
//! - one OS thread steps the engine;
//! - the tokio runtime runs the accept loop and every session;
//! - both meet at [`world::WorldState`]'s lock.

pub mod broadcast;
pub mod clock;
pub mod commands;
pub mod engine;
pub mod error;
pub mod fake;
pub mod server;
pub mod session;
pub mod world;

pub use engine::RapierEngine;
pub use server::SimServer;
pub use world::WorldState;
