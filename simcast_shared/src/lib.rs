//! `simcast_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - One definition of the wire protocol for both ends.
//! - The physics engine is a collaborator behind a trait; nothing here does
//!   physics math.
//! - No `unsafe`.

pub mod command;
pub mod config;
pub mod math;
pub mod net;
pub mod physics;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::command::*;
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::physics::*;
}
