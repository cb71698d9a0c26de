//! `simcast_client`
//!
//! Client-side systems:
//! - Connection management over the framed TCP stream
//! - Command submission (cylinder creation, disconnect)
//! - Transform cache with interpolation between broadcasts

pub mod cache;
pub mod client;
pub mod shape;

pub use cache::TransformCache;
pub use client::{Rejected, SimClient};
pub use shape::CylinderShape;
