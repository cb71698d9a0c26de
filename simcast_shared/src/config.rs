//! Configuration system.
//!
//! Loads server/client configuration from JSON strings or files. Every field
//! has a default, so a config file only needs to name what it overrides.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::math::Vec3;

/// Default upper bound for one wire frame, in bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// How the anchor of a spinning body is held in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// The anchor is pinned where the body was created; only the link moves.
    #[default]
    Fixed,
    /// The anchor is a dynamic carrier with locked rotation; the body falls.
    Free,
}

impl std::str::FromStr for AnchorMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(Self::Fixed),
            "free" => Ok(Self::Free),
            other => anyhow::bail!("unknown anchor mode {other:?} (expected fixed|free)"),
        }
    }
}

/// Joint drive applied to every newly created body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinConfig {
    /// Target angular velocity of joint 0, rad/s.
    #[serde(default = "default_target_velocity")]
    pub target_velocity: f32,
    /// Maximum force the joint motor may apply.
    #[serde(default = "default_max_force")]
    pub max_force: f32,
}

fn default_target_velocity() -> f32 {
    1.0
}

fn default_max_force() -> f32 {
    10.0
}

impl Default for SpinConfig {
    fn default() -> Self {
        Self {
            target_velocity: default_target_velocity(),
            max_force: default_max_force(),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:8000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Physics steps per second.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Transform broadcast cycles per second, per session.
    #[serde(default = "default_broadcast_hz")]
    pub broadcast_hz: u32,
    #[serde(default = "default_gravity")]
    pub gravity: Vec3,
    #[serde(default)]
    pub anchor: AnchorMode,
    #[serde(default)]
    pub spin: SpinConfig,
    /// Largest accepted inbound frame.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// Outbound messages buffered per session before broadcast backs off.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

fn default_server_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_tick_hz() -> u32 {
    240
}

fn default_broadcast_hz() -> u32 {
    30
}

fn default_gravity() -> Vec3 {
    Vec3::new(0.0, 0.0, -9.8)
}

fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}

fn default_outbound_queue() -> usize {
    1024
}

fn default_reply_timeout_ms() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            broadcast_hz: default_broadcast_hz(),
            gravity: default_gravity(),
            anchor: AnchorMode::default(),
            spin: SpinConfig::default(),
            max_frame_len: default_max_frame_len(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg = Self::from_json_str(&text)
            .with_context(|| format!("parse config {}", path.display()))?;
        debug!(path = %path.display(), "loaded server config");
        Ok(cfg)
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.tick_hz > 0, "tick_hz must be positive");
        anyhow::ensure!(self.broadcast_hz > 0, "broadcast_hz must be positive");
        anyhow::ensure!(self.max_frame_len > 0, "max_frame_len must be positive");
        anyhow::ensure!(self.outbound_queue > 0, "outbound_queue must be positive");
        anyhow::ensure!(self.gravity.is_finite(), "gravity must be finite");
        anyhow::ensure!(
            self.spin.target_velocity.is_finite() && self.spin.max_force.is_finite(),
            "spin settings must be finite"
        );
        if self.broadcast_hz > self.tick_hz {
            warn!(
                tick_hz = self.tick_hz,
                broadcast_hz = self.broadcast_hz,
                "broadcast rate exceeds tick rate; clients will see repeated poses"
            );
        }
        Ok(())
    }

    /// Fixed physics period.
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.tick_hz))
    }

    /// Per-session broadcast period.
    pub fn broadcast_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / f64::from(self.broadcast_hz))
    }
}

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// How long a command waits for its reply before giving up on it.
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            max_frame_len: default_max_frame_len(),
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn reply_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reply_timeout_ms)
    }
}
