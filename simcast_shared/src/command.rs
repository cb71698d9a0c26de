//! Client commands.
//!
//! Inbound frames are JSON objects dispatched on their `type` field. Decoding
//! is two-staged so the server can tell an unknown command apart from a known
//! one with bad fields; both end up as a [`ValidationError`] that is reported
//! back to the sender and never goes further.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::math::Vec3;

const TYPE_CYLINDER: &str = "cylinder";
const TYPE_DISCONNECT: &str = "disconnect";

/// Every command a client can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
    /// Create a spinning cylinder.
    #[serde(rename = "cylinder")]
    CreateCylinder(CreateCylinder),
    /// Explicit close of the session.
    #[serde(rename = "disconnect")]
    Disconnect,
}

/// Parameters of a cylinder creation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCylinder {
    pub radius_top: f32,
    pub radius_bottom: f32,
    pub height: f32,
    pub position: Vec3,
    /// Euler angles in radians.
    #[serde(rename = "rotation")]
    pub rotation_euler: Vec3,
}

impl CreateCylinder {
    /// Checks ranges. Runs before anything touches the engine.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("radiusTop", self.radius_top),
            ("radiusBottom", self.radius_bottom),
            ("height", self.height),
        ] {
            if !value.is_finite() {
                return Err(ValidationError::NonFinite { field });
            }
            if value <= 0.0 {
                return Err(ValidationError::NonPositive { field, value });
            }
        }
        if !self.position.is_finite() {
            return Err(ValidationError::NonFinite { field: "position" });
        }
        if !self.rotation_euler.is_finite() {
            return Err(ValidationError::NonFinite { field: "rotation" });
        }
        Ok(())
    }

    /// The collision radius: the larger of the two end radii. The collider is
    /// a plain cylinder, not a frustum.
    pub fn effective_radius(&self) -> f32 {
        self.radius_top.max(self.radius_bottom)
    }
}

/// Rejection of a single inbound command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unknown command type {0:?}")]
    UnknownCommand(String),
    #[error("{field} must be greater than zero (got {value})")]
    NonPositive { field: &'static str, value: f32 },
    #[error("{field} must be finite")]
    NonFinite { field: &'static str },
}

impl ValidationError {
    /// Stable machine-readable kind, sent in error replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::UnknownCommand(_) => "unknown_command",
            Self::NonPositive { .. } => "non_positive",
            Self::NonFinite { .. } => "non_finite",
        }
    }
}

/// Decodes one inbound frame into a command.
pub fn decode_command(frame: &[u8]) -> Result<Command, ValidationError> {
    let value: Value = serde_json::from_slice(frame)
        .map_err(|e| ValidationError::MalformedPayload(e.to_string()))?;

    let kind = match value.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(_) => {
            return Err(ValidationError::MalformedPayload(
                "\"type\" must be a string".to_string(),
            ))
        }
        None => {
            return Err(ValidationError::MalformedPayload(
                "missing \"type\" field".to_string(),
            ))
        }
    };

    match kind.as_str() {
        TYPE_CYLINDER | TYPE_DISCONNECT => serde_json::from_value(value)
            .map_err(|e| ValidationError::MalformedPayload(e.to_string())),
        _ => Err(ValidationError::UnknownCommand(kind)),
    }
}
