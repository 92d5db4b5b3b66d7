//! Cursor position message — the wire unit of the presence protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::frame::Data;
use crate::ids::ParticipantId;

pub const FIELD_PARTICIPANT_ID: &str = "participantId";
pub const FIELD_X: &str = "x";
pub const FIELD_Y: &str = "y";

/// Surface-local pixel coordinates, origin at the surface's top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// `{ participantId, x, y }` as carried on the room channel.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPosition {
    pub participant_id: ParticipantId,
    pub position: Position,
}

impl CursorPosition {
    #[must_use]
    pub fn new(participant_id: ParticipantId, position: Position) -> Self {
        Self { participant_id, position }
    }

    /// Parse a channel payload. Returns `None` for anything that is not a
    /// non-empty string id plus two finite numbers.
    #[must_use]
    pub fn from_payload(data: &Data) -> Option<Self> {
        let participant_id = data
            .get(FIELD_PARTICIPANT_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())?;
        let x = data.get(FIELD_X).and_then(Value::as_f64).filter(|v| v.is_finite())?;
        let y = data.get(FIELD_Y).and_then(Value::as_f64).filter(|v| v.is_finite())?;
        Some(Self { participant_id: ParticipantId::from(participant_id), position: Position { x, y } })
    }

    #[must_use]
    pub fn to_payload(&self) -> Data {
        let mut data = Data::new();
        data.insert(FIELD_PARTICIPANT_ID.into(), Value::String(self.participant_id.to_string()));
        data.insert(FIELD_X.into(), serde_json::json!(self.position.x));
        data.insert(FIELD_Y.into(), serde_json::json!(self.position.y));
        data
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
