//! Wire-level messages exchanged with WebSocket clients.
//!
//! Every frame is a JSON object with a `type` tag:
//! - client → server: `note`, `nextScene`
//! - server → client: `note`, `cue`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Highest value a MIDI data byte (pitch, velocity) may carry.
pub const MAX_DATA_BYTE: u8 = 127;

/// Per-pitch display labels, keyed by MIDI note number.
pub type Labels = BTreeMap<u8, String>;

// =============================================================================
// Server → client
// =============================================================================

/// Message fanned out to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A note was played (by the hardware or by another client)
    Note { note: u8, velocity: u8 },

    /// The active scene changed
    Cue {
        text: String,
        labels: Labels,
        #[serde(rename = "normalColor")]
        normal_color: String,
        #[serde(rename = "pressColor")]
        press_color: String,
    },
}

impl ServerMessage {
    /// Short name used in log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Note { .. } => "note",
            ServerMessage::Cue { .. } => "cue",
        }
    }
}

/// Outbound queue item. Shared so fan-out never deep-copies a cue.
pub type Outbound = Arc<ServerMessage>;

// =============================================================================
// Client → server
// =============================================================================

/// Message received from a client.
///
/// `note` fields are optional on the wire so that a malformed note can be
/// reported and skipped instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Note {
        #[serde(default)]
        note: Option<u8>,
        #[serde(default)]
        velocity: Option<u8>,
    },
    NextScene,
    #[serde(other)]
    Unknown,
}

/// Why an inbound frame was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed 'note' message: missing fields")]
    MissingNoteFields,
    #[error("note data out of range: note {note}, velocity {velocity}")]
    OutOfRange { note: u8, velocity: u8 },
    #[error("invalid JSON frame: {0}")]
    InvalidJson(String),
}

/// A validated inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRequest {
    Note { note: u8, velocity: u8 },
    NextScene,
    Ignored,
}

/// Parse and validate one text frame from a client.
pub fn parse_client_frame(text: &str) -> Result<ClientRequest, ProtocolError> {
    let msg: ClientMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    match msg {
        ClientMessage::Note {
            note: Some(note),
            velocity: Some(velocity),
        } => {
            if note > MAX_DATA_BYTE || velocity > MAX_DATA_BYTE {
                return Err(ProtocolError::OutOfRange { note, velocity });
            }
            Ok(ClientRequest::Note { note, velocity })
        }
        ClientMessage::Note { .. } => Err(ProtocolError::MissingNoteFields),
        ClientMessage::NextScene => Ok(ClientRequest::NextScene),
        ClientMessage::Unknown => Ok(ClientRequest::Ignored),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_note_serialization() {
        let msg = ServerMessage::Note {
            note: 60,
            velocity: 100,
        };
        let value: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "note", "note": 60, "velocity": 100}));
    }

    #[test]
    fn test_cue_serialization_uses_wire_names() {
        let mut labels = Labels::new();
        labels.insert(60, "Intro".to_string());
        labels.insert(62, "Verse".to_string());

        let msg = ServerMessage::Cue {
            text: "Opening".to_string(),
            labels,
            normal_color: "#111111".to_string(),
            press_color: "#ff0000".to_string(),
        };
        let value: Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "cue");
        assert_eq!(value["text"], "Opening");
        assert_eq!(value["labels"]["60"], "Intro");
        assert_eq!(value["labels"]["62"], "Verse");
        assert_eq!(value["normalColor"], "#111111");
        assert_eq!(value["pressColor"], "#ff0000");
    }

    #[test]
    fn test_parse_note_frame() {
        let req = parse_client_frame(r#"{"type":"note","note":64,"velocity":90}"#).unwrap();
        assert_eq!(
            req,
            ClientRequest::Note {
                note: 64,
                velocity: 90
            }
        );
    }

    #[test]
    fn test_parse_next_scene_frame() {
        let req = parse_client_frame(r#"{"type":"nextScene"}"#).unwrap();
        assert_eq!(req, ClientRequest::NextScene);
    }

    #[test]
    fn test_note_missing_velocity_is_rejected() {
        let err = parse_client_frame(r#"{"type":"note","note":64}"#).unwrap_err();
        assert_eq!(err, ProtocolError::MissingNoteFields);
    }

    #[test]
    fn test_note_above_midi_range_is_rejected() {
        let err = parse_client_frame(r#"{"type":"note","note":200,"velocity":10}"#).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::OutOfRange {
                note: 200,
                velocity: 10
            }
        );
    }

    #[test]
    fn test_unknown_type_is_ignored() {
        let req = parse_client_frame(r#"{"type":"cue","text":"hi"}"#).unwrap();
        assert_eq!(req, ClientRequest::Ignored);
    }

    #[test]
    fn test_garbage_frame_is_invalid_json() {
        assert!(matches!(
            parse_client_frame("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }
}
