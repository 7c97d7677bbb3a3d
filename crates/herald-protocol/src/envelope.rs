// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Envelope types exchanged between the supervisor and worker processes.
//!
//! An envelope is `{ "type": ..., "payload": ..., "timestamp": ... }`. The
//! payload is kept as raw JSON on the envelope and decoded into a typed
//! struct by the receiver, so a malformed payload for one type never breaks
//! decoding of the envelope itself.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::ProtocolError;

/// Envelope type tag.
///
/// Known tags map to dedicated variants; anything else lands in
/// [`EnvelopeKind::Unknown`] with the original tag preserved for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Worker reports a session state change.
    StatusUpdate,
    /// Worker emits a fresh pairing QR code.
    QrCode,
    /// Worker reports a fatal session error.
    ErrorInfo,
    /// Worker relays an inbound chat message.
    MessageReceived,
    /// Supervisor instructs the worker.
    Command,
    /// Unrecognized tag from a newer (or buggy) peer.
    Unknown(String),
}

impl EnvelopeKind {
    /// Wire string for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeKind::StatusUpdate => "STATUS_UPDATE",
            EnvelopeKind::QrCode => "QR_CODE",
            EnvelopeKind::ErrorInfo => "ERROR_INFO",
            EnvelopeKind::MessageReceived => "MESSAGE_RECEIVED",
            EnvelopeKind::Command => "COMMAND",
            EnvelopeKind::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for EnvelopeKind {
    fn from(tag: &str) -> Self {
        match tag {
            "STATUS_UPDATE" => EnvelopeKind::StatusUpdate,
            "QR_CODE" => EnvelopeKind::QrCode,
            "ERROR_INFO" => EnvelopeKind::ErrorInfo,
            "MESSAGE_RECEIVED" => EnvelopeKind::MessageReceived,
            "COMMAND" => EnvelopeKind::Command,
            other => EnvelopeKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EnvelopeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvelopeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(EnvelopeKind::from(tag.as_str()))
    }
}

/// One typed message on the supervisor/worker channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope type tag.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Type-specific payload, decoded on demand via [`Envelope::decode_payload`].
    #[serde(default)]
    pub payload: Value,
    /// When the sender produced this envelope.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope with the given kind, serializing the payload.
    pub fn new<P: Serialize>(kind: EnvelopeKind, payload: &P) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind,
            payload: serde_json::to_value(payload)?,
            timestamp: Utc::now(),
        })
    }

    /// Create a STATUS_UPDATE envelope.
    pub fn status_update(status: SessionStatus) -> Self {
        Self {
            kind: EnvelopeKind::StatusUpdate,
            payload: serde_json::json!({ "status": status }),
            timestamp: Utc::now(),
        }
    }

    /// Create a QR_CODE envelope.
    pub fn qr_code(qr_code: impl Into<String>, qr_image: Option<String>) -> Self {
        Self {
            kind: EnvelopeKind::QrCode,
            payload: serde_json::json!({ "qr_code": qr_code.into(), "qr_image": qr_image }),
            timestamp: Utc::now(),
        }
    }

    /// Create an ERROR_INFO envelope.
    pub fn error_info(message: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::ErrorInfo,
            payload: serde_json::json!({ "message": message.into() }),
            timestamp: Utc::now(),
        }
    }

    /// Create a MESSAGE_RECEIVED envelope.
    pub fn message_received(from: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::MessageReceived,
            payload: serde_json::json!({ "from": from.into(), "content": content.into() }),
            timestamp: Utc::now(),
        }
    }

    /// Create a COMMAND envelope for the worker.
    pub fn command(command: WorkerCommand) -> Self {
        Self {
            kind: EnvelopeKind::Command,
            // WorkerCommand serialization is infallible: tagged enum of plain fields.
            payload: serde_json::to_value(&command).unwrap_or(Value::Null),
            timestamp: Utc::now(),
        }
    }

    /// Decode the payload as a typed struct.
    pub fn decode_payload<P: for<'de> Deserialize<'de>>(&self) -> Result<P, ProtocolError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Session state as reported by the worker and tracked by the supervisor.
///
/// `disconnected` and `error` are terminal: the supervisor drops its registry
/// entry when a session reaches either, and a later connect starts over at
/// `starting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Worker spawned, session not yet established.
    Starting,
    /// Session is live and ready for commands.
    Connected,
    /// Session ended cleanly.
    Disconnected,
    /// Session died with an error.
    Error,
}

impl SessionStatus {
    /// Wire/storage string for this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Starting => "starting",
            SessionStatus::Connected => "connected",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Error => "error",
        }
    }

    /// Whether this status ends the session's registry entry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Disconnected | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(SessionStatus::Starting),
            "connected" => Ok(SessionStatus::Connected),
            "disconnected" => Ok(SessionStatus::Disconnected),
            "error" => Ok(SessionStatus::Error),
            other => Err(ProtocolError::InvalidStatus(other.to_string())),
        }
    }
}

/// Payload of a STATUS_UPDATE envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdatePayload {
    /// New session state.
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. the library's own state string).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Payload of a QR_CODE envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrCodePayload {
    /// Raw QR content for terminal rendering or re-encoding.
    pub qr_code: String,
    /// Pre-rendered QR image as a data URL, when the library provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr_image: Option<String>,
}

/// Payload of an ERROR_INFO envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfoPayload {
    /// What went wrong, as reported by the worker.
    pub message: String,
}

/// Payload of a MESSAGE_RECEIVED envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceivedPayload {
    /// Sender identifier on the messaging platform.
    pub from: String,
    /// Message body.
    pub content: String,
    /// Platform-side message id, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// When the platform delivered the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<DateTime<Utc>>,
}

/// Payload of a COMMAND envelope (supervisor → worker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WorkerCommand {
    /// Exit voluntarily after closing the session.
    Shutdown,
    /// Apply session configuration; sent once right after spawn and again on
    /// agent changes.
    Configure {
        /// Agent that should answer on this session, if any.
        active_agent_id: Option<String>,
    },
    /// Stop generating automated replies but keep the session alive.
    Pause,
    /// Resume automated replies.
    Resume,
    /// Send an outbound chat message.
    SendMessage {
        /// Recipient identifier on the messaging platform.
        to: String,
        /// Message body.
        content: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            EnvelopeKind::StatusUpdate,
            EnvelopeKind::QrCode,
            EnvelopeKind::ErrorInfo,
            EnvelopeKind::MessageReceived,
            EnvelopeKind::Command,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            let back: EnvelopeKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_unknown_kind_preserves_tag() {
        let kind: EnvelopeKind = serde_json::from_str("\"TYPING_INDICATOR\"").unwrap();
        assert_eq!(kind, EnvelopeKind::Unknown("TYPING_INDICATOR".to_string()));
        assert_eq!(kind.as_str(), "TYPING_INDICATOR");
    }

    #[test]
    fn test_unknown_envelope_still_decodes() {
        let line = r#"{"type":"TYPING_INDICATOR","payload":{"from":"x"},"timestamp":"2025-06-01T12:00:00Z"}"#;
        let envelope: Envelope = serde_json::from_str(line).unwrap();
        assert!(matches!(envelope.kind, EnvelopeKind::Unknown(_)));
    }

    #[test]
    fn test_status_update_payload() {
        let envelope = Envelope::status_update(SessionStatus::Connected);
        let payload: StatusUpdatePayload = envelope.decode_payload().unwrap();
        assert_eq!(payload.status, SessionStatus::Connected);
        assert!(payload.detail.is_none());
    }

    #[test]
    fn test_qr_payload_without_image() {
        let envelope = Envelope::qr_code("2@abc,def", None);
        let payload: QrCodePayload = envelope.decode_payload().unwrap();
        assert_eq!(payload.qr_code, "2@abc,def");
        assert!(payload.qr_image.is_none());
    }

    #[test]
    fn test_command_round_trip() {
        let envelope = Envelope::command(WorkerCommand::SendMessage {
            to: "4915551234@c.us".to_string(),
            content: "hello".to_string(),
        });
        let command: WorkerCommand = envelope.decode_payload().unwrap();
        assert_eq!(
            command,
            WorkerCommand::SendMessage {
                to: "4915551234@c.us".to_string(),
                content: "hello".to_string(),
            }
        );
    }

    #[test]
    fn test_command_wire_shape() {
        let envelope = Envelope::command(WorkerCommand::Configure {
            active_agent_id: Some("agent-7".to_string()),
        });
        assert_eq!(envelope.payload["command"], "configure");
        assert_eq!(envelope.payload["active_agent_id"], "agent-7");
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let line = r#"{"type":"STATUS_UPDATE","timestamp":"2025-06-01T12:00:00Z"}"#;
        let envelope: Envelope = serde_json::from_str(line).unwrap();
        assert!(envelope.payload.is_null());
        assert!(envelope.decode_payload::<StatusUpdatePayload>().is_err());
    }

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Starting.is_terminal());
        assert!(!SessionStatus::Connected.is_terminal());
        assert!(SessionStatus::Disconnected.is_terminal());
        assert!(SessionStatus::Error.is_terminal());
    }

    #[test]
    fn test_session_status_from_str() {
        assert_eq!(
            "connected".parse::<SessionStatus>().unwrap(),
            SessionStatus::Connected
        );
        assert!(matches!(
            "banana".parse::<SessionStatus>(),
            Err(ProtocolError::InvalidStatus(_))
        ));
    }
}
