// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herald Protocol - worker stdio communication layer
//!
//! This crate provides the wire protocol spoken between the herald supervisor
//! and the worker processes it spawns. Each worker owns one browser-automation
//! session; the supervisor and worker exchange typed JSON envelopes over the
//! worker's stdin/stdout pipes, one envelope per line.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     herald-protocol                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Envelopes: STATUS_UPDATE / QR_CODE / ERROR_INFO /          │
//! │             MESSAGE_RECEIVED / COMMAND                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Serialization: JSON (serde_json)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Transport: newline-delimited frames on worker stdio        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Direction of traffic
//!
//! Worker → supervisor (on the worker's stdout):
//! - `STATUS_UPDATE`: the session changed state (connected, disconnected, ...)
//! - `QR_CODE`: a fresh pairing QR was generated
//! - `ERROR_INFO`: the session hit a fatal error
//! - `MESSAGE_RECEIVED`: an inbound chat message arrived
//!
//! Supervisor → worker (on the worker's stdin):
//! - `COMMAND`: shutdown, reconfigure, pause/resume, send a message
//!
//! Envelopes are stateless and one-shot. Unknown envelope types decode into
//! [`EnvelopeKind::Unknown`] so a newer worker never kills an older
//! supervisor's reader loop; the receiver is expected to log and skip them.
//!
//! # Usage
//!
//! ```ignore
//! use herald_protocol::{Envelope, WorkerCommand, codec};
//!
//! // Supervisor side: write a command to the worker's stdin.
//! let envelope = Envelope::command(WorkerCommand::Pause);
//! codec::write_envelope(&mut stdin, &envelope).await?;
//!
//! // Supervisor side: decode one stdout line from the worker.
//! let envelope = codec::decode_line(&line)?;
//! ```

pub mod codec;
pub mod envelope;

pub use codec::{MAX_ENVELOPE_BYTES, ProtocolError, decode_line, encode_line, write_envelope};
pub use envelope::{
    Envelope, EnvelopeKind, ErrorInfoPayload, MessageReceivedPayload, QrCodePayload, SessionStatus,
    StatusUpdatePayload, WorkerCommand,
};
