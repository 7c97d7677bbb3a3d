// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for the worker stdio transport.
//!
//! Envelopes travel as newline-delimited JSON: one envelope per line, UTF-8,
//! no embedded newlines (serde_json never emits raw newlines inside a
//! document). Line framing keeps the worker side trivial to implement in any
//! runtime that can read stdin line by line.

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::envelope::Envelope;

/// Maximum encoded envelope size (1 MB).
///
/// QR images ride along as data URLs, so envelopes can get large, but a line
/// beyond this is a protocol violation rather than a legitimate payload.
pub const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

/// Errors that can occur while encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Encoded envelope exceeds [`MAX_ENVELOPE_BYTES`].
    #[error("envelope too large: {0} bytes (max: {MAX_ENVELOPE_BYTES})")]
    EnvelopeTooLarge(usize),

    /// Status string not in the protocol vocabulary.
    #[error("invalid session status: {0}")]
    InvalidStatus(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O on the underlying pipe failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode an envelope to a single line, including the trailing newline.
pub fn encode_line(envelope: &Envelope) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(envelope)?;
    if line.len() > MAX_ENVELOPE_BYTES {
        return Err(ProtocolError::EnvelopeTooLarge(line.len()));
    }
    line.push('\n');
    Ok(line)
}

/// Decode one received line into an envelope.
///
/// The caller strips the newline (e.g. via `BufRead::lines`). Unknown
/// envelope types decode successfully with [`EnvelopeKind::Unknown`]; only
/// malformed JSON or oversized lines fail.
///
/// [`EnvelopeKind::Unknown`]: crate::envelope::EnvelopeKind::Unknown
pub fn decode_line(line: &str) -> Result<Envelope, ProtocolError> {
    if line.len() > MAX_ENVELOPE_BYTES {
        return Err(ProtocolError::EnvelopeTooLarge(line.len()));
    }
    Ok(serde_json::from_str(line)?)
}

/// Write an envelope to an async writer and flush it.
///
/// Flushing per envelope matters here: commands are rare and latency-bound,
/// and a buffered SHUTDOWN that never reaches the worker would turn every
/// graceful stop into a forced kill.
pub async fn write_envelope<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<(), ProtocolError> {
    let line = encode_line(envelope)?;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{EnvelopeKind, SessionStatus, WorkerCommand};

    #[test]
    fn test_encode_decode_round_trip() {
        let envelope = Envelope::status_update(SessionStatus::Connected);
        let line = encode_line(&envelope).unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line[..line.len() - 1].contains('\n'));

        let decoded = decode_line(line.trim_end()).unwrap();
        assert_eq!(decoded.kind, EnvelopeKind::StatusUpdate);
        assert_eq!(decoded.timestamp, envelope.timestamp);
    }

    #[test]
    fn test_decode_rejects_malformed_json() {
        assert!(matches!(
            decode_line("{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let line = "x".repeat(MAX_ENVELOPE_BYTES + 1);
        assert!(matches!(
            decode_line(&line),
            Err(ProtocolError::EnvelopeTooLarge(_))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_envelope() {
        let envelope = Envelope::qr_code("q".repeat(MAX_ENVELOPE_BYTES), None);
        assert!(matches!(
            encode_line(&envelope),
            Err(ProtocolError::EnvelopeTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_write_envelope_to_buffer() {
        let mut buf = Vec::new();
        let envelope = Envelope::command(WorkerCommand::Shutdown);
        write_envelope(&mut buf, &envelope).await.unwrap();

        let written = String::from_utf8(buf).unwrap();
        let decoded = decode_line(written.trim_end()).unwrap();
        assert_eq!(decoded.kind, EnvelopeKind::Command);
        let command: WorkerCommand = decoded.decode_payload().unwrap();
        assert_eq!(command, WorkerCommand::Shutdown);
    }
}
