// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Outbound session events.
//!
//! The supervisor reports what happened; it never waits on downstream
//! consumers. Sinks take the event and own everything after that, so a
//! slow or broken consumer cannot stall envelope dispatch.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use herald_core::Platform;
use herald_protocol::SessionStatus;

/// Something observable happened on a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A session moved to a new status.
    StatusChanged {
        /// User the session belongs to.
        user_id: String,
        /// Platform the session runs on.
        platform: Platform,
        /// New status.
        status: SessionStatus,
        /// Failure message, when the new status is `error`.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// The platform delivered an inbound message.
    MessageReceived {
        /// User the session belongs to.
        user_id: String,
        /// Platform the message arrived on.
        platform: Platform,
        /// Sender address as the platform reports it.
        from: String,
        /// Message body.
        content: String,
        /// Platform-side message id, when provided.
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
}

/// Consumer of session events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Best effort; there is nothing to return because
    /// the supervisor would ignore it anyway.
    async fn publish(&self, event: SessionEvent);
}

/// Sink that writes events to the log and nothing else.
///
/// The default when no real consumer is wired in.
pub struct LogEventSink;

#[async_trait]
impl EventSink for LogEventSink {
    async fn publish(&self, event: SessionEvent) {
        match &event {
            SessionEvent::StatusChanged {
                user_id,
                platform,
                status,
                error,
            } => {
                info!(
                    user_id = %user_id,
                    platform = %platform,
                    status = %status,
                    error = ?error,
                    "Session status changed"
                );
            }
            SessionEvent::MessageReceived {
                user_id,
                platform,
                from,
                ..
            } => {
                info!(
                    user_id = %user_id,
                    platform = %platform,
                    from = %from,
                    "Message received"
                );
            }
        }
    }
}
