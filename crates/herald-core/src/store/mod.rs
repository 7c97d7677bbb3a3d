// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Status store interface and backends.
//!
//! The store keeps one row per (user, platform) with the durable projection
//! of that session's state, plus a small users table for per-user settings
//! the supervisor touches on connect (active agent).
//!
//! All writes are upserts with partial-field semantics: a writer names the
//! fields it owns and everything else is left untouched, so the QR
//! reconciliation path and the status path never clobber each other. Rows are
//! never deleted by the supervisor; `disconnected` is the resting state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use herald_protocol::SessionStatus;

use crate::error::StoreError;
use crate::session::{Platform, StatusRecord};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStatusStore;
pub use sqlite::SqliteStatusStore;

/// Partial field set for a status upsert.
///
/// `None` means "leave this field as it is" (or NULL when the row is first
/// created). The `clear_*` flags exist because `Option` alone cannot express
/// "set this column to NULL".
#[derive(Debug, Clone, Default)]
pub struct StatusFields {
    /// New session status, if this write changes it.
    pub status: Option<SessionStatus>,
    /// New QR content, if this write carries one.
    pub qr_code: Option<String>,
    /// New QR image, if this write carries one.
    pub qr_image: Option<String>,
    /// When the carried QR was generated.
    pub qr_created_at: Option<DateTime<Utc>>,
    /// New failure message, if this write records one.
    pub last_error: Option<String>,
    /// New worker pid, if this write records one.
    pub worker_pid: Option<i64>,
    /// Set `last_error` to NULL (takes precedence over `last_error`).
    pub clear_error: bool,
    /// Set `worker_pid` to NULL (takes precedence over `worker_pid`).
    pub clear_pid: bool,
}

/// Store interface consumed by the supervisor and reconciler.
#[allow(missing_docs)]
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Upsert the given fields into the (user, platform) row.
    ///
    /// Fields not named in `fields` keep their current value; a freshly
    /// created row defaults its status to `disconnected` when the write does
    /// not set one. `updated_at` never moves backwards.
    async fn upsert_status(
        &self,
        user_id: &str,
        platform: Platform,
        fields: StatusFields,
    ) -> Result<(), StoreError>;

    async fn get_status(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<StatusRecord>, StoreError>;

    /// Drop any stored QR for this session.
    ///
    /// Called before a fresh connection attempt so a poller can never be
    /// handed a QR belonging to a previous, superseded session.
    async fn clear_qr(&self, user_id: &str, platform: Platform) -> Result<(), StoreError>;

    /// Record which agent answers on this user's sessions.
    async fn set_active_agent(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Look up the agent currently answering on this user's sessions.
    async fn get_active_agent(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    /// Record a fresh spawn: status `starting`, new pid, stale error cleared.
    async fn mark_starting(
        &self,
        user_id: &str,
        platform: Platform,
        worker_pid: Option<i64>,
    ) -> Result<(), StoreError> {
        self.upsert_status(
            user_id,
            platform,
            StatusFields {
                status: Some(SessionStatus::Starting),
                worker_pid,
                clear_error: true,
                ..StatusFields::default()
            },
        )
        .await
    }

    /// Record a live session: status `connected`, stale error cleared.
    async fn mark_connected(&self, user_id: &str, platform: Platform) -> Result<(), StoreError> {
        self.upsert_status(
            user_id,
            platform,
            StatusFields {
                status: Some(SessionStatus::Connected),
                clear_error: true,
                ..StatusFields::default()
            },
        )
        .await
    }

    /// Record a clean stop: status `disconnected`, pid cleared.
    async fn mark_disconnected(&self, user_id: &str, platform: Platform) -> Result<(), StoreError> {
        self.upsert_status(
            user_id,
            platform,
            StatusFields {
                status: Some(SessionStatus::Disconnected),
                clear_pid: true,
                ..StatusFields::default()
            },
        )
        .await
    }

    /// Record a failure: status `error` with its message.
    async fn mark_error(
        &self,
        user_id: &str,
        platform: Platform,
        message: &str,
    ) -> Result<(), StoreError> {
        self.upsert_status(
            user_id,
            platform,
            StatusFields {
                status: Some(SessionStatus::Error),
                last_error: Some(message.to_string()),
                ..StatusFields::default()
            },
        )
        .await
    }

    /// Record a fresh pairing QR, stamped with the current time.
    async fn record_qr(
        &self,
        user_id: &str,
        platform: Platform,
        qr_code: &str,
        qr_image: Option<&str>,
    ) -> Result<(), StoreError> {
        self.upsert_status(
            user_id,
            platform,
            StatusFields {
                qr_code: Some(qr_code.to_string()),
                qr_image: qr_image.map(str::to_string),
                qr_created_at: Some(Utc::now()),
                ..StatusFields::default()
            },
        )
        .await
    }
}
