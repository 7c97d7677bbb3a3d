// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herald Core - session domain types and the status store
//!
//! This crate holds the pieces shared between the supervisor and anything
//! that reads session state: the platform and status vocabulary, the
//! persisted [`StatusRecord`] projection, and the [`StatusStore`] trait with
//! its SQLite implementation.
//!
//! The status store is a durable *projection* of the supervisor's in-memory
//! registry, not the source of truth. It may lag the registry by the
//! reconciliation delay, and writers use partial-field upserts so concurrent
//! concerns (a QR write racing a status write) never clobber each other's
//! fields.
//!
//! # Record shape
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `user_id`, `platform` | Composite key; one row per user per platform |
//! | `status` | Last reconciled [`SessionStatus`] |
//! | `last_qr_code` / `last_qr_image` | Most recent pairing QR, if any |
//! | `qr_created_at` | When that QR was generated (drives freshness checks) |
//! | `last_error` | Message from the most recent failure |
//! | `worker_pid` | OS pid of the worker that produced this state |
//! | `updated_at` | Monotonically non-decreasing reconciliation time |
//!
//! [`StatusRecord`]: session::StatusRecord
//! [`StatusStore`]: store::StatusStore
//! [`SessionStatus`]: herald_protocol::SessionStatus

#![deny(missing_docs)]

/// Error types for store operations.
pub mod error;

/// Session domain types: platforms, QR values, status records.
pub mod session;

/// The status store trait and its backends.
pub mod store;

pub use error::StoreError;
pub use herald_protocol::SessionStatus;
pub use session::{Platform, QrCode, StatusRecord};
pub use store::{MemoryStatusStore, SqliteStatusStore, StatusFields, StatusStore};
