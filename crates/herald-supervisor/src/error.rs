// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for herald-supervisor.

use thiserror::Error;

/// Supervisor errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Status store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] herald_core::StoreError),

    /// Worker wire protocol failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] herald_protocol::ProtocolError),

    /// Worker process launch or control failed.
    #[error("Launcher error: {0}")]
    Launcher(#[from] crate::launcher::LauncherError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker failed to reach a usable state during startup.
    #[error("Worker startup failed: {0}")]
    Startup(String),

    /// A start for this (user, platform) session is already in flight.
    #[error("Session connection already in progress")]
    AlreadyConnecting,

    /// Worker ignored SHUTDOWN and had to be killed.
    ///
    /// Never returned to callers; the stop path logs it and escalates.
    #[error("Worker did not exit within the shutdown grace period")]
    ShutdownTimeout,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using supervisor Error.
pub type Result<T> = std::result::Result<T, Error>;
