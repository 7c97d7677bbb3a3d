// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for herald-core.

use thiserror::Error;

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from store operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error during {operation}: {details}")]
    Database {
        /// Which store operation was running.
        operation: String,
        /// What the driver reported.
        details: String,
    },

    /// A stored platform string is not in the vocabulary.
    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),

    /// A stored status string is not in the vocabulary.
    #[error("Invalid session status: {0}")]
    InvalidStatus(String),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Wrap a database error with the operation that hit it.
    pub fn database(operation: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Database {
            operation: operation.to_string(),
            details: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}
