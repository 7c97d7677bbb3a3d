// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session domain types shared across herald crates.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_protocol::SessionStatus;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Messaging platform a session runs on.
///
/// Uniqueness of sessions is per (user, platform): the same user may hold one
/// live WhatsApp session and one live Instagram session at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// WhatsApp Web session.
    Whatsapp,
    /// Instagram direct-message session.
    Instagram,
}

impl Platform {
    /// Storage/wire string for this platform.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Whatsapp => "whatsapp",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whatsapp" => Ok(Platform::Whatsapp),
            "instagram" => Ok(Platform::Instagram),
            other => Err(StoreError::InvalidPlatform(other.to_string())),
        }
    }
}

/// A pairing QR code as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode {
    /// Raw QR content.
    pub code: String,
    /// Pre-rendered image as a data URL, when the worker provided one.
    pub image: Option<String>,
    /// When the worker generated this QR.
    pub created_at: DateTime<Utc>,
}

impl QrCode {
    /// Age of this QR relative to `now`.
    ///
    /// Negative ages (QR timestamped in the future, e.g. clock skew between
    /// writer and reader) clamp to zero so freshness checks treat them as
    /// brand new rather than rejecting them.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Persisted projection of one session's state.
///
/// One row per (user, platform). Rows are written with partial-field upserts;
/// see [`StatusStore`](crate::store::StatusStore).
#[derive(Debug, Clone)]
pub struct StatusRecord {
    /// End-user this session belongs to.
    pub user_id: String,
    /// Messaging platform.
    pub platform: Platform,
    /// Last reconciled session status.
    pub status: SessionStatus,
    /// Most recent pairing QR content, if any.
    pub last_qr_code: Option<String>,
    /// Most recent pairing QR image, if any.
    pub last_qr_image: Option<String>,
    /// When the most recent QR was generated.
    pub qr_created_at: Option<DateTime<Utc>>,
    /// Message from the most recent failure, if any.
    pub last_error: Option<String>,
    /// OS pid of the worker that produced this state, if known.
    pub worker_pid: Option<i64>,
    /// When this row was last reconciled. Non-decreasing per row.
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// The stored QR as a value, when both content and creation time exist.
    pub fn qr(&self) -> Option<QrCode> {
        match (&self.last_qr_code, self.qr_created_at) {
            (Some(code), Some(created_at)) => Some(QrCode {
                code: code.clone(),
                image: self.last_qr_image.clone(),
                created_at,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        for platform in [Platform::Whatsapp, Platform::Instagram] {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!(matches!(
            "telegram".parse::<Platform>(),
            Err(StoreError::InvalidPlatform(_))
        ));
    }

    #[test]
    fn test_qr_age_clamps_future_timestamps() {
        let now = Utc::now();
        let qr = QrCode {
            code: "2@abc".to_string(),
            image: None,
            created_at: now + chrono::Duration::seconds(30),
        };
        assert_eq!(qr.age(now), Duration::ZERO);
    }

    #[test]
    fn test_record_qr_requires_code_and_timestamp() {
        let record = StatusRecord {
            user_id: "u1".to_string(),
            platform: Platform::Whatsapp,
            status: SessionStatus::Starting,
            last_qr_code: Some("2@abc".to_string()),
            last_qr_image: None,
            qr_created_at: None,
            last_error: None,
            worker_pid: None,
            updated_at: Utc::now(),
        };
        assert!(record.qr().is_none());
    }
}
