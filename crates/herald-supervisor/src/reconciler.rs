// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! QR code freshness and waiting.
//!
//! Pairing QR codes expire on the platform side well before the session
//! does, so handing out an old one guarantees a failed scan. The
//! reconciler is the read side of QR handling: it filters stored QRs by
//! age and gives callers a bounded way to wait for the next one.
//!
//! Writes stay on the envelope path (the supervisor records QRs as the
//! worker emits them, and clears them before each fresh connection).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, sleep};

use herald_core::{Platform, QrCode, StatusStore};

use crate::error::Result;

/// How long a pairing QR stays presentable.
pub const QR_FRESHNESS_WINDOW: Duration = Duration::from_secs(120);

/// Poll cadence while waiting for a QR to appear.
pub const QR_WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Extra age allowed for a QR that appeared while the caller was waiting.
///
/// Covers the gap between the worker stamping the QR and the waiter's next
/// poll observing it.
pub const QR_WAIT_SLACK: Duration = Duration::from_secs(5);

/// Hard cap on how long a single wait call may block.
pub const QR_WAIT_MAX: Duration = Duration::from_secs(120);

/// QR freshness tunables.
#[derive(Debug, Clone)]
pub struct QrPolicy {
    /// Maximum age for a QR handed out without waiting.
    pub freshness: Duration,
    /// Poll cadence for [`QrReconciler::wait_for_qr`].
    pub wait_poll_interval: Duration,
    /// Extra age allowed for QRs that appeared mid-wait.
    pub wait_slack: Duration,
    /// Upper bound on any single wait.
    pub max_wait: Duration,
}

impl Default for QrPolicy {
    fn default() -> Self {
        Self {
            freshness: QR_FRESHNESS_WINDOW,
            wait_poll_interval: QR_WAIT_POLL_INTERVAL,
            wait_slack: QR_WAIT_SLACK,
            max_wait: QR_WAIT_MAX,
        }
    }
}

/// Whether a QR of the given age may be handed to a caller who has been
/// waiting for `waited`.
///
/// Fresh QRs always pass. An older QR passes only if it cannot predate the
/// wait itself (plus slack), which keeps a pre-existing stale QR from
/// satisfying a waiter while still accepting one that arrived mid-wait.
pub fn qr_acceptable(age: Duration, waited: Duration, policy: &QrPolicy) -> bool {
    age <= policy.freshness || age <= waited + policy.wait_slack
}

/// Read-side QR access with freshness enforcement.
pub struct QrReconciler {
    store: Arc<dyn StatusStore>,
    policy: QrPolicy,
}

impl QrReconciler {
    /// Create a reconciler with the default policy.
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self::with_policy(store, QrPolicy::default())
    }

    /// Create a reconciler with a custom policy.
    pub fn with_policy(store: Arc<dyn StatusStore>, policy: QrPolicy) -> Self {
        Self { store, policy }
    }

    /// The QR currently stored for the session, if it is still fresh.
    ///
    /// A stored-but-expired QR reads as `None`, same as no QR at all.
    pub async fn current_qr(&self, user_id: &str, platform: Platform) -> Result<Option<QrCode>> {
        let record = self.store.get_status(user_id, platform).await?;
        let now = Utc::now();
        Ok(record
            .and_then(|r| r.qr())
            .filter(|qr| qr.age(now) <= self.policy.freshness))
    }

    /// Wait up to `timeout` (capped by the policy) for an acceptable QR.
    ///
    /// Returns `Ok(None)` when the timeout passes without one; a session
    /// that never produces a QR is not an error.
    pub async fn wait_for_qr(
        &self,
        user_id: &str,
        platform: Platform,
        timeout: Duration,
    ) -> Result<Option<QrCode>> {
        let timeout = timeout.min(self.policy.max_wait);
        let started = Instant::now();

        loop {
            let waited = started.elapsed();
            if let Some(record) = self.store.get_status(user_id, platform).await?
                && let Some(qr) = record.qr()
                && qr_acceptable(qr.age(Utc::now()), waited, &self.policy)
            {
                return Ok(Some(qr));
            }

            match timeout.checked_sub(started.elapsed()) {
                Some(remaining) if !remaining.is_zero() => {
                    sleep(remaining.min(self.policy.wait_poll_interval)).await;
                }
                _ => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use herald_core::{MemoryStatusStore, SessionStatus, StatusRecord};

    use super::*;

    fn record_with_qr_age(age: Duration) -> StatusRecord {
        let created = Utc::now() - chrono::Duration::from_std(age).unwrap();
        StatusRecord {
            user_id: "u1".to_string(),
            platform: Platform::Whatsapp,
            status: SessionStatus::Starting,
            last_qr_code: Some("qr-data".to_string()),
            last_qr_image: None,
            qr_created_at: Some(created),
            last_error: None,
            worker_pid: Some(1),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_acceptance_window_uses_freshness_or_wait() {
        let policy = QrPolicy::default();

        // One minute old: fresh, regardless of wait time.
        assert!(qr_acceptable(
            Duration::from_secs(60),
            Duration::ZERO,
            &policy
        ));
        // Past the window and older than the wait: rejected.
        assert!(!qr_acceptable(
            Duration::from_secs(130),
            Duration::ZERO,
            &policy
        ));
        // Past the window but it appeared during the wait: accepted.
        assert!(qr_acceptable(
            Duration::from_secs(130),
            Duration::from_secs(126),
            &policy
        ));
    }

    #[tokio::test]
    async fn test_current_qr_rejects_expired_codes() {
        let store = Arc::new(MemoryStatusStore::new());
        let reconciler = QrReconciler::new(store.clone());

        store.insert_record(record_with_qr_age(Duration::from_secs(60))).await;
        assert!(
            reconciler
                .current_qr("u1", Platform::Whatsapp)
                .await
                .unwrap()
                .is_some()
        );

        store.insert_record(record_with_qr_age(Duration::from_secs(130))).await;
        assert!(
            reconciler
                .current_qr("u1", Platform::Whatsapp)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_current_qr_without_record_is_none() {
        let reconciler = QrReconciler::new(Arc::new(MemoryStatusStore::new()));
        assert!(
            reconciler
                .current_qr("nobody", Platform::Instagram)
                .await
                .unwrap()
                .is_none()
        );
    }
}
