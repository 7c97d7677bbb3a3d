// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for QR retrieval - freshness filtering and bounded waiting.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::Harness;
use herald_core::{MemoryStatusStore, Platform, SessionStatus, StatusRecord, StatusStore};
use herald_supervisor::launcher::MockLauncher;
use herald_supervisor::reconciler::{QrPolicy, QrReconciler};
use tokio::time::Instant;

/// Policy scaled down so waits finish in test time.
fn fast_policy() -> QrPolicy {
    QrPolicy {
        freshness: Duration::from_millis(150),
        wait_poll_interval: Duration::from_millis(20),
        wait_slack: Duration::from_millis(100),
        max_wait: Duration::from_secs(2),
    }
}

/// A status record holding a QR stamped `age` ago.
fn record_with_qr(user_id: &str, code: &str, age: Duration) -> StatusRecord {
    StatusRecord {
        user_id: user_id.to_string(),
        platform: Platform::Whatsapp,
        status: SessionStatus::Starting,
        last_qr_code: Some(code.to_string()),
        last_qr_image: None,
        qr_created_at: Some(Utc::now() - chrono::Duration::from_std(age).unwrap()),
        last_error: None,
        worker_pid: Some(1),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_wait_for_qr_times_out_quietly_when_none_appears() {
    let store = Arc::new(MemoryStatusStore::new());
    let reconciler = QrReconciler::with_policy(store, fast_policy());

    let started = Instant::now();
    let result = reconciler
        .wait_for_qr("u1", Platform::Whatsapp, Duration::from_millis(250))
        .await
        .expect("waiting on an absent session is not an error");

    assert!(result.is_none());
    let waited = started.elapsed();
    assert!(
        waited >= Duration::from_millis(240) && waited < Duration::from_secs(2),
        "wait should run out the timeout, took {waited:?}"
    );
}

#[tokio::test]
async fn test_wait_for_qr_catches_late_arrival() {
    let store = Arc::new(MemoryStatusStore::new());
    let reconciler = QrReconciler::with_policy(store.clone(), fast_policy());

    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        writer
            .record_qr("u1", Platform::Whatsapp, "2@late", None)
            .await
            .unwrap();
    });

    let started = Instant::now();
    let qr = reconciler
        .wait_for_qr("u1", Platform::Whatsapp, Duration::from_secs(1))
        .await
        .unwrap()
        .expect("the QR arrived within the wait");

    assert_eq!(qr.code, "2@late");
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_wait_for_qr_ignores_preexisting_stale_qr() {
    let store = Arc::new(MemoryStatusStore::new());
    store
        .insert_record(record_with_qr("u1", "2@ancient", Duration::from_secs(10)))
        .await;
    let reconciler = QrReconciler::with_policy(store, fast_policy());

    let result = reconciler
        .wait_for_qr("u1", Platform::Whatsapp, Duration::from_millis(300))
        .await
        .unwrap();

    assert!(result.is_none(), "a stale QR must not satisfy a waiter");
}

#[tokio::test]
async fn test_wait_for_qr_accepts_older_qr_that_appeared_mid_wait() {
    let store = Arc::new(MemoryStatusStore::new());
    let reconciler = QrReconciler::with_policy(store.clone(), fast_policy());

    // Past the freshness window, but not older than the wait itself.
    let writer = store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        writer
            .insert_record(record_with_qr("u1", "2@slow-pipe", Duration::from_millis(300)))
            .await;
    });

    let qr = reconciler
        .wait_for_qr("u1", Platform::Whatsapp, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("a QR no older than the wait is acceptable");

    assert_eq!(qr.code, "2@slow-pipe");
}

#[tokio::test]
async fn test_wait_is_capped_by_policy_max_wait() {
    let store = Arc::new(MemoryStatusStore::new());
    let mut policy = fast_policy();
    policy.max_wait = Duration::from_millis(300);
    let reconciler = QrReconciler::with_policy(store, policy);

    let started = Instant::now();
    let result = reconciler
        .wait_for_qr("u1", Platform::Whatsapp, Duration::from_secs(10))
        .await
        .unwrap();

    assert!(result.is_none());
    let waited = started.elapsed();
    assert!(
        waited >= Duration::from_millis(290) && waited < Duration::from_secs(2),
        "the cap should cut a long timeout short, took {waited:?}"
    );
}

#[tokio::test]
async fn test_qr_flows_from_worker_envelope_to_waiter() {
    let harness = Harness::new(MockLauncher::auto_connecting());
    harness
        .supervisor
        .start_worker("u1", Platform::Whatsapp, None, false)
        .await
        .unwrap();

    let reconciler = QrReconciler::with_policy(harness.supervisor.store(), fast_policy());

    let launcher = harness.launcher.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        launcher.emit_qr("u1", Platform::Whatsapp, "2@pairing").await;
    });

    let qr = reconciler
        .wait_for_qr("u1", Platform::Whatsapp, Duration::from_secs(2))
        .await
        .unwrap()
        .expect("worker QR should reach the waiter");

    assert_eq!(qr.code, "2@pairing");
}
