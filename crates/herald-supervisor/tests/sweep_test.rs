// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the inactivity sweeper - stopping sessions that went silent.

mod common;

use std::time::Duration;

use common::Harness;
use herald_core::{Platform, SessionStatus};
use herald_supervisor::launcher::MockLauncher;
use herald_supervisor::sweep::{InactivitySweeper, SweeperConfig};

fn tight_config() -> SweeperConfig {
    SweeperConfig {
        poll_interval: Duration::from_millis(50),
        inactivity_threshold: Duration::from_millis(150),
    }
}

#[tokio::test]
async fn test_sweep_stops_silent_worker_even_while_connected() {
    let harness = Harness::new(MockLauncher::auto_connecting());
    harness
        .supervisor
        .start_worker("u1", Platform::Whatsapp, None, false)
        .await
        .unwrap();

    // Connected, but silent past the threshold.
    tokio::time::sleep(Duration::from_millis(250)).await;

    let sweeper = InactivitySweeper::new(harness.supervisor.clone(), tight_config());
    assert_eq!(sweeper.sweep_once().await, 1);

    assert!(!harness.supervisor.is_active("u1", Platform::Whatsapp).await);
    harness
        .wait_stored_status("u1", Platform::Whatsapp, SessionStatus::Disconnected)
        .await;
}

#[tokio::test]
async fn test_sweep_spares_recently_active_worker() {
    let harness = Harness::new(MockLauncher::auto_connecting());
    harness
        .supervisor
        .start_worker("u1", Platform::Whatsapp, None, false)
        .await
        .unwrap();

    let sweeper = InactivitySweeper::new(
        harness.supervisor.clone(),
        SweeperConfig {
            poll_interval: Duration::from_secs(60),
            inactivity_threshold: Duration::from_secs(600),
        },
    );
    assert_eq!(sweeper.sweep_once().await, 0);
    assert!(harness.supervisor.is_active("u1", Platform::Whatsapp).await);
}

#[tokio::test]
async fn test_sweep_stops_only_the_stale_workers() {
    let harness = Harness::new(MockLauncher::auto_connecting());
    harness
        .supervisor
        .start_worker("u1", Platform::Whatsapp, None, false)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(250)).await;
    harness
        .supervisor
        .start_worker("u2", Platform::Whatsapp, None, false)
        .await
        .unwrap();

    let sweeper = InactivitySweeper::new(harness.supervisor.clone(), tight_config());
    assert_eq!(sweeper.sweep_once().await, 1);

    assert!(!harness.supervisor.is_active("u1", Platform::Whatsapp).await);
    assert!(harness.supervisor.is_active("u2", Platform::Whatsapp).await);
}

#[tokio::test]
async fn test_sweep_stops_worker_stuck_in_starting() {
    // No auto-connect: the worker sits in `starting` and says nothing.
    let harness = Harness::new(MockLauncher::new());
    harness
        .supervisor
        .start_worker("u1", Platform::Whatsapp, None, false)
        .await
        .unwrap();

    let sweeper = InactivitySweeper::new(harness.supervisor.clone(), tight_config());
    assert_eq!(sweeper.sweep_once().await, 1);

    assert!(!harness.supervisor.is_active("u1", Platform::Whatsapp).await);
    harness
        .wait_stored_status("u1", Platform::Whatsapp, SessionStatus::Disconnected)
        .await;
}

#[tokio::test]
async fn test_sweeper_loop_sweeps_on_its_own_and_shuts_down() {
    let harness = Harness::new(MockLauncher::auto_connecting());
    harness
        .supervisor
        .start_worker("u1", Platform::Whatsapp, None, false)
        .await
        .unwrap();

    let sweeper = InactivitySweeper::new(
        harness.supervisor.clone(),
        SweeperConfig {
            poll_interval: Duration::from_millis(50),
            inactivity_threshold: Duration::from_millis(100),
        },
    );
    let shutdown = sweeper.shutdown_handle();
    let handle = tokio::spawn(async move { sweeper.run().await });

    harness.wait_active("u1", Platform::Whatsapp, false).await;

    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("sweeper should stop promptly")
        .expect("sweeper task should not panic");
}
