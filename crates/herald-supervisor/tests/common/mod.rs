// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for supervisor integration tests.
//!
//! Provides a [`Harness`] wiring a supervisor to in-memory fakes, a
//! recording event sink, and polling helpers for asynchronous assertions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

use herald_core::{MemoryStatusStore, Platform, SessionStatus, StatusStore};
use herald_supervisor::backoff::BackoffPolicy;
use herald_supervisor::events::{EventSink, SessionEvent};
use herald_supervisor::launcher::MockLauncher;
use herald_supervisor::supervisor::{Supervisor, SupervisorOptions};

/// How long polling assertions wait before giving up.
pub const ASSERT_TIMEOUT: Duration = Duration::from_secs(5);

/// Event sink that records everything it is given.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub async fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().await.clone()
    }

    /// Status values published for one user, in order.
    pub async fn statuses(&self, user_id: &str) -> Vec<SessionStatus> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|event| match event {
                SessionEvent::StatusChanged {
                    user_id: uid,
                    status,
                    ..
                } if uid == user_id => Some(*status),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: SessionEvent) {
        self.events.lock().await.push(event);
    }
}

/// Supervisor options tight enough that grace periods do not slow tests.
pub fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        sessions_dir: std::env::temp_dir().join("herald-supervisor-tests"),
        startup_grace: Duration::from_millis(300),
        shutdown_grace: Duration::from_millis(400),
    }
}

/// Backoff that never schedules a retry, so crash tests stay put.
pub fn no_reconnect() -> BackoffPolicy {
    BackoffPolicy {
        base: Duration::from_secs(1),
        cap: Duration::from_secs(1),
        max_attempts: 0,
    }
}

/// A supervisor wired to in-memory fakes, plus handles to all of them.
pub struct Harness {
    pub supervisor: Supervisor,
    pub launcher: Arc<MockLauncher>,
    pub store: Arc<MemoryStatusStore>,
    pub events: Arc<RecordingEventSink>,
}

impl Harness {
    /// Harness with fast grace periods and reconnects disabled.
    pub fn new(launcher: MockLauncher) -> Self {
        Self::build(launcher, MemoryStatusStore::new(), no_reconnect())
    }

    /// Harness with a real reconnect policy.
    pub fn with_backoff(launcher: MockLauncher, backoff: BackoffPolicy) -> Self {
        Self::build(launcher, MemoryStatusStore::new(), backoff)
    }

    /// Harness over a specific store (e.g. a failing one).
    pub fn with_store(launcher: MockLauncher, store: MemoryStatusStore) -> Self {
        Self::build(launcher, store, no_reconnect())
    }

    fn build(launcher: MockLauncher, store: MemoryStatusStore, backoff: BackoffPolicy) -> Self {
        let launcher = Arc::new(launcher);
        let store = Arc::new(store);
        let events = Arc::new(RecordingEventSink::new());
        let supervisor = Supervisor::new(
            store.clone(),
            launcher.clone(),
            events.clone(),
            fast_options(),
            backoff,
        );
        Self {
            supervisor,
            launcher,
            store,
            events,
        }
    }

    /// Wait until the session's registry presence matches `want`.
    pub async fn wait_active(&self, user_id: &str, platform: Platform, want: bool) {
        let deadline = Instant::now() + ASSERT_TIMEOUT;
        while self.supervisor.is_active(user_id, platform).await != want {
            if Instant::now() >= deadline {
                panic!("Timed out waiting for {user_id}/{platform} active={want}");
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the launcher has seen `want` spawn requests.
    pub async fn wait_spawns(&self, want: usize) {
        let deadline = Instant::now() + ASSERT_TIMEOUT;
        while self.launcher.spawn_count().await < want {
            if Instant::now() >= deadline {
                let got = self.launcher.spawn_count().await;
                panic!("Timed out waiting for {want} spawns (got {got})");
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the stored status for the session equals `want`.
    pub async fn wait_stored_status(&self, user_id: &str, platform: Platform, want: SessionStatus) {
        let deadline = Instant::now() + ASSERT_TIMEOUT;
        loop {
            let got = self
                .store
                .get_status(user_id, platform)
                .await
                .expect("store read failed")
                .map(|record| record.status);
            if got == Some(want) {
                return;
            }
            if Instant::now() >= deadline {
                panic!("Timed out waiting for {user_id}/{platform} stored status {want} (got {got:?})");
            }
            sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Poll `condition` until it holds or the assertion timeout passes.
pub async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + ASSERT_TIMEOUT;
    while !condition().await {
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}
