// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock launcher for testing.
//!
//! A simple launcher implementation that simulates worker processes
//! without spawning anything. Tests drive the worker side by hand:
//! push envelopes with the `emit_*` helpers, end a worker with
//! [`MockLauncher::exit_worker`], and inspect what the supervisor sent
//! with [`MockLauncher::sent_commands`].

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};

use herald_core::Platform;
use herald_protocol::{Envelope, EnvelopeKind, SessionStatus, WorkerCommand};

use super::traits::{LaunchSpec, LauncherError, Result, WorkerExit, WorkerLauncher, WorkerProcess};

type SessionKey = (String, Platform);

/// Simulated worker state.
struct MockWorkerState {
    pid: u32,
    event_tx: mpsc::Sender<Envelope>,
    exit_tx: Option<oneshot::Sender<WorkerExit>>,
    commands: Vec<Envelope>,
}

#[derive(Default)]
struct MockState {
    spawned: Vec<LaunchSpec>,
    workers: HashMap<SessionKey, MockWorkerState>,
    alive: HashSet<u32>,
}

/// Mock launcher for testing.
pub struct MockLauncher {
    /// If true, every spawn fails.
    pub fail_spawn: bool,
    /// If set, spawn attempts beyond this count fail. Lets tests exercise
    /// restart chains whose retries never come up.
    pub fail_after: Option<usize>,
    /// If set, spawns take this long. Lets tests park one start call mid
    /// flight while another races it.
    pub spawn_delay: Option<Duration>,
    /// If true, workers ignore SHUTDOWN commands and must be killed.
    /// This is useful for testing forced-stop escalation.
    pub ignore_shutdown: bool,
    /// If true, spawned workers immediately report `connected`.
    pub auto_connect: bool,
    next_pid: AtomicU32,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// Create a new mock launcher.
    pub fn new() -> Self {
        Self {
            fail_spawn: false,
            fail_after: None,
            spawn_delay: None,
            ignore_shutdown: false,
            auto_connect: false,
            next_pid: AtomicU32::new(50_000),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Create a mock launcher whose spawns fail.
    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Self::new()
        }
    }

    /// Create a mock launcher whose workers never obey SHUTDOWN.
    pub fn never_exiting() -> Self {
        Self {
            ignore_shutdown: true,
            ..Self::new()
        }
    }

    /// Create a mock launcher whose workers connect immediately.
    pub fn auto_connecting() -> Self {
        Self {
            auto_connect: true,
            ..Self::new()
        }
    }

    /// How many spawns have been requested, counting failed attempts and
    /// replacements.
    pub async fn spawn_count(&self) -> usize {
        self.state.lock().await.spawned.len()
    }

    /// Every launch spec seen, in order.
    pub async fn spawned_specs(&self) -> Vec<LaunchSpec> {
        self.state.lock().await.spawned.clone()
    }

    /// Commands the supervisor has sent to this worker.
    pub async fn sent_commands(&self, user_id: &str, platform: Platform) -> Vec<Envelope> {
        let state = self.state.lock().await;
        state
            .workers
            .get(&(user_id.to_string(), platform))
            .map(|w| w.commands.clone())
            .unwrap_or_default()
    }

    /// Push a STATUS_UPDATE from the worker side.
    pub async fn emit_status(&self, user_id: &str, platform: Platform, status: SessionStatus) {
        self.emit_raw(user_id, platform, Envelope::status_update(status))
            .await;
    }

    /// Push a QR_CODE from the worker side.
    pub async fn emit_qr(&self, user_id: &str, platform: Platform, qr: &str) {
        self.emit_raw(user_id, platform, Envelope::qr_code(qr, None))
            .await;
    }

    /// Push an ERROR_INFO from the worker side.
    pub async fn emit_error(&self, user_id: &str, platform: Platform, message: &str) {
        self.emit_raw(user_id, platform, Envelope::error_info(message))
            .await;
    }

    /// Push a MESSAGE_RECEIVED from the worker side.
    pub async fn emit_message(&self, user_id: &str, platform: Platform, from: &str, content: &str) {
        self.emit_raw(user_id, platform, Envelope::message_received(from, content))
            .await;
    }

    /// Push an arbitrary envelope from the worker side.
    pub async fn emit_raw(&self, user_id: &str, platform: Platform, envelope: Envelope) {
        let event_tx = {
            let state = self.state.lock().await;
            state
                .workers
                .get(&(user_id.to_string(), platform))
                .map(|w| w.event_tx.clone())
        };
        if let Some(tx) = event_tx {
            let _ = tx.send(envelope).await;
        }
    }

    /// Make `is_alive` report false for a pid without delivering an exit,
    /// as for a worker whose death went unnoticed.
    pub async fn mark_dead(&self, pid: u32) {
        self.state.lock().await.alive.remove(&pid);
    }

    /// End a worker as if the process died with the given exit code.
    pub async fn exit_worker(
        &self,
        user_id: &str,
        platform: Platform,
        code: Option<i32>,
        message: Option<&str>,
    ) {
        let mut state = self.state.lock().await;
        let state = &mut *state;
        if let Some(worker) = state.workers.get_mut(&(user_id.to_string(), platform)) {
            state.alive.remove(&worker.pid);
            if let Some(tx) = worker.exit_tx.take() {
                let _ = tx.send(WorkerExit {
                    code,
                    message: message.map(str::to_string),
                });
            }
        }
    }
}

#[async_trait]
impl WorkerLauncher for MockLauncher {
    fn launcher_type(&self) -> &'static str {
        "mock"
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<WorkerProcess> {
        let attempt = {
            let mut state = self.state.lock().await;
            state.spawned.push(spec.clone());
            state.spawned.len()
        };
        if self.fail_spawn || self.fail_after.is_some_and(|n| attempt > n) {
            return Err(LauncherError::SpawnFailed(
                "simulated spawn failure".to_string(),
            ));
        }
        if let Some(delay) = self.spawn_delay {
            tokio::time::sleep(delay).await;
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let key = (spec.user_id.clone(), spec.platform);

        let (command_tx, mut command_rx) = mpsc::channel::<Envelope>(32);
        let (event_tx, event_rx) = mpsc::channel(256);
        let (exit_tx, exit_rx) = oneshot::channel();

        {
            let mut state = self.state.lock().await;
            state.alive.insert(pid);
            state.workers.insert(
                key.clone(),
                MockWorkerState {
                    pid,
                    event_tx: event_tx.clone(),
                    exit_tx: Some(exit_tx),
                    commands: Vec::new(),
                },
            );
        }

        if self.auto_connect {
            let _ = event_tx
                .send(Envelope::status_update(SessionStatus::Connected))
                .await;
        }

        // Command collector: record everything, and unless configured
        // otherwise let SHUTDOWN end the simulated process.
        let state = self.state.clone();
        let ignore_shutdown = self.ignore_shutdown;
        tokio::spawn(async move {
            while let Some(envelope) = command_rx.recv().await {
                let is_shutdown = envelope.kind == EnvelopeKind::Command
                    && matches!(
                        envelope.decode_payload::<WorkerCommand>(),
                        Ok(WorkerCommand::Shutdown)
                    );
                let mut state = state.lock().await;
                let state = &mut *state;
                if let Some(worker) = state.workers.get_mut(&key) {
                    worker.commands.push(envelope);
                    if is_shutdown && !ignore_shutdown {
                        state.alive.remove(&worker.pid);
                        if let Some(tx) = worker.exit_tx.take() {
                            let _ = tx.send(WorkerExit {
                                code: Some(0),
                                message: None,
                            });
                        }
                    }
                }
            }
        });

        Ok(WorkerProcess {
            pid: Some(pid),
            command_tx,
            event_rx,
            exit_rx,
        })
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.state.lock().await.alive.contains(&pid)
    }

    async fn kill(&self, pid: u32) -> bool {
        let mut state = self.state.lock().await;
        state.alive.remove(&pid);
        for worker in state.workers.values_mut() {
            if worker.pid == pid {
                if let Some(tx) = worker.exit_tx.take() {
                    let _ = tx.send(WorkerExit {
                        code: None,
                        message: Some("killed".to_string()),
                    });
                }
                break;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LaunchSpec {
        LaunchSpec {
            user_id: "u1".to_string(),
            platform: Platform::Whatsapp,
            active_agent_id: None,
            session_dir: "/tmp/herald-test".into(),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_shutdown_command_ends_mock_worker() {
        let launcher = MockLauncher::new();
        let process = launcher.spawn(&spec()).await.unwrap();
        let pid = process.pid.unwrap();

        assert!(launcher.is_alive(pid).await);
        process
            .command_tx
            .send(Envelope::command(WorkerCommand::Shutdown))
            .await
            .unwrap();

        let exit = process.exit_rx.await.unwrap();
        assert_eq!(exit.code, Some(0));
        assert!(!launcher.is_alive(pid).await);
    }

    #[tokio::test]
    async fn test_never_exiting_worker_survives_shutdown() {
        let launcher = MockLauncher::never_exiting();
        let process = launcher.spawn(&spec()).await.unwrap();
        let pid = process.pid.unwrap();

        process
            .command_tx
            .send(Envelope::command(WorkerCommand::Shutdown))
            .await
            .unwrap();
        tokio::task::yield_now().await;

        assert!(launcher.is_alive(pid).await);
        assert!(launcher.kill(pid).await);
        assert!(!launcher.is_alive(pid).await);
    }

    #[tokio::test]
    async fn test_emitted_envelopes_reach_event_channel() {
        let launcher = MockLauncher::new();
        let mut process = launcher.spawn(&spec()).await.unwrap();

        launcher
            .emit_status("u1", Platform::Whatsapp, SessionStatus::Connected)
            .await;
        let envelope = process.event_rx.recv().await.unwrap();
        assert_eq!(envelope.kind, EnvelopeKind::StatusUpdate);
    }
}
