// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Launcher trait definitions.
//!
//! Defines the abstract interface for spawning and controlling worker
//! processes.

use async_trait::async_trait;
use herald_core::Platform;
use herald_protocol::Envelope;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Errors from launcher operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LauncherError {
    /// Worker program was not found on this host.
    #[error("Worker program not found: {0}")]
    ProgramNotFound(String),

    /// Worker process failed to start.
    #[error("Worker spawn failed: {0}")]
    SpawnFailed(String),

    /// A spawned worker came up without one of its stdio pipes.
    #[error("Worker pipe unavailable: {0}")]
    Pipe(&'static str),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("Other: {0}")]
    Other(String),
}

/// Result type for launcher operations.
pub type Result<T> = std::result::Result<T, LauncherError>;

/// Everything a launcher needs to start one session worker.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// User the session belongs to.
    pub user_id: String,
    /// Platform the worker drives.
    pub platform: Platform,
    /// Agent that should answer on this session, if any.
    pub active_agent_id: Option<String>,
    /// Directory for this session's persistent state (auth, cookies).
    pub session_dir: PathBuf,
    /// Custom environment variables (applied after system vars, can override).
    pub env: HashMap<String, String>,
}

/// Why a worker process ended.
#[derive(Debug, Clone)]
pub struct WorkerExit {
    /// Process exit code, if the worker exited rather than being signalled.
    pub code: Option<i32>,
    /// Last diagnostic the worker wrote before dying, if any.
    pub message: Option<String>,
}

/// A live worker process as seen by the supervisor.
///
/// The channels are the only way to talk to the worker; the launcher owns
/// the pipe-pumping tasks behind them. Dropping `command_tx` closes the
/// worker's stdin.
#[derive(Debug)]
pub struct WorkerProcess {
    /// OS pid, when the launcher runs real processes.
    pub pid: Option<u32>,
    /// Commands written to the worker's stdin, one envelope per line.
    pub command_tx: mpsc::Sender<Envelope>,
    /// Envelopes the worker emitted on stdout.
    pub event_rx: mpsc::Receiver<Envelope>,
    /// Resolves once the worker process has ended.
    pub exit_rx: oneshot::Receiver<WorkerExit>,
}

/// Trait for worker launchers.
///
/// Launchers are PURE process engines - they do NOT touch the registry or
/// the status store. Session bookkeeping is handled by the caller.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    /// Launcher type identifier (e.g., "process", "mock")
    fn launcher_type(&self) -> &'static str;

    /// Spawn a worker for one session.
    ///
    /// The returned process is already wired: envelopes sent on `command_tx`
    /// reach the worker, and everything the worker emits shows up on
    /// `event_rx`.
    async fn spawn(&self, spec: &LaunchSpec) -> Result<WorkerProcess>;

    /// Check whether a previously spawned worker is still alive.
    async fn is_alive(&self, pid: u32) -> bool;

    /// Force-kill a worker and confirm it is gone.
    ///
    /// Returns true if the process is confirmed dead (either was already
    /// dead or was successfully killed).
    async fn kill(&self, pid: u32) -> bool;
}
