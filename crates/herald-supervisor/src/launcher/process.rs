// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process-backed worker launcher.
//!
//! Spawns one OS process per session worker and pumps its stdio: commands
//! go down as envelope lines on stdin, events come back as envelope lines
//! on stdout. Worker stderr is logged and its last line is attached to the
//! exit notification, which is where crash messages come from.

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, warn};

use herald_protocol::{decode_line, write_envelope};

use super::traits::{LaunchSpec, LauncherError, Result, WorkerExit, WorkerLauncher, WorkerProcess};

/// Commands queued towards a worker before backpressure kicks in.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Events buffered from a worker; message bursts are common on reconnect.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Launcher that runs workers as real OS processes.
pub struct ProcessWorkerLauncher {
    program: String,
    script: PathBuf,
}

impl ProcessWorkerLauncher {
    /// Create a launcher that runs `program script <user_id> <platform>`.
    pub fn new(program: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessWorkerLauncher {
    fn launcher_type(&self) -> &'static str {
        "process"
    }

    async fn spawn(&self, spec: &LaunchSpec) -> Result<WorkerProcess> {
        tokio::fs::create_dir_all(&spec.session_dir).await?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.script)
            .arg(&spec.user_id)
            .arg(spec.platform.as_str())
            .env("HERALD_SESSION_DIR", &spec.session_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(agent) = &spec.active_agent_id {
            cmd.env("HERALD_AGENT_ID", agent);
        }
        cmd.envs(&spec.env);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LauncherError::ProgramNotFound(self.program.clone())
            } else {
                LauncherError::SpawnFailed(e.to_string())
            }
        })?;

        let pid = child.id();
        let mut stdin = child.stdin.take().ok_or(LauncherError::Pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(LauncherError::Pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(LauncherError::Pipe("stderr"))?;

        let (command_tx, mut command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();

        // Writer: drain the command queue into the worker's stdin. When the
        // sender side is dropped the loop ends and stdin closes, which a
        // well-behaved worker treats as a shutdown hint.
        {
            let user_id = spec.user_id.clone();
            tokio::spawn(async move {
                while let Some(envelope) = command_rx.recv().await {
                    if let Err(e) = write_envelope(&mut stdin, &envelope).await {
                        warn!(user_id = %user_id, error = %e, "Failed to write command to worker");
                        break;
                    }
                }
            });
        }

        // Reader: one envelope per stdout line. Junk lines are logged and
        // skipped so a worker's stray print cannot break the event stream.
        {
            let user_id = spec.user_id.clone();
            let platform = spec.platform;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_line(&line) {
                        Ok(envelope) => {
                            if event_tx.send(envelope).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(
                                user_id = %user_id,
                                platform = %platform,
                                error = %e,
                                "Ignoring undecodable worker output line"
                            );
                        }
                    }
                }
            });
        }

        // Stderr: log everything, remember the last line for the exit report.
        let last_stderr = Arc::new(Mutex::new(None::<String>));
        {
            let last_stderr = last_stderr.clone();
            let user_id = spec.user_id.clone();
            let platform = spec.platform;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(user_id = %user_id, platform = %platform, "worker stderr: {line}");
                    *last_stderr.lock().await = Some(line);
                }
            });
        }

        // Exit watcher: owns the child and resolves exit_rx when it ends.
        {
            let user_id = spec.user_id.clone();
            tokio::spawn(async move {
                let exit = match child.wait().await {
                    Ok(status) => WorkerExit {
                        code: status.code(),
                        message: last_stderr.lock().await.clone(),
                    },
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Waiting on worker process failed");
                        WorkerExit {
                            code: None,
                            message: Some(format!("wait failed: {e}")),
                        }
                    }
                };
                // Receiver may be gone if the session was already removed.
                let _ = exit_tx.send(exit);
            });
        }

        Ok(WorkerProcess {
            pid,
            command_tx,
            event_rx,
            exit_rx,
        })
    }

    async fn is_alive(&self, pid: u32) -> bool {
        // Signal 0 probes existence without touching the process.
        match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    async fn kill(&self, pid: u32) -> bool {
        let raw = pid as i32;
        match signal::kill(Pid::from_raw(raw), Signal::SIGKILL) {
            Ok(()) => {
                debug!(pid = raw, "Sent SIGKILL to worker");
            }
            Err(nix::errno::Errno::ESRCH) => {
                debug!(pid = raw, "Worker already dead (ESRCH)");
                return true;
            }
            Err(e) => {
                warn!(pid = raw, error = %e, "Failed to send SIGKILL to worker");
            }
        }

        // Wait briefly for the process to die
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Confirm via /proc/{pid}
        let alive = std::path::Path::new(&format!("/proc/{}", raw)).exists();
        if alive {
            warn!(pid = raw, "Worker still alive after SIGKILL");
        }

        !alive
    }
}
