// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Worker supervision.
//!
//! One worker process per (user, platform) session. The supervisor owns the
//! registry, spawns workers through a [`WorkerLauncher`], dispatches
//! everything a worker says over its envelope stream, projects state into
//! the status store, and restarts crashed sessions on a backoff.
//!
//! Store writes on the supervision path are best effort: a database outage
//! degrades the projection, never the processes. Store reads exposed to
//! callers propagate their errors.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use herald_core::{Platform, StatusRecord, StatusStore};
use herald_protocol::{
    Envelope, EnvelopeKind, ErrorInfoPayload, MessageReceivedPayload, QrCodePayload, SessionStatus,
    StatusUpdatePayload, WorkerCommand,
};

use crate::backoff::{BackoffPolicy, ReconnectScheduler};
use crate::error::{Error, Result};
use crate::events::{EventSink, SessionEvent};
use crate::launcher::{LaunchSpec, WorkerExit, WorkerLauncher};
use crate::registry::{SessionKey, SessionRegistry, WorkerHandle, WorkerInfo};

/// How often the start path re-checks a starting worker.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How often the stop path re-checks a stopping worker.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tunables for the supervision paths.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Root directory for per-session worker state.
    pub sessions_dir: PathBuf,
    /// How long a starting worker may take to reach a usable state.
    pub startup_grace: Duration,
    /// How long a stopping worker gets before being killed.
    pub shutdown_grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from(".data/sessions"),
            startup_grace: Duration::from_secs(15),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

struct SupervisorInner {
    registry: SessionRegistry,
    store: Arc<dyn StatusStore>,
    launcher: Arc<dyn WorkerLauncher>,
    events: Arc<dyn EventSink>,
    scheduler: ReconnectScheduler,
    options: SupervisorOptions,
}

/// Supervises session workers. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Create a supervisor.
    pub fn new(
        store: Arc<dyn StatusStore>,
        launcher: Arc<dyn WorkerLauncher>,
        events: Arc<dyn EventSink>,
        options: SupervisorOptions,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                registry: SessionRegistry::new(),
                store,
                launcher,
                events,
                scheduler: ReconnectScheduler::new(backoff),
                options,
            }),
        }
    }

    /// The status store this supervisor projects into.
    pub fn store(&self) -> Arc<dyn StatusStore> {
        self.inner.store.clone()
    }

    // ===== Session lifecycle =====

    /// Start a worker for the session, or return the one already running.
    ///
    /// Calling this for a live session is a no-op that returns the existing
    /// handle, unless `force_restart` asks for a stop-then-start. A handle
    /// whose process turns out to be dead is torn down and replaced.
    ///
    /// Waits up to the startup grace for the worker to report in: returns
    /// early with the handle once it connects, returns [`Error::Startup`]
    /// if it dies or reports an error first, and returns the still-starting
    /// handle when the grace expires quietly.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyConnecting`] when another start for the same session
    /// is in flight.
    pub async fn start_worker(
        &self,
        user_id: &str,
        platform: Platform,
        active_agent_id: Option<String>,
        force_restart: bool,
    ) -> Result<WorkerInfo> {
        let key = SessionKey::new(user_id, platform);
        // A deliberate start supersedes any pending crash-restart.
        self.inner.scheduler.reset(&key).await;
        self.start_session(&key, active_agent_id, force_restart, true)
            .await
    }

    async fn start_session(
        &self,
        key: &SessionKey,
        active_agent_id: Option<String>,
        force_restart: bool,
        persist_agent: bool,
    ) -> Result<WorkerInfo> {
        if let Some(existing) = self.inner.registry.get(key).await {
            let alive = match existing.pid {
                Some(pid) => self.inner.launcher.is_alive(pid).await,
                // No pid to probe; trust the exit watcher to report death.
                None => true,
            };
            if alive && !force_restart {
                debug!(session = %key, "Worker already running; start is a no-op");
                return Ok(existing);
            }
            if alive {
                info!(session = %key, "Force restart requested; stopping current worker");
                self.stop_worker(&key.user_id, key.platform).await?;
            } else {
                warn!(session = %key, pid = ?existing.pid, "Found dead worker handle; tearing it down");
                self.inner.registry.remove(key).await;
            }
        }

        let _guard = self
            .inner
            .registry
            .try_begin_connect(key)
            .ok_or(Error::AlreadyConnecting)?;

        // Someone may have finished a start between the check above and the
        // guard; re-check so two near-simultaneous calls both see one worker.
        if let Some(existing) = self.inner.registry.get(key).await {
            debug!(session = %key, "Worker appeared while acquiring connect slot");
            return Ok(existing);
        }

        // A QR from a previous pairing must never survive into this one.
        if let Err(e) = self.inner.store.clear_qr(&key.user_id, key.platform).await {
            warn!(session = %key, error = %e, "Failed to clear stale QR before start");
        }

        let agent = match active_agent_id {
            Some(agent) => {
                if persist_agent
                    && let Err(e) = self
                        .inner
                        .store
                        .set_active_agent(&key.user_id, Some(&agent))
                        .await
                {
                    warn!(session = %key, error = %e, "Failed to persist active agent");
                }
                Some(agent)
            }
            None => match self.inner.store.get_active_agent(&key.user_id).await {
                Ok(agent) => agent,
                Err(e) => {
                    warn!(session = %key, error = %e, "Failed to look up active agent");
                    None
                }
            },
        };

        let spec = LaunchSpec {
            user_id: key.user_id.clone(),
            platform: key.platform,
            active_agent_id: agent.clone(),
            session_dir: self
                .inner
                .options
                .sessions_dir
                .join(&key.user_id)
                .join(key.platform.as_str()),
            env: HashMap::new(),
        };

        info!(session = %key, agent = ?agent, "Starting session worker");
        let process = match self.inner.launcher.spawn(&spec).await {
            Ok(process) => process,
            Err(e) => {
                let message = format!("worker spawn failed: {e}");
                if let Err(store_err) = self
                    .inner
                    .store
                    .mark_error(&key.user_id, key.platform, &message)
                    .await
                {
                    warn!(session = %key, error = %store_err, "Failed to record spawn failure");
                }
                return Err(Error::Startup(message));
            }
        };

        let pid = process.pid;
        let command_tx = process.command_tx.clone();
        let handle = WorkerHandle::new(key.clone(), pid, agent.clone(), command_tx.clone());
        let id = handle.id;
        if self.inner.registry.insert(handle).await.is_some() {
            // Can only happen if a dead handle slipped past the checks above.
            warn!(session = %key, "Replaced a leftover worker handle");
        }
        if let Err(e) = self
            .inner
            .store
            .mark_starting(&key.user_id, key.platform, pid.map(i64::from))
            .await
        {
            warn!(session = %key, error = %e, "Failed to record worker start");
        }

        let supervisor = self.clone();
        let dispatch_key = key.clone();
        tokio::spawn(async move {
            supervisor
                .dispatch_worker(dispatch_key, id, process.event_rx, process.exit_rx)
                .await;
        });

        // First instruction: who answers on this session.
        let configure = Envelope::command(WorkerCommand::Configure {
            active_agent_id: agent,
        });
        if command_tx.send(configure).await.is_err() {
            warn!(session = %key, "Worker closed its command channel before configuration");
        }

        self.await_startup(key, id).await
    }

    /// Poll the fresh worker until it connects, fails, or the grace expires.
    async fn await_startup(&self, key: &SessionKey, id: Uuid) -> Result<WorkerInfo> {
        let deadline = Instant::now() + self.inner.options.startup_grace;
        loop {
            match self.inner.registry.get(key).await {
                None => {
                    // Dispatch already tore the session down; surface why.
                    let detail = match self.inner.store.get_status(&key.user_id, key.platform).await
                    {
                        Ok(record) => record.and_then(|r| r.last_error),
                        Err(_) => None,
                    };
                    return Err(Error::Startup(
                        detail.unwrap_or_else(|| "worker exited during startup".to_string()),
                    ));
                }
                Some(info) if info.id != id => {
                    return Err(Error::Startup(
                        "worker was replaced during startup".to_string(),
                    ));
                }
                Some(info) => {
                    if info.status == SessionStatus::Connected {
                        info!(session = %key, "Worker connected");
                        return Ok(info);
                    }
                    if Instant::now() >= deadline {
                        debug!(session = %key, "Startup grace elapsed; worker still starting");
                        return Ok(info);
                    }
                }
            }
            sleep(STARTUP_POLL_INTERVAL).await;
        }
    }

    /// Stop the session's worker.
    ///
    /// Returns `Ok(false)` when no worker is registered; the stored status
    /// is still reconciled to `disconnected` so callers converge. The worker
    /// gets a SHUTDOWN command and the shutdown grace to exit before it is
    /// killed.
    pub async fn stop_worker(&self, user_id: &str, platform: Platform) -> Result<bool> {
        let key = SessionKey::new(user_id, platform);
        self.inner.scheduler.reset(&key).await;

        let Some(ticket) = self.inner.registry.begin_stop(&key).await else {
            debug!(session = %key, "Stop requested for absent worker; reconciling store");
            if let Err(e) = self.inner.store.mark_disconnected(user_id, platform).await {
                warn!(session = %key, error = %e, "Failed to reconcile stopped session");
            }
            return Ok(false);
        };

        info!(session = %key, pid = ?ticket.pid, "Stopping session worker");
        if ticket
            .command_tx
            .send(Envelope::command(WorkerCommand::Shutdown))
            .await
            .is_err()
        {
            debug!(session = %key, "Worker command channel already closed");
        }

        if let Some(pid) = ticket.pid {
            let deadline = Instant::now() + self.inner.options.shutdown_grace;
            let mut exited = false;
            while Instant::now() < deadline {
                if !self.inner.launcher.is_alive(pid).await {
                    exited = true;
                    break;
                }
                sleep(STOP_POLL_INTERVAL).await;
            }
            if !exited {
                warn!(session = %key, pid, error = %Error::ShutdownTimeout, "Escalating to kill");
                if !self.inner.launcher.kill(pid).await {
                    warn!(session = %key, pid, "Could not confirm worker death");
                }
            }
        }

        self.inner
            .registry
            .remove_if_generation(&key, ticket.id)
            .await;
        if let Err(e) = self.inner.store.mark_disconnected(user_id, platform).await {
            warn!(session = %key, error = %e, "Failed to record worker stop");
        }
        self.inner
            .events
            .publish(SessionEvent::StatusChanged {
                user_id: user_id.to_string(),
                platform,
                status: SessionStatus::Disconnected,
                error: None,
            })
            .await;

        Ok(true)
    }

    /// Stop every registered worker. Used on shutdown.
    pub async fn stop_all(&self) {
        let keys = self.inner.registry.keys().await;
        if !keys.is_empty() {
            info!(count = keys.len(), "Stopping all session workers");
        }
        for key in keys {
            if let Err(e) = self.stop_worker(&key.user_id, key.platform).await {
                warn!(session = %key, error = %e, "Failed to stop worker during shutdown");
            }
        }
        self.inner.scheduler.shutdown().await;
    }

    // ===== Session queries =====

    /// Whether a worker is registered for the session.
    pub async fn is_active(&self, user_id: &str, platform: Platform) -> bool {
        self.inner
            .registry
            .contains(&SessionKey::new(user_id, platform))
            .await
    }

    /// Snapshot of the session's worker, if one is registered.
    pub async fn get_worker(&self, user_id: &str, platform: Platform) -> Option<WorkerInfo> {
        self.inner
            .registry
            .get(&SessionKey::new(user_id, platform))
            .await
    }

    /// Snapshot of every registered worker.
    pub async fn list_workers(&self) -> Vec<WorkerInfo> {
        self.inner.registry.list().await
    }

    /// Stored status record for the session.
    pub async fn session_status(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<StatusRecord>> {
        Ok(self.inner.store.get_status(user_id, platform).await?)
    }

    // ===== Worker commands =====

    /// Send a command to the session's worker.
    ///
    /// Returns false when no worker is registered or its channel is closed;
    /// sending to a missing session is not an error.
    pub async fn send_command(
        &self,
        user_id: &str,
        platform: Platform,
        command: WorkerCommand,
    ) -> bool {
        let key = SessionKey::new(user_id, platform);
        match self.inner.registry.command_sender(&key).await {
            Some(tx) => tx.send(Envelope::command(command)).await.is_ok(),
            None => false,
        }
    }

    /// Change which agent answers on the session.
    ///
    /// Persists the choice and, when a worker is live, reconfigures it.
    /// Returns whether a live worker took the change.
    pub async fn update_active_agent(
        &self,
        user_id: &str,
        platform: Platform,
        agent: Option<String>,
    ) -> Result<bool> {
        self.inner
            .store
            .set_active_agent(user_id, agent.as_deref())
            .await?;

        let key = SessionKey::new(user_id, platform);
        if !self.inner.registry.update_agent(&key, agent.clone()).await {
            return Ok(false);
        }
        Ok(self
            .send_command(
                user_id,
                platform,
                WorkerCommand::Configure {
                    active_agent_id: agent,
                },
            )
            .await)
    }

    // ===== Envelope dispatch =====

    async fn dispatch_worker(
        &self,
        key: SessionKey,
        id: Uuid,
        mut event_rx: mpsc::Receiver<Envelope>,
        mut exit_rx: oneshot::Receiver<WorkerExit>,
    ) {
        loop {
            tokio::select! {
                maybe = event_rx.recv() => match maybe {
                    Some(envelope) => self.handle_envelope(&key, id, envelope).await,
                    None => break,
                },
                result = &mut exit_rx => {
                    // Envelopes written just before death may still be
                    // buffered; apply them before the exit verdict.
                    while let Ok(envelope) = event_rx.try_recv() {
                        self.handle_envelope(&key, id, envelope).await;
                    }
                    let exit = result.unwrap_or(WorkerExit {
                        code: None,
                        message: None,
                    });
                    self.handle_exit(&key, id, exit).await;
                    return;
                }
            }
        }

        // Event stream closed first; the exit verdict is still owed.
        let exit = exit_rx.await.unwrap_or(WorkerExit {
            code: None,
            message: None,
        });
        self.handle_exit(&key, id, exit).await;
    }

    async fn handle_envelope(&self, key: &SessionKey, id: Uuid, envelope: Envelope) {
        // Anything the worker says counts as activity.
        self.inner.registry.touch(key, id).await;

        match envelope.kind {
            EnvelopeKind::StatusUpdate => match envelope.decode_payload::<StatusUpdatePayload>() {
                Ok(payload) => {
                    self.apply_status(key, id, payload.status, payload.detail)
                        .await;
                }
                Err(e) => {
                    warn!(session = %key, error = %e, "Malformed STATUS_UPDATE payload");
                }
            },
            EnvelopeKind::QrCode => match envelope.decode_payload::<QrCodePayload>() {
                Ok(payload) => {
                    if let Err(e) = self
                        .inner
                        .store
                        .record_qr(
                            &key.user_id,
                            key.platform,
                            &payload.qr_code,
                            payload.qr_image.as_deref(),
                        )
                        .await
                    {
                        warn!(session = %key, error = %e, "Failed to record QR code");
                    }
                }
                Err(e) => {
                    warn!(session = %key, error = %e, "Malformed QR_CODE payload");
                }
            },
            EnvelopeKind::ErrorInfo => {
                let message = match envelope.decode_payload::<ErrorInfoPayload>() {
                    Ok(payload) => payload.message,
                    Err(_) => "worker reported an error".to_string(),
                };
                self.fail_session(key, id, message).await;
            }
            EnvelopeKind::MessageReceived => {
                match envelope.decode_payload::<MessageReceivedPayload>() {
                    Ok(payload) => {
                        self.inner
                            .events
                            .publish(SessionEvent::MessageReceived {
                                user_id: key.user_id.clone(),
                                platform: key.platform,
                                from: payload.from,
                                content: payload.content,
                                message_id: payload.message_id,
                            })
                            .await;
                    }
                    Err(e) => {
                        warn!(session = %key, error = %e, "Malformed MESSAGE_RECEIVED payload");
                    }
                }
            }
            EnvelopeKind::Command => {
                warn!(session = %key, "Worker sent a COMMAND envelope; ignoring");
            }
            EnvelopeKind::Unknown(ref kind) => {
                warn!(session = %key, kind = %kind, "Ignoring unknown envelope type");
            }
        }
    }

    async fn apply_status(
        &self,
        key: &SessionKey,
        id: Uuid,
        status: SessionStatus,
        detail: Option<String>,
    ) {
        match status {
            SessionStatus::Starting => {
                self.inner.registry.set_status(key, id, status).await;
            }
            SessionStatus::Connected => {
                if !self.inner.registry.set_status(key, id, status).await {
                    return;
                }
                info!(session = %key, "Session connected");
                self.inner.scheduler.reset(key).await;
                if let Err(e) = self.inner.store.mark_connected(&key.user_id, key.platform).await {
                    warn!(session = %key, error = %e, "Failed to record connection");
                }
                self.inner
                    .events
                    .publish(SessionEvent::StatusChanged {
                        user_id: key.user_id.clone(),
                        platform: key.platform,
                        status: SessionStatus::Connected,
                        error: None,
                    })
                    .await;
            }
            SessionStatus::Disconnected => {
                let Some(removed) = self.inner.registry.remove_if_generation(key, id).await else {
                    return;
                };
                info!(session = %key, "Worker reported disconnect");
                if let Err(e) = self
                    .inner
                    .store
                    .mark_disconnected(&key.user_id, key.platform)
                    .await
                {
                    warn!(session = %key, error = %e, "Failed to record disconnect");
                }
                self.inner
                    .events
                    .publish(SessionEvent::StatusChanged {
                        user_id: key.user_id.clone(),
                        platform: key.platform,
                        status: SessionStatus::Disconnected,
                        error: None,
                    })
                    .await;
                if let Some(pid) = removed.pid {
                    self.reap_later(key, pid);
                }
            }
            SessionStatus::Error => {
                let message = detail.unwrap_or_else(|| "worker reported an error".to_string());
                self.fail_session(key, id, message).await;
            }
        }
    }

    /// Terminal failure: drop the session, record it, maybe schedule a retry.
    async fn fail_session(&self, key: &SessionKey, id: Uuid, message: String) {
        let Some(removed) = self.inner.registry.remove_if_generation(key, id).await else {
            return;
        };
        warn!(session = %key, error = %message, "Session failed");
        if let Err(e) = self
            .inner
            .store
            .mark_error(&key.user_id, key.platform, &message)
            .await
        {
            warn!(session = %key, error = %e, "Failed to record session failure");
        }
        self.inner
            .events
            .publish(SessionEvent::StatusChanged {
                user_id: key.user_id.clone(),
                platform: key.platform,
                status: SessionStatus::Error,
                error: Some(message),
            })
            .await;
        if let Some(pid) = removed.pid {
            self.reap_later(key, pid);
        }
        if removed.connected_once {
            self.schedule_reconnect(key, removed.active_agent_id).await;
        }
    }

    async fn handle_exit(&self, key: &SessionKey, id: Uuid, exit: WorkerExit) {
        let Some(removed) = self.inner.registry.remove_if_generation(key, id).await else {
            return;
        };
        if removed.stopping {
            // The stop path owns the store write and the event.
            debug!(session = %key, code = ?exit.code, "Worker exited during deliberate stop");
            return;
        }

        let message = exit
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| match exit.code {
                Some(code) => format!("worker exited unexpectedly with code {code}"),
                None => "worker terminated by signal".to_string(),
            });
        warn!(session = %key, error = %message, "Worker crashed");
        if let Err(e) = self
            .inner
            .store
            .mark_error(&key.user_id, key.platform, &message)
            .await
        {
            warn!(session = %key, error = %e, "Failed to record worker crash");
        }
        self.inner
            .events
            .publish(SessionEvent::StatusChanged {
                user_id: key.user_id.clone(),
                platform: key.platform,
                status: SessionStatus::Error,
                error: Some(message),
            })
            .await;

        if removed.connected_once {
            self.schedule_reconnect(key, removed.active_agent_id).await;
        }
    }

    // ===== Crash recovery =====

    async fn schedule_reconnect(&self, key: &SessionKey, agent: Option<String>) {
        let supervisor = self.clone();
        let retry_key = key.clone();
        let delay = self
            .inner
            .scheduler
            .schedule(key, move || async move {
                supervisor.restart_session(retry_key, agent).await;
            })
            .await;
        match delay {
            Some(delay) => {
                info!(
                    session = %key,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduled session restart"
                );
            }
            None => {
                warn!(session = %key, "Restart attempts exhausted; giving up on session");
            }
        }
    }

    // Boxed rather than `async fn`: the retry chain is recursive
    // (restart -> schedule_reconnect -> retry closure -> restart), so the
    // future type must be erased somewhere to be nameable.
    fn restart_session(
        &self,
        key: SessionKey,
        agent: Option<String>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            info!(session = %key, "Restarting session after crash");
            match self.start_session(&key, agent.clone(), false, false).await {
                Ok(_) => {}
                Err(e) => {
                    warn!(session = %key, error = %e, "Session restart failed");
                    // Keep the chain going until the attempt budget runs out.
                    self.schedule_reconnect(&key, agent).await;
                }
            }
        })
    }

    /// Kill a process that outlived its session entry.
    fn reap_later(&self, key: &SessionKey, pid: u32) {
        let launcher = self.inner.launcher.clone();
        let grace = self.inner.options.shutdown_grace;
        let key = key.clone();
        tokio::spawn(async move {
            sleep(grace).await;
            if launcher.is_alive(pid).await {
                warn!(session = %key, pid, "Worker outlived its session; killing");
                if !launcher.kill(pid).await {
                    warn!(session = %key, pid, "Could not confirm worker death");
                }
            }
        });
    }
}
