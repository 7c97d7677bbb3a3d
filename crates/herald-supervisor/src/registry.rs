// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Session Registry
//!
//! In-memory source of truth for live worker sessions, keyed by
//! (user, platform). The supervisor is the registry's only writer; the
//! status store is a downstream projection that may lag behind it.
//!
//! Every handle carries a generation id minted at spawn time. Mutators
//! take that id and refuse to touch an entry belonging to a different
//! generation, so a dispatch task left over from a replaced worker can
//! never corrupt its successor's state.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

use herald_core::Platform;
use herald_protocol::{Envelope, SessionStatus};

/// Identifies one session: a user on a platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// User the session belongs to.
    pub user_id: String,
    /// Platform the session runs on.
    pub platform: Platform,
}

impl SessionKey {
    /// Create a session key.
    pub fn new(user_id: impl Into<String>, platform: Platform) -> Self {
        Self {
            user_id: user_id.into(),
            platform,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.platform)
    }
}

/// Live state for one worker session.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Generation id, unique per spawn.
    pub id: Uuid,
    /// Session this worker serves.
    pub key: SessionKey,
    /// OS pid, when known.
    pub pid: Option<u32>,
    /// Current session status.
    pub status: SessionStatus,
    /// Agent configured to answer on this session.
    pub active_agent_id: Option<String>,
    /// When the worker was spawned.
    pub created_at: DateTime<Utc>,
    /// Last time any envelope arrived from the worker.
    pub last_activity_at: DateTime<Utc>,
    /// Set once a deliberate stop is underway; suppresses crash handling.
    pub stopping: bool,
    /// Whether this worker ever reached `connected`.
    pub connected_once: bool,
    /// Commands to the worker.
    pub command_tx: mpsc::Sender<Envelope>,
}

impl WorkerHandle {
    /// Create a handle for a freshly spawned worker.
    pub fn new(
        key: SessionKey,
        pid: Option<u32>,
        active_agent_id: Option<String>,
        command_tx: mpsc::Sender<Envelope>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key,
            pid,
            status: SessionStatus::Starting,
            active_agent_id,
            created_at: now,
            last_activity_at: now,
            stopping: false,
            connected_once: false,
            command_tx,
        }
    }

    fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id,
            key: self.key.clone(),
            pid: self.pid,
            status: self.status,
            active_agent_id: self.active_agent_id.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            stopping: self.stopping,
        }
    }
}

/// Point-in-time snapshot of a worker handle, without the command channel.
#[derive(Debug, Clone)]
pub struct WorkerInfo {
    /// Generation id, unique per spawn.
    pub id: Uuid,
    /// Session this worker serves.
    pub key: SessionKey,
    /// OS pid, when known.
    pub pid: Option<u32>,
    /// Status at snapshot time.
    pub status: SessionStatus,
    /// Agent configured to answer on this session.
    pub active_agent_id: Option<String>,
    /// When the worker was spawned.
    pub created_at: DateTime<Utc>,
    /// Last time any envelope arrived from the worker.
    pub last_activity_at: DateTime<Utc>,
    /// Whether a deliberate stop is underway.
    pub stopping: bool,
}

/// Guard marking a session as "connecting".
///
/// Held for the duration of a start attempt; dropping it always releases
/// the slot, including on error paths.
pub struct ConnectGuard {
    key: SessionKey,
    connecting: Arc<StdMutex<HashSet<SessionKey>>>,
}

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        if let Ok(mut connecting) = self.connecting.lock() {
            connecting.remove(&self.key);
        }
    }
}

/// Registry of live worker sessions.
pub struct SessionRegistry {
    workers: Mutex<HashMap<SessionKey, WorkerHandle>>,
    connecting: Arc<StdMutex<HashSet<SessionKey>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            connecting: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Claim the "connecting" slot for a session.
    ///
    /// Returns `None` if another start for the same session is in flight.
    pub fn try_begin_connect(&self, key: &SessionKey) -> Option<ConnectGuard> {
        let mut connecting = self.connecting.lock().ok()?;
        if !connecting.insert(key.clone()) {
            return None;
        }
        Some(ConnectGuard {
            key: key.clone(),
            connecting: self.connecting.clone(),
        })
    }

    /// Insert a fresh handle, returning any handle it replaced.
    pub async fn insert(&self, handle: WorkerHandle) -> Option<WorkerHandle> {
        let mut workers = self.workers.lock().await;
        workers.insert(handle.key.clone(), handle)
    }

    /// Remove a session unconditionally.
    pub async fn remove(&self, key: &SessionKey) -> Option<WorkerHandle> {
        self.workers.lock().await.remove(key)
    }

    /// Remove a session only if it still belongs to the given generation.
    pub async fn remove_if_generation(&self, key: &SessionKey, id: Uuid) -> Option<WorkerHandle> {
        let mut workers = self.workers.lock().await;
        if workers.get(key).is_some_and(|w| w.id == id) {
            workers.remove(key)
        } else {
            None
        }
    }

    /// Whether a session is registered at all.
    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.workers.lock().await.contains_key(key)
    }

    /// Snapshot one session.
    pub async fn get(&self, key: &SessionKey) -> Option<WorkerInfo> {
        self.workers.lock().await.get(key).map(|w| w.info())
    }

    /// Snapshot every session.
    pub async fn list(&self) -> Vec<WorkerInfo> {
        self.workers.lock().await.values().map(|w| w.info()).collect()
    }

    /// All registered session keys.
    pub async fn keys(&self) -> Vec<SessionKey> {
        self.workers.lock().await.keys().cloned().collect()
    }

    /// Command channel for a session, if it is registered.
    pub async fn command_sender(&self, key: &SessionKey) -> Option<mpsc::Sender<Envelope>> {
        self.workers
            .lock()
            .await
            .get(key)
            .map(|w| w.command_tx.clone())
    }

    /// Record activity from the worker.
    pub async fn touch(&self, key: &SessionKey, id: Uuid) {
        let mut workers = self.workers.lock().await;
        if let Some(worker) = workers.get_mut(key).filter(|w| w.id == id) {
            worker.last_activity_at = Utc::now();
        }
    }

    /// Update the session status reported by the worker.
    ///
    /// Returns false when the entry is gone or from another generation.
    pub async fn set_status(&self, key: &SessionKey, id: Uuid, status: SessionStatus) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(key).filter(|w| w.id == id) {
            Some(worker) => {
                worker.status = status;
                if status == SessionStatus::Connected {
                    worker.connected_once = true;
                }
                true
            }
            None => false,
        }
    }

    /// Replace the agent recorded for a session.
    ///
    /// Applies to whatever generation currently holds the key; agent
    /// changes are caller-driven, not tied to one spawn.
    pub async fn update_agent(&self, key: &SessionKey, agent: Option<String>) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(key) {
            Some(worker) => {
                worker.active_agent_id = agent;
                true
            }
            None => false,
        }
    }

    /// Mark a deliberate stop and hand back what the stop path needs.
    ///
    /// Returns `None` if the session is not registered.
    pub async fn begin_stop(&self, key: &SessionKey) -> Option<StopTicket> {
        let mut workers = self.workers.lock().await;
        let worker = workers.get_mut(key)?;
        worker.stopping = true;
        Some(StopTicket {
            id: worker.id,
            pid: worker.pid,
            command_tx: worker.command_tx.clone(),
        })
    }
}

/// What the stop path needs from the handle it is stopping.
#[derive(Debug)]
pub struct StopTicket {
    /// Generation being stopped.
    pub id: Uuid,
    /// OS pid, for escalation.
    pub pid: Option<u32>,
    /// Channel to send the SHUTDOWN command on.
    pub command_tx: mpsc::Sender<Envelope>,
}
