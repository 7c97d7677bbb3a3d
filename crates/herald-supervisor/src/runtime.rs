// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for herald-supervisor.
//!
//! This module provides [`SupervisorRuntime`] which allows embedding the
//! session supervisor into an existing tokio application instead of running
//! it as a standalone binary.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald_core::SqliteStatusStore;
//! use herald_supervisor::launcher::ProcessWorkerLauncher;
//! use herald_supervisor::runtime::SupervisorRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStatusStore::from_path(".data/herald.db").await?);
//!     let launcher = Arc::new(ProcessWorkerLauncher::new("node", "worker/index.js"));
//!
//!     let runtime = SupervisorRuntime::builder()
//!         .store(store)
//!         .launcher(launcher)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.supervisor().start_worker("u1", herald_core::Platform::Whatsapp, None, false).await?;
//!
//!     // ... run your application ...
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use herald_core::StatusStore;

use crate::backoff::BackoffPolicy;
use crate::events::{EventSink, LogEventSink};
use crate::launcher::WorkerLauncher;
use crate::supervisor::{Supervisor, SupervisorOptions};
use crate::sweep::{InactivitySweeper, SweeperConfig};

/// Builder for creating a [`SupervisorRuntime`].
pub struct SupervisorRuntimeBuilder {
    store: Option<Arc<dyn StatusStore>>,
    launcher: Option<Arc<dyn WorkerLauncher>>,
    events: Option<Arc<dyn EventSink>>,
    sessions_dir: PathBuf,
    startup_grace: Duration,
    shutdown_grace: Duration,
    backoff: BackoffPolicy,
    sweep_config: SweeperConfig,
}

impl Default for SupervisorRuntimeBuilder {
    fn default() -> Self {
        let options = SupervisorOptions::default();
        Self {
            store: None,
            launcher: None,
            events: None,
            sessions_dir: options.sessions_dir,
            startup_grace: options.startup_grace,
            shutdown_grace: options.shutdown_grace,
            backoff: BackoffPolicy::default(),
            sweep_config: SweeperConfig::default(),
        }
    }
}

impl SupervisorRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status store (required).
    pub fn store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the worker launcher (required).
    pub fn launcher(mut self, launcher: Arc<dyn WorkerLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Set the event sink.
    ///
    /// Default: [`LogEventSink`]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Set the root directory for per-session worker state.
    ///
    /// Default: `.data/sessions`
    pub fn sessions_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.sessions_dir = path.into();
        self
    }

    /// Set how long a starting worker may take to become usable.
    ///
    /// Default: 15 seconds
    pub fn startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Set how long a stopping worker gets before being killed.
    ///
    /// Default: 5 seconds
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the crash-restart backoff policy.
    ///
    /// Default: 1s base, 30s cap, 5 attempts
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    /// Set the inactivity sweeper configuration.
    ///
    /// Default: poll every 60 seconds, stop sessions idle for 30 minutes
    pub fn sweep_config(mut self, config: SweeperConfig) -> Self {
        self.sweep_config = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<SupervisorRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let launcher = self
            .launcher
            .ok_or_else(|| anyhow::anyhow!("launcher is required"))?;
        let events = self.events.unwrap_or_else(|| Arc::new(LogEventSink));

        Ok(SupervisorRuntimeConfig {
            store,
            launcher,
            events,
            options: SupervisorOptions {
                sessions_dir: self.sessions_dir,
                startup_grace: self.startup_grace,
                shutdown_grace: self.shutdown_grace,
            },
            backoff: self.backoff,
            sweep_config: self.sweep_config,
        })
    }
}

/// Configuration for a [`SupervisorRuntime`].
pub struct SupervisorRuntimeConfig {
    store: Arc<dyn StatusStore>,
    launcher: Arc<dyn WorkerLauncher>,
    events: Arc<dyn EventSink>,
    options: SupervisorOptions,
    backoff: BackoffPolicy,
    sweep_config: SweeperConfig,
}

impl SupervisorRuntimeConfig {
    /// Start the runtime, spawning the inactivity sweeper task.
    pub async fn start(self) -> Result<SupervisorRuntime> {
        let supervisor = Supervisor::new(
            self.store,
            self.launcher,
            self.events,
            self.options,
            self.backoff,
        );

        let sweeper = InactivitySweeper::new(supervisor.clone(), self.sweep_config);
        let sweep_shutdown = sweeper.shutdown_handle();
        let sweep_handle = tokio::spawn(async move {
            sweeper.run().await;
        });

        info!("SupervisorRuntime started");

        Ok(SupervisorRuntime {
            supervisor,
            sweep_handle,
            sweep_shutdown,
        })
    }
}

/// A running session supervisor that can be embedded in an application.
///
/// The runtime manages:
/// - The supervisor itself (worker lifecycle and envelope dispatch)
/// - The inactivity sweeper stopping silent sessions
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct SupervisorRuntime {
    supervisor: Supervisor,
    sweep_handle: JoinHandle<()>,
    sweep_shutdown: Arc<Notify>,
}

impl SupervisorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> SupervisorRuntimeBuilder {
        SupervisorRuntimeBuilder::new()
    }

    /// Get the supervisor for starting and controlling sessions.
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the sweeper to stop, waits for it, then stops every
    /// registered worker.
    pub async fn shutdown(self) -> Result<()> {
        info!("SupervisorRuntime shutting down...");

        self.sweep_shutdown.notify_one();
        if let Err(e) = self.sweep_handle.await {
            error!("Inactivity sweeper task panicked: {}", e);
        }

        self.supervisor.stop_all().await;

        info!("SupervisorRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.sweep_handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::launcher::MockLauncher;
    use herald_core::MemoryStatusStore;

    #[tokio::test]
    async fn test_build_requires_store_and_launcher() {
        assert!(SupervisorRuntime::builder().build().is_err());

        let only_store = SupervisorRuntime::builder()
            .store(Arc::new(MemoryStatusStore::new()))
            .build();
        assert!(only_store.is_err());

        let complete = SupervisorRuntime::builder()
            .store(Arc::new(MemoryStatusStore::new()))
            .launcher(Arc::new(MockLauncher::new()))
            .build();
        assert!(complete.is_ok());
    }

    #[tokio::test]
    async fn test_runtime_starts_and_shuts_down() {
        let runtime = SupervisorRuntime::builder()
            .store(Arc::new(MemoryStatusStore::new()))
            .launcher(Arc::new(MockLauncher::new()))
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();

        assert!(runtime.is_running());
        runtime.shutdown().await.unwrap();
    }
}
