// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for stopping inactive sessions.
//!
//! Workers that have not produced any envelope within the inactivity
//! threshold are force-stopped, whatever status they report. This bounds
//! the damage from:
//! - Workers wedged inside a platform client library
//! - Sessions the remote side silently invalidated
//! - Users who paired once and never came back
//!
//! Staleness is judged on the registry's `last_activity_at`, which moves on
//! every envelope, so a chatty-but-disconnected worker is still considered
//! live and a silent "connected" one is not.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::supervisor::Supervisor;

/// Configuration for the inactivity sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to check for inactive workers.
    pub poll_interval: Duration,
    /// Maximum time since the last worker envelope before a session is
    /// force-stopped.
    pub inactivity_threshold: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            inactivity_threshold: Duration::from_secs(30 * 60),
        }
    }
}

/// Background worker that stops inactive session workers.
pub struct InactivitySweeper {
    supervisor: Supervisor,
    config: SweeperConfig,
    shutdown: Arc<Notify>,
}

impl InactivitySweeper {
    /// Create a new sweeper over the given supervisor.
    pub fn new(supervisor: Supervisor, config: SweeperConfig) -> Self {
        Self {
            supervisor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(&self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            inactivity_threshold_secs = self.config.inactivity_threshold.as_secs(),
            "Inactivity sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Inactivity sweeper received shutdown signal");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.sweep_once().await;
                }
            }
        }

        info!("Inactivity sweeper stopped");
    }

    /// Run one sweep now. Returns how many workers were stopped.
    pub async fn sweep_once(&self) -> usize {
        let Ok(threshold) = chrono::Duration::from_std(self.config.inactivity_threshold) else {
            warn!("Inactivity threshold out of range; skipping sweep");
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(threshold) else {
            warn!("Inactivity threshold out of range; skipping sweep");
            return 0;
        };

        let stale: Vec<_> = self
            .supervisor
            .list_workers()
            .await
            .into_iter()
            .filter(|worker| worker.last_activity_at < cutoff)
            .collect();
        if stale.is_empty() {
            debug!("No inactive session workers");
            return 0;
        }

        info!(count = stale.len(), "Found inactive session workers");
        let mut stopped = 0;
        for worker in stale {
            // Status is deliberately not consulted: a silent worker gets
            // stopped even while claiming to be connected.
            warn!(
                session = %worker.key,
                status = %worker.status,
                last_activity_at = %worker.last_activity_at,
                "Force-stopping inactive session worker"
            );
            match self
                .supervisor
                .stop_worker(&worker.key.user_id, worker.key.platform)
                .await
            {
                Ok(true) => stopped += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(session = %worker.key, error = %e, "Failed to stop inactive worker");
                }
            }
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SweeperConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.inactivity_threshold, Duration::from_secs(1800));
    }

    #[test]
    fn test_config_custom() {
        let config = SweeperConfig {
            poll_interval: Duration::from_secs(5),
            inactivity_threshold: Duration::from_secs(60),
        };
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.inactivity_threshold, Duration::from_secs(60));
    }
}
