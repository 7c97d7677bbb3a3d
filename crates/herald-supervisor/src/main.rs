// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herald Supervisor - Messaging Session Supervisor
//!
//! A control-plane process responsible for:
//! - Spawning one worker process per (user, platform) session
//! - Relaying worker status, QR codes, and messages into the status store
//! - Restarting crashed sessions with exponential backoff
//! - Stopping sessions that have gone silent

use std::sync::Arc;
use tracing::{info, warn};

use herald_core::SqliteStatusStore;
use herald_supervisor::backoff::BackoffPolicy;
use herald_supervisor::config::Config;
use herald_supervisor::launcher::{ProcessWorkerLauncher, WorkerLauncher};
use herald_supervisor::runtime::SupervisorRuntime;
use herald_supervisor::sweep::SweeperConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_supervisor=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        database = %config.database_path.display(),
        worker_script = %config.worker_script.display(),
        sessions_dir = %config.sessions_dir.display(),
        "Starting Herald Supervisor"
    );

    // Open the status database (creates file and runs migrations)
    let store = Arc::new(SqliteStatusStore::from_path(&config.database_path).await?);
    info!("Status store ready");

    // Create the subprocess launcher
    let launcher = Arc::new(ProcessWorkerLauncher::new(
        &config.worker_program,
        &config.worker_script,
    ));
    info!(launcher_type = launcher.launcher_type(), "Launcher initialized");

    // Start the runtime
    let runtime = SupervisorRuntime::builder()
        .store(store)
        .launcher(launcher)
        .sessions_dir(&config.sessions_dir)
        .startup_grace(config.startup_grace)
        .shutdown_grace(config.shutdown_grace)
        .backoff(BackoffPolicy::default())
        .sweep_config(SweeperConfig {
            poll_interval: config.sweep_interval,
            inactivity_threshold: config.inactivity_threshold,
        })
        .build()?
        .start()
        .await?;

    info!("Supervisor ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("Herald Supervisor shut down");

    Ok(())
}
