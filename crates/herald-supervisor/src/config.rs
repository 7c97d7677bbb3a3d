// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for herald-supervisor.

use std::path::PathBuf;
use std::time::Duration;

/// Supervisor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite status database
    pub database_path: PathBuf,
    /// Program that runs worker scripts (usually the node binary)
    pub worker_program: String,
    /// Path to the worker entry script
    pub worker_script: PathBuf,
    /// Directory holding per-session state handed to workers
    pub sessions_dir: PathBuf,
    /// How long a starting worker may take to reach a usable state
    pub startup_grace: Duration,
    /// How long a stopping worker gets to exit before being killed
    pub shutdown_grace: Duration,
    /// Sessions idle longer than this are force-stopped by the sweep
    pub inactivity_threshold: Duration,
    /// How often the inactivity sweep runs
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_path = PathBuf::from(
            std::env::var("HERALD_DATABASE_PATH").unwrap_or_else(|_| ".data/herald.db".to_string()),
        );

        let worker_program =
            std::env::var("HERALD_WORKER_PROGRAM").unwrap_or_else(|_| "node".to_string());

        // The worker script is the one thing we cannot guess.
        let worker_script = PathBuf::from(
            std::env::var("HERALD_WORKER_SCRIPT")
                .map_err(|_| ConfigError::MissingEnvVar("HERALD_WORKER_SCRIPT"))?,
        );

        let sessions_dir = PathBuf::from(
            std::env::var("HERALD_SESSIONS_DIR").unwrap_or_else(|_| ".data/sessions".to_string()),
        );

        let startup_grace = duration_var("HERALD_STARTUP_GRACE_SECS", 15)?;
        let shutdown_grace = duration_var("HERALD_SHUTDOWN_GRACE_SECS", 5)?;
        let inactivity_threshold = duration_var("HERALD_INACTIVITY_THRESHOLD_SECS", 30 * 60)?;
        let sweep_interval = duration_var("HERALD_SWEEP_INTERVAL_SECS", 60)?;

        Ok(Self {
            database_path,
            worker_program,
            worker_script,
            sessions_dir,
            startup_grace,
            shutdown_grace,
            inactivity_threshold,
            sweep_interval,
        })
    }
}

fn duration_var(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidDuration(name))?,
        Err(_) => default_secs,
    };
    Ok(Duration::from_secs(secs))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// A duration variable did not parse as whole seconds.
    #[error("Invalid duration in environment variable: {0}")]
    InvalidDuration(&'static str),
}
