// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herald Supervisor - Messaging Session Lifecycle Management
//!
//! This crate is the control plane for platform messaging sessions. Each
//! session is an isolated worker OS process that owns a login to one
//! messaging platform for one user. The supervisor spawns workers, relays
//! their event stream into the status store, restarts them when they crash,
//! and stops them when they go quiet.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Embedding Application                           │
//! │                     (API server, bot backend, CLI)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    herald-supervisor (This Crate)                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │   Session   │  │   Worker    │  │  Reconnect  │  │ Inactivity  │     │
//! │  │  Registry   │  │  Launcher   │  │  Scheduler  │  │   Sweeper   │     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                 │ Spawn + stdio pipes
//!           │                 ▼
//!           │       ┌───────────────────────────┐
//!           │       │      Worker Processes     │
//!           │       │  one per (user, platform) │
//!           │       └───────────────────────────┘
//!           │
//!           ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              SQLite                                    │
//! │                (status records, QR codes, agent bindings)              │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Session Operations
//!
//! All operations are methods on [`supervisor::Supervisor`]:
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `start_worker` | Start (or reuse) the worker for a (user, platform) pair |
//! | `stop_worker` | Gracefully stop a worker, escalating to SIGKILL |
//! | `is_active` | Check whether a live worker is registered |
//! | `get_worker` | Snapshot of a registered worker's runtime state |
//! | `list_workers` | Snapshots of every registered worker |
//! | `send_command` | Forward a command envelope to a worker, if present |
//! | `session_status` | Read the persisted status record |
//! | `update_active_agent` | Persist and push a new agent binding |
//!
//! QR retrieval is the read side and lives on [`reconciler::QrReconciler`]:
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `current_qr` | Latest QR code if it is still fresh |
//! | `wait_for_qr` | Poll until a usable QR code appears or a timeout passes |
//!
//! # Worker Protocol
//!
//! Workers speak newline-delimited JSON envelopes over stdio (see
//! `herald-protocol`). Events flow worker → supervisor:
//!
//! | Envelope | Effect |
//! |----------|--------|
//! | `STATUS_UPDATE` | Drives the session state machine below |
//! | `QR_CODE` | Persisted with a freshness timestamp |
//! | `ERROR_INFO` | Marks the session failed and may schedule a restart |
//! | `MESSAGE_RECEIVED` | Forwarded to the configured [`events::EventSink`] |
//!
//! Unknown envelope types are logged and ignored. Every envelope, whatever
//! its type, refreshes the session's activity clock.
//!
//! # Session State Machine
//!
//! ```text
//!                ┌──────────┐
//!                │ STARTING │
//!                └────┬─────┘
//!                     │ worker reports connected
//!                     ▼
//!               ┌───────────┐
//!        ┌──────│ CONNECTED │──────┐
//!        │      └───────────┘      │
//!        │ logout / stop           │ crash / ERROR_INFO
//!        ▼                         ▼
//! ┌──────────────┐          ┌───────────┐
//! │ DISCONNECTED │          │   ERROR   │
//! └──────────────┘          └─────┬─────┘
//!                                 │ backoff restart
//!                                 ▼
//!                            ┌──────────┐
//!                            │ STARTING │
//!                            └──────────┘
//! ```
//!
//! Both `DISCONNECTED` and `ERROR` are terminal for the in-memory handle:
//! the registry entry is removed and only the persisted record remains.
//! Crash restarts apply exponential backoff and stop after a budget of
//! attempts; a successful connection resets the counter.
//!
//! # Configuration
//!
//! The standalone binary loads configuration from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `HERALD_DATABASE_PATH` | No | `.data/herald.db` | SQLite database path |
//! | `HERALD_WORKER_PROGRAM` | No | `node` | Program that runs the worker script |
//! | `HERALD_WORKER_SCRIPT` | Yes | - | Worker entry script path |
//! | `HERALD_SESSIONS_DIR` | No | `.data/sessions` | Per-session state directory |
//! | `HERALD_STARTUP_GRACE_SECS` | No | `15` | Startup wait before reporting |
//! | `HERALD_SHUTDOWN_GRACE_SECS` | No | `5` | Graceful stop window |
//! | `HERALD_INACTIVITY_THRESHOLD_SECS` | No | `1800` | Idle cutoff for the sweep |
//! | `HERALD_SWEEP_INTERVAL_SECS` | No | `60` | Sweep poll interval |
//!
//! Embedders skip the environment entirely and use
//! [`runtime::SupervisorRuntime::builder`].

#![deny(missing_docs)]

/// Crash-restart backoff policy and the reconnect timer scheduler.
pub mod backoff;

/// Supervisor configuration loaded from environment variables.
pub mod config;

/// Error types for supervisor operations.
pub mod error;

/// Session lifecycle events pushed to the embedding application.
pub mod events;

/// Worker process execution backends (subprocess, mock).
pub mod launcher;

/// QR code freshness policy and retrieval.
pub mod reconciler;

/// In-memory registry of live worker handles.
pub mod registry;

/// Worker lifecycle orchestration and envelope dispatch.
pub mod supervisor;

/// Background worker that stops sessions idle past a threshold.
pub mod sweep;

/// Embeddable runtime for herald-supervisor.
pub mod runtime;

pub use config::Config;
pub use error::Error;
