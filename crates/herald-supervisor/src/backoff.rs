// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Reconnect backoff.
//!
//! Crashed sessions are restarted on an exponential delay, capped, with a
//! bounded number of attempts. Each session has at most one timer pending;
//! scheduling again replaces the previous timer rather than stacking a
//! second restart.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::registry::SessionKey;

/// Delay policy: `min(base * 2^attempt, cap)`, at most `max_attempts` tries.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub cap: Duration,
    /// Retries allowed before the session is declared failed.
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the given retry attempt (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

#[derive(Default)]
struct ReconnectState {
    attempts: u32,
    timer: Option<JoinHandle<()>>,
}

/// Per-session reconnect timers and attempt counters.
pub struct ReconnectScheduler {
    policy: BackoffPolicy,
    sessions: Mutex<HashMap<SessionKey, ReconnectState>>,
}

impl ReconnectScheduler {
    /// Create a scheduler with the given policy.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Schedule `retry` to run after this session's next backoff delay.
    ///
    /// Any pending timer for the session is replaced. Returns the delay
    /// used, or `None` when the attempt budget is exhausted and the caller
    /// should give up on the session.
    pub async fn schedule<F, Fut>(&self, key: &SessionKey, retry: F) -> Option<Duration>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(key.clone()).or_default();
        if state.attempts >= self.policy.max_attempts {
            return None;
        }

        let delay = self.policy.delay_for(state.attempts);
        state.attempts += 1;

        if let Some(previous) = state.timer.take() {
            previous.abort();
        }
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached: cancelling the timer must never interrupt a retry
            // that has already begun, or it could strand a half-started
            // worker process.
            let _ = tokio::spawn(retry());
        }));

        Some(delay)
    }

    /// Forget a session's attempts and cancel any pending retry.
    ///
    /// Called when the session connects, when it is deliberately stopped,
    /// and when a fresh start supersedes the retry history.
    pub async fn reset(&self, key: &SessionKey) {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.remove(key)
            && let Some(timer) = state.timer
        {
            timer.abort();
        }
    }

    /// Cancel every pending retry.
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for (_, state) in sessions.drain() {
            if let Some(timer) = state.timer {
                timer.abort();
            }
        }
    }
}
