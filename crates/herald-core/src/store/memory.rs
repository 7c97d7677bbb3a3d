// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory status store for testing.
//!
//! A simple store implementation that keeps records in a HashMap
//! without touching disk. Behaves like the SQLite backend, including
//! partial-upsert semantics and the monotonic `updated_at` clamp.

use async_trait::async_trait;
use chrono::Utc;
use herald_protocol::SessionStatus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::session::{Platform, StatusRecord};

use super::{StatusFields, StatusStore};

/// In-memory status store for testing.
#[derive(Clone)]
pub struct MemoryStatusStore {
    records: Arc<Mutex<HashMap<(String, Platform), StatusRecord>>>,
    agents: Arc<Mutex<HashMap<String, Option<String>>>>,
    /// If true, every operation fails with a database error.
    /// This is useful for testing that callers tolerate store outages.
    pub fail_all: bool,
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStatusStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            agents: Arc::new(Mutex::new(HashMap::new())),
            fail_all: false,
        }
    }

    /// Create a store whose every operation fails.
    pub fn failing() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            agents: Arc::new(Mutex::new(HashMap::new())),
            fail_all: true,
        }
    }

    fn check(&self, operation: &str) -> Result<(), StoreError> {
        if self.fail_all {
            return Err(StoreError::database(operation, "simulated outage"));
        }
        Ok(())
    }

    /// Number of records currently held.
    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Seed a full record directly, bypassing upsert semantics.
    pub async fn insert_record(&self, record: StatusRecord) {
        let key = (record.user_id.clone(), record.platform);
        self.records.lock().await.insert(key, record);
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn upsert_status(
        &self,
        user_id: &str,
        platform: Platform,
        fields: StatusFields,
    ) -> Result<(), StoreError> {
        self.check("upsert_status")?;

        let now = Utc::now();
        let mut records = self.records.lock().await;
        let record = records
            .entry((user_id.to_string(), platform))
            .or_insert_with(|| StatusRecord {
                user_id: user_id.to_string(),
                platform,
                status: SessionStatus::Disconnected,
                last_qr_code: None,
                last_qr_image: None,
                qr_created_at: None,
                last_error: None,
                worker_pid: None,
                updated_at: now,
            });

        if let Some(status) = fields.status {
            record.status = status;
        }
        if let Some(qr) = fields.qr_code {
            record.last_qr_code = Some(qr);
        }
        if let Some(image) = fields.qr_image {
            record.last_qr_image = Some(image);
        }
        if let Some(at) = fields.qr_created_at {
            record.qr_created_at = Some(at);
        }
        if fields.clear_error {
            record.last_error = None;
        } else if let Some(err) = fields.last_error {
            record.last_error = Some(err);
        }
        if fields.clear_pid {
            record.worker_pid = None;
        } else if let Some(pid) = fields.worker_pid {
            record.worker_pid = Some(pid);
        }
        if now > record.updated_at {
            record.updated_at = now;
        }

        Ok(())
    }

    async fn get_status(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<StatusRecord>, StoreError> {
        self.check("get_status")?;

        let records = self.records.lock().await;
        Ok(records.get(&(user_id.to_string(), platform)).cloned())
    }

    async fn clear_qr(&self, user_id: &str, platform: Platform) -> Result<(), StoreError> {
        self.check("clear_qr")?;

        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&(user_id.to_string(), platform)) {
            record.last_qr_code = None;
            record.last_qr_image = None;
            record.qr_created_at = None;
        }
        Ok(())
    }

    async fn set_active_agent(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check("set_active_agent")?;

        let mut agents = self.agents.lock().await;
        agents.insert(user_id.to_string(), agent_id.map(str::to_string));
        Ok(())
    }

    async fn get_active_agent(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.check("get_active_agent")?;

        let agents = self.agents.lock().await;
        Ok(agents.get(user_id).cloned().flatten())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_upsert_merges_fields() {
        let store = MemoryStatusStore::new();

        store
            .mark_starting("u1", Platform::Whatsapp, Some(99))
            .await
            .unwrap();
        store
            .record_qr("u1", Platform::Whatsapp, "qr", None)
            .await
            .unwrap();

        let record = store
            .get_status("u1", Platform::Whatsapp)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, SessionStatus::Starting);
        assert_eq!(record.worker_pid, Some(99));
        assert_eq!(record.last_qr_code.as_deref(), Some("qr"));
    }

    #[tokio::test]
    async fn test_updated_at_never_moves_backward() {
        let store = MemoryStatusStore::new();

        // A record stamped ahead of the wall clock, as after a clock step.
        let future = Utc::now() + chrono::Duration::hours(1);
        store
            .insert_record(StatusRecord {
                user_id: "u1".to_string(),
                platform: Platform::Whatsapp,
                status: SessionStatus::Connected,
                last_qr_code: None,
                last_qr_image: None,
                qr_created_at: None,
                last_error: None,
                worker_pid: Some(7),
                updated_at: future,
            })
            .await;

        store
            .mark_disconnected("u1", Platform::Whatsapp)
            .await
            .unwrap();

        let record = store
            .get_status("u1", Platform::Whatsapp)
            .await
            .unwrap()
            .unwrap();
        // The write landed, but the timestamp held its ground.
        assert_eq!(record.status, SessionStatus::Disconnected);
        assert_eq!(record.updated_at, future);
    }

    #[tokio::test]
    async fn test_failing_store_reports_database_errors() {
        let store = MemoryStatusStore::failing();

        let err = store
            .mark_connected("u1", Platform::Whatsapp)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Database { .. }));
        assert!(store.get_status("u1", Platform::Whatsapp).await.is_err());
    }
}
