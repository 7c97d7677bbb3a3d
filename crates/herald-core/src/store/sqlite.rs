// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed status store implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::StoreError;
use crate::session::{Platform, StatusRecord};

use super::{StatusFields, StatusStore};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

/// SQLite-backed status store.
#[derive(Clone)]
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
    /// Create a new SQLite status store from an existing pool.
    ///
    /// The caller is responsible for running migrations on the pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create and initialize a new SQLite status store from a file path.
    ///
    /// This convenience constructor handles all setup:
    /// - Creates parent directories if they don't exist
    /// - Creates the database file if it doesn't exist
    /// - Connects to the database with sensible defaults
    /// - Runs all migrations
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file (e.g., ".data/herald.db")
    ///
    /// # Example
    ///
    /// ```ignore
    /// let store = SqliteStatusStore::from_path(".data/herald.db").await?;
    /// ```
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        // Build connection URL
        let path_str = path.to_string_lossy();
        let url = format!("sqlite:{}?mode=rwc", path_str);

        // Create pool with reasonable defaults
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        // Run migrations
        MIGRATOR.run(&pool).await.map_err(|e| StoreError::Database {
            operation: "migrate".to_string(),
            details: format!("Failed to run migrations: {}", e),
        })?;

        Ok(Self { pool })
    }

    /// Access the underlying pool (for tests and maintenance jobs).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Flat row shape; parsed into [`StatusRecord`] on the way out.
#[derive(Debug, sqlx::FromRow)]
struct StatusRow {
    user_id: String,
    platform: String,
    status: String,
    last_qr_code: Option<String>,
    last_qr_image: Option<String>,
    qr_created_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    worker_pid: Option<i64>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<StatusRow> for StatusRecord {
    type Error = StoreError;

    fn try_from(row: StatusRow) -> Result<Self, StoreError> {
        let platform: Platform = row.platform.parse()?;
        let status = row
            .status
            .parse()
            .map_err(|_| StoreError::InvalidStatus(row.status.clone()))?;
        Ok(StatusRecord {
            user_id: row.user_id,
            platform,
            status,
            last_qr_code: row.last_qr_code,
            last_qr_image: row.last_qr_image,
            qr_created_at: row.qr_created_at,
            last_error: row.last_error,
            worker_pid: row.worker_pid,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn upsert_status(
        &self,
        user_id: &str,
        platform: Platform,
        fields: StatusFields,
    ) -> Result<(), StoreError> {
        // Single-statement partial upsert. NULL binds mean "keep the current
        // value"; the clear_* flags force a column to NULL and win over a
        // value bound in the same call. updated_at only ever moves forward.
        sqlx::query(
            r#"
            INSERT INTO status_records (
                user_id, platform, status, last_qr_code, last_qr_image,
                qr_created_at, last_error, worker_pid, updated_at
            ) VALUES (
                ?1, ?2, COALESCE(?3, 'disconnected'), ?4, ?5, ?6,
                CASE WHEN ?10 THEN NULL ELSE ?7 END,
                CASE WHEN ?11 THEN NULL ELSE ?8 END,
                ?9
            )
            ON CONFLICT (user_id, platform) DO UPDATE SET
                status = COALESCE(?3, status_records.status),
                last_qr_code = COALESCE(?4, status_records.last_qr_code),
                last_qr_image = COALESCE(?5, status_records.last_qr_image),
                qr_created_at = COALESCE(?6, status_records.qr_created_at),
                last_error = CASE
                    WHEN ?10 THEN NULL
                    ELSE COALESCE(?7, status_records.last_error)
                END,
                worker_pid = CASE
                    WHEN ?11 THEN NULL
                    ELSE COALESCE(?8, status_records.worker_pid)
                END,
                updated_at = CASE
                    WHEN ?9 > status_records.updated_at THEN ?9
                    ELSE status_records.updated_at
                END
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .bind(fields.status.map(|s| s.as_str()))
        .bind(&fields.qr_code)
        .bind(&fields.qr_image)
        .bind(fields.qr_created_at)
        .bind(&fields.last_error)
        .bind(fields.worker_pid)
        .bind(Utc::now())
        .bind(fields.clear_error)
        .bind(fields.clear_pid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_status(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<StatusRecord>, StoreError> {
        let row = sqlx::query_as::<_, StatusRow>(
            r#"
            SELECT user_id, platform, status, last_qr_code, last_qr_image,
                   qr_created_at, last_error, worker_pid, updated_at
            FROM status_records
            WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(StatusRecord::try_from).transpose()
    }

    async fn clear_qr(&self, user_id: &str, platform: Platform) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE status_records
            SET last_qr_code = NULL, last_qr_image = NULL, qr_created_at = NULL
            WHERE user_id = ? AND platform = ?
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_active_agent(
        &self,
        user_id: &str,
        agent_id: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (user_id, active_agent_id, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                active_agent_id = EXCLUDED.active_agent_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(user_id)
        .bind(agent_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_active_agent(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let agent: Option<(Option<String>,)> =
            sqlx::query_as("SELECT active_agent_id FROM users WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(agent.and_then(|(a,)| a))
    }
}
