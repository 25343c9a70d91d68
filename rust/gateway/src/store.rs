/*
 * Waggle - Chat-centric agent orchestration gateway
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Durable local stores: Google OAuth tokens and meeting-sync dedup records.
//!
//! Both are small single-table SQLite files opened in WAL mode so a crash
//! mid-write cannot corrupt them. The gateway process is the sole writer;
//! each pool is closed exactly once on graceful shutdown.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

async fn open_pool(path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}

// ---------------------------------------------------------------------------
// Token store
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenRecord {
    pub subject_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token expiry as epoch milliseconds.
    pub expiry_ms: i64,
    pub scope: String,
}

pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let pool = open_pool(path).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS oauth_tokens (
                subject_id    TEXT PRIMARY KEY,
                access_token  TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expiry_ms     INTEGER NOT NULL,
                scope         TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&pool)
        .await?;
        info!(path = %path, "token store opened");
        Ok(Self { pool })
    }

    /// Insert or fully replace the record for a subject.
    pub async fn upsert(&self, record: &TokenRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO oauth_tokens (subject_id, access_token, refresh_token, expiry_ms, scope)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(subject_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expiry_ms = excluded.expiry_ms,
                scope = excluded.scope",
        )
        .bind(&record.subject_id)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(record.expiry_ms)
        .bind(&record.scope)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, subject_id: &str) -> Result<Option<TokenRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT subject_id, access_token, refresh_token, expiry_ms, scope
             FROM oauth_tokens WHERE subject_id = ?1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| TokenRecord {
            subject_id: r.get(0),
            access_token: r.get(1),
            refresh_token: r.get(2),
            expiry_ms: r.get(3),
            scope: r.get(4),
        }))
    }

    pub async fn delete(&self, subject_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM oauth_tokens WHERE subject_id = ?1")
            .bind(subject_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ---------------------------------------------------------------------------
// Meeting store
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeetingStatus {
    Pending,
    Approved,
    Dismissed,
}

impl MeetingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Dismissed => "dismissed",
        }
    }
}

#[derive(Clone, Debug)]
pub struct MeetingRecord {
    pub event_id: String,
    pub title: String,
    /// RFC 3339 timestamp of when the analysis was surfaced.
    pub processed_at: String,
    pub status: String,
    pub task_ids: Option<String>,
}

pub struct MeetingStore {
    pool: SqlitePool,
}

impl MeetingStore {
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let pool = open_pool(path).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS meetings (
                event_id     TEXT PRIMARY KEY,
                title        TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                status       TEXT NOT NULL,
                task_ids     TEXT
            )",
        )
        .execute(&pool)
        .await?;
        info!(path = %path, "meeting store opened");
        Ok(Self { pool })
    }

    /// Record that an analysis was surfaced (or auto-dismissed) for an event.
    pub async fn insert(
        &self,
        event_id: &str,
        title: &str,
        status: MeetingStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO meetings (event_id, title, processed_at, status, task_ids)
             VALUES (?1, ?2, ?3, ?4, NULL)",
        )
        .bind(event_id)
        .bind(title)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Transition a record out of `pending`. Both targets are terminal.
    pub async fn set_status(
        &self,
        event_id: &str,
        status: MeetingStatus,
        task_ids: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE meetings SET status = ?2, task_ids = ?3 WHERE event_id = ?1",
        )
        .bind(event_id)
        .bind(status.as_str())
        .bind(task_ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// True iff any record exists for the event, regardless of status.
    /// This is what makes repeated sync runs idempotent: pending, approved
    /// and dismissed all count as processed.
    pub async fn is_processed(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM meetings WHERE event_id = ?1")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn get(&self, event_id: &str) -> Result<Option<MeetingRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT event_id, title, processed_at, status, task_ids
             FROM meetings WHERE event_id = ?1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| MeetingRecord {
            event_id: r.get(0),
            title: r.get(1),
            processed_at: r.get(2),
            status: r.get(3),
            task_ids: r.get(4),
        }))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
