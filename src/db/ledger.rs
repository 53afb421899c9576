// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Durable sync ledger backed by SQLite.
//!
//! Owns the two pieces of persistent state:
//! - Sync records: one row per Fitbit activity, tracking its journey to
//!   Strava (pending/synced/failed, attempt counts, Strava ID)
//! - Sync window: the upper bound of the time range already scanned
//!
//! The ledger is what makes sync at-most-once across restarts; an
//! in-memory map would reintroduce the duplicate-upload problem this
//! service exists to fix.

use crate::error::AppError;
use crate::models::{SyncRecord, SyncStatus};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;

/// SQLite-backed sync ledger.
#[derive(Clone)]
pub struct SyncLedger {
    pool: SqlitePool,
}

impl SyncLedger {
    /// Open (or create) the ledger database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to open ledger: {}", e)))?;

        let ledger = Self { pool };
        ledger.init_schema().await?;

        tracing::info!(path = %path.as_ref().display(), "Sync ledger opened");
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sync_records (
                fitbit_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                strava_id TEXT,
                last_attempt_at TEXT NOT NULL,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                last_error TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sync_window (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_checked INTEGER NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    // ─── Sync Records ────────────────────────────────────────────

    /// Whether any record exists for this Fitbit activity.
    pub async fn has(&self, fitbit_id: &str) -> Result<bool, AppError> {
        let row = sqlx::query("SELECT 1 FROM sync_records WHERE fitbit_id = $1")
            .bind(fitbit_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(row.is_some())
    }

    /// Fetch the full record for an activity, if any.
    pub async fn get(&self, fitbit_id: &str) -> Result<Option<SyncRecord>, AppError> {
        let row = sqlx::query(
            r"
            SELECT fitbit_id, status, strava_id, last_attempt_at, attempt_count, last_error
            FROM sync_records WHERE fitbit_id = $1
            ",
        )
        .bind(fitbit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        row.map(|r| Self::row_to_record(&r)).transpose()
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<SyncRecord, AppError> {
        let status_str: String = row.get("status");
        let status = SyncStatus::parse(&status_str)
            .ok_or_else(|| AppError::Database(format!("Unknown sync status: {}", status_str)))?;

        let last_attempt_str: String = row.get("last_attempt_at");
        let last_attempt_at = DateTime::parse_from_rfc3339(&last_attempt_str)
            .map_err(|e| AppError::Database(format!("Bad timestamp in ledger: {}", e)))?
            .with_timezone(&Utc);

        Ok(SyncRecord {
            fitbit_id: row.get("fitbit_id"),
            status,
            strava_id: row.get("strava_id"),
            last_attempt_at,
            attempt_count: row.get("attempt_count"),
            last_error: row.get("last_error"),
        })
    }

    /// Create a Pending record if none exists.
    ///
    /// Returns whether the row was newly created. This return value is the
    /// sole admission gate: only the caller that created the row proceeds
    /// to upload, so two concurrent cycles can never double-upload.
    pub async fn record_pending(&self, fitbit_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r"
            INSERT INTO sync_records (fitbit_id, status, last_attempt_at, attempt_count)
            VALUES ($1, 'pending', $2, 0)
            ON CONFLICT(fitbit_id) DO NOTHING
            ",
        )
        .bind(fitbit_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// Re-admit a Failed record for another attempt.
    ///
    /// Returns whether the caller won admission. Synced rows, rows already
    /// Pending under another caller, and rows with `max_attempts` failures
    /// behind them are all left untouched.
    pub async fn mark_retrying(
        &self,
        fitbit_id: &str,
        max_attempts: i64,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r"
            UPDATE sync_records
            SET status = 'pending', last_attempt_at = $2
            WHERE fitbit_id = $1 AND status = 'failed' AND attempt_count < $3
            ",
        )
        .bind(fitbit_id)
        .bind(Utc::now().to_rfc3339())
        .bind(max_attempts)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// Reclaim a Pending record whose attempt was abandoned: the process
    /// crashed (or the cycle aborted on an auth error) after admission but
    /// before an outcome was recorded.
    ///
    /// Only rows whose last attempt started before `stale_before` are
    /// reclaimed, so a Pending row belonging to a live in-flight upload is
    /// never handed out twice.
    pub async fn reclaim_pending(
        &self,
        fitbit_id: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r"
            UPDATE sync_records
            SET last_attempt_at = $2
            WHERE fitbit_id = $1 AND status = 'pending' AND last_attempt_at < $3
            ",
        )
        .bind(fitbit_id)
        .bind(Utc::now().to_rfc3339())
        .bind(stale_before.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a successful upload: Pending/Failed -> Synced.
    ///
    /// Recording the same Strava ID twice is an idempotent no-op; a
    /// different Strava ID for an already-Synced row means something
    /// upstream double-uploaded and is reported as `InvalidTransition`.
    pub async fn record_synced(&self, fitbit_id: &str, strava_id: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r"
            UPDATE sync_records
            SET status = 'synced', strava_id = $2, last_attempt_at = $3, last_error = NULL
            WHERE fitbit_id = $1 AND (status != 'synced' OR strava_id = $2)
            ",
        )
        .bind(fitbit_id)
        .bind(strava_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // The guarded update matched nothing: either the record is missing
        // or it is Synced under a different Strava ID.
        match self.get(fitbit_id).await? {
            None => Err(AppError::InvalidTransition(format!(
                "record_synced for unknown activity {}",
                fitbit_id
            ))),
            Some(record) => Err(AppError::InvalidTransition(format!(
                "activity {} already synced as {:?}, refusing to overwrite with {}",
                fitbit_id, record.strava_id, strava_id
            ))),
        }
    }

    /// Record a failed upload attempt: Pending -> Failed.
    ///
    /// Increments the attempt count and stores the error detail.
    pub async fn record_failed(&self, fitbit_id: &str, error: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r"
            UPDATE sync_records
            SET status = 'failed', attempt_count = attempt_count + 1,
                last_error = $2, last_attempt_at = $3
            WHERE fitbit_id = $1 AND status = 'pending'
            ",
        )
        .bind(fitbit_id)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get(fitbit_id).await? {
            None => Err(AppError::InvalidTransition(format!(
                "record_failed for unknown activity {}",
                fitbit_id
            ))),
            Some(record) => Err(AppError::InvalidTransition(format!(
                "record_failed for activity {} in status {:?}",
                fitbit_id, record.status
            ))),
        }
    }

    // ─── Sync Window ─────────────────────────────────────────────

    /// Read the persisted sync window boundary (upper bound of the range
    /// already scanned). `None` on a fresh ledger.
    pub async fn get_window(&self) -> Result<Option<DateTime<Utc>>, AppError> {
        let row = sqlx::query("SELECT last_checked FROM sync_window WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match row {
            None => Ok(None),
            Some(r) => {
                let ts: i64 = r.get("last_checked");
                let dt = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                    AppError::Database(format!("Bad window timestamp in ledger: {}", ts))
                })?;
                Ok(Some(dt))
            }
        }
    }

    /// Advance the sync window boundary. The boundary never moves
    /// backwards; a stale write is silently ignored.
    pub async fn set_window(&self, t: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r"
            INSERT INTO sync_window (id, last_checked) VALUES (1, $1)
            ON CONFLICT(id) DO UPDATE SET last_checked = excluded.last_checked
            WHERE excluded.last_checked > sync_window.last_checked
            ",
        )
        .bind(t.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }
}
