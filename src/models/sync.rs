// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Sync ledger record model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a single activity's journey to Strava.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Admitted for upload, outcome not yet recorded
    Pending,
    /// Uploaded; the Strava activity ID is recorded
    Synced,
    /// Last attempt failed; eligible for retry until attempts run out
    Failed,
}

impl SyncStatus {
    /// Storage representation used in the ledger.
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// One row of the sync ledger, keyed by Fitbit log ID.
///
/// Status only ever moves Pending -> Synced, Pending -> Failed,
/// Failed -> Pending (retry admission) or Failed -> Synced. A Synced row
/// never transitions again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Fitbit log ID (ledger key)
    pub fitbit_id: String,
    pub status: SyncStatus,
    /// Strava activity ID, present iff status is Synced
    pub strava_id: Option<String>,
    /// When the most recent upload attempt started
    pub last_attempt_at: DateTime<Utc>,
    /// Number of upload attempts made so far
    pub attempt_count: i64,
    /// Error detail from the most recent failure, present iff Failed
    pub last_error: Option<String>,
}
