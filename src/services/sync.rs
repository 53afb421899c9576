// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync orchestration.
//!
//! Runs the cycle that ties everything together:
//! 1. Read the persisted sync window from the ledger
//! 2. Fetch Run activities from Fitbit for [window - overlap, now]
//! 3. Admit each unseen activity through the ledger gate
//! 4. Map and upload admitted activities to Strava
//! 5. Advance the window, but only after a clean fetch pass
//!
//! Cycles never overlap: a mutex serializes timer ticks and webhook
//! nudges. Individual upload failures are isolated; they stay Failed in
//! the ledger and are retried on later cycles until the attempt budget
//! runs out.

use crate::db::SyncLedger;
use crate::error::{AppError, Result};
use crate::models::{FitbitActivity, SyncStatus};
use crate::services::fitbit::FitbitReader;
use crate::services::mapper;
use crate::services::strava::StravaUploader;
use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Lookback used on a fresh ledger with no persisted window.
const INITIAL_LOOKBACK_DAYS: i64 = 7;

/// Phase of the sync cycle, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Mapping,
    Uploading,
}

/// Outcome counts for one cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct CycleSummary {
    /// Run activities returned by the fetch pass
    pub fetched: usize,
    /// Activities newly synced this cycle
    pub synced: usize,
    /// Activities that failed this cycle (retried later if transient)
    pub failed: usize,
    /// Activities skipped (already synced, in flight, or out of retries)
    pub skipped: usize,
}

enum Processed {
    Synced,
    Skipped,
}

/// The control loop coordinating reader, mapper, uploader and ledger.
pub struct SyncOrchestrator {
    fitbit: FitbitReader,
    uploader: StravaUploader,
    ledger: SyncLedger,
    overlap: Duration,
    max_attempts: i64,
    /// Age after which an unresolved Pending row counts as abandoned
    stale_pending: Duration,
    /// Serializes cycle execution; ticks and nudges never overlap
    cycle_lock: Mutex<()>,
}

impl SyncOrchestrator {
    pub fn new(
        fitbit: FitbitReader,
        uploader: StravaUploader,
        ledger: SyncLedger,
        overlap_secs: i64,
        max_attempts: i64,
        stale_pending_secs: i64,
    ) -> Self {
        Self {
            fitbit,
            uploader,
            ledger,
            overlap: Duration::seconds(overlap_secs),
            max_attempts,
            stale_pending: Duration::seconds(stale_pending_secs),
            cycle_lock: Mutex::new(()),
        }
    }

    /// Run one sync cycle.
    ///
    /// Fetch errors and credential problems abort the cycle before the
    /// window advances, so nothing is ever silently skipped; the next
    /// cycle re-fetches the same range and the ledger dedupes.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let _guard = self.cycle_lock.lock().await;

        let now = Utc::now();
        let window_end = self
            .ledger
            .get_window()
            .await?
            .unwrap_or_else(|| now - Duration::days(INITIAL_LOOKBACK_DAYS));
        let fetch_from = window_end - self.overlap;

        tracing::info!(
            phase = ?CyclePhase::Fetching,
            from = %fetch_from,
            to = %now,
            "Starting sync cycle"
        );

        let mut activities = Vec::new();
        {
            let mut stream = self.fitbit.runs_between(fetch_from, now);
            while let Some(item) = stream.next().await {
                activities.push(item?);
            }
        }

        let mut summary = CycleSummary {
            fetched: activities.len(),
            ..Default::default()
        };

        for activity in &activities {
            match self.process_one(activity, now).await {
                Ok(Processed::Synced) => summary.synced += 1,
                Ok(Processed::Skipped) => summary.skipped += 1,
                Err(e) if e.is_auth_error() => {
                    // Admitted rows stay Pending and are reclaimed later.
                    return Err(e);
                }
                Err(AppError::InvalidTransition(msg)) => {
                    summary.failed += 1;
                    tracing::error!(
                        log_id = %activity.log_id,
                        error = %msg,
                        "Ledger invariant violation while recording outcome"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    tracing::warn!(
                        log_id = %activity.log_id,
                        error = %e,
                        retryable = e.is_retryable(),
                        "Activity failed this cycle"
                    );
                }
            }
        }

        // A ledger write failure here aborts the cycle with the window
        // untouched; re-fetching is always safe, skipping is not.
        self.ledger.set_window(now).await?;

        tracing::info!(
            phase = ?CyclePhase::Idle,
            fetched = summary.fetched,
            synced = summary.synced,
            failed = summary.failed,
            skipped = summary.skipped,
            "Sync cycle complete"
        );

        Ok(summary)
    }

    /// Decide whether this cycle gets to upload the activity.
    ///
    /// The ledger's conditional writes are the gate; whoever wins the
    /// write proceeds, everyone else skips.
    async fn admit(&self, log_id: &str, cycle_start: DateTime<Utc>) -> Result<bool> {
        if !self.ledger.has(log_id).await? {
            return self.ledger.record_pending(log_id).await;
        }

        let Some(record) = self.ledger.get(log_id).await? else {
            return Ok(false);
        };

        match record.status {
            SyncStatus::Synced => Ok(false),
            SyncStatus::Failed => {
                let admitted = self.ledger.mark_retrying(log_id, self.max_attempts).await?;
                if !admitted && record.attempt_count >= self.max_attempts {
                    tracing::warn!(
                        log_id,
                        attempts = record.attempt_count,
                        last_error = record.last_error.as_deref().unwrap_or(""),
                        "Retry budget exhausted, leaving activity failed"
                    );
                }
                Ok(admitted)
            }
            SyncStatus::Pending => {
                self.ledger
                    .reclaim_pending(log_id, cycle_start - self.stale_pending)
                    .await
            }
        }
    }

    async fn process_one(
        &self,
        activity: &FitbitActivity,
        cycle_start: DateTime<Utc>,
    ) -> Result<Processed> {
        if !self.admit(&activity.log_id, cycle_start).await? {
            tracing::debug!(log_id = %activity.log_id, "Already handled, skipping");
            return Ok(Processed::Skipped);
        }

        tracing::debug!(
            phase = ?CyclePhase::Mapping,
            log_id = %activity.log_id,
            kind = %activity.kind,
            tracked = activity.has_track(),
            "Mapping activity"
        );
        let upload = match mapper::map_activity(activity) {
            Ok(upload) => upload,
            Err(e) => {
                self.ledger
                    .record_failed(&activity.log_id, &e.to_string())
                    .await?;
                return Err(e);
            }
        };

        tracing::debug!(
            phase = ?CyclePhase::Uploading,
            log_id = %activity.log_id,
            has_tcx = upload.tcx.is_some(),
            "Uploading activity"
        );
        self.uploader.upload(&activity.log_id, &upload).await?;
        Ok(Processed::Synced)
    }

    /// Run cycles forever: on a fixed interval, and immediately when the
    /// webhook nudges. The cycle mutex keeps executions non-overlapping
    /// even when a nudge lands mid-cycle.
    pub async fn run_loop(self: Arc<Self>, poll_interval_secs: u64, nudge: Arc<Notify>) {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(poll_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = nudge.notified() => {
                    tracing::info!("Sync nudge received");
                }
            }

            match self.run_cycle().await {
                Ok(_) => {}
                Err(e) if e.is_auth_error() => {
                    tracing::error!(error = %e, "Sync cycle aborted: credentials need attention");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Sync cycle failed");
                }
            }
        }
    }
}
