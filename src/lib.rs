// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fitsync: one-way Fitbit to Strava run synchronization
//!
//! This crate polls the Fitbit activity log for new runs, maps them to
//! Strava uploads, and records every outcome in a durable sync ledger so
//! an activity is never uploaded twice, even across restarts.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// Wakes the orchestrator for an immediate cycle (webhook-driven)
    pub sync_nudge: Arc<Notify>,
}
