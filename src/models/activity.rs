// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fitbit activity model as fetched from the activity log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of activity as reported by Fitbit.
///
/// Only `Run` is synchronized; everything else is carried through as
/// `Other` so filtering decisions stay visible in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    Run,
    Other(String),
}

impl ActivityKind {
    /// Parse Fitbit's `activityName` field.
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("run") {
            ActivityKind::Run
        } else {
            ActivityKind::Other(name.to_string())
        }
    }

    pub fn is_run(&self) -> bool {
        matches!(self, ActivityKind::Run)
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityKind::Run => write!(f, "Run"),
            ActivityKind::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A single GPS sample from an activity's track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackPoint {
    /// Sample time (UTC)
    pub time: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    /// Elevation in meters, when the device reports it
    pub elevation: Option<f64>,
}

/// An activity record from the Fitbit activity log.
///
/// Immutable once fetched; all downstream components treat it as a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitbitActivity {
    /// Fitbit log ID, unique per account
    pub log_id: String,
    /// Activity kind (only Run is synchronized)
    pub kind: ActivityKind,
    /// Start of the activity (UTC)
    pub start_time: DateTime<Utc>,
    /// Elapsed duration in seconds (> 0)
    pub duration_secs: u64,
    /// Distance in meters (>= 0)
    pub distance_meters: f64,
    /// Ordered GPS track, present for tracker-recorded activities
    pub track: Option<Vec<TrackPoint>>,
}

impl FitbitActivity {
    pub fn has_track(&self) -> bool {
        self.track.as_ref().is_some_and(|t| !t.is_empty())
    }
}
