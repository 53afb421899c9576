// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Pure mapping from Fitbit activity records to Strava uploads.
//!
//! No I/O and no clock reads; everything the upload needs is derived from
//! the activity record alone, so mapping the same record always produces
//! the same payload.

use crate::error::{AppError, Result};
use crate::models::{FitbitActivity, TrackPoint};
use crate::time_utils::format_utc_rfc3339;
use chrono::{DateTime, Utc};
use std::fmt::Write;

/// Sport type accepted by Strava's activity endpoints.
const STRAVA_SPORT_RUN: &str = "Run";

/// A mapped activity ready for submission to Strava.
#[derive(Debug, Clone, PartialEq)]
pub struct StravaUpload {
    /// Stable external identifier (the Fitbit log ID); Strava uses it to
    /// deduplicate file uploads
    pub external_id: String,
    pub name: String,
    pub sport_type: String,
    /// Start of the activity (UTC)
    pub start_date: DateTime<Utc>,
    pub elapsed_secs: u64,
    pub distance_meters: f64,
    /// Rendered TCX document, present when the activity has a GPS track
    pub tcx: Option<String>,
}

/// Map a Fitbit Run into a Strava upload.
///
/// The only failure mode is a non-Run slipping past the reader's filter;
/// that is checked here defensively rather than assumed away.
pub fn map_activity(activity: &FitbitActivity) -> Result<StravaUpload> {
    if !activity.kind.is_run() {
        return Err(AppError::UnsupportedActivity(activity.kind.to_string()));
    }

    let tcx = activity
        .track
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|track| render_tcx(activity, track));

    Ok(StravaUpload {
        external_id: activity.log_id.clone(),
        name: STRAVA_SPORT_RUN.to_string(),
        sport_type: STRAVA_SPORT_RUN.to_string(),
        start_date: activity.start_time,
        elapsed_secs: activity.duration_secs,
        distance_meters: activity.distance_meters,
        tcx,
    })
}

/// Render a minimal TCX document for a run with a GPS track.
///
/// One Running activity, one lap carrying the totals, one trackpoint per
/// GPS sample.
fn render_tcx(activity: &FitbitActivity, track: &[TrackPoint]) -> String {
    let start = format_utc_rfc3339(activity.start_time);

    let mut doc = String::new();
    doc.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    doc.push_str(
        "<TrainingCenterDatabase xmlns=\"http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2\">\n",
    );
    doc.push_str("  <Activities>\n");
    doc.push_str("    <Activity Sport=\"Running\">\n");
    let _ = writeln!(doc, "      <Id>{}</Id>", start);
    let _ = writeln!(doc, "      <Lap StartTime=\"{}\">", start);
    let _ = writeln!(
        doc,
        "        <TotalTimeSeconds>{}</TotalTimeSeconds>",
        activity.duration_secs
    );
    let _ = writeln!(
        doc,
        "        <DistanceMeters>{}</DistanceMeters>",
        activity.distance_meters
    );
    doc.push_str("        <Track>\n");

    for point in track {
        doc.push_str("          <Trackpoint>\n");
        let _ = writeln!(
            doc,
            "            <Time>{}</Time>",
            format_utc_rfc3339(point.time)
        );
        doc.push_str("            <Position>\n");
        let _ = writeln!(
            doc,
            "              <LatitudeDegrees>{}</LatitudeDegrees>",
            point.latitude
        );
        let _ = writeln!(
            doc,
            "              <LongitudeDegrees>{}</LongitudeDegrees>",
            point.longitude
        );
        doc.push_str("            </Position>\n");
        if let Some(elevation) = point.elevation {
            let _ = writeln!(
                doc,
                "            <AltitudeMeters>{}</AltitudeMeters>",
                elevation
            );
        }
        doc.push_str("          </Trackpoint>\n");
    }

    doc.push_str("        </Track>\n");
    doc.push_str("      </Lap>\n");
    doc.push_str("    </Activity>\n");
    doc.push_str("  </Activities>\n");
    doc.push_str("</TrainingCenterDatabase>\n");
    doc
}
