// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit API client for reading logged activities.
//!
//! Handles:
//! - Activity log listing with pagination, presented as a single lazy stream
//! - TCX download and track extraction for tracker-recorded activities
//! - Token refresh when expired
//! - Subscription webhook signature verification

use crate::error::AppError;
use crate::models::{ActivityKind, FitbitActivity, TrackPoint};
use crate::services::tokens::TokenStore;
use crate::time_utils::format_fitbit_timestamp;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::Sha1;

/// Activities fetched per page of the activity log.
const PAGE_SIZE: usize = 50;

/// Per-request timeout for Fitbit calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl FitbitClient {
    /// Create a new Fitbit client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_base_url(
            client_id,
            client_secret,
            "https://api.fitbit.com".to_string(),
        )
    }

    /// Create a client against an alternate base URL (used by tests).
    pub fn with_base_url(client_id: String, client_secret: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
            base_url,
            client_id,
            client_secret,
        }
    }

    /// Fetch one page of the activity log, oldest first.
    ///
    /// `after` bounds the listing; Fitbit requires `sort=asc` whenever
    /// `afterDate` is used.
    pub async fn list_activities_page(
        &self,
        access_token: &str,
        after: DateTime<Utc>,
        offset: usize,
    ) -> Result<Vec<ActivityLogEntry>, AppError> {
        let url = format!("{}/1/user/-/activities/list.json", self.base_url);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[
                ("afterDate", format_fitbit_timestamp(after)),
                ("sort", "asc".to_string()),
                ("limit", PAGE_SIZE.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Fitbit: {}", e)))?;

        let body: ActivityListResponse = check_response_json("fitbit", response).await?;
        Ok(body.activities)
    }

    /// Download the TCX document for an activity.
    pub async fn get_activity_tcx(
        &self,
        access_token: &str,
        log_id: &str,
    ) -> Result<String, AppError> {
        let url = format!("{}/1/user/-/activities/{}.tcx", self.base_url, log_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Fitbit: {}", e)))?;

        let response = check_response("fitbit", response).await?;
        response
            .text()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Fitbit TCX body: {}", e)))
    }

    /// Refresh an expired access token.
    ///
    /// Fitbit requires HTTP Basic auth with `client_id:client_secret` on
    /// the token endpoint.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefresh, AppError> {
        let basic = base64::engine::general_purpose::URL_SAFE
            .encode(format!("{}:{}", self.client_id, self.client_secret));

        let response = self
            .http
            .post(format!("{}/oauth2/token", self.base_url))
            .header("Authorization", format!("Basic {}", basic))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(format!("Fitbit token refresh: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Fitbit token refresh failed");
            return Err(AppError::AuthUnavailable(format!(
                "Fitbit refresh rejected with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::AuthUnavailable(format!("Fitbit token response: {}", e)))
    }
}

/// Token refresh response from Fitbit.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefresh {
    pub access_token: String,
    pub refresh_token: String,
}

/// Activity log list response.
#[derive(Debug, Deserialize)]
struct ActivityListResponse {
    activities: Vec<ActivityLogEntry>,
}

/// One entry of the Fitbit activity log.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogEntry {
    pub log_id: u64,
    pub activity_name: String,
    /// RFC3339 with the device's UTC offset
    pub start_time: String,
    /// Elapsed duration in milliseconds
    pub duration: u64,
    /// Distance in kilometers; absent for distanceless activities
    pub distance: Option<f64>,
    /// "tracker" for device-recorded activities, "manual" otherwise
    pub log_type: String,
}

impl ActivityLogEntry {
    /// Convert a log entry into the internal activity record.
    ///
    /// Fitbit reports duration in milliseconds and distance in kilometers;
    /// the internal record uses seconds and meters. Both conversions are
    /// exact to the source's own resolution.
    pub fn into_activity(self, track: Option<Vec<TrackPoint>>) -> Result<FitbitActivity, AppError> {
        let start_time = DateTime::parse_from_rfc3339(&self.start_time)
            .map_err(|e| {
                AppError::UpstreamRejected(format!(
                    "Fitbit activity {} has unparseable startTime {:?}: {}",
                    self.log_id, self.start_time, e
                ))
            })?
            .with_timezone(&Utc);

        Ok(FitbitActivity {
            log_id: self.log_id.to_string(),
            kind: ActivityKind::from_name(&self.activity_name),
            start_time,
            duration_secs: (self.duration + 500) / 1000,
            distance_meters: self.distance.unwrap_or(0.0) * 1000.0,
            track,
        })
    }

    pub fn is_tracker_logged(&self) -> bool {
        self.log_type == "tracker"
    }
}

// ─── Response checking ───────────────────────────────────────────────────────

/// Map an HTTP status to the sync error taxonomy.
///
/// 401 means the token was rejected (refresh, then retry once); 429 and
/// 5xx are transient; any other 4xx means the request itself is bad.
async fn check_response(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    if status.as_u16() == 401 {
        return Err(AppError::AuthExpired(service));
    }
    if status.as_u16() == 429 {
        tracing::warn!(service, "Rate limit hit (429)");
        return Err(AppError::UpstreamUnavailable(format!(
            "{}: rate limited",
            service
        )));
    }
    if status.is_server_error() {
        return Err(AppError::UpstreamUnavailable(format!(
            "{}: HTTP {}: {}",
            service, status, body
        )));
    }

    Err(AppError::UpstreamRejected(format!(
        "{}: HTTP {}: {}",
        service, status, body
    )))
}

/// Check response status and parse the JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    service: &'static str,
    response: reqwest::Response,
) -> Result<T, AppError> {
    let response = check_response(service, response).await?;
    response
        .json()
        .await
        .map_err(|e| AppError::UpstreamUnavailable(format!("{}: JSON parse error: {}", service, e)))
}

// ─── TCX track extraction ────────────────────────────────────────────────────

/// Extract GPS trackpoints from a TCX document.
///
/// TCX is a fixed Garmin schema; the fields we need (`Time`,
/// `LatitudeDegrees`, `LongitudeDegrees`, `AltitudeMeters`) appear as
/// simple text elements inside each `<Trackpoint>`. Trackpoints without a
/// position (for example heart-rate-only samples) are skipped.
pub fn parse_tcx_track(tcx: &str) -> Vec<TrackPoint> {
    let mut points = Vec::new();
    let mut rest = tcx;

    while let Some(start) = rest.find("<Trackpoint>") {
        let after_open = &rest[start + "<Trackpoint>".len()..];
        let Some(end) = after_open.find("</Trackpoint>") else {
            break;
        };
        let body = &after_open[..end];

        if let (Some(time), Some(lat), Some(lon)) = (
            tag_text(body, "Time"),
            tag_text(body, "LatitudeDegrees"),
            tag_text(body, "LongitudeDegrees"),
        ) {
            if let (Ok(time), Ok(latitude), Ok(longitude)) = (
                DateTime::parse_from_rfc3339(time),
                lat.parse::<f64>(),
                lon.parse::<f64>(),
            ) {
                points.push(TrackPoint {
                    time: time.with_timezone(&Utc),
                    latitude,
                    longitude,
                    elevation: tag_text(body, "AltitudeMeters").and_then(|v| v.parse().ok()),
                });
            }
        }

        rest = &after_open[end + "</Trackpoint>".len()..];
    }

    points
}

/// Text content of the first `<tag>...</tag>` in `body`.
fn tag_text<'a>(body: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = body.find(&open)? + open.len();
    let end = body[start..].find(&close)? + start;
    Some(body[start..end].trim())
}

// ─── Webhook signature verification ──────────────────────────────────────────

/// Verify the `X-Fitbit-Signature` header of a subscription notification.
///
/// Fitbit signs the raw request body with HMAC-SHA1 keyed by
/// `client_secret + "&"` and sends the base64 digest. See the subscriber
/// security section of the Fitbit developer guide.
pub fn verify_webhook_signature(client_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature) else {
        return false;
    };

    let key = format!("{}&", client_secret);
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// FitbitReader - High-level reader with token management
// ─────────────────────────────────────────────────────────────────────────────

use async_stream::try_stream;
use futures_util::Stream;
use std::pin::Pin;

/// Stream of Run activities, ordered by start time ascending.
pub type RunStream<'a> =
    Pin<Box<dyn Stream<Item = Result<FitbitActivity, AppError>> + Send + 'a>>;

/// High-level Fitbit reader that manages token lifecycle and pagination.
///
/// Every API call retries exactly once after a 401, refreshing the token
/// through the shared store first; a second rejection surfaces as an auth
/// error for the orchestrator to abort on.
#[derive(Clone)]
pub struct FitbitReader {
    client: FitbitClient,
    tokens: TokenStore,
}

impl FitbitReader {
    pub fn new(client: FitbitClient, tokens: TokenStore) -> Self {
        Self { client, tokens }
    }

    /// Lazily stream Run activities with start time in `[t0, t1]`.
    ///
    /// Pages are fetched on demand; tracker-recorded runs get their TCX
    /// downloaded and parsed into a GPS track. The stream is restartable:
    /// a fresh call starts over from `t0`.
    pub fn runs_between(&self, t0: DateTime<Utc>, t1: DateTime<Utc>) -> RunStream<'_> {
        Box::pin(try_stream! {
            let mut offset = 0usize;

            'pages: loop {
                let page = self.list_page_authed(t0, offset).await?;
                let page_len = page.len();

                for entry in page {
                    let log_id = entry.log_id;
                    let kind = ActivityKind::from_name(&entry.activity_name);
                    if !kind.is_run() {
                        tracing::debug!(log_id, kind = %kind, "Skipping non-run activity");
                        continue;
                    }

                    let track = if entry.is_tracker_logged() {
                        let tcx = self.tcx_authed(&log_id.to_string()).await?;
                        let points = parse_tcx_track(&tcx);
                        if points.is_empty() { None } else { Some(points) }
                    } else {
                        None
                    };

                    let activity = entry.into_activity(track)?;
                    if activity.start_time < t0 {
                        continue;
                    }
                    if activity.start_time > t1 {
                        // Ascending order: everything after this is newer still.
                        break 'pages;
                    }

                    yield activity;
                }

                if page_len < PAGE_SIZE {
                    break;
                }
                offset += page_len;
            }
        })
    }

    async fn list_page_authed(
        &self,
        after: DateTime<Utc>,
        offset: usize,
    ) -> Result<Vec<ActivityLogEntry>, AppError> {
        let token = self.tokens.fitbit_access().await?;
        match self.client.list_activities_page(&token, after, offset).await {
            Err(AppError::AuthExpired(_)) => {
                let token = self.refresh().await?;
                self.client.list_activities_page(&token, after, offset).await
            }
            other => other,
        }
    }

    async fn tcx_authed(&self, log_id: &str) -> Result<String, AppError> {
        let token = self.tokens.fitbit_access().await?;
        match self.client.get_activity_tcx(&token, log_id).await {
            Err(AppError::AuthExpired(_)) => {
                let token = self.refresh().await?;
                self.client.get_activity_tcx(&token, log_id).await
            }
            other => other,
        }
    }

    /// Refresh the Fitbit token pair and persist it before returning.
    async fn refresh(&self) -> Result<String, AppError> {
        let refresh_token = self.tokens.fitbit_refresh().await?;
        tracing::info!("Fitbit access token expired, refreshing");
        let new = self.client.refresh_token(&refresh_token).await?;
        self.tokens
            .set_fitbit(new.access_token.clone(), new.refresh_token)
            .await?;
        Ok(new.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TCX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase>
  <Activities>
    <Activity Sport="Running">
      <Id>2024-01-01T08:00:00Z</Id>
      <Lap StartTime="2024-01-01T08:00:00Z">
        <Track>
          <Trackpoint>
            <Time>2024-01-01T08:00:00Z</Time>
            <Position>
              <LatitudeDegrees>37.4219</LatitudeDegrees>
              <LongitudeDegrees>-122.0841</LongitudeDegrees>
            </Position>
            <AltitudeMeters>12.5</AltitudeMeters>
          </Trackpoint>
          <Trackpoint>
            <Time>2024-01-01T08:00:05Z</Time>
            <HeartRateBpm><Value>140</Value></HeartRateBpm>
          </Trackpoint>
          <Trackpoint>
            <Time>2024-01-01T08:00:10Z</Time>
            <Position>
              <LatitudeDegrees>37.4220</LatitudeDegrees>
              <LongitudeDegrees>-122.0843</LongitudeDegrees>
            </Position>
          </Trackpoint>
        </Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#;

    #[test]
    fn test_parse_tcx_track_extracts_positioned_points() {
        let points = parse_tcx_track(SAMPLE_TCX);
        // The heart-rate-only trackpoint has no position and is skipped.
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].latitude, 37.4219);
        assert_eq!(points[0].longitude, -122.0841);
        assert_eq!(points[0].elevation, Some(12.5));
        assert_eq!(points[1].elevation, None);
        assert!(points[1].time > points[0].time);
    }

    #[test]
    fn test_parse_tcx_track_empty_document() {
        assert!(parse_tcx_track("<TrainingCenterDatabase/>").is_empty());
    }

    #[test]
    fn test_log_entry_conversion_units() {
        let entry = ActivityLogEntry {
            log_id: 42,
            activity_name: "Run".to_string(),
            start_time: "2024-01-01T08:00:00.000+00:00".to_string(),
            duration: 1_800_000,
            distance: Some(5.0),
            log_type: "tracker".to_string(),
        };

        let activity = entry.into_activity(None).expect("should convert");
        assert_eq!(activity.log_id, "42");
        assert!(activity.kind.is_run());
        assert_eq!(activity.duration_secs, 1800);
        assert_eq!(activity.distance_meters, 5000.0);
        assert_eq!(activity.start_time.to_rfc3339(), "2024-01-01T08:00:00+00:00");
    }

    #[test]
    fn test_log_entry_conversion_rejects_bad_timestamp() {
        let entry = ActivityLogEntry {
            log_id: 43,
            activity_name: "Run".to_string(),
            start_time: "yesterday-ish".to_string(),
            duration: 1000,
            distance: None,
            log_type: "manual".to_string(),
        };
        assert!(entry.into_activity(None).is_err());
    }

    #[test]
    fn test_webhook_signature_roundtrip() {
        let secret = "app_secret";
        let body = br#"[{"collectionType":"activities","ownerId":"ABC123","ownerType":"user"}]"#;

        let key = format!("{}&", secret);
        let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(body);
        let signature =
            base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        assert!(verify_webhook_signature(secret, body, &signature));
        assert!(!verify_webhook_signature("wrong_secret", body, &signature));
        assert!(!verify_webhook_signature(secret, b"tampered body", &signature));
        assert!(!verify_webhook_signature(secret, body, "not-base64!!"));
    }
}
