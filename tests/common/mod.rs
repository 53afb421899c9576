// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared test helpers: a temp-file ledger, a credentials file, and
//! in-process mock Fitbit/Strava servers the real HTTP clients talk to.

// Each integration test binary compiles this module and uses a subset.
#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{Form, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, Utc};
use fitsync::db::SyncLedger;
use fitsync::services::{
    FitbitClient, FitbitReader, StravaClient, StravaUploader, SyncOrchestrator, TokenStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Open a ledger on a fresh temp file. Keep the TempDir alive.
#[allow(dead_code)]
pub async fn temp_ledger() -> (SyncLedger, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.db");
    let ledger = SyncLedger::open(&path).await.expect("open ledger");
    (ledger, dir)
}

/// Write a credentials file and load a token store from it.
#[allow(dead_code)]
pub async fn temp_token_store(dir: &TempDir) -> TokenStore {
    let path = dir.path().join("credentials.json");
    let body = json!({
        "fitbit": {"access_token": "fb_access", "refresh_token": "fb_refresh"},
        "strava": {"access_token": "st_access", "refresh_token": "st_refresh"}
    })
    .to_string();
    tokio::fs::write(&path, body).await.expect("write creds");
    TokenStore::load(&path).await.expect("load creds")
}

// ─── Mock Fitbit ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FitbitState {
    /// Activity log entries, oldest first, as raw JSON values
    pub activities: Mutex<Vec<Value>>,
    /// TCX documents by log ID
    pub tcx: Mutex<HashMap<String, String>>,
    /// Respond 500 to listing requests
    pub fail_listing: AtomicBool,
    /// Respond 401 to all API requests
    pub unauthorized: AtomicBool,
}

async fn fitbit_list(
    State(state): State<Arc<FitbitState>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if state.unauthorized.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"errors": []}))).into_response();
    }
    if state.fail_listing.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"errors": []})),
        )
            .into_response();
    }

    let offset: usize = params
        .get("offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(50);

    let activities = state.activities.lock().unwrap();
    let page: Vec<Value> = activities.iter().skip(offset).take(limit).cloned().collect();
    Json(json!({ "activities": page })).into_response()
}

async fn fitbit_tcx(
    State(state): State<Arc<FitbitState>>,
    Path(file): Path<String>,
) -> impl IntoResponse {
    if state.unauthorized.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, String::new()).into_response();
    }

    let log_id = file.trim_end_matches(".tcx");
    match state.tcx.lock().unwrap().get(log_id) {
        Some(doc) => (StatusCode::OK, doc.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, String::new()).into_response(),
    }
}

async fn fitbit_token() -> impl IntoResponse {
    // Refresh always fails in tests; auth problems should abort cycles.
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"errors": [{"errorType": "invalid_grant"}]})),
    )
}

pub fn fitbit_router(state: Arc<FitbitState>) -> Router {
    Router::new()
        .route("/1/user/-/activities/list.json", get(fitbit_list))
        .route("/1/user/-/activities/{file}", get(fitbit_tcx))
        .route("/oauth2/token", post(fitbit_token))
        .with_state(state)
}

// ─── Mock Strava ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StravaState {
    /// Form fields of every manual activity creation received
    pub created: Mutex<Vec<HashMap<String, String>>>,
    /// Raw bodies of every TCX upload received
    pub tcx_uploads: Mutex<Vec<String>>,
    /// Next activity ID to hand out
    pub next_id: AtomicU64,
    /// Reject manual creations whose distance field equals this string
    pub reject_distance: Mutex<Option<String>>,
}

async fn strava_create(
    State(state): State<Arc<StravaState>>,
    Form(fields): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let reject = state.reject_distance.lock().unwrap().clone();
    if let (Some(marker), Some(distance)) = (reject, fields.get("distance")) {
        if *distance == marker {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({"message": "Bad Request", "errors": [{"field": "distance"}]})),
            )
                .into_response();
        }
    }

    let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    state.created.lock().unwrap().push(fields);
    Json(json!({ "id": id })).into_response()
}

async fn strava_upload(
    State(state): State<Arc<StravaState>>,
    body: Bytes,
) -> impl IntoResponse {
    let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
    state
        .tcx_uploads
        .lock()
        .unwrap()
        .push(String::from_utf8_lossy(&body).to_string());
    // Resolve immediately; no processing delay in tests.
    Json(json!({
        "id": id,
        "status": "Your activity is ready.",
        "error": null,
        "activity_id": id
    }))
    .into_response()
}

async fn strava_token() -> impl IntoResponse {
    (StatusCode::BAD_REQUEST, Json(json!({"message": "Bad Request"})))
}

pub fn strava_router(state: Arc<StravaState>) -> Router {
    Router::new()
        .route("/activities", post(strava_create))
        .route("/uploads", post(strava_upload))
        .route("/oauth/token", post(strava_token))
        .with_state(state)
}

// ─── Harness ─────────────────────────────────────────────────────────────────

/// Bind a router on a random local port and serve it in the background.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{}", addr)
}

/// Fully wired orchestrator talking to mock upstreams over real HTTP.
#[allow(dead_code)]
pub struct Harness {
    pub orchestrator: SyncOrchestrator,
    pub ledger: SyncLedger,
    pub fitbit: Arc<FitbitState>,
    pub strava: Arc<StravaState>,
    _tmp: TempDir,
}

#[allow(dead_code)]
pub async fn harness(max_attempts: i64, stale_pending_secs: i64) -> Harness {
    let fitbit_state = Arc::new(FitbitState::default());
    let strava_state = Arc::new(StravaState::default());

    let fitbit_url = spawn_server(fitbit_router(fitbit_state.clone())).await;
    let strava_url = spawn_server(strava_router(strava_state.clone())).await;

    let dir = tempfile::tempdir().expect("tempdir");
    let ledger = SyncLedger::open(dir.path().join("ledger.db"))
        .await
        .expect("open ledger");
    let tokens = temp_token_store(&dir).await;

    let reader = FitbitReader::new(
        FitbitClient::with_base_url("fb_id".to_string(), "fb_secret".to_string(), fitbit_url),
        tokens.clone(),
    );
    let uploader = StravaUploader::new(
        StravaClient::with_base_url("st_id".to_string(), "st_secret".to_string(), strava_url),
        tokens,
        ledger.clone(),
    );

    let orchestrator = SyncOrchestrator::new(
        reader,
        uploader,
        ledger.clone(),
        900,
        max_attempts,
        stale_pending_secs,
    );

    Harness {
        orchestrator,
        ledger,
        fitbit: fitbit_state,
        strava: strava_state,
        _tmp: dir,
    }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// A manual (trackless) activity log entry starting `hours_ago`.
#[allow(dead_code)]
pub fn manual_activity(log_id: u64, name: &str, hours_ago: i64, distance_km: f64) -> Value {
    json!({
        "logId": log_id,
        "activityName": name,
        "startTime": (Utc::now() - Duration::hours(hours_ago)).to_rfc3339(),
        "duration": 1_800_000u64,
        "distance": distance_km,
        "logType": "manual"
    })
}

/// A tracker-recorded activity log entry; pair with a TCX doc in state.
#[allow(dead_code)]
pub fn tracker_activity(log_id: u64, name: &str, hours_ago: i64, distance_km: f64) -> Value {
    let mut value = manual_activity(log_id, name, hours_ago, distance_km);
    value["logType"] = json!("tracker");
    value
}

/// A minimal TCX document with one positioned trackpoint.
#[allow(dead_code)]
pub fn sample_tcx() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase>
  <Activities>
    <Activity Sport="Running">
      <Lap>
        <Track>
          <Trackpoint>
            <Time>2024-01-01T08:00:00Z</Time>
            <Position>
              <LatitudeDegrees>37.4219</LatitudeDegrees>
              <LongitudeDegrees>-122.0841</LongitudeDegrees>
            </Position>
            <AltitudeMeters>12.5</AltitudeMeters>
          </Trackpoint>
        </Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#
        .to_string()
}
