// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Webhook routes for Fitbit subscription notifications.

use crate::services::fitbit::verify_webhook_signature;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Webhook routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/fitbit-notifications", get(verify).post(handle_notifications))
}

/// Fitbit subscriber verification query params.
#[derive(Deserialize)]
struct VerifyParams {
    verify: Option<String>,
}

/// Verify the subscriber endpoint (GET).
///
/// Fitbit calls twice during setup: once with the real verification code
/// (expecting 204) and once with a bogus code (expecting 404).
async fn verify(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    match params.verify {
        Some(code) if code == state.config.webhook_verify_code => {
            tracing::info!("Subscriber verification succeeded");
            StatusCode::NO_CONTENT
        }
        _ => {
            tracing::warn!("Subscriber verification failed: code mismatch");
            StatusCode::NOT_FOUND
        }
    }
}

/// One entry of a Fitbit notification batch.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct FitbitNotification {
    collection_type: String,
    owner_type: String,
    #[serde(default)]
    owner_id: Option<String>,
}

/// Handle incoming subscription notifications (POST).
///
/// The body is only trusted after its HMAC signature checks out against
/// our client secret; anything else is rejected outright.
async fn handle_notifications(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let signature = headers
        .get("X-Fitbit-Signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_webhook_signature(&state.config.fitbit_client_secret, &body, signature) {
        tracing::warn!("Rejected notification with bad signature");
        return StatusCode::BAD_REQUEST;
    }

    let notifications: Vec<FitbitNotification> = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse notification body");
            return StatusCode::BAD_REQUEST;
        }
    };

    let mut relevant = 0usize;
    for notification in &notifications {
        if notification.collection_type == "activities" && notification.owner_type == "user" {
            relevant += 1;
            tracing::debug!(
                owner_id = notification.owner_id.as_deref().unwrap_or(""),
                "Activity notification received"
            );
        }
    }

    if relevant > 0 {
        tracing::info!(count = relevant, "Nudging sync after activity notification");
        state.sync_nudge.notify_one();
    }

    // Fitbit expects a quick 204 regardless of how much we cared.
    StatusCode::NO_CONTENT
}
