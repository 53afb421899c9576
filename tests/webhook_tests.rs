// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Integration tests for the Fitbit notification webhook.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use base64::Engine;
use fitsync::config::Config;
use fitsync::routes::create_router;
use fitsync::AppState;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

/// Create a test app; returns the router and the nudge channel.
fn create_test_app() -> (axum::Router, Arc<Notify>) {
    let sync_nudge = Arc::new(Notify::new());
    let state = Arc::new(AppState {
        config: Config::default(),
        sync_nudge: sync_nudge.clone(),
    });
    (create_router(state), sync_nudge)
}

/// Sign a body the way Fitbit does: HMAC-SHA1 over the raw bytes, keyed
/// by `client_secret + "&"`, base64 encoded.
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha1>::new_from_slice(format!("{}&", secret).as_bytes()).unwrap();
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

#[tokio::test]
async fn test_subscriber_verification_accepts_configured_code() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/fitbit-notifications?verify=test_verify_code")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_subscriber_verification_rejects_other_codes() {
    let (app, _) = create_test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/fitbit-notifications?verify=wrong_code")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Missing code entirely is also a 404.
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/fitbit-notifications")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_signed_activity_notification_nudges_sync() {
    let (app, nudge) = create_test_app();

    let body =
        br#"[{"collectionType":"activities","ownerId":"ABC123","ownerType":"user","subscriptionId":"1"}]"#;
    let signature = sign("test_fitbit_secret", body);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fitbit-notifications")
                .header("X-Fitbit-Signature", signature)
                .body(Body::from(body.as_slice()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The orchestrator wake-up was queued.
    tokio::time::timeout(Duration::from_millis(50), nudge.notified())
        .await
        .expect("nudge should be queued");
}

#[tokio::test]
async fn test_bad_signature_is_rejected_without_nudge() {
    let (app, nudge) = create_test_app();

    let body = br#"[{"collectionType":"activities","ownerId":"X","ownerType":"user"}]"#;

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fitbit-notifications")
                .header("X-Fitbit-Signature", "AAAAAAAAAAAAAAAAAAAAAAAAAAA=")
                .body(Body::from(body.as_slice()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let nudged = tokio::time::timeout(Duration::from_millis(50), nudge.notified()).await;
    assert!(nudged.is_err(), "bad signature must not trigger a sync");
}

#[tokio::test]
async fn test_non_activity_notification_does_not_nudge() {
    let (app, nudge) = create_test_app();

    let body = br#"[{"collectionType":"sleep","ownerId":"ABC123","ownerType":"user"}]"#;
    let signature = sign("test_fitbit_secret", body);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/fitbit-notifications")
                .header("X-Fitbit-Signature", signature)
                .body(Body::from(body.as_slice()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let nudged = tokio::time::timeout(Duration::from_millis(50), nudge.notified()).await;
    assert!(nudged.is_err(), "sleep notifications are not our business");
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
