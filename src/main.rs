// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitsync daemon
//!
//! Bridges running activities from Fitbit to Strava: a scheduled sync
//! cycle polls the Fitbit activity log and uploads new runs, while a
//! small HTTP surface accepts Fitbit subscription notifications to
//! trigger cycles immediately.

use fitsync::{
    config::Config,
    db::SyncLedger,
    services::{
        FitbitClient, FitbitReader, StravaClient, StravaUploader, SyncOrchestrator, TokenStore,
    },
    AppState,
};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        poll_interval_secs = config.poll_interval_secs,
        "Starting fitsync"
    );

    // Open the sync ledger
    let ledger = SyncLedger::open(&config.database_path)
        .await
        .expect("Failed to open sync ledger");

    // Load OAuth credentials
    let tokens = TokenStore::load(&config.credentials_path)
        .await
        .expect("Failed to load credentials");

    // Build API services
    let fitbit = FitbitReader::new(
        FitbitClient::new(
            config.fitbit_client_id.clone(),
            config.fitbit_client_secret.clone(),
        ),
        tokens.clone(),
    );
    let uploader = StravaUploader::new(
        StravaClient::new(
            config.strava_client_id.clone(),
            config.strava_client_secret.clone(),
        ),
        tokens,
        ledger.clone(),
    );

    // A pending upload older than one poll interval counts as abandoned
    let orchestrator = Arc::new(SyncOrchestrator::new(
        fitbit,
        uploader,
        ledger,
        config.overlap_secs,
        config.max_attempts,
        config.poll_interval_secs as i64,
    ));

    // Spawn the scheduled sync loop with its webhook nudge channel
    let sync_nudge = Arc::new(Notify::new());
    tokio::spawn(
        orchestrator
            .clone()
            .run_loop(config.poll_interval_secs, sync_nudge.clone()),
    );
    tracing::info!("Sync loop started");

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        sync_nudge,
    });

    // Build router
    let app = fitsync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fitsync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
