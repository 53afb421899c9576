// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod fitbit;
pub mod mapper;
pub mod strava;
pub mod sync;
pub mod tokens;

pub use fitbit::{FitbitClient, FitbitReader};
pub use mapper::StravaUpload;
pub use strava::{StravaClient, StravaUploader};
pub use sync::{CycleSummary, SyncOrchestrator};
pub use tokens::TokenStore;
