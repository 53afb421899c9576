// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod sync;

pub use activity::{ActivityKind, FitbitActivity, TrackPoint};
pub use sync::{SyncRecord, SyncStatus};
