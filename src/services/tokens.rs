// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Persistent OAuth token store.
//!
//! Holds the Fitbit and Strava token pairs in a JSON credentials file and
//! rewrites it whenever a refresh produces new tokens, so a restart never
//! comes up with stale credentials. The OAuth authorization flows that
//! mint the initial tokens live outside this service; the file is seeded
//! by the operator.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// An access/refresh token pair for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// On-disk credentials file layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialsFile {
    fitbit: TokenPair,
    strava: TokenPair,
}

/// Shared token store backed by a JSON credentials file.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
    inner: Arc<Mutex<CredentialsFile>>,
}

impl TokenStore {
    /// Load the credentials file from disk.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            AppError::AuthUnavailable(format!(
                "Cannot read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        let creds: CredentialsFile = serde_json::from_str(&raw).map_err(|e| {
            AppError::AuthUnavailable(format!(
                "Cannot parse credentials file {}: {}",
                path.display(),
                e
            ))
        })?;

        tracing::info!(path = %path.display(), "Credentials loaded");

        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(creds)),
        })
    }

    /// Current Fitbit access token.
    pub async fn fitbit_access(&self) -> Result<String, AppError> {
        Ok(self.inner.lock().await.fitbit.access_token.clone())
    }

    /// Current Fitbit refresh token.
    pub async fn fitbit_refresh(&self) -> Result<String, AppError> {
        Ok(self.inner.lock().await.fitbit.refresh_token.clone())
    }

    /// Current Strava access token.
    pub async fn strava_access(&self) -> Result<String, AppError> {
        Ok(self.inner.lock().await.strava.access_token.clone())
    }

    /// Current Strava refresh token.
    pub async fn strava_refresh(&self) -> Result<String, AppError> {
        Ok(self.inner.lock().await.strava.refresh_token.clone())
    }

    /// Store a refreshed Fitbit token pair, persisting before returning.
    pub async fn set_fitbit(&self, access: String, refresh: String) -> Result<(), AppError> {
        let mut creds = self.inner.lock().await;
        creds.fitbit = TokenPair {
            access_token: access,
            refresh_token: refresh,
        };
        self.persist(&creds).await
    }

    /// Store a refreshed Strava token pair, persisting before returning.
    pub async fn set_strava(&self, access: String, refresh: String) -> Result<(), AppError> {
        let mut creds = self.inner.lock().await;
        creds.strava = TokenPair {
            access_token: access,
            refresh_token: refresh,
        };
        self.persist(&creds).await
    }

    /// Write the credentials file atomically (write-then-rename).
    async fn persist(&self, creds: &CredentialsFile) -> Result<(), AppError> {
        let body = serde_json::to_string_pretty(creds)
            .map_err(|e| AppError::AuthUnavailable(format!("Cannot serialize credentials: {}", e)))?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(|e| {
            AppError::AuthUnavailable(format!("Cannot write credentials file: {}", e))
        })?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            AppError::AuthUnavailable(format!("Cannot replace credentials file: {}", e))
        })?;

        tracing::debug!(path = %self.path.display(), "Credentials persisted");
        Ok(())
    }
}
