// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for creating activities.
//!
//! Handles:
//! - Manual activity creation for trackless runs
//! - TCX file upload with status polling for GPS runs
//! - Token refresh when expired
//! - Rate limit and outage detection (for next-cycle retry)

use crate::error::AppError;
use serde::Deserialize;

/// Per-request timeout for Strava calls.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// How many times to poll an upload before giving up for this cycle.
const UPLOAD_POLL_ATTEMPTS: u32 = 10;

/// Delay between upload status polls.
const UPLOAD_POLL_INTERVAL_MS: u64 = 1500;

/// Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

impl StravaClient {
    /// Create a new Strava client with OAuth credentials.
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self::with_base_url(
            client_id,
            client_secret,
            "https://www.strava.com/api/v3".to_string(),
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

    /// Create a manual (trackless) activity.
    pub async fn create_activity(
        &self,
        access_token: &str,
        name: &str,
        sport_type: &str,
        start_date: &str,
        elapsed_secs: u64,
        distance_meters: f64,
    ) -> Result<CreatedActivity, AppError> {
        let url = format!("{}/activities", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .form(&[
                ("name", name),
                ("sport_type", sport_type),
                ("start_date_local", start_date),
                ("elapsed_time", &elapsed_secs.to_string()),
                ("distance", &distance_meters.to_string()),
            ])
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Strava: {}", e)))?;

        check_response_json(response).await
    }

    /// Upload a TCX document. Returns the upload handle to poll.
    pub async fn upload_tcx(
        &self,
        access_token: &str,
        external_id: &str,
        tcx: String,
    ) -> Result<UploadStatus, AppError> {
        let url = format!("{}/uploads", self.base_url);

        let file = reqwest::multipart::Part::text(tcx)
            .file_name(format!("{}.tcx", external_id))
            .mime_str("application/xml")
            .map_err(|e| AppError::Internal(anyhow::anyhow!("TCX part: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .text("data_type", "tcx")
            .text("external_id", external_id.to_string())
            .part("file", file);

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Strava: {}", e)))?;

        check_response_json(response).await
    }

    /// Poll an upload's processing status.
    pub async fn get_upload(
        &self,
        access_token: &str,
        upload_id: u64,
    ) -> Result<UploadStatus, AppError> {
        let url = format!("{}/uploads/{}", self.base_url, upload_id);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(format!("Strava: {}", e)))?;

        check_response_json(response).await
    }

    /// Refresh an expired access token.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenRefresh, AppError> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::UpstreamUnavailable(format!("Strava token refresh: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Strava token refresh failed");
            return Err(AppError::AuthUnavailable(format!(
                "Strava refresh rejected with status {}",
                status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::AuthUnavailable(format!("Strava token response: {}", e)))
    }

}

/// Check response status, mapping failures into the sync error taxonomy.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 {
            return Err(AppError::AuthExpired("strava"));
        }
        if status.as_u16() == 429 {
            tracing::warn!("Strava rate limit hit (429)");
            return Err(AppError::UpstreamUnavailable("strava: rate limited".to_string()));
        }
        if status.is_server_error() {
            return Err(AppError::UpstreamUnavailable(format!(
                "strava: HTTP {}: {}",
                status, body
            )));
        }
        return Err(AppError::UpstreamRejected(format!(
            "strava: HTTP {}: {}",
            status, body
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::UpstreamUnavailable(format!("strava: JSON parse error: {}", e)))
}

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefresh {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

/// Response from manual activity creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedActivity {
    pub id: u64,
}

/// Upload handle/status from the uploads endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadStatus {
    pub id: u64,
    pub status: Option<String>,
    pub error: Option<String>,
    pub activity_id: Option<u64>,
}

/// Extract the existing activity ID from Strava's duplicate-upload error,
/// e.g. `"12345.tcx duplicate of activity 987654321"`.
fn duplicate_activity_id(error: &str) -> Option<u64> {
    let rest = error.split("duplicate of activity").nth(1)?;
    rest.trim().split_whitespace().next()?.parse().ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// StravaUploader - High-level uploader with token management and ledger
// ─────────────────────────────────────────────────────────────────────────────

use crate::db::SyncLedger;
use crate::services::mapper::StravaUpload;
use crate::services::tokens::TokenStore;
use crate::time_utils::format_utc_rfc3339;

/// High-level uploader that submits mapped activities and records the
/// outcome in the sync ledger.
///
/// Retry policy lives in the orchestrator; the uploader itself only
/// retries once after a 401 (with a token refresh in between).
#[derive(Clone)]
pub struct StravaUploader {
    client: StravaClient,
    tokens: TokenStore,
    ledger: SyncLedger,
}

impl StravaUploader {
    pub fn new(client: StravaClient, tokens: TokenStore, ledger: SyncLedger) -> Self {
        Self {
            client,
            tokens,
            ledger,
        }
    }

    /// Submit a mapped activity and record the outcome.
    ///
    /// On success the ledger row moves to Synced with the new Strava ID.
    /// On upload failure the row moves to Failed with the error detail.
    /// Auth failures leave the row Pending and surface immediately so the
    /// orchestrator can abort the cycle.
    pub async fn upload(&self, fitbit_id: &str, upload: &StravaUpload) -> Result<String, AppError> {
        match self.submit(upload).await {
            Ok(strava_id) => {
                self.ledger.record_synced(fitbit_id, &strava_id).await?;
                tracing::info!(fitbit_id, strava_id = %strava_id, "Activity synced to Strava");
                Ok(strava_id)
            }
            Err(e) if e.is_auth_error() => Err(e),
            Err(e) => {
                self.ledger.record_failed(fitbit_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn submit(&self, upload: &StravaUpload) -> Result<String, AppError> {
        let token = self.tokens.strava_access().await?;
        match self.submit_with_token(&token, upload).await {
            Err(AppError::AuthExpired(_)) => {
                let token = self.refresh().await?;
                self.submit_with_token(&token, upload).await
            }
            other => other,
        }
    }

    async fn submit_with_token(
        &self,
        token: &str,
        upload: &StravaUpload,
    ) -> Result<String, AppError> {
        match &upload.tcx {
            Some(tcx) => self.submit_tcx(token, upload, tcx.clone()).await,
            None => {
                let created = self
                    .client
                    .create_activity(
                        token,
                        &upload.name,
                        &upload.sport_type,
                        &format_utc_rfc3339(upload.start_date),
                        upload.elapsed_secs,
                        upload.distance_meters,
                    )
                    .await?;
                Ok(created.id.to_string())
            }
        }
    }

    /// Upload a TCX document and poll until it resolves to an activity.
    ///
    /// Strava deduplicates TCX uploads server-side; a "duplicate of
    /// activity N" error therefore counts as success with ID N, which is
    /// exactly what a crashed previous cycle left behind.
    async fn submit_tcx(
        &self,
        token: &str,
        upload: &StravaUpload,
        tcx: String,
    ) -> Result<String, AppError> {
        let mut status = self
            .client
            .upload_tcx(token, &upload.external_id, tcx)
            .await?;

        for _ in 0..UPLOAD_POLL_ATTEMPTS {
            if let Some(activity_id) = status.activity_id {
                return Ok(activity_id.to_string());
            }
            if let Some(error) = &status.error {
                if let Some(existing) = duplicate_activity_id(error) {
                    tracing::info!(
                        external_id = %upload.external_id,
                        activity_id = existing,
                        "Strava reports duplicate upload, treating as synced"
                    );
                    return Ok(existing.to_string());
                }
                return Err(AppError::UpstreamRejected(format!(
                    "strava upload: {}",
                    error
                )));
            }

            tokio::time::sleep(std::time::Duration::from_millis(UPLOAD_POLL_INTERVAL_MS)).await;
            status = self.client.get_upload(token, status.id).await?;
        }

        Err(AppError::UpstreamUnavailable(format!(
            "strava upload {} still processing",
            status.id
        )))
    }

    /// Refresh the Strava token pair and persist it before returning.
    async fn refresh(&self) -> Result<String, AppError> {
        let refresh_token = self.tokens.strava_refresh().await?;
        tracing::info!("Strava access token expired, refreshing");
        let new = self.client.refresh_token(&refresh_token).await?;
        self.tokens
            .set_strava(new.access_token.clone(), new.refresh_token)
            .await?;
        Ok(new.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_activity_id_extraction() {
        assert_eq!(
            duplicate_activity_id("842178.tcx duplicate of activity 123456789"),
            Some(123456789)
        );
        assert_eq!(duplicate_activity_id("malformed file"), None);
        assert_eq!(duplicate_activity_id("duplicate of activity"), None);
    }
}
