//! Application configuration loaded from environment variables.
//!
//! All values are read once at startup. A `.env` file is honored for local
//! development via dotenvy.

use std::env;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Sync behavior ---
    /// Seconds between scheduled sync cycles
    pub poll_interval_secs: u64,
    /// Lookback overlap applied to the sync window on every cycle,
    /// guarding against clock skew and late-arriving activities
    pub overlap_secs: i64,
    /// Upload attempts per activity before it is left Failed
    pub max_attempts: i64,

    // --- Storage ---
    /// Path to the JSON credentials file holding OAuth token pairs
    pub credentials_path: String,
    /// Path to the SQLite sync ledger database
    pub database_path: String,

    // --- OAuth applications ---
    /// Fitbit OAuth client ID (public)
    pub fitbit_client_id: String,
    /// Fitbit OAuth client secret
    pub fitbit_client_secret: String,
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// Strava OAuth client secret
    pub strava_client_secret: String,

    // --- HTTP surface ---
    /// Verification code Fitbit sends when confirming the subscriber endpoint
    pub webhook_verify_code: String,
    /// Server port
    pub port: u16,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            poll_interval_secs: 600,
            overlap_secs: 900,
            max_attempts: 5,
            credentials_path: "./credentials.json".to_string(),
            database_path: "./fitsync.db".to_string(),
            fitbit_client_id: "test_fitbit_id".to_string(),
            fitbit_client_secret: "test_fitbit_secret".to_string(),
            strava_client_id: "test_strava_id".to_string(),
            strava_client_secret: "test_strava_secret".to_string(),
            webhook_verify_code: "test_verify_code".to_string(),
            port: 8080,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        Ok(Self {
            poll_interval_secs: env::var("POLL_INTERVAL_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("POLL_INTERVAL_SECS"))?,
            overlap_secs: env::var("OVERLAP_SECS")
                .unwrap_or_else(|_| "900".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("OVERLAP_SECS"))?,
            max_attempts: env::var("MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::Invalid("MAX_ATTEMPTS"))?,

            credentials_path: env::var("CREDENTIALS_PATH")
                .unwrap_or_else(|_| "./credentials.json".to_string()),
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./fitsync.db".to_string()),

            fitbit_client_id: env::var("FITBIT_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_ID"))?,
            fitbit_client_secret: env::var("FITBIT_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_SECRET"))?,
            strava_client_id: env::var("STRAVA_CLIENT_ID")
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_ID"))?,
            strava_client_secret: env::var("STRAVA_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("STRAVA_CLIENT_SECRET"))?,

            webhook_verify_code: env::var("WEBHOOK_VERIFY_CODE")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("WEBHOOK_VERIFY_CODE"))?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        // Set required env vars for test
        env::set_var("FITBIT_CLIENT_ID", "test_fitbit");
        env::set_var("FITBIT_CLIENT_SECRET", "test_fitbit_secret");
        env::set_var("STRAVA_CLIENT_ID", "test_strava");
        env::set_var("STRAVA_CLIENT_SECRET", "test_strava_secret");
        env::set_var("WEBHOOK_VERIFY_CODE", "test_verify");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.fitbit_client_id, "test_fitbit");
        assert_eq!(config.strava_client_id, "test_strava");
        assert_eq!(config.poll_interval_secs, 600);
        assert_eq!(config.overlap_secs, 900);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.port, 8080);
    }
}
