//! # Sync Configuration
//!
//! Configuration for the client-side sync engine.
//!
//! Loaded from environment variables with fallback to defaults:
//!
//! | Variable                   | Default                 |
//! |----------------------------|-------------------------|
//! | `KASA_SYNC_URL`            | `http://localhost:3000` |
//! | `KASA_SYNC_INTERVAL_SECS`  | `30`                    |
//! | `KASA_SYNC_TIMEOUT_SECS`   | `10`                    |
//! | `KASA_SYNC_ENABLED`        | `true`                  |
//!
//! There is no backoff setting: failed entries wait for a manual retry
//! trigger, and pending entries for the next scheduled cycle.

use std::env;
use std::time::Duration;

/// Default interval between sync cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on one batch POST.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the server (the batch endpoint path is appended).
    pub server_url: String,

    /// Interval between scheduled sync cycles.
    pub sync_interval: Duration,

    /// Timeout for one batch POST.
    pub request_timeout: Duration,

    /// Master switch; a disabled engine starts and immediately parks.
    pub enabled: bool,
}

impl SyncConfig {
    /// Creates a configuration with defaults for the given server.
    pub fn new(server_url: impl Into<String>) -> Self {
        SyncConfig {
            server_url: server_url.into(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            enabled: true,
        }
    }

    /// Loads configuration from environment variables.
    pub fn from_env() -> Self {
        let server_url =
            env::var("KASA_SYNC_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let sync_interval = env::var("KASA_SYNC_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SYNC_INTERVAL);

        let request_timeout = env::var("KASA_SYNC_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);

        let enabled = env::var("KASA_SYNC_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        SyncConfig {
            server_url,
            sync_interval,
            request_timeout,
            enabled,
        }
    }

    /// Full URL of the batch sync endpoint.
    pub fn sync_endpoint(&self) -> String {
        format!(
            "{}/api/offline-receipts/sync",
            self.server_url.trim_end_matches('/')
        )
    }

    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
