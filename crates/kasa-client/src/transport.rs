//! # Sync Transport
//!
//! The network seam of the sync engine.
//!
//! The engine talks to a [`SyncTransport`] rather than to reqwest directly,
//! so tests drive full sync cycles against an in-process fake and the HTTP
//! details stay in one place.

use std::future::Future;

use tracing::debug;

use kasa_core::protocol::{SyncBatchRequest, SyncBatchResponse};

use crate::config::SyncConfig;
use crate::error::TransportError;

// =============================================================================
// Trait
// =============================================================================

/// Posts one sync batch and returns the server's verdicts.
///
/// Implementations must bound the call with a timeout; the engine treats any
/// error as a transport-level failure (everything unsynced gets marked failed
/// and retried next cycle).
pub trait SyncTransport: Send + Sync + 'static {
    fn post_batch(
        &self,
        request: &SyncBatchRequest,
    ) -> impl Future<Output = Result<SyncBatchResponse, TransportError>> + Send;
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// The production transport: JSON POST against the server's batch endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Builds a transport from the sync configuration.
    ///
    /// The request timeout is baked into the client, so every batch POST is
    /// bounded without per-call plumbing.
    pub fn new(config: &SyncConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        Ok(HttpTransport {
            client,
            endpoint: config.sync_endpoint(),
        })
    }
}

impl SyncTransport for HttpTransport {
    async fn post_batch(
        &self,
        request: &SyncBatchRequest,
    ) -> Result<SyncBatchResponse, TransportError> {
        debug!(endpoint = %self.endpoint, receipts = request.receipts.len(), "Posting sync batch");

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::Connection(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<SyncBatchResponse>()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
