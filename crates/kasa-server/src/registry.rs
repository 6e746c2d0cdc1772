//! # Company Registry Lookup
//!
//! Client for the external company registry (ARES), consumed as a black box:
//! an 8-digit numeric id resolves to identity/address fields, or to a
//! confirmed "not found".
//!
//! ## Error Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  LookupError::NotFound     - valid lookup, the entity does not exist    │
//! │                              (cacheable: the answer is an answer)       │
//! │  LookupError::Unavailable  - transport failure, nothing learned         │
//! │                              (never cached: retry may succeed)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Successful and not-found outcomes are cached for 24 hours in process;
//! the registry is rate-limited and company data barely changes.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ApiError;

/// How long lookup outcomes stay cached.
pub const REGISTRY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Types
// =============================================================================

/// Identity/address fields resolved from the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyIdentity {
    pub company_id: String,
    pub company_name: String,
    pub vat_id: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub zip: Option<String>,
    pub country_code: Option<String>,
}

/// Lookup failures. `NotFound` is a definitive answer; `Unavailable` is not.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("Company not found")]
    NotFound,

    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

impl From<LookupError> for ApiError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NotFound => ApiError::LookupNotFound,
            LookupError::Unavailable(reason) => ApiError::LookupUnavailable(reason),
        }
    }
}

/// The registry collaborator seam.
///
/// Boxed futures keep the trait object-safe so the app state can hold any
/// implementation (HTTP in production, fakes in tests).
pub trait CompanyRegistry: Send + Sync {
    fn lookup<'a>(
        &'a self,
        company_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CompanyIdentity, LookupError>> + Send + 'a>>;
}

/// Checks the 8-digit numeric id shape, returning the normalized digits.
pub fn normalize_company_id(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    (digits.len() == 8).then_some(digits)
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// Registry client against the ARES REST API.
#[derive(Debug, Clone)]
pub struct HttpCompanyRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCompanyRegistry {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ApiError::Internal(e.to_string()))?;

        Ok(HttpCompanyRegistry {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch(&self, company_id: &str) -> Result<CompanyIdentity, LookupError> {
        let url = format!("{}/{}", self.base_url, company_id);
        debug!(url = %url, "Registry lookup");

        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|err| LookupError::Unavailable(err.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound);
        }
        if !response.status().is_success() {
            return Err(LookupError::Unavailable(format!(
                "registry returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| LookupError::Unavailable(err.to_string()))?;

        parse_identity(company_id, &body).ok_or(LookupError::NotFound)
    }
}

impl CompanyRegistry for HttpCompanyRegistry {
    fn lookup<'a>(
        &'a self,
        company_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CompanyIdentity, LookupError>> + Send + 'a>> {
        Box::pin(self.fetch(company_id))
    }
}

/// Extracts identity fields from the ARES response body.
///
/// A response without a usable company name counts as "not found" - the
/// registry sometimes answers 200 with an empty shell.
fn parse_identity(company_id: &str, body: &Value) -> Option<CompanyIdentity> {
    let company_name = body
        .get("obchodniJmeno")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())?
        .to_string();

    let seat = body.get("sidlo");
    let street = seat
        .and_then(|s| s.get("textovaAdresa"))
        .and_then(Value::as_str)
        .map(|addr| addr.split(',').next().unwrap_or(addr).trim().to_string());

    Some(CompanyIdentity {
        company_id: company_id.to_string(),
        company_name,
        vat_id: json_string(body.get("dic")),
        street,
        city: json_string(seat.and_then(|s| s.get("nazevObce"))),
        zip: json_string(seat.and_then(|s| s.get("psc"))),
        country_code: json_string(seat.and_then(|s| s.get("kodStatu"))),
    })
}

/// Reads a JSON field as a string, accepting numbers (the registry returns
/// postal codes both ways).
fn json_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// Caching Wrapper
// =============================================================================

enum CachedOutcome {
    Found(CompanyIdentity),
    NotFound,
}

struct CacheSlot {
    stored_at: Instant,
    outcome: CachedOutcome,
}

/// 24h in-process cache over any registry implementation.
///
/// Transport failures pass through uncached so the next attempt retries.
pub struct CachedRegistry<R> {
    inner: R,
    ttl: Duration,
    cache: RwLock<HashMap<String, CacheSlot>>,
}

impl<R: CompanyRegistry> CachedRegistry<R> {
    pub fn new(inner: R) -> Self {
        CachedRegistry {
            inner,
            ttl: REGISTRY_CACHE_TTL,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    async fn lookup_cached(&self, company_id: &str) -> Result<CompanyIdentity, LookupError> {
        {
            let cache = self.cache.read().await;
            if let Some(slot) = cache.get(company_id) {
                if slot.stored_at.elapsed() < self.ttl {
                    debug!(company_id, "Registry cache hit");
                    return match &slot.outcome {
                        CachedOutcome::Found(identity) => Ok(identity.clone()),
                        CachedOutcome::NotFound => Err(LookupError::NotFound),
                    };
                }
            }
        }

        match self.inner.lookup(company_id).await {
            Ok(identity) => {
                self.store(company_id, CachedOutcome::Found(identity.clone())).await;
                Ok(identity)
            }
            Err(LookupError::NotFound) => {
                self.store(company_id, CachedOutcome::NotFound).await;
                Err(LookupError::NotFound)
            }
            Err(unavailable) => {
                warn!(company_id, error = %unavailable, "Registry lookup failed");
                Err(unavailable)
            }
        }
    }

    async fn store(&self, company_id: &str, outcome: CachedOutcome) {
        let mut cache = self.cache.write().await;
        cache.insert(
            company_id.to_string(),
            CacheSlot {
                stored_at: Instant::now(),
                outcome,
            },
        );
    }
}

impl<R: CompanyRegistry> CompanyRegistry for CachedRegistry<R> {
    fn lookup<'a>(
        &'a self,
        company_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CompanyIdentity, LookupError>> + Send + 'a>> {
        Box::pin(self.lookup_cached(company_id))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
