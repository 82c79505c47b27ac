//! HTTP client for the third-party data APIs
//!
//! Every request is a GET with a timeout. Rate limiting (429) and transport
//! errors are retried with exponential backoff; authentication failures,
//! missing endpoints, other non-200 statuses and undecodable bodies fail
//! immediately with a classified [`GatewayError`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, TryFromFloatSecsError};

use reqwest::StatusCode;
use serde_json::Value;
use tracing::{debug, error, instrument, trace, warn};

use crate::config::GatewayConfig;

#[derive(Debug)]
pub enum GatewayError {
    /// 401 or 403, the credential was rejected
    Unauthorized { status: u16 },

    /// 404
    NotFound { url: String },

    /// Any other non-200 status
    Server { status: u16, body: String },

    /// 200 but the body is not the JSON we expected
    Malformed(String),

    /// The retry budget was spent on rate limiting or network failures
    MaxRetriesExceeded { attempts: u32, last_error: String },

    /// The request could not be built (bad URL etc.)
    InvalidRequest(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Unauthorized { status } => {
                write!(f, "authentication failed (HTTP {status}), check the API key")
            }
            GatewayError::NotFound { url } => write!(f, "endpoint not found: {url}"),
            GatewayError::Server { status, body } => write!(f, "HTTP {status}: {body}"),
            GatewayError::Malformed(msg) => write!(f, "malformed response: {msg}"),
            GatewayError::MaxRetriesExceeded {
                attempts,
                last_error,
            } => write!(
                f,
                "max retries exceeded after {attempts} attempts: {last_error}"
            ),
            GatewayError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// How often and how patiently to retry
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub retries: u32,

    pub backoff_factor: f64,

    /// Wait before retry `n` is `backoff_unit * backoff_factor^n`
    pub backoff_unit: Duration,
}

impl RetryPolicy {
    /// Fails when the factor yields a negative, NaN or overflowing wait
    pub fn backoff(&self, attempt: u32) -> Result<Duration, TryFromFloatSecsError> {
        Duration::try_from_secs_f64(
            self.backoff_unit.as_secs_f64() * self.backoff_factor.powi(attempt as i32),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for RetryPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            retries: config.retries,
            backoff_factor: config.backoff_factor,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

/// Request counters, shared across clones of the client
#[derive(Debug, Default)]
pub struct GatewayStats {
    pub requests: AtomicU64,
    pub backoffs: AtomicU64,
    pub failures: AtomicU64,
}

/// Shared HTTP client for all data sources
///
/// Cheap to clone; clones share the connection pool and the counters.
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    policy: RetryPolicy,
    stats: Arc<GatewayStats>,
}

impl ApiClient {
    pub fn new(timeout: Duration, policy: RetryPolicy) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            policy,
            stats: Arc::new(GatewayStats::default()),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        Self::new(Duration::from_secs(config.timeout_secs), config.into())
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// GET `url` with `params` and decode the JSON body
    #[instrument(skip(self, params))]
    pub async fn fetch(&self, url: &str, params: &[(&str, String)]) -> Result<Value, GatewayError> {
        let mut attempt = 0;
        let mut last_error = String::new();

        while attempt < self.policy.retries {
            self.stats.requests.fetch_add(1, Ordering::Relaxed);
            trace!(attempt, "requesting {url}");

            match self.client.get(url).query(params).send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt, status = status.as_u16(), "response from {url}");

                    match status {
                        StatusCode::OK => {
                            return response.json::<Value>().await.map_err(|e| {
                                self.fail(GatewayError::Malformed(format!(
                                    "invalid JSON body: {e}"
                                )))
                            });
                        }
                        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                            return Err(self.fail(GatewayError::Unauthorized {
                                status: status.as_u16(),
                            }));
                        }
                        StatusCode::NOT_FOUND => {
                            return Err(self.fail(GatewayError::NotFound {
                                url: url.to_string(),
                            }));
                        }
                        StatusCode::TOO_MANY_REQUESTS => {
                            last_error = "rate limited (HTTP 429)".to_string();
                            warn!(attempt, "rate limited by {url}");
                        }
                        _ => {
                            let body = response.text().await.unwrap_or_default();
                            return Err(self.fail(GatewayError::Server {
                                status: status.as_u16(),
                                body,
                            }));
                        }
                    }
                }
                Err(e) if e.is_builder() => {
                    return Err(self.fail(GatewayError::InvalidRequest(e.to_string())));
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(attempt, "request to {url} failed: {e}");
                }
            }

            attempt += 1;
            if attempt < self.policy.retries {
                let wait = match self.policy.backoff(attempt - 1) {
                    Ok(wait) => wait,
                    Err(e) => {
                        return Err(self.fail(GatewayError::MaxRetriesExceeded {
                            attempts: attempt,
                            last_error: format!("{last_error}; cannot back off: {e}"),
                        }));
                    }
                };
                debug!(attempt, "retrying in {wait:?}");
                self.stats.backoffs.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(wait).await;
            }
        }

        Err(self.fail(GatewayError::MaxRetriesExceeded {
            attempts: attempt,
            last_error,
        }))
    }

    fn fail(&self, err: GatewayError) -> GatewayError {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        error!("request failed: {err}");
        err
    }
}
