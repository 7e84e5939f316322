//! Resilient HTTP retrieval.
//!
//! [`Fetcher::fetch`] layers, per call:
//!
//! 1. the source's [`CircuitBreaker`] (reject immediately when open),
//! 2. the source's [`Pacer`] (politeness spacing before every attempt),
//! 3. the [`HttpTransport`] request,
//! 4. status and content-size classification,
//! 5. exponential backoff with jitter between attempts.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=retry_jitter)
//! ```
//!
//! Timeouts, connection errors, HTTP 429, HTTP 5xx and undersized bodies are
//! retried. Other non-2xx statuses and undecodable bodies fail at once.

pub mod breaker;
pub mod pacer;
pub mod transport;

pub use breaker::{Admission, BreakerState, CircuitBreaker};
pub use pacer::Pacer;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};

use crate::config::{BreakerConfig, FetcherConfig};
use crate::error::FetchError;
use rand::{Rng, rng};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Content that passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// The URL the content was served from, after any redirects.
    pub url: String,
    pub status: u16,
    pub content: String,
}

/// Per-source resilience state, shared by all workers of that source.
#[derive(Debug)]
struct SourceState {
    breaker: CircuitBreaker,
    pacer: Pacer,
}

/// Outcome of a single attempt.
enum AttemptError {
    Transient(String),
    Permanent { status: Option<u16>, reason: String },
}

/// Retrying, rate-limited, circuit-broken fetcher over an injected transport.
pub struct Fetcher<T> {
    transport: T,
    config: FetcherConfig,
    breaker_config: BreakerConfig,
    sources: Mutex<HashMap<String, Arc<SourceState>>>,
}

impl<T> std::fmt::Debug for Fetcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("max_attempts", &self.config.max_attempts)
            .field("base_delay_ms", &self.config.base_delay_ms)
            .field("failure_threshold", &self.breaker_config.failure_threshold)
            .finish()
    }
}

impl<T: HttpTransport> Fetcher<T> {
    /// Create a fetcher over `transport`.
    ///
    /// # Arguments
    ///
    /// * `transport` - The network seam; [`ReqwestTransport`] in production.
    /// * `config` - Retry, backoff, pacing and content-size settings.
    /// * `breaker_config` - Threshold and cooldown for each source's breaker.
    ///
    /// Per-source breaker and pacer state is created on first use.
    pub fn new(transport: T, config: FetcherConfig, breaker_config: BreakerConfig) -> Self {
        Self {
            transport,
            config,
            breaker_config,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `url` on behalf of `source`.
    ///
    /// Returns [`FetchError::CircuitOpen`] without touching the network when
    /// the source's breaker is open.
    #[instrument(level = "debug", skip_all, fields(%source, %url))]
    pub async fn fetch(&self, source: &str, url: &str) -> Result<FetchedPage, FetchError> {
        let state = self.source_state(source);

        let admission = state.breaker.admit();
        match admission {
            Admission::Rejected { retry_in } => {
                debug!(?retry_in, "Circuit open; skipping request");
                return Err(FetchError::CircuitOpen {
                    source_id: source.to_string(),
                    retry_in,
                });
            }
            Admission::Probe => info!("Cooldown elapsed; sending probe request"),
            Admission::Allowed => {}
        }

        let result = self.fetch_with_retry(&state, url).await;
        match &result {
            Ok(_) => state.breaker.record_success(admission),
            Err(FetchError::Transient { .. }) => {
                if state.breaker.record_failure(admission) {
                    warn!(
                        failures = state.breaker.consecutive_failures(),
                        cooldown_ms = self.breaker_config.cooldown_ms,
                        "Circuit opened for source"
                    );
                }
            }
            Err(_) => state.breaker.record_neutral(admission),
        }
        result
    }

    /// Current breaker state and consecutive failure count for `source`.
    pub fn breaker_status(&self, source: &str) -> (BreakerState, u32) {
        let state = self.source_state(source);
        (state.breaker.state(), state.breaker.consecutive_failures())
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(20) as u32;
        let delay = self
            .config
            .base_delay()
            .saturating_mul(1u32 << shift)
            .min(self.config.max_delay());
        let jitter_ms = if self.config.retry_jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=self.config.retry_jitter_ms)
        };
        delay + Duration::from_millis(jitter_ms)
    }

    fn source_state(&self, source: &str) -> Arc<SourceState> {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        sources
            .entry(source.to_string())
            .or_insert_with(|| {
                Arc::new(SourceState {
                    breaker: CircuitBreaker::new(
                        self.breaker_config.failure_threshold,
                        self.breaker_config.cooldown(),
                    ),
                    pacer: Pacer::new(
                        self.config.request_delay(),
                        Duration::from_millis(self.config.request_delay_jitter_ms),
                    ),
                })
            })
            .clone()
    }

    async fn fetch_with_retry(&self, state: &SourceState, url: &str) -> Result<FetchedPage, FetchError> {
        let max_attempts = self.config.max_attempts.max(1);
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            state.pacer.wait().await;

            let attempt_t0 = Instant::now();
            match self.attempt(url).await {
                Ok(page) => {
                    debug!(
                        attempt,
                        bytes = page.content.len(),
                        elapsed_ms = attempt_t0.elapsed().as_millis() as u64,
                        "Fetch succeeded"
                    );
                    return Ok(page);
                }
                Err(AttemptError::Permanent { status, reason }) => {
                    warn!(attempt, ?status, %reason, "Non-retryable fetch failure");
                    return Err(FetchError::Permanent { status, reason });
                }
                Err(AttemptError::Transient(reason)) => {
                    if attempt >= max_attempts {
                        error!(
                            attempt,
                            max = max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            %reason,
                            "Fetch exhausted retries"
                        );
                        return Err(FetchError::Transient {
                            attempts: attempt,
                            reason,
                        });
                    }

                    let delay = self.backoff_delay(attempt);
                    warn!(
                        attempt,
                        max = max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        %reason,
                        "Fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    async fn attempt(&self, url: &str) -> Result<FetchedPage, AttemptError> {
        let response = self.transport.get(url).await.map_err(|e| {
            if e.is_transient() {
                AttemptError::Transient(e.to_string())
            } else {
                AttemptError::Permanent {
                    status: None,
                    reason: e.to_string(),
                }
            }
        })?;
        classify_response(url, response, self.config.min_content_bytes)
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

fn classify_response(
    url: &str,
    response: HttpResponse,
    min_content_bytes: usize,
) -> Result<FetchedPage, AttemptError> {
    let HttpResponse {
        status,
        body,
        final_url,
    } = response;
    if is_transient_status(status) {
        return Err(AttemptError::Transient(format!("HTTP {status}")));
    }
    if !(200..=299).contains(&status) {
        return Err(AttemptError::Permanent {
            status: Some(status),
            reason: format!("HTTP {status}"),
        });
    }
    if body.len() < min_content_bytes {
        return Err(AttemptError::Transient(format!(
            "content too short: {} bytes (minimum {min_content_bytes})",
            body.len()
        )));
    }
    Ok(FetchedPage {
        url: final_url.unwrap_or_else(|| url.to_string()),
        status,
        content: body,
    })
}
