//! Wraps one logical API call with key acquisition, quota reservation,
//! retry/backoff, and failover across the scoped pool.
//!
//! Every call path terminates in either a decoded response body or a typed
//! [`FetchError`]; nothing is silently dropped. Within one dispatch the
//! attempts are strictly sequential, and each attempt consumes quota on
//! exactly one credential.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Sleeper;
use crate::config::ApiConfig;
use crate::credentials::CredentialPool;
use crate::error::FetchError;
use crate::health::HealthMonitor;
use crate::http_client::{HttpAuth, HttpClient, HttpRequest};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryConfig;
use crate::Scope;

/// Transport-agnostic request: a GraphQL document to run against the
/// upstream API. Credential material is attached by the dispatcher, never
/// by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    query: String,
}

impl ApiRequest {
    pub fn graphql(query: impl Into<String>) -> Result<Self, FetchError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(FetchError::InvalidRequest {
                reason: String::from("query must not be empty"),
            });
        }
        Ok(Self { query })
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

enum AttemptFailure {
    Throttled,
    Unavailable,
    Transport(String),
}

/// Executes logical API calls against the scoped credential pool.
pub struct FetchDispatcher {
    pool: Arc<CredentialPool>,
    limiter: Arc<RateLimiter>,
    health: Arc<HealthMonitor>,
    transport: Arc<dyn HttpClient>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryConfig,
    graphql_url: String,
    timeout_ms: u64,
}

impl FetchDispatcher {
    pub fn new(
        config: &ApiConfig,
        pool: Arc<CredentialPool>,
        limiter: Arc<RateLimiter>,
        health: Arc<HealthMonitor>,
        transport: Arc<dyn HttpClient>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            pool,
            limiter,
            health,
            transport,
            sleeper,
            retry: config.retry.clone(),
            graphql_url: format!("{}/graphql", config.base_url.trim_end_matches('/')),
            timeout_ms: config.request_timeout.as_millis() as u64,
        }
    }

    /// Run one logical call, retrying transient faults internally up to the
    /// attempt cap. Returns the raw response body on success.
    pub async fn execute(&self, scope: Scope, request: &ApiRequest) -> Result<String, FetchError> {
        let request_id = Uuid::new_v4();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_failure = AttemptFailure::Unavailable;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_for_attempt(attempt - 2);
                debug!(
                    %request_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "backing off before retry"
                );
                self.sleeper.sleep(delay).await;
            }

            // Walk the ranked candidates until one has quota headroom. The
            // walk is bounded by the scope's credential list; there is no
            // indefinite looping here.
            let ranked = self.pool.ranked(scope)?;
            let Some(credential) = ranked
                .into_iter()
                .find(|candidate| self.limiter.check_and_reserve(candidate.id()))
            else {
                return Err(FetchError::QuotaExhausted(scope));
            };

            let url = format!(
                "{}?query={}",
                self.graphql_url,
                urlencoding::encode(request.query())
            );
            let http = HttpRequest::get(url)
                .with_timeout_ms(self.timeout_ms)
                .with_auth(&HttpAuth::api_key(credential.secret()));

            match self.transport.execute(http).await {
                Ok(response) if response.is_success() => {
                    debug!(
                        %request_id,
                        attempt,
                        credential = %credential.id(),
                        "dispatch succeeded"
                    );
                    return Ok(response.body);
                }
                Ok(response) => match response.status {
                    429 => {
                        // Upstream backpressure is a key-specific signal.
                        warn!(
                            %request_id,
                            attempt,
                            credential = %credential.id(),
                            "upstream throttled this key"
                        );
                        self.health.mark_unhealthy(credential.id(), "rate limited");
                        last_failure = AttemptFailure::Throttled;
                    }
                    status @ 400..=499 => {
                        // Retrying cannot fix a malformed request.
                        return Err(FetchError::InvalidRequest {
                            reason: format!("upstream rejected the request with status {status}"),
                        });
                    }
                    status => {
                        // 503 and other upstream faults are not key faults;
                        // keep the credential in rotation.
                        warn!(%request_id, attempt, status, "upstream unavailable");
                        last_failure = AttemptFailure::Unavailable;
                    }
                },
                Err(error) => {
                    warn!(
                        %request_id,
                        attempt,
                        credential = %credential.id(),
                        error = %error,
                        "transport failure"
                    );
                    self.health
                        .mark_unhealthy(credential.id(), error.message().to_string());
                    last_failure = AttemptFailure::Transport(error.message().to_string());
                }
            }
        }

        Err(match last_failure {
            AttemptFailure::Throttled => FetchError::UpstreamThrottled {
                attempts: max_attempts,
            },
            AttemptFailure::Unavailable => FetchError::UpstreamUnavailable {
                reason: format!("gave up after {max_attempts} attempts"),
            },
            AttemptFailure::Transport(reason) => FetchError::TransportFailure { reason },
        })
    }
}
