//! The resilient HTTP client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carelink_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, Clock, ConfigError, RetryConfig,
    Singleflight, SystemClock,
};
use carelink_common::ErrorClassification;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use super::error::TransportError;
use super::types::{ApiError, ApiResponse, RequestOverrides};

const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);
const REFRESH_FLIGHT_KEY: &str = "token-refresh";

/// Supplies bearer tokens and performs token refresh.
///
/// Implemented by the session guard. `refresh_tokens` is invoked through a
/// single-flight, so concurrent 401s share one refresh attempt; an
/// implementation that fails a refresh is expected to tear its session down
/// before returning the error.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Current access token, if a session is active. The plaintext is
    /// zeroized by the caller as soon as the header is attached.
    async fn access_token(&self) -> Option<Zeroizing<String>>;

    /// Obtain a fresh token set from the identity provider.
    async fn refresh_tokens(&self) -> Result<(), TransportError>;
}

/// Configuration for [`ResilientHttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    /// Hard wall-clock timeout per attempt, independent of the retry budget.
    pub attempt_timeout: Duration,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl HttpClientConfig {
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.is_empty() {
            return Err(ConfigError::Invalid { message: "base_url must not be empty".to_string() });
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                message: "attempt_timeout must be greater than zero".to_string(),
            });
        }
        self.retry
            .validate::<std::convert::Infallible>()
            .map_err(|e| ConfigError::Invalid { message: e.to_string() })?;
        self.breaker.validate()
    }
}

/// Builder for [`HttpClientConfig`].
#[derive(Debug, Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    pub fn new() -> Self {
        Self { config: HttpClientConfig::default() }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.config.attempt_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.config.breaker = breaker;
        self
    }

    pub fn build(self) -> Result<HttpClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Outbound request pipeline with correlation ids, auth injection, retry,
/// circuit breaking and single-flighted token refresh.
///
/// Breaker and retry state live on the constructed client; independent
/// instances share nothing.
pub struct ResilientHttpClient<C: Clock = SystemClock> {
    config: HttpClientConfig,
    http: reqwest::Client,
    breaker: CircuitBreaker<C>,
    token_source: Option<Arc<dyn TokenSource>>,
    refresh_flights: Singleflight<&'static str, Result<(), TransportError>>,
}

impl ResilientHttpClient<SystemClock> {
    /// Create a client using the system clock.
    pub fn new(config: HttpClientConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> ResilientHttpClient<C> {
    /// Create a client with a custom clock driving the breaker cool-down.
    pub fn with_clock(config: HttpClientConfig, clock: C) -> Result<Self, ConfigError> {
        config.validate()?;
        let breaker = CircuitBreaker::with_clock(config.breaker.clone(), clock)?;
        Ok(Self {
            config,
            http: reqwest::Client::new(),
            breaker,
            token_source: None,
            refresh_flights: Singleflight::new(),
        })
    }

    /// Attach the token source used for bearer injection and 401 refresh.
    pub fn with_token_source(mut self, source: Arc<dyn TokenSource>) -> Self {
        self.token_source = Some(source);
        self
    }

    /// Snapshot of the breaker state for diagnostics.
    pub fn breaker_metrics(&self) -> CircuitBreakerMetrics {
        self.breaker.metrics()
    }

    /// Issue a request through the full pipeline.
    ///
    /// Transient failures (network, timeout, 5xx, 429) are retried with
    /// capped exponential backoff within the attempt budget. A 401 triggers
    /// exactly one transparent refresh-and-replay, which does not consume
    /// the retry budget. The breaker is consulted before every attempt; an
    /// open breaker fails without network I/O.
    #[instrument(skip(self, body), fields(method = %method, path))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        overrides: Option<RequestOverrides>,
    ) -> Result<ApiResponse<T>, TransportError> {
        let overrides = overrides.unwrap_or_default();
        let correlation_id = Uuid::new_v4();
        let max_attempts = overrides.max_attempts.unwrap_or(self.config.retry.max_attempts);
        let timeout = overrides.timeout.unwrap_or(self.config.attempt_timeout);

        let mut replayed = false;
        let mut attempt: u32 = 0;

        loop {
            if !self.breaker.can_execute() {
                debug!(%correlation_id, "circuit open, rejecting without network I/O");
                return Err(TransportError::CircuitOpen {
                    retry_after: self.breaker.retry_after(),
                    correlation_id,
                });
            }

            let result = self
                .attempt::<T>(
                    method.clone(),
                    path,
                    body.as_ref(),
                    timeout,
                    overrides.skip_auth,
                    correlation_id,
                )
                .await;

            let err = match result {
                Ok(response) => {
                    self.breaker.record_success();
                    return Ok(response);
                }
                Err(err) => err,
            };

            // Only outages count against the breaker; 4xx responses prove
            // the upstream is alive and settle a half-open probe.
            if matches!(
                err,
                TransportError::Network { .. }
                    | TransportError::Timeout { .. }
                    | TransportError::Server { .. }
            ) {
                self.breaker.record_failure();
            } else {
                self.breaker.record_success();
            }

            if matches!(err, TransportError::Authentication { .. })
                && !replayed
                && !overrides.skip_auth
            {
                if let Some(source) = &self.token_source {
                    debug!(%correlation_id, "401 received, joining shared token refresh");
                    let source = Arc::clone(source);
                    let refresh = self
                        .refresh_flights
                        .run(REFRESH_FLIGHT_KEY, move || async move {
                            source.refresh_tokens().await
                        })
                        .await;
                    match refresh {
                        Ok(()) => {
                            replayed = true;
                            continue;
                        }
                        Err(refresh_err) => {
                            warn!(%correlation_id, error = %refresh_err, "token refresh failed");
                            return Err(TransportError::Authentication {
                                message: format!("token refresh failed: {refresh_err}"),
                                correlation_id,
                            });
                        }
                    }
                }
            }

            if err.is_retryable() && attempt + 1 < max_attempts {
                let delay =
                    err.retry_after().unwrap_or_else(|| self.config.retry.backoff.delay_for(attempt));
                warn!(
                    %correlation_id,
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            return Err(err);
        }
    }

    /// GET convenience wrapper.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        overrides: Option<RequestOverrides>,
    ) -> Result<ApiResponse<T>, TransportError> {
        self.request(Method::GET, path, None, overrides).await
    }

    /// POST convenience wrapper.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
        overrides: Option<RequestOverrides>,
    ) -> Result<ApiResponse<T>, TransportError> {
        self.request(Method::POST, path, Some(body), overrides).await
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        timeout: Duration,
        skip_auth: bool,
        correlation_id: Uuid,
    ) -> Result<ApiResponse<T>, TransportError> {
        let url = format!("{}{path}", self.config.base_url.trim_end_matches('/'));
        let mut request = self
            .http
            .request(method, &url)
            .header("x-correlation-id", correlation_id.to_string());

        if !skip_auth {
            if let Some(source) = &self.token_source {
                if let Some(token) = source.access_token().await {
                    request = request.bearer_auth(token.as_str());
                }
            }
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = match tokio::time::timeout(timeout, request.send()).await {
            Err(_) => {
                return Err(TransportError::Timeout { timeout, correlation_id });
            }
            Ok(Err(e)) => {
                return Err(TransportError::Network { message: e.to_string(), correlation_id });
            }
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            return response.json::<ApiResponse<T>>().await.map_err(|e| {
                TransportError::Decode { message: e.to_string(), correlation_id }
            });
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let body_text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiError>(&body_text)
            .map(|e| e.message)
            .unwrap_or_else(|_| {
                if body_text.is_empty() {
                    status.canonical_reason().unwrap_or("unknown error").to_string()
                } else {
                    body_text
                }
            });

        Err(match status {
            StatusCode::UNAUTHORIZED => TransportError::Authentication { message, correlation_id },
            StatusCode::TOO_MANY_REQUESTS => {
                TransportError::RateLimit { retry_after, correlation_id }
            }
            s if s.is_server_error() => {
                TransportError::Server { status: s.as_u16(), message, correlation_id }
            }
            s => TransportError::Client { status: s.as_u16(), message, correlation_id },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope(data: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "message": null,
            "data": data,
            "timestamp": "2026-08-29T10:00:00Z",
            "correlationId": Uuid::new_v4(),
        })
    }

    async fn client_for(server: &MockServer) -> ResilientHttpClient {
        let config = HttpClientConfig::builder()
            .base_url(server.uri())
            .retry(
                RetryConfig::builder()
                    .max_attempts(3)
                    .backoff(carelink_common::BackoffStrategy::Exponential {
                        base_delay: Duration::from_millis(1),
                        factor: 2.0,
                        max_delay: Duration::from_millis(5),
                    })
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        ResilientHttpClient::new(config).unwrap()
    }

    #[tokio::test]
    async fn successful_get_parses_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/patients/1"))
            .and(header_exists("x-correlation-id"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!({
                "id": 1
            }))))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let response: ApiResponse<serde_json::Value> =
            client.get("/api/patients/1", None).await.unwrap();

        assert!(response.success);
        assert_eq!(response.data["id"], 1);
    }

    #[tokio::test]
    async fn transient_5xx_is_retried_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/flaky"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!("ok"))))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let response: ApiResponse<String> = client.get("/api/flaky", None).await.unwrap();
        assert_eq!(response.data, "ok");
    }

    #[tokio::test]
    async fn not_found_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result: Result<ApiResponse<()>, _> = client.get("/api/missing", None).await;
        assert!(matches!(result, Err(TransportError::Client { status: 404, .. })));
    }

    #[tokio::test]
    async fn rate_limit_honors_retry_after_header() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/limited"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(serde_json::json!(1))))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let response: ApiResponse<u32> = client.get("/api/limited", None).await.unwrap();
        assert_eq!(response.data, 1);
    }

    #[tokio::test]
    async fn rejects_empty_base_url() {
        assert!(HttpClientConfig::builder().build().is_err());
    }
}
