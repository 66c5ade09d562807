//! Network resilience for backend calls.
//!
//! This module provides:
//! - `NetworkHelper`: HTTP fetch with a per-attempt timeout and fixed-delay
//!   retries on transient failures, plus connectivity and wake-up probes
//! - `BackendReadiness`: coalesces concurrent "is the backend up" checks into
//!   one in-flight probe
//!
//! HTTP status codes are not failures at this layer; callers classify them.

pub mod readiness;
pub mod retry;

use std::time::Duration;

use reqwest::{header, Client, Method, Response};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::config::Config;

pub use readiness::{BackendProbe, BackendReadiness, ReadinessState};
pub use retry::{retry_with_policy, RetryFailure, RetryPolicy};

/// Method, body and credentials for one API call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub bearer_token: Option<String>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self::with_body(Method::POST, body)
    }

    pub fn put(body: Value) -> Self {
        Self::with_body(Method::PUT, body)
    }

    pub fn delete() -> Self {
        Self {
            method: Method::DELETE,
            ..Self::default()
        }
    }

    fn with_body(method: Method, body: Value) -> Self {
        Self {
            method,
            body: Some(body),
            bearer_token: None,
        }
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Connection failures, send failures and timeouts are worth retrying.
pub fn is_network_error(error: &reqwest::Error) -> bool {
    !error.is_builder() && (error.is_connect() || error.is_timeout() || error.is_request())
}

/// HTTP transport with timeouts and retries.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct NetworkHelper {
    client: Client,
    base_url: String,
    health_url: String,
    request_timeout: Duration,
    probe_timeout: Duration,
    wake_timeout: Duration,
    policy: RetryPolicy,
}

impl NetworkHelper {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ApiError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            health_url: config.health_url(),
            request_timeout: config.request_timeout(),
            probe_timeout: config.probe_timeout(),
            wake_timeout: config.wake_timeout(),
            policy: RetryPolicy {
                max_retries: config.max_retries,
                delay: config.retry_delay(),
            },
        })
    }

    /// Absolute URL for an endpoint path such as `/users/7/stats`.
    pub fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch with the configured retry budget.
    pub async fn fetch_with_retry(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response, ApiError> {
        self.fetch_with_retries(url, options, self.policy.max_retries)
            .await
    }

    /// Fetch `url`, retrying transient failures up to `max_retries` times.
    ///
    /// Returns the response for any HTTP status. After the budget is spent
    /// the error is `Timeout` if the last attempt timed out, `Network`
    /// otherwise. Non-transient failures return `Request` immediately.
    pub async fn fetch_with_retries(
        &self,
        url: &str,
        options: &RequestOptions,
        max_retries: u32,
    ) -> Result<Response, ApiError> {
        let policy = RetryPolicy {
            max_retries,
            ..self.policy
        };

        let result = retry_with_policy(&policy, is_network_error, |attempt| {
            debug!(url = url, method = %options.method, attempt = attempt, "Sending request");
            self.build(url, options, self.request_timeout).send()
        })
        .await;

        result.map_err(|failure| {
            let RetryFailure {
                attempts,
                error,
                retryable,
            } = failure;
            if !retryable {
                ApiError::Request(error.to_string())
            } else if error.is_timeout() {
                warn!(url = url, attempts = attempts, "Request timed out, giving up");
                ApiError::Timeout { attempts }
            } else {
                warn!(url = url, attempts = attempts, error = %error, "Network failure, giving up");
                ApiError::Network {
                    attempts,
                    message: error.to_string(),
                }
            }
        })
    }

    fn build(&self, url: &str, options: &RequestOptions, timeout: Duration) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(options.method.clone(), url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .timeout(timeout);
        if let Some(ref token) = options.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(ref body) = options.body {
            request = request.json(body);
        }
        request
    }

    async fn probe(&self, timeout: Duration) -> bool {
        match self
            .build(&self.health_url, &RequestOptions::get(), timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url = %self.health_url, error = %e, "Health probe failed");
                false
            }
        }
    }

    /// Single quick probe of the health endpoint. Never errors.
    pub async fn check_connection(&self) -> bool {
        let reachable = self.probe(self.probe_timeout).await;
        debug!(reachable = reachable, "Connection check finished");
        reachable
    }

    /// Single probe with a long timeout, giving a sleeping backend time to
    /// start.
    pub async fn wake_up_backend(&self) -> bool {
        info!(url = %self.health_url, timeout_secs = self.wake_timeout.as_secs(), "Waking up backend");
        let awake = self.probe(self.wake_timeout).await;
        if awake {
            info!("Backend is awake");
        } else {
            warn!("Backend did not respond to wake-up probe");
        }
        awake
    }
}
