//! API client for the roadsense backend.
//!
//! Every read goes through `ApiClient::request`, which serves fresh cache
//! entries without I/O, otherwise waits for the backend to be ready, fetches
//! with retries, writes the result to the cache, and falls back to a stale
//! entry when the fetch fails. Mutations bypass the cache and invalidate the
//! entries they make stale.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::TokenSource;
use crate::cache::{CacheKey, CacheStore, DurableStore, FileStore, Mutation};
use crate::config::Config;
use crate::net::{BackendReadiness, NetworkHelper, RequestOptions};

use super::envelope::{ApiResponse, Envelope};
use super::ApiError;

/// Clone is cheap - all state is shared behind `Arc`.
#[derive(Clone)]
pub struct ApiClient {
    network: NetworkHelper,
    readiness: Arc<BackendReadiness>,
    cache: Arc<CacheStore>,
    auth: Arc<dyn TokenSource>,
}

impl ApiClient {
    /// Build a client with a file-backed durable cache in the configured
    /// cache directory. Must be called inside a tokio runtime.
    pub fn new(config: &Config, auth: Arc<dyn TokenSource>) -> anyhow::Result<Self> {
        let cache_dir = config.cache_dir()?;
        let durable = FileStore::new(&cache_dir)
            .with_context(|| format!("Failed to open cache at {}", cache_dir.display()))?;
        Ok(Self::with_store(config, Arc::new(durable), auth)?)
    }

    pub fn with_store(
        config: &Config,
        durable: Arc<dyn DurableStore>,
        auth: Arc<dyn TokenSource>,
    ) -> Result<Self, ApiError> {
        let network = NetworkHelper::new(config)?;
        let readiness = Arc::new(BackendReadiness::new(Arc::new(network.clone())));
        let cache = Arc::new(CacheStore::new(durable));
        Ok(Self::from_parts(network, readiness, cache, auth))
    }

    pub fn from_parts(
        network: NetworkHelper,
        readiness: Arc<BackendReadiness>,
        cache: Arc<CacheStore>,
        auth: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            network,
            readiness,
            cache,
            auth,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn readiness(&self) -> &BackendReadiness {
        &self.readiness
    }

    /// User id of the current session, if any.
    pub fn user_id(&self) -> Option<i64> {
        self.auth.user_id()
    }

    /// Perform a call against `endpoint`, using the cache when `cache_key` is
    /// given.
    ///
    /// Unauthorized errors are returned as-is. Any other failure is answered
    /// from the cache (tagged `stale`) when an entry exists, regardless of age.
    pub async fn request(
        &self,
        endpoint: &str,
        options: RequestOptions,
        cache_key: Option<&CacheKey>,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        if let (Some(key), false) = (cache_key, force_refresh) {
            if let Some(entry) = self.cache.get(key).await {
                debug!(key = %key, "Serving from cache");
                return Ok(ApiResponse::cached(entry));
            }
        }

        match self.fetch(endpoint, options).await {
            Ok(data) => {
                if let Some(key) = cache_key {
                    self.cache.set(key, data.clone(), key.ttl());
                }
                Ok(ApiResponse::fresh(data))
            }
            Err(e) if !e.allows_stale_fallback() => Err(e),
            Err(e) => {
                if let Some(key) = cache_key {
                    if let Some(entry) = self.cache.get_ignoring_expiry(key).await {
                        warn!(key = %key, error = %e, "Fetch failed, serving stale cache");
                        return Ok(ApiResponse::stale(entry));
                    }
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, endpoint: &str, mut options: RequestOptions) -> Result<Value, ApiError> {
        if !self.readiness.ensure_ready().await {
            warn!(endpoint = endpoint, "Backend not confirmed ready, trying anyway");
        }

        if options.bearer_token.is_none() {
            options.bearer_token = self.auth.token();
        }

        let url = self.network.url_for(endpoint);
        let response = self.network.fetch_with_retry(&url, &options).await?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ApiError::Network {
            attempts: 1,
            message: format!("Failed to read response body from {}: {}", url, e),
        })?;

        if !status.is_success() {
            return Err(ApiError::from_status(status, &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| ApiError::Parse(format!("Failed to parse JSON response from {}: {}", url, e)))?;

        if envelope.success == Some(false) {
            return Err(ApiError::Rejected {
                message: envelope
                    .message
                    .unwrap_or_else(|| "Request failed".to_string()),
                code: envelope.code,
            });
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }

    /// Run a write and invalidate everything it makes stale.
    async fn mutate(
        &self,
        endpoint: &str,
        options: RequestOptions,
        mutation: Mutation,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let response = self.request(endpoint, options, None, true).await?;
        self.cache.apply(&mutation.invalidations()).await;
        info!(?mutation, "Cache invalidated after mutation");
        Ok(response)
    }

    /// Flush pending cache writes and wipe both tiers.
    pub async fn logout(&self) {
        self.cache.flush().await;
        self.cache.clear().await;
        info!("Cache cleared on logout");
    }

    /// Flush pending cache writes and drop the in-memory tier.
    pub async fn shutdown(&self) {
        self.cache.flush().await;
        self.cache.clear_volatile();
        debug!("API client shut down");
    }

    // ===== Profile =====

    pub async fn get_profile(
        &self,
        user_id: i64,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/profile", user_id);
        self.request(
            &endpoint,
            RequestOptions::get(),
            Some(&CacheKey::profile(user_id)),
            force_refresh,
        )
        .await
    }

    pub async fn update_profile(
        &self,
        user_id: i64,
        profile: Value,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/profile", user_id);
        self.mutate(
            &endpoint,
            RequestOptions::put(profile),
            Mutation::UpdateProfile { user_id },
        )
        .await
    }

    // ===== Stats & Progress =====

    pub async fn get_stats(
        &self,
        user_id: i64,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/stats", user_id);
        self.request(
            &endpoint,
            RequestOptions::get(),
            Some(&CacheKey::stats(user_id)),
            force_refresh,
        )
        .await
    }

    pub async fn get_user_progress(
        &self,
        user_id: i64,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/progress", user_id);
        self.request(
            &endpoint,
            RequestOptions::get(),
            Some(&CacheKey::progress(user_id)),
            force_refresh,
        )
        .await
    }

    pub async fn update_user_progress(
        &self,
        user_id: i64,
        progress: Value,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/progress", user_id);
        self.mutate(
            &endpoint,
            RequestOptions::put(progress),
            Mutation::UpdateUserProgress { user_id },
        )
        .await
    }

    pub async fn reset_user_progress(&self, user_id: i64) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/progress", user_id);
        self.mutate(
            &endpoint,
            RequestOptions::delete(),
            Mutation::ResetUserProgress { user_id },
        )
        .await
    }

    pub async fn get_session_progress(
        &self,
        user_id: i64,
        category_id: i64,
        phase_id: Option<i64>,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let mut endpoint = format!(
            "/users/{}/sessions/progress?categoryId={}",
            user_id, category_id
        );
        if let Some(phase_id) = phase_id {
            endpoint.push_str(&format!("&phaseId={}", phase_id));
        }
        self.request(
            &endpoint,
            RequestOptions::get(),
            Some(&CacheKey::session_progress(user_id, category_id, phase_id)),
            force_refresh,
        )
        .await
    }

    // ===== Scenario Attempts =====

    pub async fn get_scenario_attempts(
        &self,
        user_id: i64,
        scenario_id: i64,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/scenarios/{}/attempts", user_id, scenario_id);
        self.request(
            &endpoint,
            RequestOptions::get(),
            Some(&CacheKey::attempts(user_id, scenario_id)),
            force_refresh,
        )
        .await
    }

    pub async fn submit_scenario_attempt(
        &self,
        user_id: i64,
        scenario_id: i64,
        attempt: Value,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/users/{}/scenarios/{}/attempts", user_id, scenario_id);
        self.mutate(
            &endpoint,
            RequestOptions::post(attempt),
            Mutation::SubmitScenarioAttempt {
                user_id,
                scenario_id,
            },
        )
        .await
    }

    // ===== Content Catalog =====

    pub async fn get_categories(&self, force_refresh: bool) -> Result<ApiResponse<Value>, ApiError> {
        self.request(
            "/categories",
            RequestOptions::get(),
            Some(&CacheKey::categories()),
            force_refresh,
        )
        .await
    }

    pub async fn get_phases(
        &self,
        category_id: i64,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/categories/{}/phases", category_id);
        self.request(
            &endpoint,
            RequestOptions::get(),
            Some(&CacheKey::phases(category_id)),
            force_refresh,
        )
        .await
    }

    pub async fn get_scenarios(
        &self,
        category_id: i64,
        phase_id: i64,
        force_refresh: bool,
    ) -> Result<ApiResponse<Value>, ApiError> {
        let endpoint = format!("/categories/{}/phases/{}/scenarios", category_id, phase_id);
        self.request(
            &endpoint,
            RequestOptions::get(),
            Some(&CacheKey::scenarios(category_id, phase_id)),
            force_refresh,
        )
        .await
    }
}
