//! Wire envelope and the response type handed back to callers.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheEntry;

use super::ApiError;

/// Body shape of every backend response:
/// `{ "success": true, "data": ..., "message": "...", "code": "..." }`
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Result of `ApiClient::request`.
///
/// `from_cache` is set whenever the data did not come from this call's
/// network round-trip; `stale` additionally marks data served past its TTL
/// because the fetch failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub from_cache: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

impl<T> ApiResponse<T> {
    pub fn fresh(data: T) -> Self {
        Self {
            success: true,
            data,
            from_cache: false,
            stale: false,
            cached_at: None,
        }
    }

    pub fn cached(entry: CacheEntry<T>) -> Self {
        Self {
            success: true,
            data: entry.data,
            from_cache: true,
            stale: false,
            cached_at: Some(entry.timestamp),
        }
    }

    pub fn stale(entry: CacheEntry<T>) -> Self {
        Self {
            stale: true,
            ..Self::cached(entry)
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        ApiResponse {
            success: self.success,
            data: f(self.data),
            from_cache: self.from_cache,
            stale: self.stale,
            cached_at: self.cached_at,
        }
    }
}

impl ApiResponse<Value> {
    /// Deserialize the payload into a caller-owned type.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<ApiResponse<T>, ApiError> {
        let ApiResponse {
            success,
            data,
            from_cache,
            stale,
            cached_at,
        } = self;
        let data = serde_json::from_value(data).map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(ApiResponse {
            success,
            data,
            from_cache,
            stale,
            cached_at,
        })
    }
}
