use thiserror::Error;

use crate::cache::CacheError;

use super::envelope::Envelope;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error after {attempts} attempt(s): {message}")]
    Network { attempts: u32, message: String },

    #[error("Request timed out after {attempts} attempt(s)")]
    Timeout { attempts: u32 },

    #[error("Unauthorized: {message}")]
    Unauthorized {
        message: String,
        code: Option<String>,
    },

    #[error("API error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Request rejected: {message}")]
    Rejected {
        message: String,
        code: Option<String>,
    },

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    Request(String),

    #[error("Cache write failed: {0}")]
    CacheWrite(#[from] CacheError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..end],
            body.len()
        )
    }

    /// Classify a non-2xx response.
    ///
    /// 401 keeps the server's `message`/`code` verbatim; every other status
    /// collapses into `Status`.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        if status == reqwest::StatusCode::UNAUTHORIZED {
            let envelope: Option<Envelope> = serde_json::from_str(body).ok();
            let (message, code) = envelope
                .map(|e| (e.message, e.code))
                .unwrap_or((None, None));
            return ApiError::Unauthorized {
                message: message.unwrap_or_else(|| "Unauthorized".to_string()),
                code,
            };
        }
        ApiError::Status {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    /// Transient failures are retried by the network layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network { .. } | ApiError::Timeout { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    /// Whether a cached value may be served in place of this error.
    pub fn allows_stale_fallback(&self) -> bool {
        !self.is_unauthorized()
    }
}
