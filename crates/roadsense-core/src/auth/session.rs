use std::sync::{RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supplies the bearer token and user id for API calls.
///
/// Implemented by whatever owns authentication; this layer only reads.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;

    fn user_id(&self) -> Option<i64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(token: impl Into<String>, user_id: i64) -> Self {
        Self {
            token: token.into(),
            user_id,
            created_at: Utc::now(),
        }
    }
}

/// In-memory session holder, updated by the login flow.
#[derive(Debug, Default)]
pub struct Session {
    data: RwLock<Option<SessionData>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: SessionData) -> Self {
        Self {
            data: RwLock::new(Some(data)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<SessionData>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Update session with new data
    pub fn update(&self, data: SessionData) {
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = Some(data);
    }

    /// Clear session data
    pub fn clear(&self) {
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    pub fn data(&self) -> Option<SessionData> {
        self.read().clone()
    }
}

impl TokenSource for Session {
    fn token(&self) -> Option<String> {
        self.read().as_ref().map(|d| d.token.clone())
    }

    fn user_id(&self) -> Option<i64> {
        self.read().as_ref().map(|d| d.user_id)
    }
}
