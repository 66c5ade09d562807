use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::key::CacheScope;

/// A cached value with the time it was written and how long it stays fresh.
///
/// Serialized form (durable tier):
/// `{"data": ..., "timestamp": "...", "ttl": 120000, "userId": 42}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
    /// Freshness window in milliseconds.
    #[serde(rename = "ttl")]
    pub ttl_ms: u64,
    #[serde(flatten)]
    pub scope: CacheScope,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, timestamp: DateTime<Utc>, ttl: Duration, scope: CacheScope) -> Self {
        Self {
            data,
            timestamp,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            scope,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Age relative to `now`. Negative on clock skew.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    /// An entry is expired once it is strictly older than its TTL.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX));
        self.age(now) > ttl
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.age(now).num_minutes()
    }

    /// Short label for "last updated" displays.
    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Includes negative ages from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry_at(timestamp: DateTime<Utc>, ttl_secs: u64) -> CacheEntry<Vec<i32>> {
        CacheEntry::new(
            vec![1, 2, 3],
            timestamp,
            Duration::from_secs(ttl_secs),
            CacheScope::default(),
        )
    }

    #[test]
    fn test_is_expired_only_after_ttl() {
        let now = Utc::now();
        let entry = entry_at(now, 120);

        assert!(!entry.is_expired(now));
        assert!(!entry.is_expired(now + ChronoDuration::seconds(90)));
        // Exactly at TTL still counts as fresh
        assert!(!entry.is_expired(now + ChronoDuration::seconds(120)));
        assert!(entry.is_expired(now + ChronoDuration::seconds(130)));
    }

    #[test]
    fn test_age_display() {
        let now = Utc::now();
        assert_eq!(entry_at(now, 60).age_display(now), "just now");
        assert_eq!(
            entry_at(now + ChronoDuration::minutes(5), 60).age_display(now),
            "just now"
        );
        assert_eq!(
            entry_at(now - ChronoDuration::minutes(5), 60).age_display(now),
            "5m ago"
        );
        assert_eq!(
            entry_at(now - ChronoDuration::minutes(90), 60).age_display(now),
            "2h ago"
        );
        assert_eq!(
            entry_at(now - ChronoDuration::hours(36), 60).age_display(now),
            "2d ago"
        );
    }

    #[test]
    fn test_serialized_shape() {
        let now = Utc::now();
        let entry = CacheEntry::new(
            serde_json::json!({"score": 10}),
            now,
            Duration::from_secs(120),
            CacheScope {
                user_id: Some(42),
                ..Default::default()
            },
        );

        let value = serde_json::to_value(&entry).expect("serialize entry");
        assert_eq!(value["data"]["score"], 10);
        assert_eq!(value["userId"], 42);
        assert_eq!(value["ttl"], 120_000);
        assert!(value.get("categoryId").is_none());

        let back: CacheEntry<serde_json::Value> =
            serde_json::from_value(value).expect("deserialize entry");
        assert_eq!(back, entry);
    }
}
