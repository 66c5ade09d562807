//! Cache keys, resource types, and the TTL table.
//!
//! Every cached resource is identified by a `CacheKey`: a resource type plus
//! the scope ids that distinguish one instance from another. The string form
//! (`stats_42`, `scenarios_3_1`, ...) is stable, so a mutation can compute
//! exactly which keys it has to invalidate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Profile data changes rarely but is edited by the user.
const PROFILE_TTL: Duration = Duration::from_secs(5 * 60);
/// Stats and progress move after every answered scenario.
const STATS_TTL: Duration = Duration::from_secs(2 * 60);
const PROGRESS_TTL: Duration = Duration::from_secs(2 * 60);
const ATTEMPTS_TTL: Duration = Duration::from_secs(2 * 60);
const SESSION_PROGRESS_TTL: Duration = Duration::from_secs(60);
/// Scenario content is authored server side and only changes on deploys.
const SCENARIOS_TTL: Duration = Duration::from_secs(60 * 60);
const CATALOG_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Kind of resource a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Profile,
    Stats,
    Progress,
    Attempts,
    Scenarios,
    Categories,
    Phases,
    SessionProgress,
}

impl ResourceType {
    /// Key prefix for this resource type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Profile => "profile",
            ResourceType::Stats => "stats",
            ResourceType::Progress => "progress",
            ResourceType::Attempts => "attempts",
            ResourceType::Scenarios => "scenarios",
            ResourceType::Categories => "categories",
            ResourceType::Phases => "phases",
            ResourceType::SessionProgress => "session_progress",
        }
    }

    /// How long an entry of this type counts as fresh.
    pub fn ttl(&self) -> Duration {
        match self {
            ResourceType::Profile => PROFILE_TTL,
            ResourceType::Stats => STATS_TTL,
            ResourceType::Progress => PROGRESS_TTL,
            ResourceType::Attempts => ATTEMPTS_TTL,
            ResourceType::SessionProgress => SESSION_PROGRESS_TTL,
            ResourceType::Scenarios => SCENARIOS_TTL,
            ResourceType::Categories | ResourceType::Phases => CATALOG_TTL,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ids that scope a cached resource to one user, category, phase or scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resource: ResourceType,
    scope: CacheScope,
}

impl CacheKey {
    pub fn new(resource: ResourceType, scope: CacheScope) -> Self {
        Self { resource, scope }
    }

    pub fn profile(user_id: i64) -> Self {
        Self::for_user(ResourceType::Profile, user_id)
    }

    pub fn stats(user_id: i64) -> Self {
        Self::for_user(ResourceType::Stats, user_id)
    }

    pub fn progress(user_id: i64) -> Self {
        Self::for_user(ResourceType::Progress, user_id)
    }

    pub fn attempts(user_id: i64, scenario_id: i64) -> Self {
        Self::new(
            ResourceType::Attempts,
            CacheScope {
                user_id: Some(user_id),
                scenario_id: Some(scenario_id),
                ..Default::default()
            },
        )
    }

    pub fn scenarios(category_id: i64, phase_id: i64) -> Self {
        Self::new(
            ResourceType::Scenarios,
            CacheScope {
                category_id: Some(category_id),
                phase_id: Some(phase_id),
                ..Default::default()
            },
        )
    }

    pub fn categories() -> Self {
        Self::new(ResourceType::Categories, CacheScope::default())
    }

    pub fn phases(category_id: i64) -> Self {
        Self::new(
            ResourceType::Phases,
            CacheScope {
                category_id: Some(category_id),
                ..Default::default()
            },
        )
    }

    pub fn session_progress(user_id: i64, category_id: i64, phase_id: Option<i64>) -> Self {
        Self::new(
            ResourceType::SessionProgress,
            CacheScope {
                user_id: Some(user_id),
                category_id: Some(category_id),
                phase_id,
                ..Default::default()
            },
        )
    }

    fn for_user(resource: ResourceType, user_id: i64) -> Self {
        Self::new(
            resource,
            CacheScope {
                user_id: Some(user_id),
                ..Default::default()
            },
        )
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn scope(&self) -> CacheScope {
        self.scope
    }

    pub fn ttl(&self) -> Duration {
        self.resource.ttl()
    }

    /// Prefix shared by every key of `resource` belonging to `user_id`,
    /// e.g. `attempts_7_` for all of user 7's attempt lists.
    pub fn user_prefix(resource: ResourceType, user_id: i64) -> String {
        format!("{}_{}_", resource.as_str(), user_id)
    }
}

impl fmt::Display for CacheKey {
    /// Scope ids are written in a fixed order: user, category, phase, scenario.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.resource.as_str())?;
        let ids = [
            self.scope.user_id,
            self.scope.category_id,
            self.scope.phase_id,
            self.scope.scenario_id,
        ];
        for id in ids.into_iter().flatten() {
            write!(f, "_{}", id)?;
        }
        Ok(())
    }
}

/// Something a mutation must evict from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(CacheKey),
    /// Every key starting with this string.
    Prefix(String),
}

/// Write operations that change server-side state a cached read depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    UpdateProfile { user_id: i64 },
    SubmitScenarioAttempt { user_id: i64, scenario_id: i64 },
    UpdateUserProgress { user_id: i64 },
    ResetUserProgress { user_id: i64 },
}

impl Mutation {
    /// Cache entries made stale by this mutation.
    pub fn invalidations(&self) -> Vec<Invalidation> {
        match *self {
            Mutation::UpdateProfile { user_id } => {
                vec![Invalidation::Key(CacheKey::profile(user_id))]
            }
            Mutation::SubmitScenarioAttempt { user_id, .. } => vec![
                Invalidation::Key(CacheKey::stats(user_id)),
                Invalidation::Key(CacheKey::progress(user_id)),
                Invalidation::Prefix(CacheKey::user_prefix(ResourceType::Attempts, user_id)),
                Invalidation::Prefix(CacheKey::user_prefix(
                    ResourceType::SessionProgress,
                    user_id,
                )),
            ],
            Mutation::UpdateUserProgress { user_id } | Mutation::ResetUserProgress { user_id } => {
                vec![
                    Invalidation::Key(CacheKey::progress(user_id)),
                    Invalidation::Key(CacheKey::stats(user_id)),
                    Invalidation::Prefix(CacheKey::user_prefix(
                        ResourceType::SessionProgress,
                        user_id,
                    )),
                ]
            }
        }
    }
}
