//! Client data layer for the roadsense road-safety quiz.
//!
//! - `cache`: two-tier (volatile + durable) cache with TTL and stale reads
//! - `net`: HTTP fetch with timeouts and retries, backend readiness probing
//! - `api`: the `ApiClient` tying both together, with resource helpers and
//!   cache-invalidating mutations
//! - `auth`: the token source the client reads credentials from
//! - `config`: backend URL, timeouts and retry budget

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod net;

pub use api::{ApiClient, ApiError, ApiResponse};
pub use auth::{Session, SessionData, TokenSource};
pub use cache::{CacheKey, CacheStore, DurableStore, FileStore, MemoryStore};
pub use config::Config;
pub use net::{BackendReadiness, NetworkHelper, RequestOptions};
