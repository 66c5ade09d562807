//! Two-tier cache for API responses.
//!
//! This module provides the `CacheStore`, an in-process map backed by a
//! durable key/value store that survives restarts. Entries carry the time
//! they were written and a TTL; expired entries are not returned by normal
//! reads but remain available as a stale fallback until overwritten or
//! invalidated.
//!
//! Keys are derived from resource type and scope ids:
//! - `profile_<user>`, `stats_<user>`, `progress_<user>`
//! - `attempts_<user>_<scenario>`, `session_progress_<user>_<category>[_<phase>]`
//! - `scenarios_<category>_<phase>`, `phases_<category>`, `categories`

pub mod durable;
pub mod entry;
pub mod error;
pub mod key;
pub mod store;

pub use durable::{DurableStore, FileStore, MemoryStore};
pub use entry::CacheEntry;
pub use error::CacheError;
pub use key::{CacheKey, CacheScope, Invalidation, Mutation, ResourceType};
pub use store::{CacheStore, PersistEvent};
