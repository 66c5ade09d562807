//! REST API client module for the roadsense backend.
//!
//! This module provides the `ApiClient`, which layers caching, backend
//! readiness and stale fallback over the network helper, plus the
//! `ApiError` taxonomy and the `ApiResponse` returned to callers.
//!
//! Requests carry a bearer token supplied by the app's auth layer.

pub mod client;
pub mod envelope;
pub mod error;

pub use client::ApiClient;
pub use envelope::ApiResponse;
pub use error::ApiError;
