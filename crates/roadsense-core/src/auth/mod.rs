//! Session access for authenticated requests.
//!
//! Token issuance and storage live in the app's auth layer. This module only
//! defines `TokenSource`, the read side the API client needs, and `Session`,
//! an in-memory holder the login flow can update.

pub mod session;

pub use session::{Session, SessionData, TokenSource};
