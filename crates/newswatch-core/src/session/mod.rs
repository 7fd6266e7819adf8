//! Per-user session management.
//!
//! This module provides:
//! - `SessionStore`: the process-wide map from user to session, with
//!   encrypted credentials, idle eviction, and a background sweep loop
//! - `ResourceReleaser`: the contract used to tear down the browser handle
//!   attached to a session
//!
//! Sessions live in memory only and are evicted after an hour without activity.

pub mod error;
pub mod release;
pub mod store;
mod sweeper;

pub use error::SessionError;
pub use release::{ReleaseError, ResourceReleaser};
pub use store::{SessionFields, SessionSnapshot, SessionState, SessionStore};
