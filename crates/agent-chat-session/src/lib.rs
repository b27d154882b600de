//! Client-side session synchronizer for the agent chat backend.
//!
//! [`SessionStore`] owns the active conversation and the session list,
//! [`StatusPoller`] keeps health and the component tree fresh on its own
//! timer.

#![cfg_attr(test, allow(clippy::expect_used, clippy::panic))]

mod coalescer;
pub mod config;
mod status;
mod store;
mod transcript;

#[cfg(test)]
mod testing;

pub use coalescer::{DEFAULT_REFRESH_WINDOW, RefreshCoalescer, RefreshOptions, RefreshOutcome};
pub use config::{SessionConfig, SessionConfigError};
pub use status::{DEFAULT_POLL_INTERVAL, StatusPoller, StatusSnapshot, TickOutcome};
pub use store::{HealthStatus, SessionState, SessionStore};
pub use transcript::{ChatMessage, MessageRole, reconstruct};
