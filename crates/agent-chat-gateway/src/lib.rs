//! Typed client for the agent chat backend's `/api/*` surface.

#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
pub mod config;
mod error;
pub mod types;

pub use client::{ChatGateway, HttpGateway};
pub use config::{ConfigError, GatewayConfig};
pub use error::{GatewayError, format_http_error};
pub use types::*;
