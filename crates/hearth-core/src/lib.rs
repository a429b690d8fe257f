//! Hearth Core Library
//!
//! Shared functionality for Hearth components:
//! - Hub and livestream wire protocol types
//! - WebSocket close-code table
//! - Configuration resolution and hierarchy
//! - Tracing and database helpers
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{CloseCode, ControlFrame, HubMessage};
