//! Hearth Relay Library
//!
//! Core functionality for the Hearth relay:
//! - SQLite storage for users, sessions and encrypted credential rows
//! - Cookie sessions, password hashing and the origin allow-list
//! - Per-client hub WebSocket relay with upstream auth
//! - Livestream fan-out from the surveillance controller
//! - axum routes tying it together

pub mod auth;
pub mod credentials;
pub mod frames;
pub mod hub;
pub mod livestream;
pub mod registry;
pub mod server;
pub mod storage;
pub mod tls;
