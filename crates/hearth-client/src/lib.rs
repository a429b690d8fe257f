//! Hearth Client Library
//!
//! Dashboard-side connection to the relay's hub endpoint:
//! - Reconnecting socket client with request/response correlation
//! - Event and entity subscriptions that survive reconnects
//! - Capped exponential backoff with a polling fallback
//! - State cache refreshed by whichever strategy the connection mode allows

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod heartbeat;
pub mod mode;
pub mod pending;
pub mod reconnect;
pub mod store;
pub mod strategy;
pub mod transport;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

pub use cache::StateCache;
pub use client::{EntitySubscription, EventSubscription, HubApi, HubClient};
pub use config::{ClientConfig, HeartbeatPolicy, ReconnectPolicy};
pub use error::ClientError;
pub use mode::{ConnectionMode, ModeSignal};
pub use pending::CommandResult;
pub use store::HubStore;
