//! Upstream hub relay.

mod error;
mod relay;
mod rest;
mod upstream;

pub use error::RelayError;
pub use relay::{HubRelay, RelayPhase, pump};
pub use rest::HubRestClient;
pub use upstream::{HubSocket, UpstreamConnector, authenticate_upstream, websocket_url};
