//! Livestream fan-out: one upstream video session per camera, many viewers.

mod error;
mod fmp4;
mod manager;
mod protect;
mod source;

pub use error::LivestreamError;
pub use fmp4::codec_string;
pub use manager::{LivestreamManager, SinkMessage, SubscriptionId};
pub use protect::ProtectController;
pub use source::{LivestreamEvent, LivestreamSource, UpstreamStream};
