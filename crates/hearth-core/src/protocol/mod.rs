//! Wire types shared by the relay and the client library.

mod close;
pub mod hub;
mod livestream;

pub use close::CloseCode;
pub use hub::{EntityState, HubError, HubEvent, HubMessage, StateChanged, parse_frame};
pub use livestream::ControlFrame;
