//! Registry of active relay connections.

mod connection;

pub use connection::{ConnectionRegistry, RelayConnection};
