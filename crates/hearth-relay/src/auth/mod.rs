//! Authentication for the Hearth relay.
//!
//! Password hashing, cookie sessions and the production origin allow-list.

pub mod cookie;
pub mod origin;
pub mod password;
pub mod session;

pub use origin::{OriginPolicy, OriginRejected};
pub use session::{IssuedSession, SessionValidator};
