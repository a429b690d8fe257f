//! SQLite storage for the Hearth relay server.
//!
//! Persists users, login sessions and upstream credential rows.

mod db;
mod models;
mod queries;


pub use db::{DatabaseError, RelayDatabase};
pub use models::*;
pub use queries::CredentialWrite;
