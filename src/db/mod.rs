//! Database module for fedwatch.
//!
//! Provides SQLite storage for targets, probe logs, and pending notifications.

mod models;
mod store;

pub use models::*;
pub use store::*;
