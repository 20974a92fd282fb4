//! Registry backends for miniservice.
//!
//! - [`ConsulRegistry`] talks to a Consul agent over its HTTP API.
//! - [`SqliteRegistry`] keeps instances in a SQLite file shared by the
//!   processes of one host.

pub mod consul;
pub mod sqlite;

pub use consul::{ConsulConfig, ConsulRegistry};
pub use sqlite::SqliteRegistry;
