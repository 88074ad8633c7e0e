//! Data models shared across the crate.

pub mod connection;
pub mod query;
pub mod record;

pub use connection::{ConnectionUrl, DatabaseType, mask_url};
pub use query::QueryParam;
pub use record::{Record, TableDef};
