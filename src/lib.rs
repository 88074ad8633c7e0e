//! Database resilience library
//!
//! Normalizes database options, classifies driver errors per backend, drops
//! dead pooled connections at checkout, and hands out sessions on cached
//! primary and replica engines (SQLite, PostgreSQL, MySQL).

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{DatabaseOptions, RawConfig};
pub use db::{EngineCache, EngineRole, Session};
pub use error::{DbError, DbResult, ErrorKind};
