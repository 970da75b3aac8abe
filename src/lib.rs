//! DB Registry Library
//!
//! A registry of named database connections (PostgreSQL, MySQL, SQLite).
//! Raw configuration records are validated into typed configs, checked for
//! driver availability, and turned into lazily-connecting pools from which
//! sessions are handed out by name.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{RegistryOptions, parse_records};
pub use db::{ConnectionRegistry, DriverRequirements, Engine, RegistryGuard, Session};
pub use error::{DbError, DbResult};
pub use models::{ConnectionConfig, ConnectionSummary, DatabaseType};
