//! Data models for the connection registry.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;

// Re-export commonly used types
pub use connection::{ConnectionConfig, ConnectionSummary, DatabaseType, dialect_family};
