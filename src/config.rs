//! Configuration handling for the connection registry.
//!
//! `RegistryOptions` holds the pool and lifecycle settings shared by every connection
//! in a registry. It derives `clap::Args` so an embedding application can flatten it
//! into its own command line and environment (`DB_REGISTRY_*`).

use crate::error::{DbError, DbResult, FieldViolation};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

// Connection record defaults
pub const DEFAULT_POOL_SIZE: u32 = 5;
pub const DEFAULT_MAX_OVERFLOW: u32 = 10;
pub const MIN_NAME_LENGTH: usize = 3;
pub const MAX_NAME_LENGTH: usize = 50;

// Pool configuration defaults
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_TEST_BEFORE_ACQUIRE: bool = true;
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 10;

/// Pool and lifecycle options applied to every connection of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Args)]
#[serde(default)]
pub struct RegistryOptions {
    /// Seconds to wait for a pooled connection before giving up
    #[arg(
        long = "db-acquire-timeout",
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "DB_REGISTRY_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout_secs: u64,

    /// Seconds an idle pooled connection is kept before being closed
    #[arg(
        long = "db-idle-timeout",
        default_value_t = DEFAULT_IDLE_TIMEOUT_SECS,
        env = "DB_REGISTRY_IDLE_TIMEOUT"
    )]
    pub idle_timeout_secs: u64,

    /// Ping pooled connections before handing them out
    #[arg(
        long = "db-test-before-acquire",
        default_value_t = DEFAULT_TEST_BEFORE_ACQUIRE,
        action = clap::ArgAction::Set,
        env = "DB_REGISTRY_TEST_BEFORE_ACQUIRE"
    )]
    pub test_before_acquire: bool,

    /// Seconds close_all waits for checked-out connections to be returned
    #[arg(
        long = "db-close-timeout",
        default_value_t = DEFAULT_CLOSE_TIMEOUT_SECS,
        env = "DB_REGISTRY_CLOSE_TIMEOUT"
    )]
    pub close_timeout_secs: u64,

    /// Open one connection at registration time to surface connection errors early
    #[arg(long = "db-verify-on-register", env = "DB_REGISTRY_VERIFY_ON_REGISTER")]
    pub verify_on_register: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            test_before_acquire: DEFAULT_TEST_BEFORE_ACQUIRE,
            close_timeout_secs: DEFAULT_CLOSE_TIMEOUT_SECS,
            verify_on_register: false,
        }
    }
}

impl RegistryOptions {
    /// Get the acquire timeout as a Duration.
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    /// Get the idle timeout as a Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get the close timeout as a Duration.
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    /// Validate the options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.acquire_timeout_secs == 0 {
            return Err("acquire_timeout_secs must be greater than 0".to_string());
        }
        if self.idle_timeout_secs == 0 {
            return Err("idle_timeout_secs must be greater than 0".to_string());
        }
        if self.close_timeout_secs == 0 {
            return Err("close_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Parse raw connection records from JSON text.
///
/// Accepts either an array of objects or a single object. Each element is returned
/// untouched; field validation happens when the record becomes a `ConnectionConfig`.
pub fn parse_records(json: &str) -> DbResult<Vec<Value>> {
    let value: Value = serde_json::from_str(json).map_err(|e| {
        DbError::invalid_configuration(
            "<records>",
            vec![FieldViolation::new("records", format!("invalid JSON: {e}"))],
        )
    })?;

    match value {
        Value::Array(records) => Ok(records),
        record @ Value::Object(_) => Ok(vec![record]),
        other => Err(DbError::invalid_configuration(
            "<records>",
            vec![FieldViolation::new(
                "records",
                format!(
                    "expected an array of connection objects, got {}",
                    json_type_name(&other)
                ),
            )],
        )),
    }
}

/// Human-readable JSON type name used in validation messages.
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
