//! Error types for the connection registry.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Each variant carries enough context to act on: the connection name, the offending
//! fields, the missing driver package, or a remediation suggestion.

use std::fmt;
use thiserror::Error;

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every violation found while validating one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(pub Vec<FieldViolation>);

impl Violations {
    /// Check whether a given field has at least one violation.
    pub fn contains_field(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldViolation> {
        self.0.iter()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Invalid configuration for connection '{connection}': {violations}")]
    InvalidConfiguration {
        connection: String,
        violations: Violations,
    },

    #[error("Connection '{name}' already exists. Choose a different name")]
    DuplicateConnectionName { name: String },

    #[error(
        "Missing driver '{package}' for dialect '{dialect}'. Install it with: {install_hint}"
    )]
    MissingDriver {
        package: String,
        dialect: String,
        install_hint: String,
    },

    #[error("Connection not found: {name}")]
    ConnectionNotFound { name: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create an invalid configuration error from the collected violations.
    pub fn invalid_configuration(
        connection: impl Into<String>,
        violations: Vec<FieldViolation>,
    ) -> Self {
        Self::InvalidConfiguration {
            connection: connection.into(),
            violations: Violations(violations),
        }
    }

    /// Create a duplicate connection name error.
    pub fn duplicate_connection_name(name: impl Into<String>) -> Self {
        Self::DuplicateConnectionName { name: name.into() }
    }

    /// Create a missing driver error with an install hint.
    pub fn missing_driver(
        package: impl Into<String>,
        dialect: impl Into<String>,
        install_hint: impl Into<String>,
    ) -> Self {
        Self::MissingDriver {
            package: package.into(),
            dialect: dialect.into(),
            install_hint: install_hint.into(),
        }
    }

    /// Create a connection not found error.
    pub fn connection_not_found(name: impl Into<String>) -> Self {
        Self::ConnectionNotFound { name: name.into() }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the remediation step for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::MissingDriver { install_hint, .. } => Some(install_hint),
            Self::DuplicateConnectionName { .. } => {
                Some("Register the connection under a different name or skip it")
            }
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection fields (host, port, credentials, database)",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 0),
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "The registry was closed; build a new registry to reconnect",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for registry operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_configuration_lists_every_field() {
        let err = DbError::invalid_configuration(
            "ab",
            vec![
                FieldViolation::new("name", "must be between 3 and 50 characters"),
                FieldViolation::new("port", "must be between 1 and 65535"),
            ],
        );
        let msg = err.to_string();
        assert!(msg.contains("'ab'"));
        assert!(msg.contains("name: must be between 3 and 50 characters"));
        assert!(msg.contains("; port: must be between 1 and 65535"));
    }

    #[test]
    fn test_missing_driver_message_is_actionable() {
        let err = DbError::missing_driver("tiberius", "mssql+pyodbc", "cargo add tiberius");
        let msg = err.to_string();
        assert!(msg.contains("tiberius"));
        assert!(msg.contains("mssql+pyodbc"));
        assert!(msg.contains("cargo add tiberius"));
        assert_eq!(err.suggestion(), Some("cargo add tiberius"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert!(DbError::duplicate_connection_name("x").suggestion().is_some());
        assert_eq!(DbError::connection_not_found("x").suggestion(), None);
    }

    #[test]
    fn test_pool_closed_maps_to_connection() {
        let err: DbError = sqlx::Error::PoolClosed.into();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[test]
    fn test_pool_timed_out_maps_to_timeout() {
        let err: DbError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, DbError::Timeout { .. }));
    }
}
