//! Connection-related data models.
//!
//! This module defines the validated connection configuration and the secret-free
//! summary reported for registered connections.

use crate::config::{
    DEFAULT_MAX_OVERFLOW, DEFAULT_POOL_SIZE, MAX_NAME_LENGTH, MIN_NAME_LENGTH, json_type_name,
};
use crate::error::{DbError, DbResult, FieldViolation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Database backends that can open an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Resolve the backend serving a dialect family.
    pub fn from_family(family: &str) -> Option<Self> {
        match family {
            "postgresql" | "postgres" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this database type.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Extract the database family from a dialect: the lower-cased part before the first `+`.
pub fn dialect_family(dialect: &str) -> String {
    dialect
        .split('+')
        .next()
        .unwrap_or(dialect)
        .to_lowercase()
}

/// Validated, immutable configuration of one database target.
///
/// The only way to obtain one is through validation of a raw record
/// (`from_record`, `TryFrom<Value>` or deserialization), so every instance
/// satisfies the field constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct ConnectionConfig {
    name: String,
    dialect: String,
    database: String,
    username: Option<String>,
    /// Contains sensitive data - never log
    #[serde(skip_serializing)]
    password: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    pool_size: u32,
    max_overflow: u32,
}

impl ConnectionConfig {
    /// Validate a raw key/value record into a connection configuration.
    ///
    /// Every constraint is checked and all violations are reported together in a
    /// single `InvalidConfiguration` error.
    pub fn from_record(record: &Value) -> DbResult<Self> {
        let Some(fields) = record.as_object() else {
            return Err(DbError::invalid_configuration(
                "<unnamed>",
                vec![FieldViolation::new(
                    "record",
                    format!(
                        "expected an object of connection fields, got {}",
                        json_type_name(record)
                    ),
                )],
            ));
        };

        let mut violations = Vec::new();

        let name = required_string(fields, "name", &mut violations);
        let dialect = required_string(fields, "dialect", &mut violations);
        let database = required_string(fields, "database", &mut violations);
        let username = optional_string(fields, "username", &mut violations);
        let password = optional_string(fields, "password", &mut violations);
        let host = optional_string(fields, "host", &mut violations);

        if let Some(name) = &name {
            let len = name.chars().count();
            if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&len) {
                violations.push(FieldViolation::new(
                    "name",
                    format!(
                        "must be between {MIN_NAME_LENGTH} and {MAX_NAME_LENGTH} characters, got {len}"
                    ),
                ));
            }
        }

        if let Some(dialect) = &dialect {
            if let Err(msg) = check_dialect(dialect) {
                violations.push(FieldViolation::new("dialect", msg));
            }
        }

        let port = match fields.get("port") {
            None | Some(Value::Null) => None,
            Some(value) => match read_integer(value) {
                Ok(port) => match u16::try_from(port).ok().filter(|p| *p > 0) {
                    Some(port) => Some(port),
                    None => {
                        violations.push(FieldViolation::new(
                            "port",
                            format!("must be between 1 and 65535, got {port}"),
                        ));
                        None
                    }
                },
                Err(msg) => {
                    violations.push(FieldViolation::new("port", msg));
                    None
                }
            },
        };

        let pool_size = bounded_integer(fields, "pool_size", DEFAULT_POOL_SIZE, 1, &mut violations);
        let max_overflow = bounded_integer(
            fields,
            "max_overflow",
            DEFAULT_MAX_OVERFLOW,
            0,
            &mut violations,
        );

        match (name, dialect, database, pool_size, max_overflow) {
            (Some(name), Some(dialect), Some(database), Some(pool_size), Some(max_overflow))
                if violations.is_empty() =>
            {
                Ok(Self {
                    name,
                    dialect,
                    database,
                    username,
                    password,
                    host,
                    port,
                    pool_size,
                    max_overflow,
                })
            }
            (name, ..) => Err(DbError::invalid_configuration(
                name.unwrap_or_else(|| label_for(fields)),
                violations,
            )),
        }
    }

    /// Unique connection name within a registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dialect string, e.g. `postgresql+psycopg2`.
    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    /// Lower-cased database family of the dialect.
    pub fn family(&self) -> String {
        dialect_family(&self.dialect)
    }

    /// Backend serving this dialect, if one is built in.
    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_family(&self.family())
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Connections kept open in the pool.
    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Extra connections allowed above `pool_size` under load.
    pub fn max_overflow(&self) -> u32 {
        self.max_overflow
    }

    /// Upper bound on simultaneously open connections.
    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

impl TryFrom<Value> for ConnectionConfig {
    type Error = DbError;

    fn try_from(record: Value) -> Result<Self, Self::Error> {
        Self::from_record(&record)
    }
}

impl TryFrom<&Value> for ConnectionConfig {
    type Error = DbError;

    fn try_from(record: &Value) -> Result<Self, Self::Error> {
        Self::from_record(record)
    }
}

fn required_string(
    fields: &Map<String, Value>,
    key: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        None => {
            violations.push(FieldViolation::new(key, "field required"));
            None
        }
        Some(other) => {
            violations.push(FieldViolation::new(
                key,
                format!("must be a string, got {}", json_type_name(other)),
            ));
            None
        }
    }
}

fn optional_string(
    fields: &Map<String, Value>,
    key: &str,
    violations: &mut Vec<FieldViolation>,
) -> Option<String> {
    match fields.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            violations.push(FieldViolation::new(
                key,
                format!("must be a string, got {}", json_type_name(other)),
            ));
            None
        }
    }
}

/// Read an integer field with a default and an inclusive lower bound.
fn bounded_integer(
    fields: &Map<String, Value>,
    key: &str,
    default: u32,
    min: u32,
    violations: &mut Vec<FieldViolation>,
) -> Option<u32> {
    let value = match fields.get(key) {
        None | Some(Value::Null) => return Some(default),
        Some(value) => value,
    };

    match read_integer(value) {
        Ok(n) => match u32::try_from(n).ok().filter(|n| *n >= min) {
            Some(n) => Some(n),
            None => {
                let bound = if min == 0 {
                    "must be greater than or equal to 0".to_string()
                } else {
                    format!("must be greater than {}", min - 1)
                };
                violations.push(FieldViolation::new(key, format!("{bound}, got {n}")));
                None
            }
        },
        Err(msg) => {
            violations.push(FieldViolation::new(key, msg));
            None
        }
    }
}

/// Lax integer parsing: integers, integral floats and decimal strings.
fn read_integer(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i)
            } else if n.is_u64() {
                Err(format!("is out of range, got {n}"))
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(f as i64),
                    _ => Err(format!("must be an integer, got {n}")),
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("must be an integer, got string '{s}'")),
        other => Err(format!("must be an integer, got {}", json_type_name(other))),
    }
}

/// A dialect is used as the URL scheme, so it must look like one.
fn check_dialect(dialect: &str) -> Result<(), String> {
    let mut chars = dialect.chars();
    match chars.next() {
        None => Err("must not be empty".to_string()),
        Some(first) if !first.is_ascii_alphabetic() => {
            Err(format!("must start with a letter, got '{dialect}'"))
        }
        Some(_) => {
            if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
                Ok(())
            } else {
                Err(format!(
                    "may only contain letters, digits, '+', '-' and '.', got '{dialect}'"
                ))
            }
        }
    }
}

fn label_for(fields: &Map<String, Value>) -> String {
    match fields.get("name") {
        Some(Value::String(name)) => name.clone(),
        Some(value) if !value.is_null() => value.to_string(),
        _ => "<unnamed>".to_string(),
    }
}

/// Connection information returned by the registry (no secrets exposed).
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub name: String,
    pub dialect: String,
    pub family: String,
    pub database_type: Option<DatabaseType>,
    /// Connection URL with the password masked
    pub url: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    /// Sessions handed out and not yet dropped
    pub active_sessions: usize,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn violations_of(err: DbError) -> crate::error::Violations {
        match err {
            DbError::InvalidConfiguration { violations, .. } => violations,
            other => panic!("expected InvalidConfiguration, got {other:?}"),
        }
    }

    #[test]
    fn test_minimal_record_gets_defaults() {
        let config = ConnectionConfig::from_record(&json!({
            "name": "db1",
            "dialect": "sqlite",
            "database": "file.db",
        }))
        .unwrap();

        assert_eq!(config.name(), "db1");
        assert_eq!(config.pool_size(), 5);
        assert_eq!(config.max_overflow(), 10);
        assert_eq!(config.max_connections(), 15);
        assert!(config.host().is_none());
        assert!(config.port().is_none());
        assert_eq!(config.database_type(), Some(DatabaseType::SQLite));
    }

    #[test]
    fn test_full_record() {
        let config = ConnectionConfig::from_record(&json!({
            "name": "warehouse",
            "dialect": "postgresql+psycopg2",
            "database": "data",
            "username": "merlin",
            "password": "abcdefghij",
            "host": "localhost",
            "port": 5432,
            "pool_size": 2,
            "max_overflow": 0,
        }))
        .unwrap();

        assert_eq!(config.family(), "postgresql");
        assert_eq!(config.database_type(), Some(DatabaseType::PostgreSQL));
        assert_eq!(config.port(), Some(5432));
        assert_eq!(config.password(), Some("abcdefghij"));
        assert_eq!(config.max_connections(), 2);
    }

    #[test]
    fn test_name_length_bounds() {
        for name in ["", "ab", "x".repeat(51).as_str()] {
            let err = ConnectionConfig::from_record(&json!({
                "name": name, "dialect": "sqlite", "database": "a.db",
            }))
            .unwrap_err();
            assert!(violations_of(err).contains_field("name"), "name {name:?}");
        }

        for name in ["abc", "x".repeat(50).as_str()] {
            assert!(
                ConnectionConfig::from_record(&json!({
                    "name": name, "dialect": "sqlite", "database": "a.db",
                }))
                .is_ok()
            );
        }
    }

    #[test]
    fn test_name_length_counts_characters() {
        // three characters, six bytes
        let config = ConnectionConfig::from_record(&json!({
            "name": "ééé", "dialect": "sqlite", "database": "a.db",
        }));
        assert!(config.is_ok());
    }

    #[test]
    fn test_port_range() {
        for port in [0, -1, 65536, 100000] {
            let err = ConnectionConfig::from_record(&json!({
                "name": "main", "dialect": "sqlite", "database": "a.db", "port": port,
            }))
            .unwrap_err();
            assert!(violations_of(err).contains_field("port"), "port {port}");
        }

        for port in [1, 65535] {
            let config = ConnectionConfig::from_record(&json!({
                "name": "main", "dialect": "sqlite", "database": "a.db", "port": port,
            }))
            .unwrap();
            assert_eq!(config.port(), Some(port as u16));
        }
    }

    #[test]
    fn test_null_optional_fields_are_absent() {
        let config = ConnectionConfig::from_record(&json!({
            "name": "main", "dialect": "sqlite", "database": "a.db",
            "port": null, "host": null, "username": null,
        }))
        .unwrap();
        assert!(config.port().is_none());
        assert!(config.host().is_none());
    }

    #[test]
    fn test_lax_integers() {
        let config = ConnectionConfig::from_record(&json!({
            "name": "main", "dialect": "mysql", "database": "sales",
            "port": "3306", "pool_size": 3.0,
        }))
        .unwrap();
        assert_eq!(config.port(), Some(3306));
        assert_eq!(config.pool_size(), 3);

        let err = ConnectionConfig::from_record(&json!({
            "name": "main", "dialect": "mysql", "database": "sales",
            "port": true, "pool_size": 2.5,
        }))
        .unwrap_err();
        let violations = violations_of(err);
        assert!(violations.contains_field("port"));
        assert!(violations.contains_field("pool_size"));
    }

    #[test]
    fn test_pool_sizing_bounds() {
        let err = ConnectionConfig::from_record(&json!({
            "name": "main", "dialect": "sqlite", "database": "a.db",
            "pool_size": 0, "max_overflow": -1,
        }))
        .unwrap_err();
        let violations = violations_of(err);
        assert!(violations.contains_field("pool_size"));
        assert!(violations.contains_field("max_overflow"));

        let config = ConnectionConfig::from_record(&json!({
            "name": "main", "dialect": "sqlite", "database": "a.db",
            "pool_size": 1, "max_overflow": 0,
        }))
        .unwrap();
        assert_eq!(config.max_connections(), 1);
    }

    #[test]
    fn test_missing_and_mistyped_required_fields() {
        let err = ConnectionConfig::from_record(&json!({ "name": 42 })).unwrap_err();
        let violations = violations_of(err);
        assert!(violations.contains_field("name"));
        assert!(violations.contains_field("dialect"));
        assert!(violations.contains_field("database"));
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_all_violations_reported_together() {
        let err = ConnectionConfig::from_record(&json!({
            "name": "ab",
            "dialect": "sqlite",
            "database": "a.db",
            "port": 70000,
            "pool_size": -3,
            "host": 7,
        }))
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("'ab'"));
        let violations = violations_of(err);
        assert_eq!(violations.len(), 4);
        for field in ["name", "port", "pool_size", "host"] {
            assert!(violations.contains_field(field), "missing {field}");
        }
    }

    #[test]
    fn test_non_object_record_rejected() {
        let err = ConnectionConfig::from_record(&json!(["main"])).unwrap_err();
        assert!(violations_of(err).contains_field("record"));
    }

    #[test]
    fn test_dialect_must_be_scheme_like() {
        for dialect in ["", "1sqlite", "postgres ql", "mysql/pymysql"] {
            let err = ConnectionConfig::from_record(&json!({
                "name": "main", "dialect": dialect, "database": "db",
            }))
            .unwrap_err();
            assert!(violations_of(err).contains_field("dialect"), "{dialect:?}");
        }
    }

    #[test]
    fn test_dialect_family() {
        assert_eq!(dialect_family("postgresql+psycopg2"), "postgresql");
        assert_eq!(dialect_family("MySQL+PyMySQL"), "mysql");
        assert_eq!(dialect_family("sqlite"), "sqlite");
        assert_eq!(dialect_family("a+b+c"), "a");
    }

    #[test]
    fn test_database_type_from_family() {
        assert_eq!(
            DatabaseType::from_family("postgres"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_family("mariadb"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(DatabaseType::from_family("oracle"), None);
    }

    #[test]
    fn test_deserialize_validates() {
        let configs: Vec<ConnectionConfig> = serde_json::from_str(
            r#"[{"name": "main", "dialect": "sqlite", "database": "a.db"}]"#,
        )
        .unwrap();
        assert_eq!(configs[0].name(), "main");

        let result: Result<ConnectionConfig, _> =
            serde_json::from_str(r#"{"name": "x", "dialect": "sqlite", "database": "a.db"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_skips_password() {
        let config = ConnectionConfig::from_record(&json!({
            "name": "main", "dialect": "postgresql", "database": "db",
            "username": "u", "password": "hunter2", "host": "h",
        }))
        .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("\"username\":\"u\""));
    }
}
