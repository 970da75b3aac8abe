//! Pooled engines.
//!
//! An `Engine` is one sqlx pool for one database target. Pools are opened lazily:
//! no physical connection exists until the first session or direct execution
//! needs one.

use crate::config::RegistryOptions;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, DatabaseType};
use sqlx::pool::PoolOptions;
use sqlx::{
    Database, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool, mysql::MySqlConnectOptions,
    postgres::PgConnectOptions, sqlite::SqliteConnectOptions,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

const IN_MEMORY_SQLITE: &str = "sqlite::memory:";

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum Engine {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl Engine {
    /// Open a lazily-connecting pool for the configuration.
    ///
    /// The pool holds at most `pool_size + max_overflow` connections. Must be called
    /// from within a Tokio runtime.
    pub fn open(config: &ConnectionConfig, options: &RegistryOptions) -> DbResult<Self> {
        let db_type = config.database_type().ok_or_else(|| {
            DbError::connection(
                format!(
                    "No engine backend for dialect '{}' (connection '{}')",
                    config.dialect(),
                    config.name()
                ),
                "Supported dialect families: postgresql, mysql, sqlite",
            )
        })?;

        let engine = match db_type {
            DatabaseType::PostgreSQL => {
                let mut connect = PgConnectOptions::new().database(config.database());
                if let Some(host) = config.host() {
                    connect = connect.host(host);
                }
                if let Some(port) = config.port() {
                    connect = connect.port(port);
                }
                if let Some(username) = config.username() {
                    connect = connect.username(username);
                }
                if let Some(password) = config.password() {
                    connect = connect.password(password);
                }
                Engine::Postgres(pool_options::<Postgres>(config, options).connect_lazy_with(connect))
            }
            DatabaseType::MySQL => {
                let mut connect = MySqlConnectOptions::new()
                    .database(config.database())
                    .charset("utf8mb4");
                if let Some(host) = config.host() {
                    connect = connect.host(host);
                }
                if let Some(port) = config.port() {
                    connect = connect.port(port);
                }
                if let Some(username) = config.username() {
                    connect = connect.username(username);
                }
                if let Some(password) = config.password() {
                    connect = connect.password(password);
                }
                Engine::MySql(pool_options::<MySql>(config, options).connect_lazy_with(connect))
            }
            DatabaseType::SQLite => {
                let in_memory = matches!(config.database(), "" | ":memory:");
                let connect = match config.database() {
                    "" | ":memory:" => {
                        SqliteConnectOptions::from_str(IN_MEMORY_SQLITE).map_err(|e| {
                            DbError::connection(
                                format!("Invalid SQLite options: {}", e),
                                "Use ':memory:' or a file path as the database",
                            )
                        })?
                    }
                    path => SqliteConnectOptions::new()
                        .filename(path)
                        .create_if_missing(true),
                };
                let mut pool = pool_options::<Sqlite>(config, options);
                if in_memory {
                    // The database lives only as long as one of its connections
                    pool = pool
                        .min_connections(1)
                        .idle_timeout(None::<Duration>)
                        .max_lifetime(None::<Duration>);
                }
                Engine::Sqlite(pool.connect_lazy_with(connect))
            }
        };

        debug!(
            connection = %config.name(),
            db_type = %db_type,
            max_connections = config.max_connections(),
            "Opened lazy connection pool"
        );
        Ok(engine)
    }

    /// Get the database type for this engine.
    pub fn database_type(&self) -> DatabaseType {
        match self {
            Engine::Postgres(_) => DatabaseType::PostgreSQL,
            Engine::MySql(_) => DatabaseType::MySQL,
            Engine::Sqlite(_) => DatabaseType::SQLite,
        }
    }

    /// Execute a statement directly on the pool, bypassing sessions.
    ///
    /// Returns the number of affected rows.
    pub async fn execute(&self, sql: &str) -> DbResult<u64> {
        let rows = dispatch!(Engine, self, pool => sqlx::query(sql)
            .execute(pool)
            .await
            .map_err(|e| self.map_error(e))?
            .rows_affected());
        Ok(rows)
    }

    /// Query the server version, opening a connection if none exists yet.
    pub async fn server_version(&self) -> DbResult<String> {
        let sql = match self.database_type() {
            DatabaseType::SQLite => "SELECT sqlite_version()",
            DatabaseType::PostgreSQL | DatabaseType::MySQL => "SELECT version()",
        };
        let version = dispatch!(Engine, self, pool => sqlx::query_scalar::<_, String>(sql)
            .fetch_one(pool)
            .await
            .map_err(|e| self.map_error(e))?);
        Ok(version)
    }

    /// Check connectivity by fetching the server version.
    pub async fn verify(&self) -> DbResult<String> {
        match self.server_version().await {
            Ok(version) => {
                debug!(version = %version, "Got server version");
                Ok(version)
            }
            Err(e) => {
                warn!(error = %e, "Failed to verify connection");
                Err(DbError::connection(
                    format!("Failed to connect: {}", e),
                    connection_suggestion(self.database_type(), &e),
                ))
            }
        }
    }

    /// Close the pool, waiting for checked-out connections to be returned.
    pub async fn close(&self) {
        dispatch!(Engine, self, pool => pool.close().await)
    }

    /// Mark the pool closed without waiting for checked-out connections.
    ///
    /// New acquires fail at once. Connections are released as they come back or
    /// when the last pool handle drops.
    pub fn mark_closed(&self) {
        // sqlx marks the pool closed before the returned future is first polled
        dispatch!(Engine, self, pool => drop(pool.close()))
    }

    pub fn is_closed(&self) -> bool {
        dispatch!(Engine, self, pool => pool.is_closed())
    }

    /// Number of open connections (idle and in use).
    pub fn size(&self) -> u32 {
        dispatch!(Engine, self, pool => pool.size())
    }

    /// Number of idle connections.
    pub fn num_idle(&self) -> usize {
        dispatch!(Engine, self, pool => pool.num_idle())
    }

    /// How long an acquire waits for a free connection.
    pub fn acquire_timeout(&self) -> Duration {
        dispatch!(Engine, self, pool => pool.options().get_acquire_timeout())
    }

    /// Convert a driver error, reporting pool timeouts with the configured limit.
    pub(crate) fn map_error(&self, err: sqlx::Error) -> DbError {
        match err {
            sqlx::Error::PoolTimedOut => DbError::timeout(
                "connection pool acquire",
                self.acquire_timeout().as_secs(),
            ),
            other => other.into(),
        }
    }
}

fn pool_options<DB: Database>(
    config: &ConnectionConfig,
    options: &RegistryOptions,
) -> PoolOptions<DB> {
    PoolOptions::<DB>::new()
        .min_connections(0)
        .max_connections(config.max_connections())
        .acquire_timeout(options.acquire_timeout())
        .idle_timeout(Some(options.idle_timeout()))
        .test_before_acquire(options.test_before_acquire)
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(db_type: DatabaseType, error: &DbError) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!(
            "Check that the {} server is running and accessible",
            db_type
        );
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password of the connection".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match db_type {
        DatabaseType::PostgreSQL | DatabaseType::MySQL => format!(
            "Verify host and port (default {}) of the {} server",
            db_type.default_port().unwrap_or_default(),
            db_type
        ),
        DatabaseType::SQLite => {
            "Verify the file path exists and is accessible".to_string()
        }
    }
}
