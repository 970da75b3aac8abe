//! Session factories and sessions.
//!
//! A `SessionFactory` is bound to one engine and hands out `Session`s, keeping
//! count of the ones still alive. A session is a unit-of-work handle: it checks
//! out a pooled connection on first use and keeps it until closed or dropped, so
//! transactions begun on it see a single physical connection.
//!
//! Closing the factory invalidates every session it produced: new sessions are
//! refused and existing ones release their connection and fail further use.

use crate::db::engine::Engine;
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use sqlx::pool::PoolConnection;
use sqlx::{MySql, Postgres, Sqlite, Transaction};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};
use uuid::Uuid;

/// State shared between a factory and the sessions it created.
#[derive(Debug)]
struct FactoryState {
    connection: String,
    closed: AtomicBool,
    /// Count of sessions not yet dropped.
    active_count: AtomicUsize,
}

impl FactoryState {
    fn increment_active(&self) {
        self.active_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Saturates at 0 to prevent underflow from extra release calls.
    fn decrement_active(&self) {
        let result = self
            .active_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                Some(count.saturating_sub(1))
            });

        if let Ok(0) = result {
            warn!(
                connection = %self.connection,
                "Active session count underflow detected - extra release call"
            );
        }
    }

    fn active_count(&self) -> usize {
        self.active_count.load(Ordering::Acquire)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Produces sessions bound to one engine.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    engine: Engine,
    state: Arc<FactoryState>,
}

impl SessionFactory {
    /// Create a factory for the named connection.
    pub fn new(connection: impl Into<String>, engine: Engine) -> Self {
        Self {
            engine,
            state: Arc::new(FactoryState {
                connection: connection.into(),
                closed: AtomicBool::new(false),
                active_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Create a new session. No connection is checked out until the session is used.
    pub fn session(&self) -> DbResult<Session> {
        if self.state.is_closed() {
            return Err(closed_error(&self.state.connection));
        }

        self.state.increment_active();
        let session = Session {
            id: Uuid::new_v4(),
            engine: self.engine.clone(),
            conn: None,
            state: Arc::clone(&self.state),
        };
        debug!(
            connection = %self.state.connection,
            session = %session.id,
            active = self.state.active_count(),
            "Created session"
        );
        Ok(session)
    }

    /// The engine this factory is bound to.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Number of sessions created by this factory and not yet dropped.
    pub fn active_sessions(&self) -> usize {
        self.state.active_count()
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Stop handing out sessions and invalidate the existing ones.
    pub fn close(&self) {
        if self.state.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let active = self.state.active_count();
        if active > 0 {
            warn!(
                connection = %self.state.connection,
                active_sessions = active,
                "Closing session factory with sessions still alive"
            );
        } else {
            debug!(connection = %self.state.connection, "Closed session factory");
        }
    }
}

fn closed_error(connection: &str) -> DbError {
    DbError::connection(
        format!("Session factory for connection '{}' is closed", connection),
        "Sessions cannot be used after close_all; build a new registry to reconnect",
    )
}

/// A pooled connection checked out by a session.
#[derive(Debug)]
pub enum SessionConnection {
    Postgres(PoolConnection<Postgres>),
    MySql(PoolConnection<MySql>),
    Sqlite(PoolConnection<Sqlite>),
}

impl SessionConnection {
    async fn acquire(engine: &Engine) -> DbResult<Self> {
        let conn = match engine {
            Engine::Postgres(pool) => SessionConnection::Postgres(
                pool.acquire().await.map_err(|e| engine.map_error(e))?,
            ),
            Engine::MySql(pool) => {
                SessionConnection::MySql(pool.acquire().await.map_err(|e| engine.map_error(e))?)
            }
            Engine::Sqlite(pool) => {
                SessionConnection::Sqlite(pool.acquire().await.map_err(|e| engine.map_error(e))?)
            }
        };
        Ok(conn)
    }

    pub fn database_type(&self) -> DatabaseType {
        match self {
            SessionConnection::Postgres(_) => DatabaseType::PostgreSQL,
            SessionConnection::MySql(_) => DatabaseType::MySQL,
            SessionConnection::Sqlite(_) => DatabaseType::SQLite,
        }
    }
}

/// Unit-of-work handle bound to one connection's engine.
///
/// Transaction boundaries are the caller's responsibility: use [`Session::begin`]
/// and commit or roll back the returned transaction.
pub struct Session {
    id: Uuid,
    engine: Engine,
    conn: Option<SessionConnection>,
    state: Arc<FactoryState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection", &self.state.connection)
            .field("connected", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the registry connection this session belongs to.
    pub fn connection_name(&self) -> &str {
        &self.state.connection
    }

    pub fn database_type(&self) -> DatabaseType {
        self.engine.database_type()
    }

    /// Whether a pooled connection is currently checked out.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Get the session's connection, checking one out of the pool on first use.
    ///
    /// The returned connection can be used with any sqlx query API.
    pub async fn connection(&mut self) -> DbResult<&mut SessionConnection> {
        self.ensure_open()?;
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let conn = SessionConnection::acquire(&self.engine).await?;
                debug!(
                    connection = %self.state.connection,
                    session = %self.id,
                    "Checked out pooled connection"
                );
                conn
            }
        };
        Ok(self.conn.insert(conn))
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let conn = self.connection().await?;
        let rows = dispatch!(SessionConnection, conn, c => sqlx::query(sql)
            .execute(&mut **c)
            .await?
            .rows_affected());
        Ok(rows)
    }

    /// Begin a transaction on this session's connection.
    ///
    /// Dropping the transaction without committing rolls it back.
    pub async fn begin(&mut self) -> DbResult<SessionTransaction<'_>> {
        let conn = self.connection().await?;
        let tx = match conn {
            SessionConnection::Postgres(c) => {
                SessionTransaction::Postgres(sqlx::Connection::begin(&mut **c).await?)
            }
            SessionConnection::MySql(c) => {
                SessionTransaction::MySql(sqlx::Connection::begin(&mut **c).await?)
            }
            SessionConnection::Sqlite(c) => {
                SessionTransaction::Sqlite(sqlx::Connection::begin(&mut **c).await?)
            }
        };
        Ok(tx)
    }

    /// Return the checked-out connection to the pool. The session stays usable.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!(
                connection = %self.state.connection,
                session = %self.id,
                "Returned pooled connection"
            );
        }
    }

    fn ensure_open(&mut self) -> DbResult<()> {
        if self.state.is_closed() || self.engine.is_closed() {
            // Hand the connection back so the pool can drain
            self.conn = None;
            return Err(closed_error(&self.state.connection));
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.state.decrement_active();
    }
}

/// A transaction running on a session's connection.
pub enum SessionTransaction<'c> {
    Postgres(Transaction<'c, Postgres>),
    MySql(Transaction<'c, MySql>),
    Sqlite(Transaction<'c, Sqlite>),
}

impl std::fmt::Debug for SessionTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self {
            SessionTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            SessionTransaction::MySql(_) => DatabaseType::MySQL,
            SessionTransaction::Sqlite(_) => DatabaseType::SQLite,
        };
        f.debug_tuple("SessionTransaction").field(&backend).finish()
    }
}

impl SessionTransaction<'_> {
    /// Execute a statement inside the transaction.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let rows = dispatch!(SessionTransaction, self, tx => sqlx::query(sql)
            .execute(&mut **tx)
            .await?
            .rows_affected());
        Ok(rows)
    }

    pub async fn commit(self) -> DbResult<()> {
        dispatch!(SessionTransaction, self, tx => tx.commit().await?);
        Ok(())
    }

    pub async fn rollback(self) -> DbResult<()> {
        dispatch!(SessionTransaction, self, tx => tx.rollback().await?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryOptions;
    use crate::models::ConnectionConfig;
    use serde_json::json;

    fn memory_factory() -> SessionFactory {
        let config = ConnectionConfig::from_record(&json!({
            "name": "scratch", "dialect": "sqlite", "database": ":memory:",
        }))
        .unwrap();
        let engine = Engine::open(&config, &RegistryOptions::default()).unwrap();
        SessionFactory::new("scratch", engine)
    }

    async fn count_rows(session: &mut Session) -> i64 {
        match session.connection().await.unwrap() {
            SessionConnection::Sqlite(conn) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM items")
                    .fetch_one(&mut **conn)
                    .await
                    .unwrap()
            }
            other => panic!("expected SQLite connection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sessions_are_counted() {
        let factory = memory_factory();
        let first = factory.session().unwrap();
        let second = factory.session().unwrap();
        assert_eq!(factory.active_sessions(), 2);
        assert_ne!(first.id(), second.id());
        assert_eq!(first.connection_name(), "scratch");

        drop(first);
        assert_eq!(factory.active_sessions(), 1);
        drop(second);
        assert_eq!(factory.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_session_connects_lazily() {
        let factory = memory_factory();
        let mut session = factory.session().unwrap();
        assert!(!session.is_connected());

        session.execute("SELECT 1").await.unwrap();
        assert!(session.is_connected());

        session.close();
        assert!(!session.is_connected());
        session.execute("SELECT 1").await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_commit_and_rollback() {
        let factory = memory_factory();
        let mut session = factory.session().unwrap();
        session
            .execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        let mut tx = session.begin().await.unwrap();
        tx.execute("INSERT INTO items (name) VALUES ('kept')")
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(count_rows(&mut session).await, 1);

        let mut tx = session.begin().await.unwrap();
        assert_eq!(
            tx.execute("INSERT INTO items (name) VALUES ('discarded')")
                .await
                .unwrap(),
            1
        );
        tx.rollback().await.unwrap();
        assert_eq!(count_rows(&mut session).await, 1);

        {
            let mut tx = session.begin().await.unwrap();
            tx.execute("INSERT INTO items (name) VALUES ('dropped')")
                .await
                .unwrap();
        }
        assert_eq!(count_rows(&mut session).await, 1);
    }

    #[tokio::test]
    async fn test_closed_factory_invalidates_sessions() {
        let factory = memory_factory();
        let mut session = factory.session().unwrap();
        session.execute("SELECT 1").await.unwrap();

        factory.close();
        assert!(factory.is_closed());

        let err = session.execute("SELECT 1").await.unwrap_err();
        assert!(err.to_string().contains("is closed"));
        assert!(!session.is_connected());

        let err = factory.session().unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
    }

    #[tokio::test]
    async fn test_closed_engine_invalidates_sessions() {
        let factory = memory_factory();
        let mut session = factory.session().unwrap();
        factory.engine().close().await;
        assert!(session.execute("SELECT 1").await.is_err());
    }

    #[test]
    fn test_active_count_saturates() {
        let state = FactoryState {
            connection: "scratch".to_string(),
            closed: AtomicBool::new(false),
            active_count: AtomicUsize::new(0),
        };
        state.decrement_active();
        assert_eq!(state.active_count(), 0);
        state.increment_active();
        state.decrement_active();
        assert_eq!(state.active_count(), 0);
    }
}
