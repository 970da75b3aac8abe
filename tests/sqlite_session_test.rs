//! Integration tests for sessions on an on-disk SQLite database.
//!
//! Tests verify that:
//! - The database file is created on first use
//! - Transactions commit and roll back
//! - Engines and sessions of one connection see the same data
//! - Data survives closing and re-registering the connection

use db_registry::db::{ConnectionRegistry, Session, SessionConnection};
use db_registry::DbError;
use serde_json::json;
use tempfile::TempDir;

async fn setup_file_db(dir: &TempDir) -> (ConnectionRegistry, String) {
    let db_path = dir.path().join("ledger.db").to_str().unwrap().to_string();
    let registry = ConnectionRegistry::from_records(&[json!({
        "name": "ledger",
        "dialect": "sqlite",
        "database": db_path,
        "pool_size": 2,
        "max_overflow": 0,
    })])
    .await
    .unwrap();

    let engine = registry.engine("ledger").unwrap();
    engine
        .execute("CREATE TABLE entries (id INTEGER PRIMARY KEY, memo TEXT NOT NULL, amount INTEGER)")
        .await
        .unwrap();

    (registry, db_path)
}

async fn count_entries(session: &mut Session) -> i64 {
    match session.connection().await.unwrap() {
        SessionConnection::Sqlite(conn) => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM entries")
                .fetch_one(&mut **conn)
                .await
                .unwrap()
        }
        other => panic!("expected SQLite connection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_file_is_created_on_first_use() {
    let dir = TempDir::new().unwrap();
    let (mut registry, db_path) = setup_file_db(&dir).await;

    assert!(std::path::Path::new(&db_path).exists());
    let summary = &registry.summaries()[0];
    // Absolute paths keep their leading slash after the empty authority
    assert_eq!(summary.url, format!("sqlite:///{}", db_path));

    registry.close_all().await;
}

#[tokio::test]
async fn test_transaction_commit() {
    let dir = TempDir::new().unwrap();
    let (mut registry, _) = setup_file_db(&dir).await;

    {
        let mut session = registry.session("ledger").unwrap();
        let mut tx = session.begin().await.unwrap();
        let rows = tx
            .execute("INSERT INTO entries (memo, amount) VALUES ('rent', -1200), ('salary', 3000)")
            .await
            .unwrap();
        assert_eq!(rows, 2);
        tx.commit().await.unwrap();
        assert_eq!(count_entries(&mut session).await, 2);
    }

    // A second session sees the committed rows
    let mut other = registry.session("ledger").unwrap();
    assert_eq!(count_entries(&mut other).await, 2);
    drop(other);

    registry.close_all().await;
}

#[tokio::test]
async fn test_transaction_rollback() {
    let dir = TempDir::new().unwrap();
    let (mut registry, _) = setup_file_db(&dir).await;

    {
        let mut session = registry.session("ledger").unwrap();
        session
            .execute("INSERT INTO entries (memo, amount) VALUES ('opening', 100)")
            .await
            .unwrap();

        let mut tx = session.begin().await.unwrap();
        tx.execute("DELETE FROM entries").await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(count_entries(&mut session).await, 1);

        // Dropping an uncommitted transaction rolls it back
        {
            let mut tx = session.begin().await.unwrap();
            tx.execute("INSERT INTO entries (memo, amount) VALUES ('lost', 1)")
                .await
                .unwrap();
        }
        assert_eq!(count_entries(&mut session).await, 1);
    }

    registry.close_all().await;
}

#[tokio::test]
async fn test_sql_errors_are_database_errors() {
    let dir = TempDir::new().unwrap();
    let (mut registry, _) = setup_file_db(&dir).await;

    {
        let mut session = registry.session("ledger").unwrap();
        let err = session
            .execute("INSERT INTO entries (amount) VALUES (5)")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));

        let err = session.execute("SELEC 1").await.unwrap_err();
        assert!(matches!(err, DbError::Database { .. }));
    }

    registry.close_all().await;
}

#[tokio::test]
async fn test_data_survives_reregistration() {
    let dir = TempDir::new().unwrap();
    let (mut registry, db_path) = setup_file_db(&dir).await;

    registry
        .engine("ledger")
        .unwrap()
        .execute("INSERT INTO entries (memo, amount) VALUES ('kept', 42)")
        .await
        .unwrap();
    registry.close_all().await;

    let mut registry = ConnectionRegistry::from_records(&[json!({
        "name": "ledger", "dialect": "sqlite", "database": db_path,
    })])
    .await
    .unwrap();
    {
        let mut session = registry.session("ledger").unwrap();
        assert_eq!(count_entries(&mut session).await, 1);
    }
    registry.close_all().await;
}
