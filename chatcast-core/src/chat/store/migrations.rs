//! Database migrations for the chat message store
//!
//! Each migration is applied atomically and tracked in the
//! chat_schema_version table.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::info;

use crate::chat::errors::PersistenceError;
use crate::chat::types::Timestamp;

/// Current schema version of the chat store
pub const CURRENT_CHAT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial chat message schema",
        up_sql: r#"
            CREATE TABLE IF NOT EXISTS chat_schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );

            -- AUTOINCREMENT keeps ids strictly increasing, so id order is insertion order
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author TEXT NOT NULL CHECK(length(trim(author)) > 0),
                body TEXT NOT NULL CHECK(length(trim(body)) > 0),
                created_at INTEGER NOT NULL
            );
        "#,
    }]
}

fn current_version(pool: &Pool<SqliteConnectionManager>) -> Result<i32, PersistenceError> {
    let conn = pool.get()?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS chat_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM chat_schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> Result<(), PersistenceError> {
    let current = current_version(pool)?;
    let pending: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > current)
        .collect();

    if pending.is_empty() {
        return Ok(());
    }

    let conn = pool.get()?;
    for migration in pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up_sql)?;
        tx.execute(
            "INSERT INTO chat_schema_version (version, applied_at) VALUES (?1, ?2)",
            params![migration.version, Timestamp::now().as_millis() as i64],
        )?;
        tx.commit()?;

        info!(version = migration.version, "Applied chat store migration: {}", migration.description);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_pool() -> Pool<SqliteConnectionManager> {
        let manager = SqliteConnectionManager::memory();
        Pool::builder().max_size(1).build(manager).expect("Failed to create pool")
    }

    #[test]
    fn test_initial_migration() {
        let pool = setup_test_pool();
        migrate(&pool).expect("Migration failed");

        let conn = pool.get().unwrap();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert!(tables.contains(&"chat_messages".to_string()));
        assert!(tables.contains(&"chat_schema_version".to_string()));
    }

    #[test]
    fn test_idempotent_migrations() {
        let pool = setup_test_pool();

        migrate(&pool).expect("First migration failed");
        migrate(&pool).expect("Second migration failed");

        assert_eq!(current_version(&pool).unwrap(), CURRENT_CHAT_SCHEMA_VERSION);
    }

    #[test]
    fn test_blank_rows_rejected_by_schema() {
        let pool = setup_test_pool();
        migrate(&pool).unwrap();

        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO chat_messages (author, body, created_at) VALUES ('', 'hi', 0)",
            [],
        );
        assert!(result.is_err());
    }
}
