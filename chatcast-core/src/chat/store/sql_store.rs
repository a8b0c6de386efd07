//! SQL-based storage for chat messages

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

use super::{bounded, MessageStore};
use crate::chat::errors::{ChatResult, PersistenceError};
use crate::chat::types::{validate_submission, HistorySnapshot, Message, MessageId, Timestamp};

/// SQLite-backed message store
///
/// Blocking SQLite calls run on the blocking pool; every call is bounded by
/// `operation_timeout`. An append that times out is rolled back if it has not
/// committed yet, so a caller that saw a timeout never finds the message in a
/// later `list_all`.
pub struct SqlMessageStore {
    pool: Pool<SqliteConnectionManager>,
    operation_timeout: Duration,
}

impl SqlMessageStore {
    /// Create a store over an existing pool and run migrations
    pub fn new(
        pool: Pool<SqliteConnectionManager>,
        operation_timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        super::migrations::migrate(&pool)?;

        Ok(Self {
            pool,
            operation_timeout,
        })
    }

    /// Open (or create) a database file
    pub fn open(
        path: impl AsRef<Path>,
        pool_size: u32,
        operation_timeout: Duration,
    ) -> Result<Self, PersistenceError> {
        let manager = SqliteConnectionManager::file(path.as_ref())
            .with_init(move |conn| conn.busy_timeout(operation_timeout));
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(operation_timeout)
            .build(manager)?;

        Self::new(pool, operation_timeout)
    }

    /// Create an in-memory store
    ///
    /// The pool holds a single connection: every SQLite `:memory:`
    /// connection is its own database.
    pub fn memory(operation_timeout: Duration) -> Result<Self, PersistenceError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .connection_timeout(operation_timeout)
            .build(manager)?;

        Self::new(pool, operation_timeout)
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T, PersistenceError>
    where
        F: FnOnce(&Pool<SqliteConnectionManager>) -> Result<T, PersistenceError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        bounded(self.operation_timeout, async move {
            tokio::task::spawn_blocking(move || op(&pool))
                .await
                .map_err(|e| PersistenceError::Backend(format!("store task failed: {}", e)))?
        })
        .await
    }
}

#[async_trait]
impl MessageStore for SqlMessageStore {
    async fn append(&self, author: &str, body: &str) -> ChatResult<Message> {
        validate_submission(author, body)?;

        let pool = self.pool.clone();
        let gate = Arc::new(CommitGate::default());
        let task_gate = gate.clone();
        let (author, body) = (author.to_string(), body.to_string());

        let mut task =
            tokio::task::spawn_blocking(move || insert_message(&pool, author, body, &task_gate));

        let joined = match tokio::time::timeout(self.operation_timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                if gate.cancel() {
                    warn!(timeout = ?self.operation_timeout, "Append timed out, write cancelled");
                    return Err(PersistenceError::Timeout(self.operation_timeout).into());
                }
                // Committed just before the deadline: the message is durable, report it
                debug!("Append committed at the deadline");
                task.await
            }
        };

        let inserted = joined
            .map_err(|e| PersistenceError::Backend(format!("store task failed: {}", e)))??;
        inserted.ok_or_else(|| PersistenceError::Timeout(self.operation_timeout).into())
    }

    async fn list_all(&self) -> Result<HistorySnapshot, PersistenceError> {
        self.run_blocking(|pool| {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT id, author, body, created_at FROM chat_messages ORDER BY id ASC",
            )?;
            let messages = stmt
                .query_map([], |row| {
                    Ok(Message {
                        id: MessageId(row.get(0)?),
                        author: row.get(1)?,
                        body: row.get(2)?,
                        created_at: Timestamp(row.get::<_, i64>(3)?.max(0) as u64),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(HistorySnapshot::new(messages))
        })
        .await
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.run_blocking(|pool| {
            let conn = pool.get()?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

/// Insert inside a transaction, committing only if the caller is still waiting.
/// `Ok(None)` means the write was cancelled and rolled back.
fn insert_message(
    pool: &Pool<SqliteConnectionManager>,
    author: String,
    body: String,
    gate: &CommitGate,
) -> Result<Option<Message>, PersistenceError> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let created_at = Timestamp::now();

    tx.execute(
        "INSERT INTO chat_messages (author, body, created_at) VALUES (?1, ?2, ?3)",
        params![author, body, created_at.as_millis() as i64],
    )?;
    let id = tx.last_insert_rowid();

    if !gate.commit_with(|| tx.commit())? {
        return Ok(None);
    }

    Ok(Some(Message {
        id: MessageId(id),
        author,
        body,
        created_at,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum GateState {
    #[default]
    Pending,
    Cancelled,
    Committed,
}

/// Decides, exactly once, whether a write commits or is abandoned
#[derive(Debug, Default)]
struct CommitGate {
    state: Mutex<GateState>,
}

impl CommitGate {
    /// Run `commit` unless the waiter already gave up; returns whether it ran
    fn commit_with(
        &self,
        commit: impl FnOnce() -> Result<(), rusqlite::Error>,
    ) -> Result<bool, rusqlite::Error> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state == GateState::Cancelled {
            return Ok(false);
        }
        commit()?;
        *state = GateState::Committed;
        Ok(true)
    }

    /// Abandon the write; false if it has already committed
    fn cancel(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state == GateState::Committed {
            return false;
        }
        *state = GateState::Cancelled;
        true
    }
}
