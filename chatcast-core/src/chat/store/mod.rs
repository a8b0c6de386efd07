//! Message Store
//!
//! Persists chat messages and hands back the full ordered history.
//!
//! Backends:
//! - [`SqlMessageStore`]: SQLite behind an r2d2 pool, the production backend
//! - [`MemoryMessageStore`]: process-local history for tests and ephemeral deployments
//!
//! Appends serialize: every `list_all` observes a consistent prefix of the
//! append sequence. A failed append leaves no trace in the history. The store
//! never retries on its own.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::errors::{ChatResult, PersistenceError};
use super::types::{HistorySnapshot, Message};
use crate::config::{StoreBackend, StoreConfig};

pub mod memory_store;
pub mod migrations;
pub mod sql_store;

pub use memory_store::MemoryMessageStore;
pub use migrations::{migrate, CURRENT_CHAT_SCHEMA_VERSION};
pub use sql_store::SqlMessageStore;

/// Ordered, persistent chat history
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message. Blank author or body fails with a validation
    /// error before anything is written.
    async fn append(&self, author: &str, body: &str) -> ChatResult<Message>;

    /// The full history, oldest first
    async fn list_all(&self) -> Result<HistorySnapshot, PersistenceError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

/// Open the backend selected in the configuration
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn MessageStore>, PersistenceError> {
    match config.backend {
        StoreBackend::Sqlite => {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| PersistenceError::Unavailable(e.to_string()))?;
                }
            }
            let store = SqlMessageStore::open(&config.path, config.pool_size, config.operation_timeout)?;
            Ok(Arc::new(store))
        }
        StoreBackend::Memory => Ok(Arc::new(MemoryMessageStore::new())),
    }
}

/// Bound a store future by `limit`, turning expiry into [`PersistenceError::Timeout`]
pub(crate) async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, PersistenceError>
where
    F: std::future::Future<Output = Result<T, PersistenceError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| PersistenceError::Timeout(limit))?
}
