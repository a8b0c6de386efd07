//! In-memory message store

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::MessageStore;
use crate::chat::errors::{ChatResult, PersistenceError};
use crate::chat::types::{validate_submission, HistorySnapshot, Message, MessageId, Timestamp};

/// Process-local history. Appends serialize on the mutex.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.lock().await.len()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, author: &str, body: &str) -> ChatResult<Message> {
        validate_submission(author, body)?;

        let mut messages = self.messages.lock().await;
        let message = Message {
            id: MessageId(messages.len() as i64 + 1),
            author: author.to_string(),
            body: body.to_string(),
            created_at: Timestamp::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn list_all(&self) -> Result<HistorySnapshot, PersistenceError> {
        Ok(HistorySnapshot::new(self.messages.lock().await.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::errors::{ChatError, ValidationError};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_append_and_list() {
        let store = MemoryMessageStore::new();
        store.append("alice", "hi").await.unwrap();
        store.append("bob", "hey").await.unwrap();

        let history = store.list_all().await.unwrap();
        assert_eq!(history.entries(), vec![("alice", "hi"), ("bob", "hey")]);
        assert_eq!(history.messages()[0].id, MessageId(1));
        assert_eq!(history.messages()[1].id, MessageId(2));
    }

    #[tokio::test]
    async fn test_rejects_blank_without_side_effect() {
        let store = MemoryMessageStore::new();
        let err = store.append("", "hi").await.unwrap_err();
        assert_eq!(err, ChatError::Validation(ValidationError::EmptyAuthor));
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let store = Arc::new(MemoryMessageStore::new());
        let mut tasks = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.append("user", &format!("msg-{}", i)).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = store.list_all().await.unwrap();
        assert_eq!(history.len(), 50);
        let ids: Vec<i64> = history.messages().iter().map(|m| m.id.0).collect();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    }
}
