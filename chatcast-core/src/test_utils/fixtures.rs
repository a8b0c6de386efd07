//! Fixtures: peer transports, stores that can be switched off or held back,
//! and ready-made services and dispatchers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;

use crate::chat::{
    ChatBroadcastService, ChatDispatcher, ChatResult, DispatcherHandle, EphemeralRelay,
    HistorySnapshot, MemoryMessageStore, Message, MessageStore, OutboundEvent, PeerSink,
    PersistenceError, TransportError,
};
use crate::chat::types::validate_submission;
use crate::config::ChatConfig;
use crate::shutdown::ShutdownSignal;

/// An unbounded peer transport and the receiving end a test reads from
pub fn peer_channel() -> (Box<dyn PeerSink>, mpsc::UnboundedReceiver<OutboundEvent>) {
    let (tx, rx) = mpsc::unbounded_channel::<OutboundEvent>();
    (Box::new(tx), rx)
}

/// A sink whose transport is already broken
#[derive(Debug, Clone)]
pub struct FailingSink {
    error: TransportError,
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    pub fn closed() -> Self {
        Self::with_error(TransportError::Closed)
    }

    pub fn with_error(error: TransportError) -> Self {
        Self {
            error,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deliveries attempted so far, across clones
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl PeerSink for FailingSink {
    fn deliver(&self, _event: OutboundEvent) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error)
    }
}

/// In-memory store that can be made unreachable
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryMessageStore,
    unreachable: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.unreachable.store(!reachable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PersistenceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("store switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn append(&self, author: &str, body: &str) -> ChatResult<Message> {
        validate_submission(author, body)?;
        self.check()?;
        self.inner.append(author, body).await
    }

    async fn list_all(&self) -> Result<HistorySnapshot, PersistenceError> {
        self.check()?;
        self.inner.list_all().await
    }

    async fn ping(&self) -> Result<(), PersistenceError> {
        self.check()
    }
}

/// In-memory store whose appends wait until the test lets them through.
/// Reads are never held back.
#[derive(Debug)]
pub struct GatedStore {
    inner: MemoryMessageStore,
    gate: Semaphore,
}

impl Default for GatedStore {
    fn default() -> Self {
        Self {
            inner: MemoryMessageStore::new(),
            gate: Semaphore::new(0),
        }
    }
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `appends` more appends complete
    pub fn release(&self, appends: usize) {
        self.gate.add_permits(appends);
    }

    /// Messages committed so far
    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl MessageStore for GatedStore {
    async fn append(&self, author: &str, body: &str) -> ChatResult<Message> {
        validate_submission(author, body)?;
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| PersistenceError::Unavailable("gate closed".to_string()))?;
        permit.forget();
        self.inner.append(author, body).await
    }

    async fn list_all(&self) -> Result<HistorySnapshot, PersistenceError> {
        self.inner.list_all().await
    }
}

/// Broadcast service over `store` with the default relay routes
pub fn chat_service(store: Arc<dyn MessageStore>) -> ChatBroadcastService {
    ChatBroadcastService::new(store, EphemeralRelay::new(&ChatConfig::default().relay_routes))
}

/// A running dispatcher; dropping it shuts the dispatcher down
pub struct TestChat {
    pub handle: DispatcherHandle,
    pub task: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl TestChat {
    pub fn start(store: Arc<dyn MessageStore>) -> Self {
        Self::start_with(chat_service(store), ChatConfig::default().max_pending_per_connection)
    }

    /// Run `service` behind a dispatcher that queues at most `max_pending`
    /// submissions per connection
    pub fn start_with(service: ChatBroadcastService, max_pending: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (handle, task) = ChatDispatcher::spawn(service, 256, max_pending, shutdown_rx);
        Self {
            handle,
            task,
            shutdown_tx,
        }
    }

    pub fn with_memory_store() -> Self {
        Self::start(Arc::new(MemoryMessageStore::new()))
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(ShutdownSignal::Graceful);
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatError, ValidationError};
    use serde_json::json;

    #[test]
    fn test_failing_sink_counts_attempts() {
        let sink = FailingSink::with_error(TransportError::Backpressure);
        let observer = sink.clone();
        assert_eq!(
            sink.deliver(OutboundEvent::new("peerJoined", json!({}))),
            Err(TransportError::Backpressure)
        );
        assert_eq!(observer.attempts(), 1);
    }

    #[tokio::test]
    async fn test_flaky_store_toggle() {
        let store = FlakyStore::new();
        store.append("alice", "before").await.unwrap();

        store.set_reachable(false);
        assert!(matches!(
            store.append("alice", "during").await,
            Err(ChatError::Persistence(PersistenceError::Unavailable(_)))
        ));
        assert!(store.ping().await.is_err());

        store.set_reachable(true);
        assert_eq!(store.list_all().await.unwrap().entries(), vec![("alice", "before")]);
    }

    #[tokio::test]
    async fn test_flaky_store_still_validates() {
        let store = FlakyStore::new();
        assert_eq!(
            store.append("", "x").await,
            Err(ChatError::Validation(ValidationError::EmptyAuthor))
        );

        store.set_reachable(false);
        assert_eq!(
            store.append("alice", "  ").await,
            Err(ChatError::Validation(ValidationError::EmptyBody))
        );
    }

    #[tokio::test]
    async fn test_gated_store_holds_appends() {
        let store = Arc::new(GatedStore::new());
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.append("alice", "held").await }
        });

        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        assert_eq!(store.len().await, 0);

        store.release(1);
        pending.await.unwrap().unwrap();
        assert_eq!(store.list_all().await.unwrap().entries(), vec![("alice", "held")]);
    }
}
