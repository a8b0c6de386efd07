//! Async test helpers for peer channels

use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::chat::{HistorySnapshot, OutboundEvent, HISTORY_EVENT};

/// Default timeout for tests that expect an event
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait before concluding that nothing is coming
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvTimeoutError {
    #[error("receive operation timed out")]
    Timeout,
    #[error("channel closed")]
    Closed,
}

pub async fn recv_timeout<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    duration: Duration,
) -> Result<T, RecvTimeoutError> {
    timeout(duration, rx.recv())
        .await
        .map_err(|_| RecvTimeoutError::Timeout)?
        .ok_or(RecvTimeoutError::Closed)
}

/// Next event named `name`, discarding anything else on the way
pub async fn recv_named(
    rx: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    name: &str,
) -> Result<OutboundEvent, RecvTimeoutError> {
    timeout(DEFAULT_TEST_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Some(event) if event.name() == name => return Ok(event),
                Some(_) => continue,
                None => return Err(RecvTimeoutError::Closed),
            }
        }
    })
    .await
    .map_err(|_| RecvTimeoutError::Timeout)?
}

/// Wait for a history snapshot holding at least `len` messages
pub async fn recv_history_of_len(
    rx: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    len: usize,
) -> Result<HistorySnapshot, RecvTimeoutError> {
    timeout(DEFAULT_TEST_TIMEOUT, async {
        loop {
            let event = rx.recv().await.ok_or(RecvTimeoutError::Closed)?;
            if event.name() != HISTORY_EVENT {
                continue;
            }
            if let Some(history) = event.history() {
                if history.len() >= len {
                    return Ok(history);
                }
            }
        }
    })
    .await
    .map_err(|_| RecvTimeoutError::Timeout)?
}

/// Everything currently queued, without waiting
pub fn try_drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut results = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        results.push(msg);
    }
    results
}

/// Panic if anything arrives within [`SHORT_TEST_TIMEOUT`]
pub async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(msg)) = timeout(SHORT_TEST_TIMEOUT, rx.recv()).await {
        panic!("Expected no event, got {:?}", msg);
    }
}

pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recv_timeout_on_idle_channel() {
        let (_tx, mut rx) = mpsc::unbounded_channel::<u8>();
        assert_eq!(
            recv_timeout(&mut rx, Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[tokio::test]
    async fn test_recv_named_skips_other_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(OutboundEvent::new("peerJoined", json!({}))).unwrap();
        tx.send(OutboundEvent::new("updatedProducts", json!([1]))).unwrap();

        let event = recv_named(&mut rx, "updatedProducts").await.unwrap();
        assert_eq!(event.payload(), &json!([1]));
        assert!(try_drain(&mut rx).is_empty());
    }
}
