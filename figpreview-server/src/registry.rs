//! Connection registry
//!
//! Tracks the live plugin connections and fans messages out to all of them.
//! Ids are handed out from a counter that starts at 1 and never repeats.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::idle::IdleBarrier;

/// Connection id, unique for the lifetime of the registry
pub type ConnectionId = u64;

/// Failure to deliver a message on one connection
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("connection closed")]
    Closed,

    #[error("websocket write failed: {0}")]
    WebSocket(#[from] axum::Error),
}

/// Write half of a plugin connection
#[async_trait]
pub trait PluginSink: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), SinkError>;
}

/// Broadcast stopped at the connection that failed
#[derive(Debug, thiserror::Error)]
#[error("Failed to write to socket #{id}: {source}")]
pub struct BroadcastError {
    pub id: ConnectionId,
    #[source]
    pub source: SinkError,
}

#[derive(Default)]
struct RegistryInner {
    last_id: ConnectionId,
    connections: BTreeMap<ConnectionId, Arc<dyn PluginSink>>,
}

/// Shared set of live plugin connections
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    idle: IdleBarrier,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            idle: IdleBarrier::new(),
        }
    }

    /// Barrier fired by `idle` signals and by the last connection leaving
    pub fn idle(&self) -> &IdleBarrier {
        &self.idle
    }

    /// Add a connection and return its id
    pub async fn register(&self, sink: Arc<dyn PluginSink>) -> ConnectionId {
        let mut inner = self.inner.lock().await;
        inner.last_id += 1;
        let id = inner.last_id;
        inner.connections.insert(id, sink);
        id
    }

    /// Remove a connection. Unknown ids are ignored.
    ///
    /// When this leaves the registry empty, outstanding idle waits are
    /// released: there is no one left to report idle.
    pub async fn unregister(&self, id: ConnectionId) {
        let mut inner = self.inner.lock().await;
        if inner.connections.remove(&id).is_none() {
            return;
        }
        if inner.connections.is_empty() {
            self.idle.fire();
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.connections.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.connections.is_empty()
    }

    /// Send `text` to every connection in id order.
    ///
    /// Stops at the first failure. Connections written before it keep the
    /// message, and the failed connection stays registered; its own read loop
    /// is responsible for tearing it down.
    pub async fn broadcast(&self, text: &str) -> Result<(), BroadcastError> {
        // Snapshot so slow writes never hold up register/unregister
        let targets: Vec<(ConnectionId, Arc<dyn PluginSink>)> = {
            let inner = self.inner.lock().await;
            inner
                .connections
                .iter()
                .map(|(id, sink)| (*id, sink.clone()))
                .collect()
        };

        for (id, sink) in targets {
            if let Err(source) = sink.send_text(text).await {
                tracing::warn!("Failed to write to socket #{}: {}", id, source);
                return Err(BroadcastError { id, source });
            }
            tracing::debug!("{} bytes written to socket #{}", text.len(), id);
        }
        Ok(())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    /// Sink that remembers everything written to it
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) sent: std::sync::Mutex<Vec<String>>,
    }

    impl RecordingSink {
        pub(crate) fn messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PluginSink for RecordingSink {
        async fn send_text(&self, text: &str) -> Result<(), SinkError> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    /// Sink whose writes always fail
    pub(crate) struct ClosedSink;

    #[async_trait]
    impl PluginSink for ClosedSink {
        async fn send_text(&self, _text: &str) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    #[tokio::test]
    async fn test_concurrent_registrations_get_distinct_ids() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.register(Arc::new(RecordingSink::default())).await
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        let expected: HashSet<ConnectionId> = (1..=32).collect();
        assert_eq!(ids, expected);
        assert_eq!(registry.len().await, 32);
    }

    #[tokio::test]
    async fn test_ids_are_not_reused() {
        let registry = ConnectionRegistry::new();
        let a = registry.register(Arc::new(RecordingSink::default())).await;
        registry.unregister(a).await;
        let b = registry.register(Arc::new(RecordingSink::default())).await;
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let id = registry.register(Arc::new(RecordingSink::default())).await;
        registry.unregister(id).await;
        registry.unregister(id).await;
        registry.unregister(999).await;
        assert!(registry.is_empty().await);
        // Only the removal that emptied the registry fired
        assert_eq!(registry.idle().generation(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let registry = ConnectionRegistry::new();
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        registry.register(a.clone()).await;
        registry.register(b.clone()).await;

        registry.broadcast("hello").await.unwrap();

        assert_eq!(a.messages(), vec!["hello"]);
        assert_eq!(b.messages(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_broadcast_partial_failure_keeps_earlier_delivery() {
        let registry = ConnectionRegistry::new();
        let a = Arc::new(RecordingSink::default());
        let c = Arc::new(RecordingSink::default());
        registry.register(a.clone()).await;
        let b_id = registry.register(Arc::new(ClosedSink)).await;
        registry.register(c.clone()).await;

        let err = registry.broadcast("scan").await.unwrap_err();

        assert_eq!(err.id, b_id);
        assert!(matches!(err.source, SinkError::Closed));
        assert_eq!(a.messages(), vec!["scan"]);
        assert!(c.messages().is_empty(), "broadcast must stop at the failure");
        assert_eq!(registry.len().await, 3, "failed connection stays registered");
    }

    #[tokio::test]
    async fn test_broadcast_with_no_connections() {
        let registry = ConnectionRegistry::new();
        registry.broadcast("nobody").await.unwrap();
    }

    #[tokio::test]
    async fn test_last_unregister_releases_wait() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry.register(Arc::new(RecordingSink::default())).await;
        let b = registry.register(Arc::new(RecordingSink::default())).await;

        let wait = registry.idle().arm();
        let waiter = tokio::spawn(wait.wait());

        registry.unregister(a).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "a connection is still live");

        registry.unregister(b).await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("emptying the registry should release the wait")
            .unwrap();
    }
}
