//! Plugin WebSocket connections
//!
//! Each connection is registered for broadcasts and then read until it
//! closes. An `idle` payload releases whoever is waiting on the idle barrier.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex;

use crate::protocol::{payload_preview, PluginSignal};
use crate::registry::{ConnectionRegistry, PluginSink, SinkError};

/// Write half of a plugin WebSocket
pub struct WsSink {
    tx: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsSink {
    pub fn new(tx: SplitSink<WebSocket, Message>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

#[async_trait]
impl PluginSink for WsSink {
    async fn send_text(&self, text: &str) -> Result<(), SinkError> {
        let mut tx = self.tx.lock().await;
        tx.send(Message::Text(text.to_string())).await?;
        Ok(())
    }
}

/// Serve one plugin connection from registration to cleanup
pub async fn handle_connection(socket: WebSocket, registry: Arc<ConnectionRegistry>) {
    let (tx, mut rx) = socket.split();
    let id = registry.register(Arc::new(WsSink::new(tx))).await;
    tracing::info!("Connected socket #{}", id);

    while let Some(msg) = rx.next().await {
        let payload = match msg {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("Socket #{} read error: {}", id, e);
                break;
            }
        };

        tracing::debug!(
            "{} bytes read from socket #{}: {}",
            payload.len(),
            id,
            payload_preview(&payload)
        );

        match PluginSignal::parse(&payload) {
            Some(PluginSignal::Idle) => registry.idle().fire(),
            None => tracing::debug!("Ignoring unrecognized payload from socket #{}", id),
        }
    }

    tracing::info!("Socket #{} closed", id);
    registry.unregister(id).await;
    tracing::info!("Socket #{} connection cleaned up", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use figpreview_core::AppConfig;
    use tempfile::TempDir;
    use tokio::net::TcpListener;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    use crate::{create_router, AppState};

    const LIMIT: Duration = Duration::from_secs(2);

    /// Serve the full router on an ephemeral port
    async fn start_test_server(dir: &TempDir) -> (SocketAddr, Arc<AppState>) {
        let config = AppConfig {
            data_root: dir.path().to_path_buf(),
            idle_timeout_secs: 2,
            ..Default::default()
        };
        let state = AppState::new(&config);
        state.roots.ensure_exist().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = create_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, state)
    }

    async fn wait_for_connections(registry: &ConnectionRegistry, expected: usize) {
        tokio::time::timeout(LIMIT, async {
            while registry.len().await != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connection count never settled");
    }

    #[tokio::test]
    async fn test_plugin_round_trip_over_websocket() {
        let dir = TempDir::new().unwrap();
        let (addr, state) = start_test_server(&dir).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_connections(&state.registry, 1).await;

        let scan = {
            let state = state.clone();
            tokio::spawn(async move { state.control.scan_assets(false).await })
        };

        let msg = ws.next().await.unwrap().unwrap();
        assert_eq!(msg.to_text().unwrap(), r#"{"action":"scanAssets","force":false}"#);

        // Anything but the exact idle payload is ignored
        ws.send(WsMessage::Text("idle ".into())).await.unwrap();
        ws.send(WsMessage::Text("busy".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!scan.is_finished(), "non-idle payload released the scan");

        ws.send(WsMessage::Text("idle".into())).await.unwrap();
        tokio::time::timeout(LIMIT, scan)
            .await
            .expect("idle did not release the scan")
            .unwrap()
            .unwrap();

        ws.close(None).await.unwrap();
        wait_for_connections(&state.registry, 0).await;
    }

    #[tokio::test]
    async fn test_binary_idle_releases_armed_wait() {
        let dir = TempDir::new().unwrap();
        let (addr, state) = start_test_server(&dir).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_connections(&state.registry, 1).await;

        let wait = state.registry.idle().arm();
        ws.send(WsMessage::Binary(b"idle".to_vec().into()))
            .await
            .unwrap();

        tokio::time::timeout(LIMIT, wait.wait())
            .await
            .expect("binary idle did not fire the barrier");
        assert_eq!(state.registry.idle().generation(), 1);
    }

    #[tokio::test]
    async fn test_dropped_connection_is_unregistered() {
        let dir = TempDir::new().unwrap();
        let (addr, state) = start_test_server(&dir).await;

        let (first, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        let (second, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        wait_for_connections(&state.registry, 2).await;

        // No close frame: the server sees a read error or end of stream
        let wait = state.registry.idle().arm();
        drop(first);
        wait_for_connections(&state.registry, 1).await;

        drop(second);
        wait_for_connections(&state.registry, 0).await;
        tokio::time::timeout(LIMIT, wait.wait())
            .await
            .expect("last disconnect did not release the wait");
    }
}
