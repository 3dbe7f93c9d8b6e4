//! Stream transport: endpoint construction, subscription events, and the
//! WebSocket implementation.
//!
//! The synchronizer itself only consumes [`StreamEvent`]s from a channel; the
//! transport that produces them (including its reconnection policy) is a
//! collaborator behind the [`PatchTransport`] trait. [`WsTransport`] is the
//! concrete implementation for one connection lifetime.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::error::SyncError;
use super::patch::PatchOp;

/// Events delivered to the synchronizer, in order, for one subscription.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The transport established (or re-established) a connection.
    Connected,
    /// A batch of patch operations, in arrival order.
    Patch(Vec<PatchOp>),
    /// The connection dropped or errored; the reason is surfaced to consumers.
    Disconnected(String),
}

/// A stream endpoint: a path plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    path: String,
    params: Vec<(String, String)>,
}

impl StreamEndpoint {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
        }
    }

    /// Adds a query parameter. Values are percent-encoded at render time.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// The execution-process stream for a task attempt.
    pub fn execution_processes(task_attempt_id: &str, show_soft_deleted: Option<bool>) -> Self {
        let mut endpoint = Self::new("/api/execution-processes/stream/ws")
            .param("task_attempt_id", task_attempt_id);
        if let Some(flag) = show_soft_deleted {
            endpoint = endpoint.param("show_soft_deleted", flag.to_string());
        }
        endpoint
    }

    /// Renders the full URL against a base like `ws://host:port`.
    pub fn to_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if self.params.is_empty() {
            return format!("{}{}", base, self.path);
        }
        let query: Vec<String> = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect();
        format!("{}{}?{}", base, self.path, query.join("&"))
    }
}

/// A transport that can feed one subscription's events into a channel.
#[async_trait]
pub trait PatchTransport: Send + Sync {
    /// Subscribes to `endpoint` and forwards events until the connection or
    /// the receiving side goes away.
    async fn subscribe(
        &self,
        endpoint: &StreamEndpoint,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<(), SyncError>;
}

/// WebSocket transport for a single connection lifetime.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
}

impl WsTransport {
    /// Creates a transport against a base URL like `ws://localhost:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PatchTransport for WsTransport {
    async fn subscribe(
        &self,
        endpoint: &StreamEndpoint,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<(), SyncError> {
        let url = endpoint.to_url(&self.base_url);

        let (ws_stream, _) = connect_async(&url)
            .await
            .map_err(|e| SyncError::ConnectionError(e.to_string()))?;
        tracing::debug!("Subscribed to {}", url);

        if events.send(StreamEvent::Connected).await.is_err() {
            return Ok(());
        }

        let (_write, mut read) = ws_stream.split();
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let ops = match parse_patch_message(text.as_str()) {
                        Some(ops) => ops,
                        None => {
                            tracing::warn!("Ignoring unparseable patch message");
                            continue;
                        }
                    };
                    if events.send(StreamEvent::Patch(ops)).await.is_err() {
                        return Ok(());
                    }
                }
                Ok(Message::Close(_)) => {
                    let _ = events
                        .send(StreamEvent::Disconnected(
                            "connection closed by server".to_string(),
                        ))
                        .await;
                    return Ok(());
                }
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!("WebSocket read error: {}", e);
                    let _ = events.send(StreamEvent::Disconnected(e.to_string())).await;
                    return Ok(());
                }
            }
        }

        let _ = events
            .send(StreamEvent::Disconnected("stream ended".to_string()))
            .await;
        Ok(())
    }
}

/// Parses a patch message: either an array of operations or a single one.
fn parse_patch_message(text: &str) -> Option<Vec<PatchOp>> {
    if let Ok(ops) = serde_json::from_str::<Vec<PatchOp>>(text) {
        return Some(ops);
    }
    serde_json::from_str::<PatchOp>(text).ok().map(|op| vec![op])
}
