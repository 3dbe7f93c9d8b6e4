//! Sync error types.

/// Errors that can occur while subscribing to or applying the patch stream.
#[derive(Debug)]
pub enum SyncError {
    /// Failed to connect to the stream endpoint
    ConnectionError(String),
    /// WebSocket error after the connection was established
    WebSocketError(String),
    /// A patch message or value could not be decoded
    MalformedPatch(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::ConnectionError(e) => write!(f, "Connection error: {}", e),
            SyncError::WebSocketError(e) => write!(f, "WebSocket error: {}", e),
            SyncError::MalformedPatch(e) => write!(f, "Malformed patch: {}", e),
        }
    }
}

impl std::error::Error for SyncError {}
