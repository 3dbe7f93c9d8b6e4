//! Attempt Sync Core Library
//!
//! Client-side synchronization for task-attempt views: an incremental
//! snapshot synchronizer fed by a JSON-patch WebSocket stream, and a
//! debounced follow-up-draft autosave coordinator that reconciles with the
//! server after failed saves.

pub mod api;
pub mod autosave;
pub mod config;
pub mod models;
pub mod review;
pub mod sync;

pub use api::{ApiError, Connectivity, DraftApi, HttpDraftApi, SharedConnectivity};
pub use autosave::{
    apply_server_draft, diff_draft, AutosaveCoordinator, AutosaveHandle, DraftInputs,
    ReconcileFlags, AUTOSAVE_DEBOUNCE,
};
pub use config::{ClientConfig, ConfigError};
pub use models::{DraftFields, DraftPatch, ExecutionProcess, FollowUpDraft, SaveStatus};
pub use review::{CommentSide, ReviewComment, ReviewDraft, ReviewStore};
pub use sync::{
    ExecutionProcessFeed, PatchKind, PatchOp, PatchPath, PatchTransport, SnapshotHandle,
    SnapshotState, StreamEndpoint, StreamEvent, SyncError, Synchronizer, WsTransport,
    EXECUTION_PROCESSES_KEY,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
