//! Incremental snapshot synchronization.
//!
//! The server streams a JSON-patch view of a keyed collection over a
//! WebSocket: one initial whole-collection replace, then incremental
//! add/replace/remove operations per entry. This module applies that stream
//! to an in-memory snapshot and exposes it reactively.
//!
//! ## Data flow
//!
//! 1. A [`PatchTransport`] subscribes to a [`StreamEndpoint`] and forwards
//!    [`StreamEvent`]s into a channel.
//! 2. A [`Synchronizer`] consumes the channel and maintains the snapshot.
//! 3. Consumers read through a [`SnapshotHandle`] (or the typed
//!    [`ExecutionProcessFeed`]), which also derives loading, connectivity
//!    and error state.

mod error;
mod patch;
mod snapshot;
mod transport;

pub use error::SyncError;
pub use patch::{Collection, Entry, PatchKind, PatchOp, PatchPath};
pub use snapshot::{
    ExecutionProcessFeed, SnapshotHandle, SnapshotState, Synchronizer, EXECUTION_PROCESSES_KEY,
};
pub use transport::{PatchTransport, StreamEndpoint, StreamEvent, WsTransport};
