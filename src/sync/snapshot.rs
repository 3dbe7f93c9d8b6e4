//! Incremental snapshot synchronizer.
//!
//! Consumes an ordered stream of [`StreamEvent`]s and maintains a keyed
//! collection snapshot, published reactively through a `watch` channel. The
//! first patch batch after a connect always replaces the snapshot wholesale,
//! even if the transport delivered entry-level operations first; afterwards
//! operations are applied strictly in arrival order.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::{mpsc, watch};

use super::patch::{Collection, PatchKind, PatchOp, PatchPath};
use super::transport::{StreamEndpoint, StreamEvent};
use crate::models::ExecutionProcess;

/// The reactive triple exposed to consumers: snapshot, connectivity, error.
#[derive(Debug, Clone)]
pub struct SnapshotState<T> {
    /// None until the first snapshot arrives; retained stale on error.
    pub collection: Option<Collection<T>>,
    /// Transport-level connectivity, independent of snapshot arrival.
    pub is_connected: bool,
    /// Last transport error, cleared on reconnect.
    pub error: Option<String>,
}

impl<T> Default for SnapshotState<T> {
    fn default() -> Self {
        Self {
            collection: None,
            is_connected: false,
            error: None,
        }
    }
}

impl<T> SnapshotState<T> {
    /// True until the first snapshot has arrived, unless an error is set.
    pub fn is_loading(&self) -> bool {
        self.collection.is_none() && self.error.is_none()
    }
}

/// Read side of a synchronizer: cheap to clone, safe to sample at any time.
#[derive(Debug, Clone)]
pub struct SnapshotHandle<T> {
    rx: watch::Receiver<SnapshotState<T>>,
}

impl<T: Clone> SnapshotHandle<T> {
    pub fn state(&self) -> SnapshotState<T> {
        self.rx.borrow().clone()
    }

    pub fn is_loading(&self) -> bool {
        self.rx.borrow().is_loading()
    }

    pub fn is_connected(&self) -> bool {
        self.rx.borrow().is_connected
    }

    pub fn error(&self) -> Option<String> {
        self.rx.borrow().error.clone()
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.rx
            .borrow()
            .collection
            .as_ref()
            .and_then(|c| c.get(id).cloned())
    }

    /// Clones the snapshot out as an id-to-record map; empty before the
    /// first snapshot.
    pub fn by_id(&self) -> HashMap<String, T> {
        self.rx
            .borrow()
            .collection
            .as_ref()
            .map(|c| c.to_map())
            .unwrap_or_default()
    }

    /// Returns records sorted by `key`, ties broken by insertion order.
    pub fn sorted_by<K: Ord>(&self, key: impl Fn(&T) -> K) -> Vec<T> {
        self.rx
            .borrow()
            .collection
            .as_ref()
            .map(|c| c.sorted_by(key).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Waits for the next published state change. Returns false once the
    /// synchronizer has shut down.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Applies one subscription's event stream to a snapshot.
///
/// The caller spawns [`run`](Synchronizer::run) while the subscription is
/// enabled; dropping the event sender (or aborting the task) ends it. The
/// snapshot lives in the `watch` channel, so handles stay readable after
/// shutdown.
pub struct Synchronizer<T> {
    collection_key: String,
    events: mpsc::Receiver<StreamEvent>,
    tx: watch::Sender<SnapshotState<T>>,
    seen_snapshot: bool,
}

impl<T> Synchronizer<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Creates a synchronizer for one collection key and its read handle.
    pub fn new(
        collection_key: impl Into<String>,
        events: mpsc::Receiver<StreamEvent>,
    ) -> (Self, SnapshotHandle<T>) {
        let (tx, rx) = watch::channel(SnapshotState::default());
        (
            Self {
                collection_key: collection_key.into(),
                events,
                tx,
                seen_snapshot: false,
            },
            SnapshotHandle { rx },
        )
    }

    /// Runs until the event channel closes.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            match event {
                StreamEvent::Connected => {
                    // Next batch replaces the snapshot wholesale.
                    self.seen_snapshot = false;
                    self.tx.send_modify(|state| {
                        state.is_connected = true;
                        state.error = None;
                    });
                }
                StreamEvent::Patch(ops) => {
                    let fresh = !self.seen_snapshot;
                    self.seen_snapshot = true;
                    let key = &self.collection_key;
                    self.tx.send_modify(|state| {
                        if fresh {
                            state.collection = Some(Collection::new());
                        }
                        let collection = state.collection.get_or_insert_with(Collection::new);
                        for op in &ops {
                            apply_op(key, collection, op);
                        }
                    });
                }
                StreamEvent::Disconnected(reason) => {
                    // Last snapshot is retained, stale but available.
                    self.tx.send_modify(|state| {
                        state.is_connected = false;
                        state.error = Some(reason.clone());
                    });
                }
            }
        }
        tracing::debug!("Synchronizer for '{}' shut down", self.collection_key);
    }
}

/// Applies a single operation. Malformed or unrecognized operations are
/// logged and skipped; they never tear down the subscription.
fn apply_op<T: Serialize + DeserializeOwned>(
    collection_key: &str,
    collection: &mut Collection<T>,
    op: &PatchOp,
) {
    let Some(path) = PatchPath::parse(&op.path) else {
        tracing::debug!("Ignoring patch with unparseable path '{}'", op.path);
        return;
    };
    if path.collection != collection_key {
        tracing::debug!("Ignoring patch for unknown collection '{}'", path.collection);
        return;
    }

    let result = match (path.id, op.op) {
        (None, PatchKind::Add | PatchKind::Replace) => match &op.value {
            Some(value) => collection.replace_all(value),
            None => Ok(()),
        },
        (None, PatchKind::Remove) => {
            collection.clear();
            Ok(())
        }
        (Some(id), PatchKind::Add | PatchKind::Replace) => match &op.value {
            Some(value) if path.field.is_empty() => collection.upsert_value(id, value),
            Some(value) => collection.update_field(id, &path.field, value),
            None => Ok(()),
        },
        (Some(id), PatchKind::Remove) => {
            if path.field.is_empty() {
                collection.remove(id);
                Ok(())
            } else {
                collection.remove_field(id, &path.field)
            }
        }
    };

    if let Err(e) = result {
        tracing::warn!("Skipping patch at '{}': {}", op.path, e);
    }
}

/// Collection key used by the execution-process stream.
pub const EXECUTION_PROCESSES_KEY: &str = "execution_processes";

/// Typed feed of execution processes for one task attempt.
///
/// Wraps a [`SnapshotHandle`] keyed by `execution_processes` and exposes the
/// records sorted by creation time, ties broken by stream insertion order,
/// so rendering order is deterministic.
#[derive(Debug, Clone)]
pub struct ExecutionProcessFeed {
    handle: SnapshotHandle<ExecutionProcess>,
}

impl ExecutionProcessFeed {
    /// Creates the synchronizer/feed pair for an event channel.
    pub fn new(events: mpsc::Receiver<StreamEvent>) -> (Synchronizer<ExecutionProcess>, Self) {
        let (sync, handle) = Synchronizer::new(EXECUTION_PROCESSES_KEY, events);
        (sync, Self { handle })
    }

    /// The stream endpoint for a task attempt.
    pub fn endpoint(task_attempt_id: &str, show_soft_deleted: Option<bool>) -> StreamEndpoint {
        StreamEndpoint::execution_processes(task_attempt_id, show_soft_deleted)
    }

    /// Processes ordered by creation time.
    pub fn processes(&self) -> Vec<ExecutionProcess> {
        self.handle.sorted_by(|p| p.created_at)
    }

    pub fn by_id(&self) -> HashMap<String, ExecutionProcess> {
        self.handle.by_id()
    }

    pub fn is_loading(&self) -> bool {
        self.handle.is_loading()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn error(&self) -> Option<String> {
        self.handle.error()
    }

    /// Waits for the next state change; false once the feed has shut down.
    pub async fn changed(&mut self) -> bool {
        self.handle.changed().await
    }
}
