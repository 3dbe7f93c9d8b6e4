//! Draft autosave coordinator.
//!
//! Watches the locally edited draft fields, diffs them against the last
//! known server draft, and pushes the changed fields after a debounce quiet
//! period. A failed save triggers a recovery fetch and a one-shot
//! suppress/force hand-off with the stream consumer so the view converges to
//! the server's value instead of looping: failed save -> recovery fetch ->
//! server draft change -> (suppressed) -> no re-save.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};

use crate::api::{Connectivity, DraftApi};
use crate::models::{DraftFields, DraftPatch, FollowUpDraft, SaveStatus};

/// Quiet period after the last qualifying change before a save fires.
pub const AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(400);

/// One-shot coordination signals between the coordinator and the draft
/// stream consumer.
///
/// The coordinator writes both after a successful recovery fetch; the next
/// autosave evaluation consumes `suppress_next_save` (skipping exactly one
/// cycle), and the stream consumer consumes `force_next_apply` (overriding
/// local edits with the next server value). `take` clears on read.
#[derive(Debug, Default)]
pub struct ReconcileFlags {
    suppress_next_save: AtomicBool,
    force_next_apply: AtomicBool,
}

impl ReconcileFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_suppress_next_save(&self) {
        self.suppress_next_save.store(true, Ordering::Relaxed);
    }

    pub fn take_suppress_next_save(&self) -> bool {
        self.suppress_next_save.swap(false, Ordering::Relaxed)
    }

    pub fn suppress_pending(&self) -> bool {
        self.suppress_next_save.load(Ordering::Relaxed)
    }

    pub fn set_force_next_apply(&self) {
        self.force_next_apply.store(true, Ordering::Relaxed);
    }

    pub fn take_force_next_apply(&self) -> bool {
        self.force_next_apply.swap(false, Ordering::Relaxed)
    }

    pub fn force_pending(&self) -> bool {
        self.force_next_apply.load(Ordering::Relaxed)
    }
}

/// Everything the coordinator watches; the view publishes this through a
/// `watch` channel on every relevant change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftInputs {
    /// The attempt the draft belongs to; None until bound.
    pub attempt_id: Option<String>,
    /// Last draft value observed from the stream.
    pub server_draft: Option<FollowUpDraft>,
    /// The locally edited fields.
    pub current: DraftFields,
    /// Queued drafts are not locally editable and never autosave.
    pub is_queued_ui: bool,
    /// A send is in flight for this draft.
    pub is_sending: bool,
    pub is_queuing: bool,
    pub is_unqueuing: bool,
}

/// Read side of the coordinator: save status plus the in-flight marker.
#[derive(Debug, Clone)]
pub struct AutosaveHandle {
    status: watch::Receiver<SaveStatus>,
    is_saving: watch::Receiver<bool>,
}

impl AutosaveHandle {
    pub fn status(&self) -> SaveStatus {
        *self.status.borrow()
    }

    pub fn is_saving(&self) -> bool {
        *self.is_saving.borrow()
    }

    /// Waits for the next status change; false once the coordinator has
    /// shut down.
    pub async fn status_changed(&mut self) -> bool {
        self.status.changed().await.is_ok()
    }
}

/// Debounced draft autosave over a reactive input channel.
///
/// The caller spawns [`run`](AutosaveCoordinator::run); dropping the input
/// sender tears it down, cancelling any pending debounce timer. In-flight
/// save or fetch calls are allowed to finish.
pub struct AutosaveCoordinator {
    inputs: watch::Receiver<DraftInputs>,
    api: Arc<dyn DraftApi>,
    connectivity: Arc<dyn Connectivity>,
    flags: Arc<ReconcileFlags>,
    status: watch::Sender<SaveStatus>,
    is_saving: watch::Sender<bool>,
    last_sent: String,
    debounce: Duration,
}

impl AutosaveCoordinator {
    pub fn new(
        inputs: watch::Receiver<DraftInputs>,
        api: Arc<dyn DraftApi>,
        connectivity: Arc<dyn Connectivity>,
        flags: Arc<ReconcileFlags>,
    ) -> (Self, AutosaveHandle) {
        let (status_tx, status_rx) = watch::channel(SaveStatus::Idle);
        let (saving_tx, saving_rx) = watch::channel(false);
        (
            Self {
                inputs,
                api,
                connectivity,
                flags,
                status: status_tx,
                is_saving: saving_tx,
                last_sent: String::new(),
                debounce: AUTOSAVE_DEBOUNCE,
            },
            AutosaveHandle {
                status: status_rx,
                is_saving: saving_rx,
            },
        )
    }

    /// Overrides the debounce quiet period.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Runs until the input channel closes.
    pub async fn run(mut self) {
        let mut deadline: Option<Instant> = None;
        self.evaluate(&mut deadline);

        loop {
            match deadline {
                Some(at) => {
                    tokio::select! {
                        changed = self.inputs.changed() => {
                            if changed.is_err() {
                                // Teardown cancels the pending timer.
                                break;
                            }
                            self.evaluate(&mut deadline);
                        }
                        _ = time::sleep_until(at) => {
                            deadline = None;
                            self.attempt_save().await;
                        }
                    }
                }
                None => {
                    if self.inputs.changed().await.is_err() {
                        break;
                    }
                    self.evaluate(&mut deadline);
                }
            }
        }
        tracing::debug!("Autosave coordinator shut down");
    }

    /// Re-evaluates guards on an input change. Any change cancels a pending
    /// timer; the timer is re-armed only when every guard passes.
    fn evaluate(&mut self, deadline: &mut Option<Instant>) {
        *deadline = None;

        let inputs = self.inputs.borrow().clone();
        if inputs.attempt_id.is_none() {
            return;
        }
        if inputs.is_sending {
            return;
        }
        if inputs.is_queuing || inputs.is_unqueuing {
            return;
        }
        if self.flags.take_suppress_next_save() {
            // Consumed; skips exactly this cycle.
            return;
        }
        if inputs.is_queued_ui {
            return;
        }

        *deadline = Some(Instant::now() + self.debounce);
    }

    /// One save attempt: diff, dedup, push, and on failure run the
    /// recovery-fetch-and-override protocol.
    async fn attempt_save(&mut self) {
        let inputs = self.inputs.borrow().clone();
        let Some(attempt_id) = inputs.attempt_id else {
            return;
        };

        let patch = diff_draft(&inputs.current, inputs.server_draft.as_ref());
        if patch.is_empty() {
            return;
        }
        let payload_key = serde_json::to_string(&patch).unwrap_or_default();
        if payload_key == self.last_sent {
            return;
        }
        self.last_sent = payload_key;

        self.is_saving.send_replace(true);
        let online = self.connectivity.is_online();
        self.status.send_replace(if online {
            SaveStatus::Saving
        } else {
            SaveStatus::Offline
        });

        match self.api.save_draft(&attempt_id, &patch).await {
            Ok(()) => {
                self.status.send_replace(SaveStatus::Saved);
            }
            Err(e) => {
                tracing::debug!("Draft save failed for {}: {}", attempt_id, e);
                // Fetch the authoritative draft so the stream catches up, and
                // force the next apply to override local edits when it lands.
                match self.api.fetch_draft(&attempt_id).await {
                    Ok(_) => {
                        self.flags.set_suppress_next_save();
                        self.flags.set_force_next_apply();
                    }
                    Err(e) => {
                        tracing::debug!("Recovery fetch failed for {}: {}", attempt_id, e);
                    }
                }
                let online = self.connectivity.is_online();
                self.status.send_replace(if online {
                    SaveStatus::Idle
                } else {
                    SaveStatus::Offline
                });
            }
        }
        self.is_saving.send_replace(false);
    }
}

/// Computes the changed-fields-only payload for a save.
///
/// Prompt is compared string-exact (absent and empty are equivalent, and it
/// is only diffed once a server draft exists), the variant label null-aware,
/// and the attachment list by ordered element-wise equality.
pub fn diff_draft(current: &DraftFields, server: Option<&FollowUpDraft>) -> DraftPatch {
    let mut patch = DraftPatch::default();

    if let Some(server) = server {
        if current.prompt != server.prompt {
            patch.prompt = Some(current.prompt.clone());
        }
    }

    let server_variant = server.and_then(|s| s.variant.as_deref());
    if server_variant != current.variant.as_deref() {
        patch.variant = Some(current.variant.clone());
    }

    let server_ids: &[String] = server.map(|s| s.image_ids.as_slice()).unwrap_or(&[]);
    if server_ids != current.image_ids.as_slice() {
        patch.image_ids = Some(current.image_ids.clone());
    }

    patch
}

/// Applies a server draft value arriving from the stream to the view inputs.
///
/// If the force-next-apply flag is pending it is consumed and the local
/// fields are overridden unconditionally. Otherwise local edits are kept and
/// the fields are only re-seeded when the view had no edits relative to the
/// previous server value.
pub fn apply_server_draft(
    inputs: &mut DraftInputs,
    incoming: FollowUpDraft,
    flags: &ReconcileFlags,
) {
    let force = flags.take_force_next_apply();
    let unedited = match &inputs.server_draft {
        Some(previous) => DraftFields::from_draft(previous) == inputs.current,
        None => inputs.current == DraftFields::default(),
    };
    if force || unedited {
        inputs.current = DraftFields::from_draft(&incoming);
    }
    inputs.server_draft = Some(incoming);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ApiError, SharedConnectivity};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn draft(prompt: &str) -> FollowUpDraft {
        FollowUpDraft {
            prompt: prompt.to_string(),
            variant: None,
            image_ids: Vec::new(),
            version: 1,
            queued: false,
        }
    }

    fn inputs_with(prompt: &str, server_prompt: &str) -> DraftInputs {
        DraftInputs {
            attempt_id: Some("attempt-1".to_string()),
            server_draft: Some(draft(server_prompt)),
            current: DraftFields {
                prompt: prompt.to_string(),
                variant: None,
                image_ids: Vec::new(),
            },
            ..Default::default()
        }
    }

    #[derive(Default)]
    struct MockApi {
        saves: Mutex<Vec<DraftPatch>>,
        fetches: AtomicUsize,
        fail_save: AtomicBool,
        fail_fetch: AtomicBool,
    }

    impl MockApi {
        fn saves(&self) -> Vec<DraftPatch> {
            self.saves.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DraftApi for MockApi {
        async fn save_draft(&self, _attempt_id: &str, patch: &DraftPatch) -> Result<(), ApiError> {
            if self.fail_save.load(Ordering::Relaxed) {
                return Err(ApiError::StatusError(500));
            }
            self.saves.lock().unwrap().push(patch.clone());
            Ok(())
        }

        async fn fetch_draft(&self, _attempt_id: &str) -> Result<FollowUpDraft, ApiError> {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            if self.fail_fetch.load(Ordering::Relaxed) {
                return Err(ApiError::StatusError(500));
            }
            Ok(draft("recovered"))
        }
    }

    struct Harness {
        tx: watch::Sender<DraftInputs>,
        api: Arc<MockApi>,
        flags: Arc<ReconcileFlags>,
        connectivity: SharedConnectivity,
        handle: AutosaveHandle,
        task: tokio::task::JoinHandle<()>,
    }

    fn spawn(initial: DraftInputs) -> Harness {
        let api = Arc::new(MockApi::default());
        let flags = Arc::new(ReconcileFlags::new());
        let connectivity = SharedConnectivity::new();
        let (tx, rx) = watch::channel(initial);
        let (coordinator, handle) = AutosaveCoordinator::new(
            rx,
            api.clone(),
            Arc::new(connectivity.clone()),
            flags.clone(),
        );
        let task = tokio::spawn(coordinator.run());
        Harness {
            tx,
            api,
            flags,
            connectivity,
            handle,
            task,
        }
    }

    async fn settle() {
        time::sleep(Duration::from_millis(600)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_save_when_nothing_differs() {
        let harness = spawn(inputs_with("a", "a"));
        settle().await;
        assert!(harness.api.saves().is_empty());
        assert_eq!(harness.handle.status(), SaveStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_save_with_changed_fields_only() {
        let harness = spawn(inputs_with("a", "a"));
        harness
            .tx
            .send_modify(|i| i.current.prompt = "b".to_string());
        settle().await;

        let saves = harness.api.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].prompt.as_deref(), Some("b"));
        assert!(saves[0].variant.is_none());
        assert!(saves[0].image_ids.is_none());
        assert_eq!(harness.handle.status(), SaveStatus::Saved);
        assert!(!harness.handle.is_saving());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_edits_in_window_produce_one_save() {
        let harness = spawn(inputs_with("a", "a"));
        harness
            .tx
            .send_modify(|i| i.current.prompt = "b".to_string());
        time::sleep(Duration::from_millis(100)).await;
        harness
            .tx
            .send_modify(|i| i.current.prompt = "c".to_string());
        settle().await;

        let saves = harness.api.saves();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].prompt.as_deref(), Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_payload_not_resent() {
        let harness = spawn(inputs_with("a", "a"));
        harness
            .tx
            .send_modify(|i| i.current.prompt = "b".to_string());
        settle().await;
        assert_eq!(harness.api.saves().len(), 1);

        // Unrelated re-fire with identical values: timer re-arms, but the
        // payload matches the last sent one.
        let current = harness.tx.borrow().clone();
        harness.tx.send(current).unwrap();
        settle().await;
        assert_eq!(harness.api.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_save_without_attempt_id() {
        let mut initial = inputs_with("b", "a");
        initial.attempt_id = None;
        let harness = spawn(initial);
        settle().await;
        assert!(harness.api.saves().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_and_sending_states_block_save() {
        let mut initial = inputs_with("b", "a");
        initial.is_queued_ui = true;
        let harness = spawn(initial);
        settle().await;
        assert!(harness.api.saves().is_empty());

        harness.tx.send_modify(|i| {
            i.is_queued_ui = false;
            i.is_sending = true;
        });
        settle().await;
        assert!(harness.api.saves().is_empty());

        harness.tx.send_modify(|i| i.is_sending = false);
        settle().await;
        assert_eq!(harness.api.saves().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_failure_runs_recovery_and_suppresses_next_cycle() {
        let harness = spawn(inputs_with("a", "a"));
        harness.api.fail_save.store(true, Ordering::Relaxed);
        harness
            .tx
            .send_modify(|i| i.current.prompt = "b".to_string());
        settle().await;

        assert!(harness.api.saves().is_empty());
        assert_eq!(harness.api.fetches.load(Ordering::Relaxed), 1);
        assert!(harness.flags.suppress_pending());
        assert!(harness.flags.force_pending());
        assert_eq!(harness.handle.status(), SaveStatus::Idle);
        assert!(!harness.handle.is_saving());

        // The recovered value arrives from the stream; the consumer applies
        // it with force, and the resulting change triggers no save.
        harness.api.fail_save.store(false, Ordering::Relaxed);
        harness.tx.send_modify(|i| {
            apply_server_draft(i, draft("recovered"), &harness.flags);
        });
        settle().await;

        assert!(harness.api.saves().is_empty());
        assert!(!harness.flags.suppress_pending());
        assert!(!harness.flags.force_pending());
        assert_eq!(harness.tx.borrow().current.prompt, "recovered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_fetch_failure_is_swallowed() {
        let harness = spawn(inputs_with("a", "a"));
        harness.api.fail_save.store(true, Ordering::Relaxed);
        harness.api.fail_fetch.store(true, Ordering::Relaxed);
        harness
            .tx
            .send_modify(|i| i.current.prompt = "b".to_string());
        settle().await;

        assert_eq!(harness.api.fetches.load(Ordering::Relaxed), 1);
        assert!(!harness.flags.suppress_pending());
        assert!(!harness.flags.force_pending());
        assert_eq!(harness.handle.status(), SaveStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_status_on_failed_save() {
        let harness = spawn(inputs_with("a", "a"));
        harness.connectivity.set_online(false);
        harness.api.fail_save.store(true, Ordering::Relaxed);
        harness.api.fail_fetch.store(true, Ordering::Relaxed);
        harness
            .tx
            .send_modify(|i| i.current.prompt = "b".to_string());
        settle().await;

        assert_eq!(harness.handle.status(), SaveStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending_timer() {
        let harness = spawn(inputs_with("a", "a"));
        harness
            .tx
            .send_modify(|i| i.current.prompt = "b".to_string());
        // Drop the input sender before the debounce elapses.
        drop(harness.tx);
        harness.task.await.unwrap();
        assert!(harness.api.saves().is_empty());
    }

    #[test]
    fn test_diff_empty_when_identical() {
        let server = draft("a");
        let current = DraftFields::from_draft(&server);
        assert!(diff_draft(&current, Some(&server)).is_empty());
    }

    #[test]
    fn test_diff_prompt_requires_server_draft() {
        let current = DraftFields {
            prompt: "b".to_string(),
            ..Default::default()
        };
        assert!(diff_draft(&current, None).prompt.is_none());
    }

    #[test]
    fn test_diff_variant_null_aware() {
        let mut server = draft("a");
        server.variant = Some("fast".to_string());
        let current = DraftFields {
            prompt: "a".to_string(),
            variant: None,
            image_ids: Vec::new(),
        };
        let patch = diff_draft(&current, Some(&server));
        assert_eq!(patch.variant, Some(None));
    }

    #[test]
    fn test_diff_image_ids_order_matters() {
        let mut server = draft("a");
        server.image_ids = vec!["x".to_string(), "y".to_string()];
        let current = DraftFields {
            prompt: "a".to_string(),
            variant: None,
            image_ids: vec!["y".to_string(), "x".to_string()],
        };
        let patch = diff_draft(&current, Some(&server));
        assert_eq!(
            patch.image_ids,
            Some(vec!["y".to_string(), "x".to_string()])
        );
    }

    #[test]
    fn test_apply_server_draft_keeps_local_edits_without_force() {
        let flags = ReconcileFlags::new();
        let mut inputs = inputs_with("edited", "a");
        apply_server_draft(&mut inputs, draft("a2"), &flags);
        assert_eq!(inputs.current.prompt, "edited");
        assert_eq!(inputs.server_draft.as_ref().unwrap().prompt, "a2");
    }

    #[test]
    fn test_apply_server_draft_seeds_unedited_view() {
        let flags = ReconcileFlags::new();
        let mut inputs = inputs_with("a", "a");
        apply_server_draft(&mut inputs, draft("a2"), &flags);
        assert_eq!(inputs.current.prompt, "a2");
    }

    #[test]
    fn test_apply_server_draft_force_overrides() {
        let flags = ReconcileFlags::new();
        flags.set_force_next_apply();
        let mut inputs = inputs_with("edited", "a");
        apply_server_draft(&mut inputs, draft("a2"), &flags);
        assert_eq!(inputs.current.prompt, "a2");
        assert!(!flags.force_pending());
    }

    #[test]
    fn test_reconcile_flags_are_one_shot() {
        let flags = ReconcileFlags::new();
        flags.set_suppress_next_save();
        assert!(flags.take_suppress_next_save());
        assert!(!flags.take_suppress_next_save());
    }
}
