use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::object_client::UploadedPart;

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Object store to page cache.
    Download,
    /// Page cache to object store.
    Upload,
}

/// Outer state of a transfer.
///
/// `Completed` and `Aborted` are permanent. `Failed` and `Cancelled`
/// re-enter `InProgress` only through an explicit retry, which keeps
/// the handle identity so observers see transitions rather than a new
/// object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// Queued, not yet processing.
    NotStarted,
    /// Running.
    InProgress,
    /// Cancelled cooperatively; retryable.
    Cancelled,
    /// A part failed permanently; retryable.
    Failed,
    /// Every part finished.
    Completed,
    /// The multipart session was discarded.
    Aborted,
}

impl TransferStatus {
    /// True once the transfer stopped running, successfully or not.
    pub fn is_done(self) -> bool {
        !matches!(self, TransferStatus::NotStarted | TransferStatus::InProgress)
    }

    /// True for the states no transition may ever leave.
    pub fn is_permanent(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Aborted)
    }
}

/// State of one part inside a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartState {
    /// Not yet submitted.
    Queued,
    /// Submitted, in flight.
    Pending,
    /// Transferred.
    Completed,
    /// Failed permanently after retries.
    Failed,
}

/// One contiguous byte range transferred as a single request.
#[derive(Debug, Clone)]
pub struct Part {
    /// 1-based contiguous part number.
    pub part_number: u16,
    /// Absolute offset of the part's first byte.
    pub range_begin: u64,
    /// Part length in bytes.
    pub size: u64,
    /// Etag assigned on completion.
    pub etag: Option<String>,
    /// Current state.
    pub state: PartState,
}

impl Part {
    /// A queued part covering `[range_begin, range_begin + size)`.
    pub fn new(part_number: u16, range_begin: u64, size: u64) -> Part {
        Part {
            part_number,
            range_begin,
            size,
            etag: None,
            state: PartState::Queued,
        }
    }
}

/// State machine for one transfer: identity, parts, byte counters,
/// cancellation flag, and a watchable outer state.
pub struct TransferHandle {
    bucket: String,
    object_key: String,
    direction: TransferDirection,
    content_range_begin: u64,
    bytes_total: AtomicU64,
    bytes_transferred: AtomicU64,
    multipart_id: Mutex<Option<String>>,
    parts: Mutex<BTreeMap<u16, Part>>,
    cancel: AtomicBool,
    status_tx: watch::Sender<TransferStatus>,
    status_rx: watch::Receiver<TransferStatus>,
    error: Mutex<Option<ClientError>>,
}

impl TransferHandle {
    /// A fresh handle in `NotStarted`.
    pub fn new(
        bucket: &str,
        object_key: &str,
        content_range_begin: u64,
        bytes_total: u64,
        direction: TransferDirection,
    ) -> TransferHandle {
        let (status_tx, status_rx) = watch::channel(TransferStatus::NotStarted);
        TransferHandle {
            bucket: bucket.to_string(),
            object_key: object_key.to_string(),
            direction,
            content_range_begin,
            bytes_total: AtomicU64::new(bytes_total),
            bytes_transferred: AtomicU64::new(0),
            multipart_id: Mutex::new(None),
            parts: Mutex::new(BTreeMap::new()),
            cancel: AtomicBool::new(false),
            status_tx,
            status_rx,
            error: Mutex::new(None),
        }
    }

    /// Bucket the transfer targets.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key the transfer targets.
    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    /// Transfer direction.
    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    /// Absolute offset the transfer starts at.
    pub fn content_range_begin(&self) -> u64 {
        self.content_range_begin
    }

    /// Bytes the transfer is expected to move.
    pub fn bytes_total(&self) -> u64 {
        self.bytes_total.load(Ordering::SeqCst)
    }

    /// Bytes moved so far.
    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred.load(Ordering::SeqCst)
    }

    /// Count `amount` more bytes as moved.
    pub fn add_transferred_bytes(&self, amount: u64) {
        self.bytes_transferred.fetch_add(amount, Ordering::SeqCst);
    }

    /// True once a multipart session was opened for this handle.
    pub fn is_multipart(&self) -> bool {
        self.multipart_id.lock().unwrap().is_some()
    }

    /// The multipart upload id, once assigned.
    pub fn multipart_id(&self) -> Option<String> {
        self.multipart_id.lock().unwrap().clone()
    }

    /// Record the multipart upload id.
    pub fn set_multipart_id(&self, upload_id: &str) {
        *self.multipart_id.lock().unwrap() = Some(upload_id.to_string());
    }

    /// Register a queued part.
    pub fn add_part(&self, part: Part) {
        self.parts.lock().unwrap().insert(part.part_number, part);
    }

    /// Snapshot of every part, ordered by part number.
    pub fn parts(&self) -> Vec<Part> {
        self.parts.lock().unwrap().values().cloned().collect()
    }

    /// Move a part to `Pending`.
    pub fn mark_part_pending(&self, part_number: u16) {
        if let Some(part) = self.parts.lock().unwrap().get_mut(&part_number) {
            part.state = PartState::Pending;
        }
    }

    /// Move a part to `Completed`, recording its etag and bytes.
    pub fn mark_part_completed(&self, part_number: u16, etag: Option<&str>) {
        let mut parts = self.parts.lock().unwrap();
        if let Some(part) = parts.get_mut(&part_number) {
            part.state = PartState::Completed;
            part.etag = etag.map(str::to_string);
            self.bytes_transferred.fetch_add(part.size, Ordering::SeqCst);
        }
    }

    /// Move a part to `Failed`.
    pub fn mark_part_failed(&self, part_number: u16) {
        if let Some(part) = self.parts.lock().unwrap().get_mut(&part_number) {
            part.state = PartState::Failed;
        }
    }

    /// The completed parts as (number, etag) pairs, in part order.
    pub fn completed_parts(&self) -> Vec<UploadedPart> {
        self.parts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.state == PartState::Completed)
            .map(|p| UploadedPart {
                part_number: p.part_number,
                etag: p.etag.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// True iff any part failed permanently.
    pub fn has_failed_parts(&self) -> bool {
        self.parts
            .lock()
            .unwrap()
            .values()
            .any(|p| p.state == PartState::Failed)
    }

    /// Reset failed parts to `Queued` for a retry pass.
    pub fn requeue_failed_parts(&self) -> Vec<Part> {
        let mut parts = self.parts.lock().unwrap();
        let mut requeued = Vec::new();
        for part in parts.values_mut() {
            if part.state == PartState::Failed {
                part.state = PartState::Queued;
                part.etag = None;
                requeued.push(part.clone());
            }
        }
        requeued
    }

    /// Ask the transfer to stop; checked between parts and before each
    /// backoff. Cooperative, not preemptive.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// True while cancellation has not been requested.
    pub fn should_continue(&self) -> bool {
        !self.cancel.load(Ordering::SeqCst)
    }

    /// Clear cancellation and re-enter `InProgress` for a retry. Only
    /// the retry paths call this; permanent states stay permanent.
    pub fn restart(&self) {
        if self.status().is_permanent() {
            warn!(key = %self.object_key, "ignoring restart of a permanently finished transfer");
            return;
        }
        self.cancel.store(false, Ordering::SeqCst);
        let _ = self.status_tx.send(TransferStatus::InProgress);
    }

    /// Current outer state.
    pub fn status(&self) -> TransferStatus {
        *self.status_rx.borrow()
    }

    /// Apply a monotone state transition. Updates that would leave a
    /// permanent state, or re-enter `InProgress` from a done state, are
    /// ignored.
    pub fn update_status(&self, next: TransferStatus) {
        let current = self.status();
        if current == next {
            return;
        }
        if current.is_permanent() {
            debug!(key = %self.object_key, ?current, ?next, "ignoring transition out of a permanent state");
            return;
        }
        if current.is_done() && next == TransferStatus::InProgress {
            debug!(key = %self.object_key, "retry must go through restart()");
            return;
        }
        let _ = self.status_tx.send(next);
    }

    /// Record the error that finished the transfer.
    pub fn set_error(&self, error: ClientError) {
        *self.error.lock().unwrap() = Some(error);
    }

    /// The error that finished the transfer, if any.
    pub fn error(&self) -> Option<ClientError> {
        self.error.lock().unwrap().clone()
    }

    /// True iff the transfer finished with every part completed.
    pub fn done_transfer(&self) -> bool {
        self.status() == TransferStatus::Completed
    }

    /// Wait for the transfer to stop running, returning the final state.
    pub async fn wait_until_finished(&self) -> TransferStatus {
        let mut rx = self.status_rx.clone();
        loop {
            let current = *rx.borrow_and_update();
            if current.is_done() {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("key", &self.object_key)
            .field("direction", &self.direction)
            .field("status", &self.status())
            .field("bytes", &self.bytes_transferred())
            .field("total", &self.bytes_total())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> TransferHandle {
        TransferHandle::new("bucket", "a/b", 0, 100, TransferDirection::Download)
    }

    #[test]
    fn test_new_handle_not_started() {
        let h = handle();
        assert_eq!(h.status(), TransferStatus::NotStarted);
        assert!(!h.status().is_done());
        assert!(h.should_continue());
        assert_eq!(h.bytes_transferred(), 0);
        assert_eq!(h.bytes_total(), 100);
    }

    #[test]
    fn test_part_lifecycle() {
        let h = handle();
        h.add_part(Part::new(1, 0, 60));
        h.add_part(Part::new(2, 60, 40));
        h.mark_part_pending(1);
        h.mark_part_completed(1, Some("e1"));
        h.mark_part_failed(2);
        assert!(h.has_failed_parts());
        assert_eq!(h.bytes_transferred(), 60);
        let done = h.completed_parts();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].part_number, 1);
        assert_eq!(done[0].etag, "e1");
    }

    #[test]
    fn test_requeue_failed_parts() {
        let h = handle();
        h.add_part(Part::new(1, 0, 50));
        h.add_part(Part::new(2, 50, 50));
        h.mark_part_completed(1, None);
        h.mark_part_failed(2);
        let requeued = h.requeue_failed_parts();
        assert_eq!(requeued.len(), 1);
        assert_eq!(requeued[0].part_number, 2);
        assert!(!h.has_failed_parts());
    }

    #[test]
    fn test_status_transitions_monotone() {
        let h = handle();
        h.update_status(TransferStatus::InProgress);
        h.update_status(TransferStatus::Completed);
        assert_eq!(h.status(), TransferStatus::Completed);
        h.update_status(TransferStatus::Failed);
        assert_eq!(h.status(), TransferStatus::Completed, "permanent state sticks");
    }

    #[test]
    fn test_aborted_is_permanent() {
        let h = handle();
        h.update_status(TransferStatus::InProgress);
        h.update_status(TransferStatus::Aborted);
        h.restart();
        assert_eq!(h.status(), TransferStatus::Aborted);
    }

    #[test]
    fn test_failed_reenters_in_progress_only_via_restart() {
        let h = handle();
        h.update_status(TransferStatus::InProgress);
        h.update_status(TransferStatus::Failed);
        h.update_status(TransferStatus::InProgress);
        assert_eq!(h.status(), TransferStatus::Failed);
        h.restart();
        assert_eq!(h.status(), TransferStatus::InProgress);
    }

    #[test]
    fn test_cancel_and_restart_flag() {
        let h = handle();
        h.cancel();
        assert!(!h.should_continue());
        h.update_status(TransferStatus::Cancelled);
        h.restart();
        assert!(h.should_continue());
        assert_eq!(h.status(), TransferStatus::InProgress);
    }

    #[tokio::test]
    async fn test_wait_until_finished_observes_completion() {
        let h = std::sync::Arc::new(handle());
        let waiter = std::sync::Arc::clone(&h);
        let join = tokio::spawn(async move { waiter.wait_until_finished().await });
        h.update_status(TransferStatus::InProgress);
        h.update_status(TransferStatus::Completed);
        assert_eq!(join.await.unwrap(), TransferStatus::Completed);
    }

    #[tokio::test]
    async fn test_wait_until_finished_when_already_done() {
        let h = handle();
        h.update_status(TransferStatus::InProgress);
        h.update_status(TransferStatus::Failed);
        assert_eq!(h.wait_until_finished().await, TransferStatus::Failed);
    }

    #[test]
    fn test_error_recorded() {
        let h = handle();
        h.set_error(ClientError::Timeout {
            context: "x".into(),
        });
        assert!(matches!(h.error(), Some(ClientError::Timeout { .. })));
    }
}
