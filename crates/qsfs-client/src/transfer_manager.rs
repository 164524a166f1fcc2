use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::executor::{Executor, Priority, TaskFuture};
use crate::object_client::ObjectClient;
use crate::retry::{with_retry_cancellable, RetryPolicy};
use crate::transfer::{Part, TransferDirection, TransferHandle, TransferStatus};

/// Configuration for the transfer engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TransferConfig {
    /// Part size for multipart upload and for ranged-GET tiling.
    pub buf_max_size: u64,
    /// Uploads at or below this size go out as one PUT.
    pub multipart_threshold: u64,
    /// Smallest part the store accepts; an undershooting final part is
    /// averaged with its predecessor.
    pub min_part_size: u64,
    /// Upper bound on concurrent part transfers.
    pub max_parallel_transfers: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buf_max_size: 10 * 1024 * 1024,
            multipart_threshold: 20 * 1024 * 1024,
            min_part_size: 4 * 1024 * 1024,
            max_parallel_transfers: 5,
        }
    }
}

/// Byte-stream consumer a download hands its part buffers to.
pub trait DownloadSink: Send + Sync {
    /// Accept `data` at absolute file offset `offset`.
    fn write(&self, offset: u64, data: &[u8]) -> std::io::Result<()>;
}

/// Byte provider an upload reads its part buffers from.
pub trait UploadSource: Send + Sync {
    /// Produce the `size` bytes at absolute file offset `offset`.
    fn read(&self, offset: u64, size: u64) -> std::io::Result<Vec<u8>>;
}

/// Tile `[offset, offset + size)` into download parts of at most
/// `buf_max_size` bytes, part numbers 1-based and contiguous.
pub fn tile_download_parts(offset: u64, size: u64, buf_max_size: u64) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut begin = offset;
    let end = offset + size;
    let mut number = 1u16;
    while begin < end {
        let len = buf_max_size.min(end - begin);
        parts.push(Part::new(number, begin, len));
        begin += len;
        number += 1;
    }
    parts
}

/// Tile a whole file of `size` bytes into upload parts. When the final
/// part would undershoot `min_part_size`, the last two parts are
/// averaged so every part satisfies the store's minimum.
pub fn tile_upload_parts(size: u64, buf_max_size: u64, min_part_size: u64) -> Vec<Part> {
    let mut parts = tile_download_parts(0, size, buf_max_size);
    let n = parts.len();
    if n >= 2 && parts[n - 1].size < min_part_size {
        let combined = parts[n - 2].size + parts[n - 1].size;
        let second_last = combined / 2;
        parts[n - 2].size = second_last;
        parts[n - 1].range_begin = parts[n - 2].range_begin + second_last;
        parts[n - 1].size = combined - second_last;
    }
    parts
}

/// Orchestrates ranged downloads and single/multipart uploads against
/// the object store, with retry, cooperative cancellation, and
/// multipart lifecycle bookkeeping.
pub struct TransferManager {
    bucket: String,
    client: Arc<dyn ObjectClient>,
    executor: Arc<Executor>,
    retry: RetryPolicy,
    config: TransferConfig,
    permits: Arc<Semaphore>,
}

impl TransferManager {
    /// Build the engine over a client and a task pool.
    pub fn new(
        bucket: &str,
        client: Arc<dyn ObjectClient>,
        executor: Arc<Executor>,
        retry: RetryPolicy,
        config: TransferConfig,
    ) -> Arc<TransferManager> {
        let permits = Arc::new(Semaphore::new(config.max_parallel_transfers.max(1)));
        Arc::new(TransferManager {
            bucket: bucket.to_string(),
            client,
            executor,
            retry,
            config,
            permits,
        })
    }

    /// The engine's transfer configuration.
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Start a ranged download of `[offset, offset + size)` into
    /// `sink`. Returns the live handle; await
    /// [`TransferHandle::wait_until_finished`] for the outcome.
    pub fn download_file(
        &self,
        path: &str,
        offset: u64,
        size: u64,
        sink: Arc<dyn DownloadSink>,
        priority: Priority,
    ) -> Arc<TransferHandle> {
        let handle = Arc::new(TransferHandle::new(
            &self.bucket,
            path,
            offset,
            size,
            TransferDirection::Download,
        ));
        if size == 0 {
            handle.update_status(TransferStatus::Completed);
            return handle;
        }
        let parts = tile_download_parts(offset, size, self.config.buf_max_size);
        for part in &parts {
            handle.add_part(part.clone());
        }
        handle.update_status(TransferStatus::InProgress);
        let futures = self.spawn_download_parts(&handle, parts, &sink, priority);
        self.spawn_finalizer(Arc::clone(&handle), futures, None);
        handle
    }

    /// Re-run the failed parts of a download on the same handle.
    pub fn retry_download(
        &self,
        handle: &Arc<TransferHandle>,
        sink: Arc<dyn DownloadSink>,
        priority: Priority,
    ) {
        if handle.status().is_permanent() {
            warn!(key = %handle.object_key(), "not retrying a permanently finished download");
            return;
        }
        let parts = handle.requeue_failed_parts();
        if parts.is_empty() {
            return;
        }
        handle.restart();
        let futures = self.spawn_download_parts(handle, parts, &sink, priority);
        self.spawn_finalizer(Arc::clone(handle), futures, None);
    }

    /// Upload a file of `size` bytes from `source`: one PUT at or below
    /// the multipart threshold, a multipart session otherwise.
    pub async fn upload_file(
        &self,
        path: &str,
        size: u64,
        source: Arc<dyn UploadSource>,
        priority: Priority,
    ) -> Arc<TransferHandle> {
        let handle = Arc::new(TransferHandle::new(
            &self.bucket,
            path,
            0,
            size,
            TransferDirection::Upload,
        ));

        if size <= self.config.multipart_threshold {
            self.spawn_single_put(&handle, size, source, priority);
            return handle;
        }

        // open the multipart session before any part goes out
        let client = Arc::clone(&self.client);
        let key = path.to_string();
        let outcome = with_retry_cancellable(
            &self.retry,
            "initiate multipart",
            || !handle.should_continue(),
            || client.initiate_multipart(&key),
        )
        .await;
        let upload_id = match outcome {
            Ok(id) => id,
            Err(error) => {
                warn!(key = %path, error = %error, "failed to open multipart session");
                handle.set_error(error);
                handle.update_status(TransferStatus::Failed);
                return handle;
            }
        };
        handle.set_multipart_id(&upload_id);
        debug!(key = %path, upload_id, size, "multipart upload initiated");

        let parts = tile_upload_parts(size, self.config.buf_max_size, self.config.min_part_size);
        for part in &parts {
            handle.add_part(part.clone());
        }
        handle.update_status(TransferStatus::InProgress);
        let futures = self.spawn_upload_parts(&handle, parts, &source, priority);
        self.spawn_finalizer(Arc::clone(&handle), futures, Some(upload_id));
        handle
    }

    /// Re-run the failed parts of a multipart upload on the same handle.
    pub fn retry_upload(
        &self,
        handle: &Arc<TransferHandle>,
        source: Arc<dyn UploadSource>,
        priority: Priority,
    ) {
        if handle.status().is_permanent() {
            warn!(key = %handle.object_key(), "not retrying a permanently finished upload");
            return;
        }
        let upload_id = match handle.multipart_id() {
            Some(id) => id,
            None => {
                warn!(key = %handle.object_key(), "no multipart session to retry");
                return;
            }
        };
        let parts = handle.requeue_failed_parts();
        if parts.is_empty() {
            return;
        }
        handle.restart();
        let futures = self.spawn_upload_parts(handle, parts, &source, priority);
        self.spawn_finalizer(Arc::clone(handle), futures, Some(upload_id));
    }

    /// Abort the handle's multipart session and mark it `Aborted`.
    pub async fn abort_multipart_upload(&self, handle: &Arc<TransferHandle>) -> ClientResult<()> {
        let upload_id = handle.multipart_id().ok_or_else(|| ClientError::InvalidArgument {
            context: format!("transfer of {} has no multipart session", handle.object_key()),
        })?;
        handle.cancel();
        self.client
            .abort_multipart(handle.object_key(), &upload_id)
            .await?;
        handle.update_status(TransferStatus::Aborted);
        debug!(key = %handle.object_key(), upload_id, "multipart upload aborted");
        Ok(())
    }

    fn spawn_single_put(
        &self,
        handle: &Arc<TransferHandle>,
        size: u64,
        source: Arc<dyn UploadSource>,
        priority: Priority,
    ) {
        let part = Part::new(1, 0, size);
        handle.add_part(part);
        handle.update_status(TransferStatus::InProgress);
        let client = Arc::clone(&self.client);
        let retry = self.retry.clone();
        let permits = Arc::clone(&self.permits);
        let task_handle = Arc::clone(handle);
        let future = self.executor.submit(priority, async move {
            let _permit = permits.acquire_owned().await;
            task_handle.mark_part_pending(1);
            let key = task_handle.object_key().to_string();
            let data = match source.read(0, size) {
                Ok(bytes) => bytes,
                Err(e) => {
                    let error = ClientError::Internal(format!("upload source failed: {}", e));
                    task_handle.mark_part_failed(1);
                    task_handle.set_error(error.clone());
                    task_handle.update_status(TransferStatus::Failed);
                    return Err(error);
                }
            };
            let outcome = with_retry_cancellable(
                &retry,
                "put object",
                || !task_handle.should_continue(),
                || client.put_object(&key, data.clone()),
            )
            .await;
            match outcome {
                Ok(etag) => {
                    task_handle.mark_part_completed(1, Some(&etag));
                    task_handle.update_status(TransferStatus::Completed);
                    Ok(())
                }
                Err(error) => {
                    task_handle.mark_part_failed(1);
                    task_handle.set_error(error.clone());
                    let finished = if task_handle.should_continue() {
                        TransferStatus::Failed
                    } else {
                        TransferStatus::Cancelled
                    };
                    task_handle.update_status(finished);
                    Err(error)
                }
            }
        });
        // single PUT finishes inside the task itself
        tokio::spawn(async move {
            let _ = future.join().await;
        });
    }

    fn spawn_download_parts(
        &self,
        handle: &Arc<TransferHandle>,
        parts: Vec<Part>,
        sink: &Arc<dyn DownloadSink>,
        priority: Priority,
    ) -> Vec<TaskFuture<ClientResult<()>>> {
        parts
            .into_iter()
            .map(|part| {
                let client = Arc::clone(&self.client);
                let retry = self.retry.clone();
                let permits = Arc::clone(&self.permits);
                let sink = Arc::clone(sink);
                let handle = Arc::clone(handle);
                self.executor.submit(priority, async move {
                    let _permit = permits.acquire_owned().await;
                    if !handle.should_continue() {
                        return Err(ClientError::Cancelled {
                            context: format!("download part {}", part.part_number),
                        });
                    }
                    handle.mark_part_pending(part.part_number);
                    let key = handle.object_key().to_string();
                    let outcome = with_retry_cancellable(
                        &retry,
                        "get range",
                        || !handle.should_continue(),
                        || client.get_range(&key, part.range_begin, part.size),
                    )
                    .await;
                    match outcome {
                        Ok(bytes) => match sink.write(part.range_begin, &bytes) {
                            Ok(()) => {
                                handle.mark_part_completed(part.part_number, None);
                                Ok(())
                            }
                            Err(e) => {
                                let error =
                                    ClientError::Internal(format!("download sink failed: {}", e));
                                handle.mark_part_failed(part.part_number);
                                handle.set_error(error.clone());
                                Err(error)
                            }
                        },
                        Err(error) => {
                            handle.mark_part_failed(part.part_number);
                            handle.set_error(error.clone());
                            Err(error)
                        }
                    }
                })
            })
            .collect()
    }

    fn spawn_upload_parts(
        &self,
        handle: &Arc<TransferHandle>,
        parts: Vec<Part>,
        source: &Arc<dyn UploadSource>,
        priority: Priority,
    ) -> Vec<TaskFuture<ClientResult<()>>> {
        let upload_id = handle.multipart_id().unwrap_or_default();
        parts
            .into_iter()
            .map(|part| {
                let client = Arc::clone(&self.client);
                let retry = self.retry.clone();
                let permits = Arc::clone(&self.permits);
                let source = Arc::clone(source);
                let handle = Arc::clone(handle);
                let upload_id = upload_id.clone();
                self.executor.submit(priority, async move {
                    let _permit = permits.acquire_owned().await;
                    if !handle.should_continue() {
                        return Err(ClientError::Cancelled {
                            context: format!("upload part {}", part.part_number),
                        });
                    }
                    handle.mark_part_pending(part.part_number);
                    let key = handle.object_key().to_string();
                    let data = match source.read(part.range_begin, part.size) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            let error =
                                ClientError::Internal(format!("upload source failed: {}", e));
                            handle.mark_part_failed(part.part_number);
                            handle.set_error(error.clone());
                            return Err(error);
                        }
                    };
                    let outcome = with_retry_cancellable(
                        &retry,
                        "upload part",
                        || !handle.should_continue(),
                        || client.upload_part(&key, &upload_id, part.part_number, data.clone()),
                    )
                    .await;
                    match outcome {
                        Ok(etag) => {
                            handle.mark_part_completed(part.part_number, Some(&etag));
                            Ok(())
                        }
                        Err(error) => {
                            handle.mark_part_failed(part.part_number);
                            handle.set_error(error.clone());
                            Err(error)
                        }
                    }
                })
            })
            .collect()
    }

    /// Await every part, then drive the handle to its final state. An
    /// upload with every part completed issues the multipart
    /// completion; a failed upload leaves the session open for retry or
    /// abort.
    fn spawn_finalizer(
        &self,
        handle: Arc<TransferHandle>,
        futures: Vec<TaskFuture<ClientResult<()>>>,
        upload_id: Option<String>,
    ) {
        let client = Arc::clone(&self.client);
        let retry = self.retry.clone();
        tokio::spawn(async move {
            let mut cancelled = false;
            let mut failed = false;
            for future in futures {
                match future.join().await {
                    Ok(Ok(())) => {}
                    Ok(Err(ClientError::Cancelled { .. })) | Err(ClientError::Cancelled { .. }) => {
                        cancelled = true;
                    }
                    Ok(Err(_)) | Err(_) => failed = true,
                }
            }
            if cancelled && !handle.done_transfer() {
                handle.update_status(TransferStatus::Cancelled);
                return;
            }
            if failed || handle.has_failed_parts() {
                handle.update_status(TransferStatus::Failed);
                return;
            }
            match upload_id {
                None => handle.update_status(TransferStatus::Completed),
                Some(upload_id) => {
                    let parts = handle.completed_parts();
                    let key = handle.object_key().to_string();
                    let outcome = with_retry_cancellable(
                        &retry,
                        "complete multipart",
                        || !handle.should_continue(),
                        || client.complete_multipart(&key, &upload_id, &parts),
                    )
                    .await;
                    match outcome {
                        Ok(()) => {
                            debug!(key = %key, upload_id, parts = parts.len(), "multipart upload completed");
                            handle.update_status(TransferStatus::Completed);
                        }
                        Err(error) => {
                            warn!(key = %key, upload_id, error = %error, "multipart completion failed");
                            handle.set_error(error);
                            handle.update_status(TransferStatus::Failed);
                        }
                    }
                }
            }
        });
    }
}
