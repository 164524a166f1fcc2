use async_trait::async_trait;

use qsfs_data::FileMetaData;

use crate::error::ClientResult;

/// Filesystem-level statistics reported by the store, shaped for statvfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    /// Filesystem block size.
    pub block_size: u64,
    /// Total blocks.
    pub blocks: u64,
    /// Free blocks.
    pub blocks_free: u64,
    /// Blocks available to unprivileged callers.
    pub blocks_available: u64,
    /// Total file slots.
    pub files: u64,
    /// Free file slots.
    pub files_free: u64,
    /// Longest accepted name.
    pub name_max: u64,
}

/// Result of a conditional HEAD.
#[derive(Debug, Clone)]
pub enum StatOutcome {
    /// The object exists and changed since the given time (or no
    /// condition was supplied); fresh metadata attached.
    Modified(FileMetaData),
    /// The object exists and has not changed since the given time.
    NotModified,
}

/// One completed part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based contiguous part number.
    pub part_number: u16,
    /// Entity tag the store assigned to the part.
    pub etag: String,
}

/// The capability contract the core consumes from the object store.
///
/// Primitives are HEAD/GET/PUT/DELETE on opaque keys plus LIST and the
/// multipart lifecycle. Paths use the filesystem's canonical form;
/// implementations map them to keys. Timeouts live inside the
/// implementation and surface as retryable errors.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Probe the bucket; the mount-time reachability check.
    async fn head_bucket(&self) -> ClientResult<()>;

    /// Filesystem-level statistics.
    async fn statvfs(&self) -> ClientResult<StorageStats>;

    /// HEAD one path, optionally conditional on a modification time.
    async fn stat(&self, path: &str, if_modified_since: Option<i64>) -> ClientResult<StatOutcome>;

    /// List the direct children of a directory. Pagination happens
    /// inside the implementation; the full result comes back at once.
    async fn list_directory(&self, dir_path: &str) -> ClientResult<Vec<FileMetaData>>;

    /// Create an empty object for a regular file.
    async fn make_file(&self, path: &str) -> ClientResult<()>;

    /// Create the zero-byte marker object for a directory.
    async fn make_directory(&self, dir_path: &str) -> ClientResult<()>;

    /// Persist a symbolic link as a zero-size object whose content is
    /// the target path, tagged with the symlink sentinel MIME type.
    async fn make_symlink(&self, path: &str, target: &str) -> ClientResult<()>;

    /// Delete one file object.
    async fn delete_file(&self, path: &str) -> ClientResult<()>;

    /// Delete a directory marker, and its descendants when `recursive`.
    async fn delete_directory(&self, dir_path: &str, recursive: bool) -> ClientResult<()>;

    /// Server-side move of one file object.
    async fn move_file(&self, source: &str, target: &str) -> ClientResult<()>;

    /// Server-side move of a directory and everything under it.
    async fn move_directory(&self, source: &str, target: &str) -> ClientResult<()>;

    /// Ranged GET of `[offset, offset + size)`.
    async fn get_range(&self, path: &str, offset: u64, size: u64) -> ClientResult<Vec<u8>>;

    /// Single-request PUT of a whole object; returns the new etag.
    async fn put_object(&self, path: &str, data: Vec<u8>) -> ClientResult<String>;

    /// Open a multipart session; returns the upload id.
    async fn initiate_multipart(&self, path: &str) -> ClientResult<String>;

    /// Upload one part; returns the part's etag.
    async fn upload_part(
        &self,
        path: &str,
        upload_id: &str,
        part_number: u16,
        data: Vec<u8>,
    ) -> ClientResult<String>;

    /// Complete a multipart session from the collected part list.
    async fn complete_multipart(
        &self,
        path: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> ClientResult<()>;

    /// Abort a multipart session, discarding uploaded parts.
    async fn abort_multipart(&self, path: &str, upload_id: &str) -> ClientResult<()>;
}
