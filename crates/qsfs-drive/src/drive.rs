use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info, warn};

use qsfs_client::executor::{Executor, Priority};
use qsfs_client::object_client::{ObjectClient, StatOutcome, StorageStats};
use qsfs_client::transfer::{TransferHandle, TransferStatus};
use qsfs_client::transfer_manager::{DownloadSink, TransferManager, UploadSource};
use qsfs_client::ClientError;
use qsfs_data::metadata::SYMLINK_MIME_TYPE;
use qsfs_data::node::Node;
use qsfs_data::{
    path as qpath, unix_now, CacheConfig, DataError, DirectoryTree, FileMetaData,
    FileMetaDataManager, FileStat, FileType, PageCache,
};

use crate::error::{DriveError, DriveResult};
use crate::options::Options;
use crate::single_flight::{Flight, SingleFlight};

/// The POSIX-flavored façade the FUSE adapter calls into.
///
/// Owns the directory tree, the page cache, the transfer engine and the
/// client task pool, and implements the synchronous/asynchronous split
/// each operation requires: work a caller is blocked on is awaited,
/// everything else is submitted to the pool.
pub struct Drive {
    me: Weak<Drive>,
    options: Options,
    client: Arc<dyn ObjectClient>,
    client_executor: Arc<Executor>,
    transfer: Arc<TransferManager>,
    cache: Arc<PageCache>,
    tree: Arc<DirectoryTree>,
    meta_manager: Arc<FileMetaDataManager>,
    unfinished_uploads: Mutex<HashMap<String, Arc<TransferHandle>>>,
    inflight: SingleFlight,
    connected: AtomicBool,
    torn_down: AtomicBool,
}

struct CacheSink {
    cache: Arc<PageCache>,
    path: String,
    mtime: i64,
}

impl DownloadSink for CacheSink {
    fn write(&self, offset: u64, data: &[u8]) -> std::io::Result<()> {
        self.cache
            .write(&self.path, offset, data, self.mtime)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

struct CacheSource {
    cache: Arc<PageCache>,
    path: String,
    file_size: u64,
}

impl UploadSource for CacheSource {
    fn read(&self, offset: u64, size: u64) -> std::io::Result<Vec<u8>> {
        self.cache
            .read(&self.path, offset, size, self.file_size)
            .map_err(|e| std::io::Error::other(e.to_string()))
    }
}

impl Drive {
    /// Wire up a drive over the given client. Must run inside a tokio
    /// runtime; worker pools are spawned here.
    pub fn new(options: Options, client: Arc<dyn ObjectClient>) -> DriveResult<Arc<Drive>> {
        options
            .validate()
            .map_err(|reason| DriveError::Client(ClientError::InvalidArgument { context: reason }))?;
        let meta_manager = FileMetaDataManager::new(options.meta_manager_config());
        let cache_config: CacheConfig = options.cache_config();
        let cache = Arc::new(PageCache::new(cache_config, Arc::clone(&meta_manager))?);
        let tree = Arc::new(DirectoryTree::new(
            Arc::clone(&meta_manager),
            unix_now(),
            options.uid,
            options.gid,
            options.root_mode,
        ));
        let client_executor = Executor::new(options.client_executor_config());
        let transfer_executor = Executor::new(options.transfer_executor_config());
        let transfer = TransferManager::new(
            &options.bucket,
            Arc::clone(&client),
            transfer_executor,
            options.retry_policy(),
            options.transfer_config(),
        );
        info!(bucket = %options.bucket, "drive assembled");
        Ok(Arc::new_cyclic(|me| Drive {
            me: me.clone(),
            options,
            client,
            client_executor,
            transfer,
            cache,
            tree,
            meta_manager,
            unfinished_uploads: Mutex::new(HashMap::new()),
            inflight: SingleFlight::new(),
            connected: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }))
    }

    /// Mount options the drive was built with.
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// The live namespace.
    pub fn tree(&self) -> &Arc<DirectoryTree> {
        &self.tree
    }

    /// The page cache.
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// The metadata registry.
    pub fn meta_manager(&self) -> &Arc<FileMetaDataManager> {
        &self.meta_manager
    }

    /// Multipart uploads still holding an open store session.
    pub fn unfinished_upload_count(&self) -> usize {
        self.unfinished_uploads.lock().unwrap().len()
    }

    /// HEAD the bucket synchronously; on success kick off an
    /// asynchronous listing of the root. A dead bucket fails the mount.
    pub async fn connect(&self) -> DriveResult<()> {
        if let Err(e) = self.client.head_bucket().await {
            error!(bucket = %self.options.bucket, error = %e, "bucket unreachable");
            return Err(DriveError::Unreachable {
                bucket: self.options.bucket.clone(),
                reason: e.to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        self.spawn_list_directory(qpath::ROOT_PATH);
        info!(bucket = %self.options.bucket, "connected");
        Ok(())
    }

    /// True once a connect succeeded.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The root node.
    pub fn root(&self) -> Arc<Node> {
        self.tree.root()
    }

    /// Local tree lookup only, trying the directory form as well.
    pub fn find_node(&self, path: &str) -> Option<Arc<Node>> {
        self.tree
            .find(path)
            .or_else(|| self.tree.find(&qpath::to_dir_path(path)))
    }

    /// Resolve a path to a node, consulting the store.
    ///
    /// A resident node is revalidated with a conditional HEAD; a 404
    /// drops it from the tree and the cache. An unknown path is HEADed
    /// unconditionally and grown into the tree when found. With
    /// `update_if_dir`, a modified or empty directory gets its listing
    /// refreshed asynchronously. Returns the node plus a flag telling
    /// whether the store reported it modified.
    pub async fn get_node(
        &self,
        path: &str,
        update_if_dir: bool,
    ) -> DriveResult<Option<(Arc<Node>, bool)>> {
        qpath::validate(path).map_err(DriveError::Data)?;
        if qpath::is_root(path) {
            // the root has no store object; freshness comes from LIST
            let root = self.tree.root();
            if update_if_dir && root.is_empty() {
                self.spawn_list_directory(qpath::ROOT_PATH);
            }
            return Ok(Some((root, false)));
        }

        let mut modified = false;
        let node = match self.find_node(path) {
            Some(node) => {
                if self.is_local_only(&node) {
                    Some(node)
                } else {
                    match self.refresh_node(&node).await? {
                        Some(was_modified) => {
                            modified = was_modified;
                            Some(node)
                        }
                        None => None,
                    }
                }
            }
            None => match self.client.stat(path, None).await {
                Ok(StatOutcome::Modified(meta)) => Some(self.tree.grow(meta)?),
                Ok(StatOutcome::NotModified) => None,
                Err(ClientError::KeyNotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            },
        };

        if let Some(node) = &node {
            if update_if_dir && node.is_directory() && (modified || node.is_empty()) {
                self.spawn_list_directory(&node.path());
            }
        }
        Ok(node.map(|n| (n, modified)))
    }

    /// The children of a directory, refreshed synchronously when the
    /// directory is modified or empty.
    pub async fn get_children(&self, dir_path: &str) -> DriveResult<Vec<Arc<Node>>> {
        let dir = qpath::to_dir_path(dir_path);
        let (node, modified) =
            self.get_node(&dir, false)
                .await?
                .ok_or_else(|| DataError::NotFound {
                    path: dir.clone(),
                })?;
        if !node.is_directory() {
            return Err(DataError::NotDirectory { path: dir }.into());
        }
        if modified || node.is_empty() {
            let listed = self.client.list_directory(&dir).await?;
            self.tree.update_directory(&dir, listed)?;
        }
        Ok(self.tree.find_children(&dir))
    }

    /// Read `size` bytes at `offset`.
    ///
    /// The requested range is fetched synchronously when not cached;
    /// any remaining unloaded ranges of the file are scheduled for
    /// asynchronous download. Reads past EOF clamp; zero-size reads
    /// return empty without touching the store.
    pub async fn read_file(
        &self,
        path: &str,
        offset: u64,
        size: u64,
    ) -> DriveResult<Vec<u8>> {
        if size == 0 {
            return Ok(Vec::new());
        }
        if size > self.options.max_file_cache_bytes {
            return Err(DriveError::TooLarge {
                size,
                budget: self.options.max_file_cache_bytes,
            });
        }
        let (node, modified) =
            self.get_node(path, false)
                .await?
                .ok_or_else(|| DataError::NotFound {
                    path: path.to_string(),
                })?;
        if node.is_directory() {
            return Err(DataError::IsDirectory {
                path: path.to_string(),
            }
            .into());
        }
        let file_size = node.file_size();
        if offset >= file_size {
            return Ok(Vec::new());
        }
        let wanted = size.min(file_size - offset);
        let mtime = node.mtime();

        // a newer store copy invalidates whatever we had
        if let Some(cached_mtime) = self.cache.file_mtime(path) {
            if cached_mtime < mtime {
                debug!(path, cached_mtime, mtime, "cached content superseded, dropping");
                self.cache.erase(path);
            }
        }

        if modified || !self.cache.has_file_data(path, offset, wanted) {
            self.download_range_blocking(path, offset, wanted, mtime)
                .await?;
        }

        if offset + wanted < file_size {
            let ranges = self.cache.unloaded_ranges(path, file_size);
            if !ranges.is_empty() {
                self.spawn_download_ranges(path, ranges.into_iter().collect(), mtime);
            }
        }

        Ok(self.cache.read(path, offset, wanted, file_size)?)
    }

    /// Buffer a write in the page cache, marking the file dirty and
    /// extending its logical size when the write lands past EOF.
    /// Requires an open file.
    pub fn write_file(&self, path: &str, offset: u64, data: &[u8]) -> DriveResult<usize> {
        if data.len() as u64 > self.options.max_file_cache_bytes {
            return Err(DriveError::TooLarge {
                size: data.len() as u64,
                budget: self.options.max_file_cache_bytes,
            });
        }
        let node = self.find_node(path).ok_or_else(|| DataError::NotFound {
            path: path.to_string(),
        })?;
        if !node.is_file_open() {
            return Err(DriveError::NotOpen {
                path: path.to_string(),
            });
        }
        let mtime = unix_now();
        self.cache.write(path, offset, data, mtime)?;
        if let Some(meta) = node.meta() {
            let mut meta = meta.write().unwrap();
            meta.dirty = true;
            meta.mtime = mtime;
            let end = offset + data.len() as u64;
            if end > meta.size {
                meta.size = end;
            }
        }
        Ok(data.len())
    }

    /// Open a file: schedule asynchronous download of whatever content
    /// is not resident yet and mark the node open.
    pub async fn open_file(&self, path: &str) -> DriveResult<()> {
        let (node, modified) =
            self.get_node(path, false)
                .await?
                .ok_or_else(|| DataError::NotFound {
                    path: path.to_string(),
                })?;
        let file_size = node.file_size();
        let mtime = node.mtime();
        if file_size == 0 {
            self.cache.write(path, 0, &[], mtime)?;
        } else if modified || !self.cache.has_file_data(path, 0, file_size) {
            let ranges = self.cache.unloaded_ranges(path, file_size);
            if !ranges.is_empty() {
                self.spawn_download_ranges(path, ranges.into_iter().collect(), mtime);
            }
        }
        node.set_file_open(true);
        debug!(path, file_size, "file opened");
        Ok(())
    }

    /// Flush a file to the store on release: make every range
    /// cache-resident, upload from the cache, then drop the cached
    /// content so the next access re-reads authoritative data.
    pub async fn upload_file(&self, path: &str) -> DriveResult<()> {
        let node = self.find_node(path).ok_or_else(|| DataError::NotFound {
            path: path.to_string(),
        })?;
        let file_size = node.file_size();
        let mtime = node.mtime();

        let ranges = self.cache.unloaded_ranges(path, file_size);
        for (off, len) in ranges {
            self.download_range_blocking(path, off, len, mtime).await?;
        }

        let source = Arc::new(CacheSource {
            cache: Arc::clone(&self.cache),
            path: path.to_string(),
            file_size,
        });
        let handle = self
            .transfer
            .upload_file(path, file_size, source, Priority::High)
            .await;
        if handle.is_multipart() {
            self.unfinished_uploads
                .lock()
                .unwrap()
                .insert(path.to_string(), Arc::clone(&handle));
        }
        let status = handle.wait_until_finished().await;
        if status != TransferStatus::Completed {
            warn!(path, ?status, "upload did not complete");
            return Err(match handle.error() {
                Some(e) => {
                    if matches!(e, ClientError::EtagMismatch { .. }) {
                        // the store copy changed under us; force re-read
                        self.cache.erase(path);
                    }
                    e.into()
                }
                None => DriveError::TransferFailed {
                    path: path.to_string(),
                },
            });
        }
        self.unfinished_uploads.lock().unwrap().remove(path);

        if let Some(meta) = node.meta() {
            let mut meta = meta.write().unwrap();
            meta.dirty = false;
            meta.file_open = false;
        }
        // refresh mtime and etag from the authoritative copy
        match self.client.stat(path, None).await {
            Ok(StatOutcome::Modified(meta)) => {
                self.tree.grow(meta)?;
            }
            Ok(StatOutcome::NotModified) => {}
            Err(e) => warn!(path, error = %e, "post-upload stat failed"),
        }
        self.cache.erase(path);
        info!(path, file_size, "uploaded");
        Ok(())
    }

    /// Remove a file: the tree and cache drop it now, the store DELETE
    /// runs asynchronously.
    pub async fn delete_file(&self, path: &str) -> DriveResult<()> {
        let node = self.find_node(path).ok_or_else(|| DataError::NotFound {
            path: path.to_string(),
        })?;
        if node.is_directory() {
            return Err(DataError::IsDirectory {
                path: path.to_string(),
            }
            .into());
        }
        let local_only = self.is_local_only(&node);
        self.cache.erase(path);
        self.tree.remove(path)?;
        if !local_only {
            let client = Arc::clone(&self.client);
            let key = path.to_string();
            self.client_executor.submit(Priority::Normal, async move {
                if let Err(e) = client.delete_file(&key).await {
                    warn!(path = %key, error = %e, "store delete failed");
                }
            });
        }
        Ok(())
    }

    /// Remove a directory; must be empty unless `recursive`.
    pub async fn delete_directory(
        &self,
        dir_path: &str,
        recursive: bool,
    ) -> DriveResult<()> {
        let dir = qpath::to_dir_path(dir_path);
        let node = self.find_node(&dir).ok_or_else(|| DataError::NotFound {
            path: dir.clone(),
        })?;
        if !node.is_directory() {
            return Err(DataError::NotDirectory { path: dir }.into());
        }
        if !recursive && !node.is_empty() {
            return Err(DataError::NotEmpty { path: dir }.into());
        }
        let mut descendants: Vec<String> = node.children_paths_recursive().into();
        descendants.reverse(); // deepest first
        for descendant in descendants {
            self.cache.erase(&descendant);
            if let Err(e) = self.tree.remove(&descendant) {
                debug!(path = %descendant, error = %e, "descendant already gone");
            }
        }
        self.tree.remove(&dir)?;
        let client = Arc::clone(&self.client);
        let key = dir.clone();
        self.client_executor.submit(Priority::Normal, async move {
            if let Err(e) = client.delete_directory(&key, recursive).await {
                warn!(path = %key, error = %e, "store directory delete failed");
            }
        });
        Ok(())
    }

    /// Rename a file through a server-side move, then resync the new
    /// path so the refreshed mtime lands in the tree.
    pub async fn rename_file(&self, old: &str, new: &str) -> DriveResult<()> {
        let node = self.find_node(old).ok_or_else(|| DataError::NotFound {
            path: old.to_string(),
        })?;
        if node.is_directory() {
            return Err(DataError::IsDirectory {
                path: old.to_string(),
            }
            .into());
        }
        if self.find_node(new).is_some() {
            return Err(DataError::AlreadyExists {
                path: new.to_string(),
            }
            .into());
        }
        if !self.is_local_only(&node) {
            self.client.move_file(old, new).await?;
        }
        self.cache.rename(old, new);
        self.tree.rename(old, new)?;
        if !self.is_local_only(&node) {
            self.get_node(new, false).await?;
        }
        info!(old, new, "file renamed");
        Ok(())
    }

    /// Rename a directory: server-side move of the subtree, local
    /// subtree rename, then an asynchronous refresh of the new listing.
    pub async fn rename_directory(&self, old: &str, new: &str) -> DriveResult<()> {
        let old_dir = qpath::to_dir_path(old);
        let new_dir = qpath::to_dir_path(new);
        if qpath::is_root(&old_dir) {
            return Err(DataError::InvalidPath {
                path: old_dir,
                reason: "cannot rename root".to_string(),
            }
            .into());
        }
        let node = self.find_node(&old_dir).ok_or_else(|| DataError::NotFound {
            path: old_dir.clone(),
        })?;
        if !node.is_directory() {
            return Err(DataError::NotDirectory { path: old_dir }.into());
        }
        if self.find_node(&new_dir).is_some() {
            return Err(DataError::AlreadyExists { path: new_dir }.into());
        }
        self.client.move_directory(&old_dir, &new_dir).await?;

        let descendants: Vec<String> = node.children_paths_recursive().into();
        for descendant in descendants {
            if let Some(suffix) = descendant.strip_prefix(&old_dir) {
                self.cache.rename(&descendant, &format!("{}{}", new_dir, suffix));
            }
        }
        self.tree.rename(&old_dir, &new_dir)?;
        self.get_node(&new_dir, true).await?;
        info!(old = %old_dir, new = %new_dir, "directory renamed");
        Ok(())
    }

    /// Create a file node. Regular files are created in the store and
    /// refreshed with an asynchronous HEAD; device, FIFO and socket
    /// nodes exist locally only, the store has no representation for
    /// them.
    pub async fn make_file(&self, path: &str, mode: u32, dev: u64) -> DriveResult<()> {
        if self.find_node(path).is_some() {
            return Err(DataError::AlreadyExists {
                path: path.to_string(),
            }
            .into());
        }
        let format = mode & (libc::S_IFMT as u32);
        let file_type = match format {
            0 | libc::S_IFREG => FileType::File,
            libc::S_IFBLK => FileType::Block,
            libc::S_IFCHR => FileType::Character,
            libc::S_IFIFO => FileType::Fifo,
            libc::S_IFSOCK => FileType::Socket,
            other => {
                return Err(DataError::InvalidPath {
                    path: path.to_string(),
                    reason: format!("unsupported file format {:#o}", other),
                }
                .into())
            }
        };
        let perm = if mode & 0o7777 != 0 {
            mode & 0o7777
        } else {
            self.options.define_file_mode
        };
        let now = unix_now();
        let meta = FileMetaData::new(
            path,
            0,
            now,
            now,
            self.options.uid,
            self.options.gid,
            perm,
            file_type,
        )
        .with_dev(dev);

        if file_type == FileType::File {
            self.client.make_file(path).await?;
            self.tree.grow(meta)?;
            // pick up the store-assigned etag without blocking the caller
            if let Some(drive) = self.me.upgrade() {
                let key = path.to_string();
                self.client_executor.submit(Priority::Normal, async move {
                    if let Err(e) = drive.get_node(&key, false).await {
                        warn!(path = %key, error = %e, "post-create refresh failed");
                    }
                });
            }
        } else {
            self.tree.grow(meta)?;
            debug!(path, ?file_type, "special node created locally only");
        }
        Ok(())
    }

    /// Create a directory; fails with "exists" when any entry already
    /// occupies the path, file or directory.
    pub async fn make_directory(&self, dir_path: &str, mode: u32) -> DriveResult<()> {
        let file_form = dir_path.trim_end_matches('/');
        let file_form = if file_form.is_empty() { "/" } else { file_form };
        if self.get_node(file_form, false).await?.is_some() {
            return Err(DataError::AlreadyExists {
                path: dir_path.to_string(),
            }
            .into());
        }
        let dir = qpath::to_dir_path(dir_path);
        let perm = if mode & 0o7777 != 0 {
            mode & 0o7777
        } else {
            self.options.define_dir_mode
        };
        self.client.make_directory(&dir).await?;
        let now = unix_now();
        self.tree.grow(FileMetaData::new(
            &dir,
            0,
            now,
            now,
            self.options.uid,
            self.options.gid,
            perm,
            FileType::Directory,
        ))?;
        Ok(())
    }

    /// Create a symbolic link whose content is the target path; the
    /// store persists it as a zero-size object with the sentinel MIME
    /// type.
    pub async fn make_symlink(&self, target: &str, link_path: &str) -> DriveResult<()> {
        if self.find_node(link_path).is_some() {
            return Err(DataError::AlreadyExists {
                path: link_path.to_string(),
            }
            .into());
        }
        self.client.make_symlink(link_path, target).await?;
        let now = unix_now();
        let meta = FileMetaData::new(
            link_path,
            target.len() as u64,
            now,
            now,
            self.options.uid,
            self.options.gid,
            0o777,
            FileType::SymLink,
        )
        .with_mime_type(SYMLINK_MIME_TYPE);
        let node = self.tree.grow(meta)?;
        node.set_symlink_target(target);
        Ok(())
    }

    /// The target of a symbolic link, fetched from the store when not
    /// cached on the node yet.
    pub async fn read_symlink(&self, path: &str) -> DriveResult<String> {
        let node = self.find_node(path).ok_or_else(|| DataError::NotFound {
            path: path.to_string(),
        })?;
        if !node.is_symlink() {
            return Err(DataError::InvalidPath {
                path: path.to_string(),
                reason: "not a symbolic link".to_string(),
            }
            .into());
        }
        if let Some(target) = node.symlink_target() {
            return Ok(target);
        }
        let size = node.file_size().max(1);
        let bytes = self.client.get_range(path, 0, size).await?;
        let target = String::from_utf8_lossy(&bytes).to_string();
        node.set_symlink_target(&target);
        Ok(target)
    }

    /// Truncate (or logically extend) a file, zero-filling an extension
    /// in the cache so subsequent reads see defined bytes.
    pub async fn truncate_file(&self, path: &str, new_size: u64) -> DriveResult<()> {
        let node = self.find_node(path).ok_or_else(|| DataError::NotFound {
            path: path.to_string(),
        })?;
        let old_size = node.file_size();
        if new_size == old_size {
            return Ok(());
        }
        let mtime = unix_now();
        if new_size < old_size {
            self.cache.resize(path, new_size, mtime);
        } else {
            let ranges = self.cache.unloaded_ranges(path, old_size);
            for (off, len) in ranges {
                self.download_range_blocking(path, off, len, node.mtime())
                    .await?;
            }
            let grow_by = (new_size - old_size) as usize;
            self.cache
                .write(path, old_size, &vec![0u8; grow_by], mtime)?;
        }
        if let Some(meta) = node.meta() {
            let mut meta = meta.write().unwrap();
            meta.size = new_size;
            meta.mtime = mtime;
            meta.ctime = mtime;
            meta.dirty = true;
        }
        debug!(path, old_size, new_size, "truncated");
        Ok(())
    }

    /// Change permission bits locally.
    pub fn chmod(&self, path: &str, mode: u32) -> DriveResult<()> {
        self.update_meta(path, |meta| meta.mode = mode & 0o7777)
    }

    /// Change ownership locally.
    pub fn chown(&self, path: &str, uid: u32, gid: u32) -> DriveResult<()> {
        self.update_meta(path, |meta| {
            meta.uid = uid;
            meta.gid = gid;
        })
    }

    /// Change the modification time locally.
    pub fn utimens(&self, path: &str, mtime: i64) -> DriveResult<()> {
        self.update_meta(path, |meta| meta.mtime = mtime)
    }

    /// Create a local-only hard link; it does not survive a remount
    /// because the store has no link primitive.
    pub fn hard_link(&self, target: &str, link_path: &str) -> DriveResult<()> {
        self.tree.hard_link(target, link_path)?;
        Ok(())
    }

    /// POSIX access predicate against a resident node.
    pub fn check_access(&self, path: &str, uid: u32, gid: u32, mask: i32) -> DriveResult<bool> {
        let node = self.find_node(path).ok_or_else(|| DataError::NotFound {
            path: path.to_string(),
        })?;
        Ok(node.access(uid, gid, mask))
    }

    /// Fresh attributes for a path, consulting the store.
    pub async fn getattr(&self, path: &str) -> DriveResult<FileStat> {
        let (node, _) = self
            .get_node(path, false)
            .await?
            .ok_or_else(|| DataError::NotFound {
                path: path.to_string(),
            })?;
        node.to_stat().ok_or_else(|| {
            DataError::MetadataEvicted {
                path: path.to_string(),
            }
            .into()
        })
    }

    /// Filesystem statistics straight from the store.
    pub async fn statistics(&self) -> DriveResult<StorageStats> {
        Ok(self.client.statvfs().await?)
    }

    /// Abort outstanding multipart uploads and remove the scratch
    /// directory. Call once before dropping the drive.
    pub async fn shutdown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<(String, Arc<TransferHandle>)> =
            self.unfinished_uploads.lock().unwrap().drain().collect();
        for (path, handle) in handles {
            warn!(path, "aborting unfinished multipart upload at shutdown");
            if let Err(e) = self.transfer.abort_multipart_upload(&handle).await {
                warn!(path, error = %e, "abort failed");
            }
        }
        self.client_executor.shutdown();
        self.cache.remove_scratch_directory();
        info!("drive shut down");
    }

    fn update_meta<F>(&self, path: &str, apply: F) -> DriveResult<()>
    where
        F: FnOnce(&mut FileMetaData),
    {
        let node = self.find_node(path).ok_or_else(|| DataError::NotFound {
            path: path.to_string(),
        })?;
        let meta = node.meta().ok_or_else(|| DataError::MetadataEvicted {
            path: path.to_string(),
        })?;
        let mut meta = meta.write().unwrap();
        apply(&mut meta);
        meta.ctime = unix_now();
        Ok(())
    }

    /// Entries with no store representation: hard links and device,
    /// FIFO or socket nodes.
    fn is_local_only(&self, node: &Arc<Node>) -> bool {
        if node.is_hard_link() {
            return true;
        }
        matches!(
            node.file_type(),
            Some(FileType::Block)
                | Some(FileType::Character)
                | Some(FileType::Fifo)
                | Some(FileType::Socket)
        )
    }

    /// Conditional HEAD of a resident node. `Ok(None)` means the store
    /// no longer has the object and the node was dropped.
    async fn refresh_node(&self, node: &Arc<Node>) -> DriveResult<Option<bool>> {
        let path = node.path();
        match self.client.stat(&path, Some(node.mtime())).await {
            Ok(StatOutcome::Modified(meta)) => {
                self.tree.grow(meta)?;
                Ok(Some(true))
            }
            Ok(StatOutcome::NotModified) => Ok(Some(false)),
            Err(ClientError::KeyNotFound { .. }) => {
                // removed behind our back, e.g. through another mount
                info!(path, "object vanished from the store, dropping node");
                if self.cache.has_file(&path) {
                    self.cache.erase(&path);
                }
                if let Err(e) = self.tree.remove(&path) {
                    debug!(path, error = %e, "node already gone");
                }
                Ok(None)
            }
            Err(e) => {
                warn!(path, error = %e, "conditional stat failed, serving stale node");
                Ok(Some(false))
            }
        }
    }

    /// Download `[offset, offset + size)` into the cache, blocking the
    /// caller. Concurrent identical requests collapse into one GET.
    async fn download_range_blocking(
        &self,
        path: &str,
        offset: u64,
        size: u64,
        mtime: i64,
    ) -> DriveResult<()> {
        let key = (path.to_string(), offset, size);
        match self.inflight.join(key).await {
            Flight::Follower => Ok(()),
            Flight::Leader(_guard) => {
                self.set_pending_get(path, true);
                let sink = Arc::new(CacheSink {
                    cache: Arc::clone(&self.cache),
                    path: path.to_string(),
                    mtime,
                });
                let handle =
                    self.transfer
                        .download_file(path, offset, size, sink, Priority::High);
                let status = handle.wait_until_finished().await;
                self.set_pending_get(path, false);
                if status == TransferStatus::Completed {
                    Ok(())
                } else {
                    Err(match handle.error() {
                        Some(e) => e.into(),
                        None => DriveError::TransferFailed {
                            path: path.to_string(),
                        },
                    })
                }
            }
        }
    }

    /// Schedule background downloads of `ranges` through the client
    /// pool; failures are logged, never surfaced.
    fn spawn_download_ranges(&self, path: &str, ranges: Vec<(u64, u64)>, mtime: i64) {
        let drive = match self.me.upgrade() {
            Some(drive) => drive,
            None => return,
        };
        let path = path.to_string();
        self.client_executor.submit(Priority::Normal, async move {
            for (off, len) in ranges {
                if let Err(e) = drive.download_range_blocking(&path, off, len, mtime).await {
                    warn!(path, off, len, error = %e, "background range download failed");
                    break;
                }
            }
        });
    }

    /// Refresh a directory's listing in the background.
    fn spawn_list_directory(&self, dir_path: &str) {
        let drive = match self.me.upgrade() {
            Some(drive) => drive,
            None => return,
        };
        let dir = qpath::to_dir_path(dir_path);
        self.client_executor.submit(Priority::Normal, async move {
            match drive.client.list_directory(&dir).await {
                Ok(listed) => {
                    if let Err(e) = drive.tree.update_directory(&dir, listed) {
                        warn!(dir, error = %e, "listing ingest failed");
                    }
                }
                Err(e) => warn!(dir, error = %e, "background listing failed"),
            }
        });
    }

    fn set_pending_get(&self, path: &str, pending: bool) {
        if let Some(slot) = self.meta_manager.get(path) {
            slot.write().unwrap().pending_get = pending;
        }
    }
}

impl Drop for Drive {
    fn drop(&mut self) {
        if !self.torn_down.load(Ordering::SeqCst) {
            warn!("drive dropped without shutdown; scratch directory left behind");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsfs_client::MockObjectClient;

    fn options(dir: &tempfile::TempDir) -> Options {
        Options {
            bucket: "test-bucket".to_string(),
            cache_temporary_directory: dir.path().join("scratch"),
            retry_scale_ms: 1,
            ..Options::default()
        }
    }

    async fn mounted() -> (Arc<Drive>, Arc<MockObjectClient>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockObjectClient::new());
        let drive = Drive::new(options(&dir), Arc::clone(&client) as Arc<dyn ObjectClient>).unwrap();
        drive.connect().await.unwrap();
        // let the initial root listing settle before tests seed objects
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        (drive, client, dir)
    }

    #[tokio::test]
    async fn test_connect_requires_reachable_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockObjectClient::new());
        client.inject_error(
            "head_bucket",
            ClientError::BucketNotFound {
                bucket: "test-bucket".into(),
            },
        );
        let drive = Drive::new(options(&dir), Arc::clone(&client) as Arc<dyn ObjectClient>).unwrap();
        assert!(matches!(
            drive.connect().await,
            Err(DriveError::Unreachable { .. })
        ));
        assert!(!drive.is_connected());
    }

    #[tokio::test]
    async fn test_get_node_heads_unknown_path_and_grows() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/a", b"data");
        let (node, _) = drive.get_node("/a", false).await.unwrap().unwrap();
        assert_eq!(node.file_size(), 4);
        assert!(drive.tree().has("/a"));
        assert!(client.counts().stat >= 1);
    }

    #[tokio::test]
    async fn test_get_node_missing_path_is_none() {
        let (drive, _client, _dir) = mounted().await;
        assert!(drive.get_node("/nope", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_node_drops_vanished_object() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/a", b"data");
        drive.get_node("/a", false).await.unwrap().unwrap();
        client.delete_file("/a").await.unwrap();
        assert!(drive.get_node("/a", false).await.unwrap().is_none());
        assert!(!drive.tree().has("/a"));
    }

    #[tokio::test]
    async fn test_get_children_lists_synchronously() {
        let (drive, client, _dir) = mounted().await;
        client.seed_directory("/d/");
        client.seed_file("/d/one", b"1");
        client.seed_file("/d/two", b"22");
        let children = drive.get_children("/d/").await.unwrap();
        let mut paths: Vec<String> = children.iter().map(|n| n.path()).collect();
        paths.sort();
        assert_eq!(paths, vec!["/d/one".to_string(), "/d/two".to_string()]);
    }

    #[tokio::test]
    async fn test_read_file_downloads_requested_range() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"hello world");
        let bytes = drive.read_file("/f", 0, 5).await.unwrap();
        assert_eq!(bytes, b"hello");
        assert!(client.counts().get_range >= 1);
    }

    #[tokio::test]
    async fn test_read_clamps_past_eof() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"hello");
        let bytes = drive.read_file("/f", 3, 100).await.unwrap();
        assert_eq!(bytes, b"lo");
        assert!(drive.read_file("/f", 10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_size_read_never_contacts_store() {
        let (drive, client, _dir) = mounted().await;
        let before = client.counts().stat;
        assert!(drive.read_file("/f", 0, 0).await.unwrap().is_empty());
        assert_eq!(client.counts().stat, before);
    }

    #[tokio::test]
    async fn test_oversized_read_rejected() {
        let (drive, _client, _dir) = mounted().await;
        let budget = drive.options().max_file_cache_bytes;
        assert!(matches!(
            drive.read_file("/f", 0, budget + 1).await,
            Err(DriveError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_requires_open_file() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"data");
        drive.get_node("/f", false).await.unwrap();
        assert!(matches!(
            drive.write_file("/f", 0, b"x"),
            Err(DriveError::NotOpen { .. })
        ));
        drive.open_file("/f").await.unwrap();
        assert_eq!(drive.write_file("/f", 0, b"x").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_extends_size_and_marks_dirty() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"data");
        drive.open_file("/f").await.unwrap();
        drive.write_file("/f", 2, b"xyz").unwrap();
        let node = drive.find_node("/f").unwrap();
        assert_eq!(node.file_size(), 5);
        assert!(node.is_dirty());
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip_without_upload() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"");
        drive.open_file("/f").await.unwrap();
        drive.write_file("/f", 0, b"hello").unwrap();
        let bytes = drive.read_file("/f", 0, 5).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_upload_flushes_and_erases_cache() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"");
        drive.open_file("/f").await.unwrap();
        drive.write_file("/f", 0, b"hello").unwrap();
        drive.upload_file("/f").await.unwrap();
        assert_eq!(client.object_data("/f").unwrap(), b"hello");
        assert!(!drive.cache().has_file_data("/f", 0, 5));
        let node = drive.find_node("/f").unwrap();
        assert!(!node.is_dirty());
        assert!(!node.is_file_open());
    }

    #[tokio::test]
    async fn test_delete_file_removes_locally_and_in_store() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"data");
        drive.get_node("/f", false).await.unwrap();
        drive.delete_file("/f").await.unwrap();
        assert!(!drive.tree().has("/f"));
        // the DELETE itself is asynchronous
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!client.has_object("/f"));
    }

    #[tokio::test]
    async fn test_delete_directory_requires_empty() {
        let (drive, client, _dir) = mounted().await;
        client.seed_directory("/d/");
        client.seed_file("/d/f", b"1");
        drive.get_children("/d/").await.unwrap();
        assert!(matches!(
            drive.delete_directory("/d/", false).await,
            Err(DriveError::Data(DataError::NotEmpty { .. }))
        ));
        drive.delete_directory("/d/", true).await.unwrap();
        assert!(!drive.tree().has("/d/"));
        assert!(!drive.tree().has("/d/f"));
    }

    #[tokio::test]
    async fn test_rename_file_moves_object_and_node() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/a", b"data");
        drive.get_node("/a", false).await.unwrap();
        drive.rename_file("/a", "/b").await.unwrap();
        assert!(!drive.tree().has("/a"));
        assert!(drive.tree().has("/b"));
        assert!(client.has_object("/b"));
        assert!(!client.has_object("/a"));
    }

    #[tokio::test]
    async fn test_rename_to_existing_target_rejected() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/a", b"1");
        client.seed_file("/b", b"2");
        drive.get_node("/a", false).await.unwrap();
        drive.get_node("/b", false).await.unwrap();
        assert!(matches!(
            drive.rename_file("/a", "/b").await,
            Err(DriveError::Data(DataError::AlreadyExists { .. }))
        ));
    }

    #[tokio::test]
    async fn test_make_directory_over_file_is_eexist() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/x", b"1");
        let err = drive.make_directory("/x", 0o755).await.unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[tokio::test]
    async fn test_make_file_and_special_nodes() {
        let (drive, client, _dir) = mounted().await;
        drive.make_file("/plain", 0o644, 0).await.unwrap();
        assert!(client.has_object("/plain"));

        drive
            .make_file("/pipe", libc::S_IFIFO as u32 | 0o600, 0)
            .await
            .unwrap();
        assert!(!client.has_object("/pipe"), "special nodes stay local");
        let node = drive.find_node("/pipe").unwrap();
        assert_eq!(node.file_type(), Some(FileType::Fifo));
    }

    #[tokio::test]
    async fn test_symlink_roundtrip() {
        let (drive, client, _dir) = mounted().await;
        drive.make_symlink("/target", "/lnk").await.unwrap();
        assert!(client.has_object("/lnk"));
        assert_eq!(drive.read_symlink("/lnk").await.unwrap(), "/target");

        // a fresh mount has to fetch the target from the store
        let dir2 = tempfile::tempdir().unwrap();
        let drive2 =
            Drive::new(options(&dir2), Arc::clone(&client) as Arc<dyn ObjectClient>).unwrap();
        drive2.connect().await.unwrap();
        drive2.get_node("/lnk", false).await.unwrap().unwrap();
        assert_eq!(drive2.read_symlink("/lnk").await.unwrap(), "/target");
        drive2.shutdown().await;
    }

    #[tokio::test]
    async fn test_truncate_shrinks_and_extends() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"0123456789");
        drive.open_file("/f").await.unwrap();
        drive.truncate_file("/f", 4).await.unwrap();
        assert_eq!(drive.find_node("/f").unwrap().file_size(), 4);
        assert_eq!(drive.read_file("/f", 0, 10).await.unwrap(), b"0123");

        drive.truncate_file("/f", 6).await.unwrap();
        assert_eq!(drive.read_file("/f", 0, 10).await.unwrap(), b"0123\0\0");
    }

    #[tokio::test]
    async fn test_chmod_chown_utimens_update_locally() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"x");
        drive.get_node("/f", false).await.unwrap();
        drive.chmod("/f", 0o600).unwrap();
        drive.chown("/f", 12, 34).unwrap();
        drive.utimens("/f", 777).unwrap();
        let meta = drive.find_node("/f").unwrap().meta().unwrap();
        let meta = meta.read().unwrap();
        assert_eq!(meta.mode, 0o600);
        assert_eq!((meta.uid, meta.gid), (12, 34));
        assert_eq!(meta.mtime, 777);
    }

    #[tokio::test]
    async fn test_hard_link_vanishes_on_remount() {
        let (drive, client, _dir) = mounted().await;
        client.seed_file("/f", b"data");
        drive.get_node("/f", false).await.unwrap();
        drive.hard_link("/f", "/lnk").unwrap();
        assert!(drive.find_node("/lnk").is_some());

        let dir2 = tempfile::tempdir().unwrap();
        let drive2 =
            Drive::new(options(&dir2), Arc::clone(&client) as Arc<dyn ObjectClient>).unwrap();
        drive2.connect().await.unwrap();
        assert!(drive2.get_node("/lnk", false).await.unwrap().is_none());
        drive2.shutdown().await;
    }

    #[tokio::test]
    async fn test_statistics_passthrough() {
        let (drive, _client, _dir) = mounted().await;
        let stats = drive.statistics().await.unwrap();
        assert!(stats.blocks > 0);
        assert_eq!(stats.block_size, 4096);
    }

    #[tokio::test]
    async fn test_shutdown_removes_scratch_directory() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(MockObjectClient::new());
        let drive = Drive::new(options(&dir), Arc::clone(&client) as Arc<dyn ObjectClient>).unwrap();
        drive.connect().await.unwrap();
        assert!(dir.path().join("scratch").exists());
        drive.shutdown().await;
        assert!(!dir.path().join("scratch").exists());
    }
}
