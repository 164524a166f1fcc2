use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use qsfs_data::metadata::SYMLINK_MIME_TYPE;
use qsfs_data::{unix_now, FileMetaData, FileType};

use crate::error::{ClientError, ClientResult};
use crate::object_client::{ObjectClient, StatOutcome, StorageStats, UploadedPart};

/// Per-operation call counters.
#[derive(Debug, Default, Clone)]
pub struct MockCounts {
    /// HEAD-bucket calls.
    pub head_bucket: u64,
    /// HEAD-object calls.
    pub stat: u64,
    /// LIST calls (one per directory, regardless of pages).
    pub list: u64,
    /// LIST pages served.
    pub list_pages: u64,
    /// Ranged GET calls.
    pub get_range: u64,
    /// Whole-object PUT calls.
    pub put_object: u64,
    /// Multipart initiations.
    pub initiate_multipart: u64,
    /// Part uploads.
    pub upload_part: u64,
    /// Multipart completions.
    pub complete_multipart: u64,
    /// Multipart aborts.
    pub abort_multipart: u64,
    /// File/directory/symlink creations.
    pub make: u64,
    /// Deletes.
    pub delete: u64,
    /// Server-side moves.
    pub rename: u64,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    mtime: i64,
    etag: String,
    mime: String,
    is_dir: bool,
}

struct MultipartSession {
    path: String,
    parts: BTreeMap<u16, (Vec<u8>, String)>,
}

struct MockState {
    objects: BTreeMap<String, StoredObject>,
    sessions: HashMap<String, MultipartSession>,
    faults: HashMap<String, VecDeque<ClientError>>,
    counts: MockCounts,
    next_etag: u64,
    next_upload: u64,
}

/// In-memory object store for tests: delimiter-style listing with
/// pagination, the full multipart lifecycle, call counters, and
/// per-operation scripted error injection.
pub struct MockObjectClient {
    state: Mutex<MockState>,
    page_size: usize,
    uid: u32,
    gid: u32,
    file_mode: u32,
    dir_mode: u32,
}

impl Default for MockObjectClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockObjectClient {
    /// An empty store.
    pub fn new() -> Self {
        MockObjectClient {
            state: Mutex::new(MockState {
                objects: BTreeMap::new(),
                sessions: HashMap::new(),
                faults: HashMap::new(),
                counts: MockCounts::default(),
                next_etag: 1,
                next_upload: 1,
            }),
            page_size: 1000,
            uid: 0,
            gid: 0,
            file_mode: 0o644,
            dir_mode: 0o755,
        }
    }

    /// An empty store listing `page_size` entries per LIST page.
    pub fn with_page_size(page_size: usize) -> Self {
        let mut client = Self::new();
        client.page_size = page_size;
        client
    }

    /// Seed a file object.
    pub fn seed_file(&self, path: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let etag = Self::next_etag(&mut state);
        state.objects.insert(
            path.to_string(),
            StoredObject {
                data: data.to_vec(),
                mtime: unix_now(),
                etag,
                mime: String::new(),
                is_dir: false,
            },
        );
    }

    /// Seed a directory marker object.
    pub fn seed_directory(&self, dir_path: &str) {
        let mut state = self.state.lock().unwrap();
        let etag = Self::next_etag(&mut state);
        let path = if dir_path.ends_with('/') {
            dir_path.to_string()
        } else {
            format!("{}/", dir_path)
        };
        state.objects.insert(
            path,
            StoredObject {
                data: Vec::new(),
                mtime: unix_now(),
                etag,
                mime: String::new(),
                is_dir: true,
            },
        );
    }

    /// Queue an error for the next call of the named operation.
    /// Operation names are the trait method names.
    pub fn inject_error(&self, operation: &str, error: ClientError) {
        self.state
            .lock()
            .unwrap()
            .faults
            .entry(operation.to_string())
            .or_default()
            .push_back(error);
    }

    /// Queue the same error for the next `count` calls of an operation.
    pub fn inject_errors(&self, operation: &str, error: ClientError, count: usize) {
        for _ in 0..count {
            self.inject_error(operation, error.clone());
        }
    }

    /// Counter snapshot.
    pub fn counts(&self) -> MockCounts {
        self.state.lock().unwrap().counts.clone()
    }

    /// Raw object content, if stored.
    pub fn object_data(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(path)
            .map(|o| o.data.clone())
    }

    /// True iff an object is stored at `path`.
    pub fn has_object(&self, path: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(path)
    }

    /// Number of open multipart sessions.
    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Backdate an object's mtime, simulating an older store copy.
    pub fn set_object_mtime(&self, path: &str, mtime: i64) {
        if let Some(obj) = self.state.lock().unwrap().objects.get_mut(path) {
            obj.mtime = mtime;
        }
    }

    fn next_etag(state: &mut MockState) -> String {
        let etag = format!("etag-{}", state.next_etag);
        state.next_etag += 1;
        etag
    }

    fn take_fault(&self, operation: &str) -> ClientResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(queue) = state.faults.get_mut(operation) {
            if let Some(err) = queue.pop_front() {
                debug!(operation, error = %err, "mock fault fired");
                return Err(err);
            }
        }
        Ok(())
    }

    fn meta_for(&self, path: &str, obj: &StoredObject) -> FileMetaData {
        let file_type = if obj.is_dir {
            FileType::Directory
        } else if obj.mime == SYMLINK_MIME_TYPE {
            FileType::SymLink
        } else {
            FileType::File
        };
        let mode = if obj.is_dir { self.dir_mode } else { self.file_mode };
        FileMetaData::new(
            path,
            obj.data.len() as u64,
            obj.mtime,
            obj.mtime,
            self.uid,
            self.gid,
            mode,
            file_type,
        )
        .with_mime_type(&obj.mime)
        .with_etag(&obj.etag)
    }
}

#[async_trait]
impl ObjectClient for MockObjectClient {
    async fn head_bucket(&self) -> ClientResult<()> {
        self.take_fault("head_bucket")?;
        self.state.lock().unwrap().counts.head_bucket += 1;
        Ok(())
    }

    async fn statvfs(&self) -> ClientResult<StorageStats> {
        self.take_fault("statvfs")?;
        let state = self.state.lock().unwrap();
        let used: u64 = state.objects.values().map(|o| o.data.len() as u64).sum();
        let block_size = 4096u64;
        let blocks = 1 << 20;
        let used_blocks = used / block_size + 1;
        Ok(StorageStats {
            block_size,
            blocks,
            blocks_free: blocks - used_blocks,
            blocks_available: blocks - used_blocks,
            files: 1 << 20,
            files_free: (1 << 20) - state.objects.len() as u64,
            name_max: 255,
        })
    }

    async fn stat(&self, path: &str, if_modified_since: Option<i64>) -> ClientResult<StatOutcome> {
        self.take_fault("stat")?;
        let mut state = self.state.lock().unwrap();
        state.counts.stat += 1;
        let dir_form = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{}/", path)
        };
        let (found_path, obj) = match state.objects.get(path) {
            Some(obj) => (path.to_string(), obj.clone()),
            None => match state.objects.get(&dir_form) {
                Some(obj) => (dir_form.clone(), obj.clone()),
                None => {
                    // a directory can exist purely as a key prefix
                    let implied = state
                        .objects
                        .range(dir_form.clone()..)
                        .take_while(|(p, _)| p.starts_with(&dir_form))
                        .next()
                        .map(|(_, o)| StoredObject {
                            data: Vec::new(),
                            mtime: o.mtime,
                            etag: String::new(),
                            mime: String::new(),
                            is_dir: true,
                        });
                    match implied {
                        Some(obj) => (dir_form.clone(), obj),
                        None => {
                            return Err(ClientError::KeyNotFound {
                                key: path.to_string(),
                            })
                        }
                    }
                }
            },
        };
        if let Some(since) = if_modified_since {
            if obj.mtime <= since {
                return Ok(StatOutcome::NotModified);
            }
        }
        Ok(StatOutcome::Modified(self.meta_for(&found_path, &obj)))
    }

    async fn list_directory(&self, dir_path: &str) -> ClientResult<Vec<FileMetaData>> {
        self.take_fault("list_directory")?;
        let mut state = self.state.lock().unwrap();
        state.counts.list += 1;
        let prefix = if dir_path == "/" {
            "/".to_string()
        } else if dir_path.ends_with('/') {
            dir_path.to_string()
        } else {
            format!("{}/", dir_path)
        };

        // delimiter semantics: one entry per direct child, directories
        // synthesized from deeper keys
        let mut children: BTreeMap<String, FileMetaData> = BTreeMap::new();
        for (path, obj) in state.objects.range(prefix.clone()..) {
            if !path.starts_with(&prefix) {
                break;
            }
            if path == &prefix {
                continue;
            }
            let rest = &path[prefix.len()..];
            match rest.find('/') {
                Some(idx) if idx + 1 < rest.len() => {
                    let implied = format!("{}{}", prefix, &rest[..=idx]);
                    children.entry(implied.clone()).or_insert_with(|| {
                        FileMetaData::new(
                            &implied,
                            0,
                            obj.mtime,
                            obj.mtime,
                            self.uid,
                            self.gid,
                            self.dir_mode,
                            FileType::Directory,
                        )
                    });
                }
                _ => {
                    children.insert(path.clone(), self.meta_for(path, obj));
                }
            }
        }

        let total = children.len();
        let pages = total.div_ceil(self.page_size).max(1);
        state.counts.list_pages += pages as u64;
        Ok(children.into_values().collect())
    }

    async fn make_file(&self, path: &str) -> ClientResult<()> {
        self.take_fault("make_file")?;
        let mut state = self.state.lock().unwrap();
        state.counts.make += 1;
        let etag = Self::next_etag(&mut state);
        state.objects.insert(
            path.to_string(),
            StoredObject {
                data: Vec::new(),
                mtime: unix_now(),
                etag,
                mime: String::new(),
                is_dir: false,
            },
        );
        Ok(())
    }

    async fn make_directory(&self, dir_path: &str) -> ClientResult<()> {
        self.take_fault("make_directory")?;
        {
            let mut state = self.state.lock().unwrap();
            state.counts.make += 1;
        }
        self.seed_directory(dir_path);
        Ok(())
    }

    async fn make_symlink(&self, path: &str, target: &str) -> ClientResult<()> {
        self.take_fault("make_symlink")?;
        let mut state = self.state.lock().unwrap();
        state.counts.make += 1;
        let etag = Self::next_etag(&mut state);
        state.objects.insert(
            path.to_string(),
            StoredObject {
                data: target.as_bytes().to_vec(),
                mtime: unix_now(),
                etag,
                mime: SYMLINK_MIME_TYPE.to_string(),
                is_dir: false,
            },
        );
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> ClientResult<()> {
        self.take_fault("delete_file")?;
        let mut state = self.state.lock().unwrap();
        state.counts.delete += 1;
        if state.objects.remove(path).is_none() {
            return Err(ClientError::KeyNotFound {
                key: path.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_directory(&self, dir_path: &str, recursive: bool) -> ClientResult<()> {
        self.take_fault("delete_directory")?;
        let mut state = self.state.lock().unwrap();
        state.counts.delete += 1;
        let prefix = if dir_path.ends_with('/') {
            dir_path.to_string()
        } else {
            format!("{}/", dir_path)
        };
        let descendants: Vec<String> = state
            .objects
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter(|(p, _)| *p != &prefix)
            .map(|(p, _)| p.clone())
            .collect();
        if !descendants.is_empty() && !recursive {
            return Err(ClientError::InvalidArgument {
                context: format!("directory {} not empty", dir_path),
            });
        }
        for p in descendants {
            state.objects.remove(&p);
        }
        state.objects.remove(&prefix);
        Ok(())
    }

    async fn move_file(&self, source: &str, target: &str) -> ClientResult<()> {
        self.take_fault("move_file")?;
        let mut state = self.state.lock().unwrap();
        state.counts.rename += 1;
        match state.objects.remove(source) {
            Some(obj) => {
                state.objects.insert(target.to_string(), obj);
                Ok(())
            }
            None => Err(ClientError::KeyNotFound {
                key: source.to_string(),
            }),
        }
    }

    async fn move_directory(&self, source: &str, target: &str) -> ClientResult<()> {
        self.take_fault("move_directory")?;
        let mut state = self.state.lock().unwrap();
        state.counts.rename += 1;
        let src_prefix = if source.ends_with('/') {
            source.to_string()
        } else {
            format!("{}/", source)
        };
        let dst_prefix = if target.ends_with('/') {
            target.to_string()
        } else {
            format!("{}/", target)
        };
        let moved: Vec<String> = state
            .objects
            .range(src_prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&src_prefix))
            .map(|(p, _)| p.clone())
            .collect();
        if moved.is_empty() {
            return Err(ClientError::KeyNotFound {
                key: source.to_string(),
            });
        }
        for old in moved {
            if let Some(obj) = state.objects.remove(&old) {
                let new = format!("{}{}", dst_prefix, &old[src_prefix.len()..]);
                state.objects.insert(new, obj);
            }
        }
        Ok(())
    }

    async fn get_range(&self, path: &str, offset: u64, size: u64) -> ClientResult<Vec<u8>> {
        self.take_fault("get_range")?;
        let mut state = self.state.lock().unwrap();
        state.counts.get_range += 1;
        let obj = state
            .objects
            .get(path)
            .ok_or_else(|| ClientError::KeyNotFound {
                key: path.to_string(),
            })?;
        let len = obj.data.len() as u64;
        if offset >= len && len > 0 {
            return Err(ClientError::InvalidRange {
                key: path.to_string(),
                offset,
                size,
            });
        }
        let end = (offset + size).min(len);
        Ok(obj.data[offset as usize..end as usize].to_vec())
    }

    async fn put_object(&self, path: &str, data: Vec<u8>) -> ClientResult<String> {
        self.take_fault("put_object")?;
        let mut state = self.state.lock().unwrap();
        state.counts.put_object += 1;
        let etag = Self::next_etag(&mut state);
        state.objects.insert(
            path.to_string(),
            StoredObject {
                data,
                mtime: unix_now(),
                etag: etag.clone(),
                mime: String::new(),
                is_dir: false,
            },
        );
        Ok(etag)
    }

    async fn initiate_multipart(&self, path: &str) -> ClientResult<String> {
        self.take_fault("initiate_multipart")?;
        let mut state = self.state.lock().unwrap();
        state.counts.initiate_multipart += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        state.next_upload += 1;
        state.sessions.insert(
            upload_id.clone(),
            MultipartSession {
                path: path.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        path: &str,
        upload_id: &str,
        part_number: u16,
        data: Vec<u8>,
    ) -> ClientResult<String> {
        self.take_fault("upload_part")?;
        let mut state = self.state.lock().unwrap();
        state.counts.upload_part += 1;
        let etag = Self::next_etag(&mut state);
        let session =
            state
                .sessions
                .get_mut(upload_id)
                .ok_or_else(|| ClientError::UploadNotFound {
                    key: path.to_string(),
                    upload_id: upload_id.to_string(),
                })?;
        session.parts.insert(part_number, (data, etag.clone()));
        Ok(etag)
    }

    async fn complete_multipart(
        &self,
        path: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> ClientResult<()> {
        self.take_fault("complete_multipart")?;
        let mut state = self.state.lock().unwrap();
        state.counts.complete_multipart += 1;
        let session =
            state
                .sessions
                .remove(upload_id)
                .ok_or_else(|| ClientError::UploadNotFound {
                    key: path.to_string(),
                    upload_id: upload_id.to_string(),
                })?;
        let mut data = Vec::new();
        for (index, part) in parts.iter().enumerate() {
            if part.part_number as usize != index + 1 {
                return Err(ClientError::InvalidArgument {
                    context: format!("part numbers not contiguous at {}", part.part_number),
                });
            }
            let (bytes, etag) =
                session
                    .parts
                    .get(&part.part_number)
                    .ok_or_else(|| ClientError::InvalidArgument {
                        context: format!("part {} never uploaded", part.part_number),
                    })?;
            if etag != &part.etag {
                return Err(ClientError::EtagMismatch {
                    key: path.to_string(),
                    expected: part.etag.clone(),
                    actual: etag.clone(),
                });
            }
            data.extend_from_slice(bytes);
        }
        let etag = Self::next_etag(&mut state);
        state.objects.insert(
            session.path,
            StoredObject {
                data,
                mtime: unix_now(),
                etag,
                mime: String::new(),
                is_dir: false,
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, path: &str, upload_id: &str) -> ClientResult<()> {
        self.take_fault("abort_multipart")?;
        let mut state = self.state.lock().unwrap();
        state.counts.abort_multipart += 1;
        state
            .sessions
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| ClientError::UploadNotFound {
                key: path.to_string(),
                upload_id: upload_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stat_found_and_missing() {
        let client = MockObjectClient::new();
        client.seed_file("/a", b"data");
        assert!(matches!(
            client.stat("/a", None).await.unwrap(),
            StatOutcome::Modified(_)
        ));
        assert!(matches!(
            client.stat("/missing", None).await,
            Err(ClientError::KeyNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stat_finds_directory_without_trailing_slash() {
        let client = MockObjectClient::new();
        client.seed_directory("/d/");
        match client.stat("/d", None).await.unwrap() {
            StatOutcome::Modified(meta) => {
                assert!(meta.is_directory());
                assert_eq!(meta.path, "/d/");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stat_if_modified_since() {
        let client = MockObjectClient::new();
        client.seed_file("/a", b"data");
        client.set_object_mtime("/a", 100);
        assert!(matches!(
            client.stat("/a", Some(100)).await.unwrap(),
            StatOutcome::NotModified
        ));
        assert!(matches!(
            client.stat("/a", Some(50)).await.unwrap(),
            StatOutcome::Modified(_)
        ));
    }

    #[tokio::test]
    async fn test_list_directory_direct_children_only() {
        let client = MockObjectClient::new();
        client.seed_directory("/d/");
        client.seed_file("/d/a", b"1");
        client.seed_file("/d/sub/deep", b"2");
        client.seed_file("/other", b"3");
        let listed = client.list_directory("/d/").await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["/d/a", "/d/sub/"]);
        assert!(listed[1].is_directory());
    }

    #[tokio::test]
    async fn test_list_root() {
        let client = MockObjectClient::new();
        client.seed_file("/a", b"1");
        client.seed_file("/d/x", b"2");
        let listed = client.list_directory("/").await.unwrap();
        let paths: Vec<&str> = listed.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/d/"]);
    }

    #[tokio::test]
    async fn test_list_pagination_counts_pages() {
        let client = MockObjectClient::with_page_size(2);
        client.seed_file("/a", b"");
        client.seed_file("/b", b"");
        client.seed_file("/c", b"");
        client.list_directory("/").await.unwrap();
        assert_eq!(client.counts().list_pages, 2);
    }

    #[tokio::test]
    async fn test_get_range_clamps_and_rejects() {
        let client = MockObjectClient::new();
        client.seed_file("/a", b"0123456789");
        assert_eq!(client.get_range("/a", 2, 4).await.unwrap(), b"2345");
        assert_eq!(client.get_range("/a", 8, 10).await.unwrap(), b"89");
        assert!(matches!(
            client.get_range("/a", 10, 1).await,
            Err(ClientError::InvalidRange { .. })
        ));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let client = MockObjectClient::new();
        let etag = client.put_object("/a", b"hello".to_vec()).await.unwrap();
        assert!(!etag.is_empty());
        assert_eq!(client.object_data("/a").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_multipart_lifecycle() {
        let client = MockObjectClient::new();
        let id = client.initiate_multipart("/big").await.unwrap();
        let e1 = client
            .upload_part("/big", &id, 1, b"aaaa".to_vec())
            .await
            .unwrap();
        let e2 = client
            .upload_part("/big", &id, 2, b"bb".to_vec())
            .await
            .unwrap();
        client
            .complete_multipart(
                "/big",
                &id,
                &[
                    UploadedPart {
                        part_number: 1,
                        etag: e1,
                    },
                    UploadedPart {
                        part_number: 2,
                        etag: e2,
                    },
                ],
            )
            .await
            .unwrap();
        assert_eq!(client.object_data("/big").unwrap(), b"aaaabb");
        assert_eq!(client.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_multipart_abort_discards_session() {
        let client = MockObjectClient::new();
        let id = client.initiate_multipart("/big").await.unwrap();
        client
            .upload_part("/big", &id, 1, b"aaaa".to_vec())
            .await
            .unwrap();
        client.abort_multipart("/big", &id).await.unwrap();
        assert_eq!(client.open_sessions(), 0);
        assert!(!client.has_object("/big"));
    }

    #[tokio::test]
    async fn test_complete_rejects_gapped_part_numbers() {
        let client = MockObjectClient::new();
        let id = client.initiate_multipart("/big").await.unwrap();
        let e1 = client
            .upload_part("/big", &id, 1, b"a".to_vec())
            .await
            .unwrap();
        let err = client
            .complete_multipart(
                "/big",
                &id,
                &[UploadedPart {
                    part_number: 2,
                    etag: e1,
                }],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_move_directory_moves_subtree() {
        let client = MockObjectClient::new();
        client.seed_directory("/d/");
        client.seed_file("/d/a", b"1");
        client.seed_file("/d/sub/b", b"2");
        client.move_directory("/d/", "/e/").await.unwrap();
        assert!(client.has_object("/e/a"));
        assert!(client.has_object("/e/sub/b"));
        assert!(!client.has_object("/d/a"));
    }

    #[tokio::test]
    async fn test_delete_directory_requires_recursive() {
        let client = MockObjectClient::new();
        client.seed_directory("/d/");
        client.seed_file("/d/a", b"1");
        assert!(client.delete_directory("/d/", false).await.is_err());
        client.delete_directory("/d/", true).await.unwrap();
        assert!(!client.has_object("/d/"));
        assert!(!client.has_object("/d/a"));
    }

    #[tokio::test]
    async fn test_fault_injection_fires_once_per_injection() {
        let client = MockObjectClient::new();
        client.seed_file("/a", b"data");
        client.inject_errors(
            "get_range",
            ClientError::Timeout {
                context: "test".into(),
            },
            2,
        );
        assert!(client.get_range("/a", 0, 1).await.is_err());
        assert!(client.get_range("/a", 0, 1).await.is_err());
        assert!(client.get_range("/a", 0, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_make_symlink_stores_sentinel_mime() {
        let client = MockObjectClient::new();
        client.make_symlink("/lnk", "/target").await.unwrap();
        match client.stat("/lnk", None).await.unwrap() {
            StatOutcome::Modified(meta) => assert!(meta.is_symlink()),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(client.object_data("/lnk").unwrap(), b"/target");
    }
}
