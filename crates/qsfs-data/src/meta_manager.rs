use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, warn};

use crate::metadata::{FileMetaData, SharedMeta};

/// Configuration for the metadata registry.
#[derive(Debug, Clone)]
pub struct MetaManagerConfig {
    /// Upper bound on resident metadata records.
    pub max_count: usize,
}

impl Default for MetaManagerConfig {
    fn default() -> Self {
        Self { max_count: 10_000 }
    }
}

/// Process-wide LRU registry of per-path file metadata.
///
/// Each record lives in exactly one canonical slot here; the directory
/// tree and the page cache hold weak references into these slots. The
/// most recently used record sits at the front; insertion over capacity
/// evicts from the back, skipping records pinned by open files or
/// in-flight transfers.
pub struct FileMetaDataManager {
    inner: Mutex<LruCache<String, SharedMeta>>,
    max_count: usize,
}

impl FileMetaDataManager {
    /// Build a registry bounded by `config.max_count` records.
    pub fn new(config: MetaManagerConfig) -> Arc<Self> {
        Arc::new(FileMetaDataManager {
            inner: Mutex::new(LruCache::unbounded()),
            max_count: config.max_count,
        })
    }

    /// The configured record cap.
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Number of resident records.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// True iff no records are resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or refresh a record, promoting it to most recently used.
    ///
    /// A record already present is overwritten through its existing slot
    /// so outstanding references observe the update; its local status
    /// bits (dirty, open, pending) survive the refresh. Insertion over
    /// capacity evicts unpinned records from the LRU end; when every
    /// record is pinned the cap is exceeded transiently with a warning.
    pub fn add(&self, meta: FileMetaData) -> SharedMeta {
        let mut inner = self.inner.lock().unwrap();
        let path = meta.path.clone();
        if let Some(slot) = inner.get(&path) {
            let slot = Arc::clone(slot);
            {
                let mut current = slot.write().unwrap();
                let (dirty, write_open, file_open, pending_get, pending_create) = (
                    current.dirty,
                    current.write_open,
                    current.file_open,
                    current.pending_get,
                    current.pending_create,
                );
                *current = meta;
                current.dirty = dirty;
                current.write_open = write_open;
                current.file_open = file_open;
                current.pending_get = pending_get;
                current.pending_create = pending_create;
            }
            return slot;
        }

        if inner.len() >= self.max_count && !Self::evict_one(&mut inner, &path) {
            warn!(
                path,
                resident = inner.len(),
                cap = self.max_count,
                "metadata registry over capacity with every record pinned"
            );
        }
        let slot = Arc::new(std::sync::RwLock::new(meta));
        inner.put(path, Arc::clone(&slot));
        slot
    }

    /// Bulk insert, holding the lock once. Used by LIST ingestion.
    pub fn add_many(&self, metas: Vec<FileMetaData>) -> Vec<SharedMeta> {
        metas.into_iter().map(|m| self.add(m)).collect()
    }

    /// Look up a record without touching recency order.
    pub fn get(&self, path: &str) -> Option<SharedMeta> {
        self.inner.lock().unwrap().peek(path).map(Arc::clone)
    }

    /// True iff a record is resident for `path`.
    pub fn has(&self, path: &str) -> bool {
        self.inner.lock().unwrap().contains(path)
    }

    /// Promote a record to most recently used.
    pub fn touch(&self, path: &str) {
        self.inner.lock().unwrap().promote(path);
    }

    /// True iff `need` more records fit under the cap. Used by the bulk
    /// loader to pre-check before LIST ingestion.
    pub fn has_free_space(&self, need: usize) -> bool {
        self.inner.lock().unwrap().len() + need < self.max_count
    }

    /// Drop the record for `path`, if resident.
    pub fn erase(&self, path: &str) -> Option<SharedMeta> {
        let removed = self.inner.lock().unwrap().pop(path);
        if removed.is_none() {
            debug!(path, "no metadata to erase");
        }
        removed
    }

    /// Re-key a record. A no-op when `old` is absent or `new` is taken.
    pub fn rename(&self, old: &str, new: &str) {
        if old == new {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.contains(new) {
            warn!(old, new, "rename target already registered, keeping both");
            return;
        }
        if let Some(slot) = inner.pop(old) {
            slot.write().unwrap().path = new.to_string();
            inner.put(new.to_string(), slot);
        } else {
            debug!(old, "no metadata to rename");
        }
    }

    /// Drop every record.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    fn is_pinned(slot: &SharedMeta) -> bool {
        let meta = slot.read().unwrap();
        meta.file_open || meta.write_open || meta.dirty || meta.pending_get || meta.pending_create
    }

    fn evict_one(inner: &mut LruCache<String, SharedMeta>, protect: &str) -> bool {
        let victim = inner
            .iter()
            .rev()
            .find(|(path, slot)| path.as_str() != protect && !Self::is_pinned(slot))
            .map(|(path, _)| path.clone());
        match victim {
            Some(path) => {
                debug!(path, "evicting metadata record");
                inner.pop(&path);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FileMetaData, FileType};

    fn manager(max: usize) -> Arc<FileMetaDataManager> {
        FileMetaDataManager::new(MetaManagerConfig { max_count: max })
    }

    fn meta(path: &str) -> FileMetaData {
        FileMetaData::new(path, 0, 1, 1, 0, 0, 0o644, FileType::File)
    }

    #[test]
    fn test_add_and_get() {
        let mgr = manager(10);
        mgr.add(meta("/a"));
        assert!(mgr.get("/a").is_some());
        assert!(mgr.get("/b").is_none());
    }

    #[test]
    fn test_add_existing_overwrites_in_place() {
        let mgr = manager(10);
        let slot = mgr.add(meta("/a"));
        let mut updated = meta("/a");
        updated.size = 42;
        mgr.add(updated);
        assert_eq!(slot.read().unwrap().size, 42);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_add_existing_preserves_status_bits() {
        let mgr = manager(10);
        let slot = mgr.add(meta("/a"));
        slot.write().unwrap().dirty = true;
        slot.write().unwrap().file_open = true;
        mgr.add(meta("/a"));
        let current = slot.read().unwrap();
        assert!(current.dirty);
        assert!(current.file_open);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let mgr = manager(2);
        mgr.add(meta("/a"));
        mgr.add(meta("/b"));
        mgr.add(meta("/c"));
        assert_eq!(mgr.len(), 2);
        assert!(mgr.get("/a").is_none());
        assert!(mgr.get("/b").is_some());
        assert!(mgr.get("/c").is_some());
    }

    #[test]
    fn test_eviction_skips_pinned_records() {
        let mgr = manager(2);
        let pinned = mgr.add(meta("/a"));
        pinned.write().unwrap().file_open = true;
        mgr.add(meta("/b"));
        mgr.add(meta("/c"));
        assert!(mgr.get("/a").is_some(), "pinned record must survive");
        assert!(mgr.get("/b").is_none());
    }

    #[test]
    fn test_all_pinned_exceeds_cap_transiently() {
        let mgr = manager(1);
        let a = mgr.add(meta("/a"));
        a.write().unwrap().dirty = true;
        mgr.add(meta("/b"));
        assert_eq!(mgr.len(), 2);
    }

    #[test]
    fn test_get_does_not_promote() {
        let mgr = manager(2);
        mgr.add(meta("/a"));
        mgr.add(meta("/b"));
        mgr.get("/a");
        mgr.add(meta("/c"));
        assert!(mgr.get("/a").is_none(), "peek must not promote /a");
    }

    #[test]
    fn test_touch_promotes() {
        let mgr = manager(2);
        mgr.add(meta("/a"));
        mgr.add(meta("/b"));
        mgr.touch("/a");
        mgr.add(meta("/c"));
        assert!(mgr.get("/a").is_some());
        assert!(mgr.get("/b").is_none());
    }

    #[test]
    fn test_erase() {
        let mgr = manager(10);
        mgr.add(meta("/a"));
        assert!(mgr.erase("/a").is_some());
        assert!(mgr.get("/a").is_none());
        assert!(mgr.erase("/a").is_none());
    }

    #[test]
    fn test_rename_moves_slot_and_rewrites_path() {
        let mgr = manager(10);
        let slot = mgr.add(meta("/a"));
        mgr.rename("/a", "/b");
        assert!(mgr.get("/a").is_none());
        assert!(mgr.get("/b").is_some());
        assert_eq!(slot.read().unwrap().path, "/b");
    }

    #[test]
    fn test_rename_refuses_existing_target() {
        let mgr = manager(10);
        mgr.add(meta("/a"));
        mgr.add(meta("/b"));
        mgr.rename("/a", "/b");
        assert!(mgr.get("/a").is_some());
    }

    #[test]
    fn test_has_free_space() {
        let mgr = manager(3);
        assert!(mgr.has_free_space(2));
        mgr.add(meta("/a"));
        mgr.add(meta("/b"));
        assert!(!mgr.has_free_space(1));
    }

    #[test]
    fn test_clear() {
        let mgr = manager(10);
        mgr.add(meta("/a"));
        mgr.add(meta("/b"));
        mgr.clear();
        assert!(mgr.is_empty());
    }

    #[test]
    fn test_weak_reference_dangles_after_eviction() {
        let mgr = manager(10);
        let weak = Arc::downgrade(&mgr.add(meta("/a")));
        mgr.erase("/a");
        assert!(weak.upgrade().is_none());
    }
}
