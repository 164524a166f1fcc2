use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{debug, warn};

use crate::error::{DataError, Result};
use crate::meta_manager::FileMetaDataManager;
use crate::page::Page;

/// Configuration for the page cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Byte budget across all cached files.
    pub max_cache_bytes: u64,
    /// Pages larger than this are backed by scratch files.
    pub page_spill_threshold: u64,
    /// Scratch directory for spilled pages.
    pub scratch_directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_bytes: 100 * 1024 * 1024,
            page_spill_threshold: 16 * 1024 * 1024,
            scratch_directory: std::env::temp_dir().join("qsfs_cache"),
        }
    }
}

/// Counters exposed for observability.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Reads fully served from resident pages.
    pub hits: u64,
    /// Reads that found a gap.
    pub misses: u64,
    /// Whole-file evictions under budget pressure.
    pub evictions: u64,
    /// Pages written through to scratch files.
    pub spilled_pages: u64,
}

struct FilePages {
    pages: BTreeMap<u64, Page>,
    mtime: i64,
}

impl FilePages {
    fn bytes(&self) -> u64 {
        self.pages.values().map(Page::size).sum()
    }
}

struct CacheInner {
    files: LruCache<String, FilePages>,
    total_bytes: u64,
    stats: CacheStats,
}

/// Byte-range cache of file contents, one per filesystem.
///
/// Holds per-file page lists inside an LRU-ordered file map plus a
/// global byte budget. Overlapping or adjacent pages of one file are
/// merged on insert. Eviction walks files least-recently-used first,
/// skipping files whose metadata is dirty or open for writing.
pub struct PageCache {
    config: CacheConfig,
    meta_manager: Arc<FileMetaDataManager>,
    inner: Mutex<CacheInner>,
}

impl PageCache {
    /// Build a cache; the scratch directory is created if missing.
    pub fn new(config: CacheConfig, meta_manager: Arc<FileMetaDataManager>) -> Result<PageCache> {
        std::fs::create_dir_all(&config.scratch_directory)?;
        Ok(PageCache {
            config,
            meta_manager,
            inner: Mutex::new(CacheInner {
                files: LruCache::unbounded(),
                total_bytes: 0,
                stats: CacheStats::default(),
            }),
        })
    }

    /// The configured byte budget.
    pub fn max_cache_bytes(&self) -> u64 {
        self.config.max_cache_bytes
    }

    /// Total bytes currently cached.
    pub fn size(&self) -> u64 {
        self.inner.lock().unwrap().total_bytes
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats.clone()
    }

    /// True iff any pages are cached for `path`.
    pub fn has_file(&self, path: &str) -> bool {
        self.inner.lock().unwrap().files.contains(path)
    }

    /// The modification time tagged on the cached content.
    pub fn file_mtime(&self, path: &str) -> Option<i64> {
        self.inner.lock().unwrap().files.peek(path).map(|f| f.mtime)
    }

    /// True iff `need` more bytes fit under the budget without eviction.
    pub fn has_free_space(&self, need: u64) -> bool {
        self.inner.lock().unwrap().total_bytes + need <= self.config.max_cache_bytes
    }

    /// True iff `[offset, offset + size)` is fully covered by resident
    /// pages and the cached content is tagged with the file's current
    /// metadata mtime.
    pub fn has_file_data(&self, path: &str, offset: u64, size: u64) -> bool {
        let meta_mtime = match self.meta_manager.get(path) {
            Some(slot) => slot.read().unwrap().mtime,
            None => return false,
        };
        let inner = self.inner.lock().unwrap();
        let entry = match inner.files.peek(path) {
            Some(entry) => entry,
            None => return false,
        };
        if entry.mtime != meta_mtime {
            return false;
        }
        Self::covered(entry, offset, size)
    }

    /// The ordered complement of cached ranges within `[0, file_size)`.
    /// Adjacent gaps come out coalesced.
    pub fn unloaded_ranges(&self, path: &str, file_size: u64) -> VecDeque<(u64, u64)> {
        let mut gaps = VecDeque::new();
        if file_size == 0 {
            return gaps;
        }
        let inner = self.inner.lock().unwrap();
        let entry = match inner.files.peek(path) {
            Some(entry) => entry,
            None => {
                gaps.push_back((0, file_size));
                return gaps;
            }
        };
        let mut cursor = 0u64;
        for page in entry.pages.values() {
            if cursor >= file_size {
                break;
            }
            if page.offset() > cursor {
                let gap_end = page.offset().min(file_size);
                gaps.push_back((cursor, gap_end - cursor));
            }
            cursor = cursor.max(page.next());
        }
        if cursor < file_size {
            gaps.push_back((cursor, file_size - cursor));
        }
        gaps
    }

    /// Insert `data` at `offset`, merging with overlapping or adjacent
    /// pages, tagging the content with `mtime`. Fails with `CacheFull`
    /// when the budget cannot be met even after eviction.
    pub fn write(&self, path: &str, offset: u64, data: &[u8], mtime: i64) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.files.get(path).is_none() {
            inner.files.put(
                path.to_string(),
                FilePages {
                    pages: BTreeMap::new(),
                    mtime,
                },
            );
        }
        if data.is_empty() {
            if let Some(entry) = inner.files.get_mut(path) {
                entry.mtime = mtime;
            }
            return Ok(());
        }

        let end = offset + data.len() as u64;
        let entry = inner.files.peek(path).expect("entry just ensured");
        let absorbed: Vec<u64> = entry
            .pages
            .values()
            .filter(|p| p.offset() <= end && p.next() >= offset)
            .map(Page::offset)
            .collect();
        let merged_offset = absorbed
            .first()
            .map(|k| entry.pages[k].offset().min(offset))
            .unwrap_or(offset);
        let merged_end = absorbed
            .last()
            .map(|k| entry.pages[k].next().max(end))
            .unwrap_or(end);
        let absorbed_bytes: u64 = absorbed.iter().map(|k| entry.pages[k].size()).sum();
        let merged_size = merged_end - merged_offset;
        let delta = merged_size - absorbed_bytes;

        if delta > 0 && inner.total_bytes + delta > self.config.max_cache_bytes {
            self.evict_for(inner, delta, path);
            if inner.total_bytes + delta > self.config.max_cache_bytes {
                warn!(path, need = delta, "page cache budget exhausted");
                return Err(DataError::CacheFull {
                    need: delta,
                    budget: self.config.max_cache_bytes,
                });
            }
        }

        // assemble the merged page: old content first, new bytes on top
        let mut merged = vec![0u8; merged_size as usize];
        let entry = inner.files.get_mut(path).expect("entry just ensured");
        for key in &absorbed {
            if let Some(page) = entry.pages.remove(key) {
                let rel = (page.offset() - merged_offset) as usize;
                page.read(page.offset(), &mut merged[rel..rel + page.size() as usize])?;
            }
        }
        let rel = (offset - merged_offset) as usize;
        merged[rel..rel + data.len()].copy_from_slice(data);

        let page = if merged_size > self.config.page_spill_threshold {
            inner.stats.spilled_pages += 1;
            Page::new_spilled(merged_offset, &merged, &self.config.scratch_directory)?
        } else {
            Page::new_in_memory(merged_offset, merged)
        };
        let entry = inner.files.get_mut(path).expect("entry just ensured");
        entry.pages.insert(merged_offset, page);
        entry.mtime = mtime;
        inner.total_bytes += delta;
        Ok(())
    }

    /// Copy `[offset, offset + size)` out of the cache, clamped to
    /// `file_size`. A gap inside the clamped range is an error, never a
    /// silent zero-fill. A zero-length request returns an empty buffer.
    pub fn read(&self, path: &str, offset: u64, size: u64, file_size: u64) -> Result<Vec<u8>> {
        if size == 0 || offset >= file_size {
            return Ok(Vec::new());
        }
        let len = size.min(file_size - offset);
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let entry = match inner.files.get(path) {
            Some(entry) => entry,
            None => {
                inner.stats.misses += 1;
                return Err(DataError::IncompleteData {
                    path: path.to_string(),
                    offset,
                    size: len,
                });
            }
        };
        let mut out = vec![0u8; len as usize];
        let mut cursor = offset;
        let end = offset + len;
        for page in entry.pages.range(..end).map(|(_, p)| p) {
            if page.next() <= cursor {
                continue;
            }
            if page.offset() > cursor {
                break;
            }
            let rel = (cursor - offset) as usize;
            let n = page.read(cursor, &mut out[rel..])?;
            cursor += n as u64;
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            inner.stats.misses += 1;
            return Err(DataError::IncompleteData {
                path: path.to_string(),
                offset: cursor,
                size: end - cursor,
            });
        }
        inner.stats.hits += 1;
        Ok(out)
    }

    /// Drop every page of `path`; spilled pages are unlinked.
    pub fn erase(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.files.pop(path) {
            inner.total_bytes -= entry.bytes();
            debug!(path, "erased cached file");
        }
    }

    /// Re-key cached content after a rename.
    pub fn rename(&self, old: &str, new: &str) {
        if old == new {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.files.pop(old) {
            inner.files.put(new.to_string(), entry);
        }
    }

    /// Re-tag cached content with a fresh mtime.
    pub fn set_time(&self, path: &str, mtime: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.files.get_mut(path) {
            entry.mtime = mtime;
        }
    }

    /// Truncate cached content to `new_size` bytes and re-tag it.
    pub fn resize(&self, path: &str, new_size: u64, mtime: i64) {
        let mut inner = self.inner.lock().unwrap();
        let entry = match inner.files.get_mut(path) {
            Some(entry) => entry,
            None => return,
        };
        let before = entry.bytes();
        entry.pages.retain(|&off, _| off < new_size);
        if let Some((_, page)) = entry.pages.iter_mut().next_back() {
            if page.next() > new_size {
                page.resize(new_size - page.offset());
            }
        }
        entry.mtime = mtime;
        let after = entry.bytes();
        inner.total_bytes -= before - after;
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.clear();
        inner.total_bytes = 0;
    }

    /// Remove the scratch directory; called at drive teardown.
    pub fn remove_scratch_directory(&self) {
        self.clear();
        if let Err(e) = std::fs::remove_dir_all(&self.config.scratch_directory) {
            warn!(error = %e, dir = %self.config.scratch_directory.display(), "failed to remove scratch directory");
        }
    }

    fn covered(entry: &FilePages, offset: u64, size: u64) -> bool {
        if size == 0 {
            return true;
        }
        let mut cursor = offset;
        let end = offset + size;
        for page in entry.pages.range(..end).map(|(_, p)| p) {
            if page.next() <= cursor {
                continue;
            }
            if page.offset() > cursor {
                return false;
            }
            cursor = page.next();
            if cursor >= end {
                return true;
            }
        }
        cursor >= end
    }

    fn is_file_pinned(&self, path: &str) -> bool {
        self.meta_manager
            .get(path)
            .map(|slot| {
                let meta = slot.read().unwrap();
                meta.dirty || meta.file_open || meta.write_open
            })
            .unwrap_or(false)
    }

    fn evict_for(&self, inner: &mut CacheInner, need: u64, protect: &str) {
        while inner.total_bytes + need > self.config.max_cache_bytes {
            let victim = inner
                .files
                .iter()
                .rev()
                .find(|(path, _)| path.as_str() != protect && !self.is_file_pinned(path))
                .map(|(path, _)| path.clone());
            match victim {
                Some(path) => {
                    if let Some(entry) = inner.files.pop(&path) {
                        inner.total_bytes -= entry.bytes();
                        inner.stats.evictions += 1;
                        debug!(path, "evicted cached file under budget pressure");
                    }
                }
                None => break,
            }
        }
    }
}
