use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::Result;

/// One contiguous byte range `[offset, offset + size)` of a file's
/// content, backed by memory or by a temp file in the scratch directory.
/// A spilled page's backing file is unlinked when the page is dropped.
pub struct Page {
    offset: u64,
    size: u64,
    store: PageStore,
}

enum PageStore {
    Memory(Vec<u8>),
    Spilled(NamedTempFile),
}

impl Page {
    /// Build a memory-backed page.
    pub fn new_in_memory(offset: u64, data: Vec<u8>) -> Page {
        Page {
            offset,
            size: data.len() as u64,
            store: PageStore::Memory(data),
        }
    }

    /// Build a temp-file-backed page under `scratch_dir`.
    pub fn new_spilled(offset: u64, data: &[u8], scratch_dir: &Path) -> Result<Page> {
        let mut file = NamedTempFile::new_in(scratch_dir)?;
        file.write_all(data)?;
        file.flush()?;
        debug!(
            offset,
            size = data.len(),
            path = %file.path().display(),
            "spilled page to scratch file"
        );
        Ok(Page {
            offset,
            size: data.len() as u64,
            store: PageStore::Spilled(file),
        })
    }

    /// Range start, relative to the owning file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Number of bytes this page holds.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Offset of the first byte past this page.
    pub fn next(&self) -> u64 {
        self.offset + self.size
    }

    /// Offset of the last byte in this page.
    pub fn stop(&self) -> u64 {
        if self.size > 0 {
            self.offset + self.size - 1
        } else {
            0
        }
    }

    /// True iff backed by a scratch file.
    pub fn is_spilled(&self) -> bool {
        matches!(self.store, PageStore::Spilled(_))
    }

    /// Copy page content starting at absolute file offset `offset` into
    /// `buf`, returning the number of bytes produced. The requested
    /// range is clipped to the page.
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset < self.offset || offset >= self.next() {
            return Ok(0);
        }
        let rel = (offset - self.offset) as usize;
        let len = buf.len().min((self.size as usize) - rel);
        match &self.store {
            PageStore::Memory(data) => {
                buf[..len].copy_from_slice(&data[rel..rel + len]);
                Ok(len)
            }
            PageStore::Spilled(file) => {
                file.as_file().read_exact_at(&mut buf[..len], rel as u64)?;
                Ok(len)
            }
        }
    }

    /// Overwrite page content starting at absolute file offset
    /// `offset`. The write may extend the page at its tail.
    pub fn refresh(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        debug_assert!(offset >= self.offset && offset <= self.next());
        let rel = (offset - self.offset) as usize;
        let end = rel + data.len();
        match &mut self.store {
            PageStore::Memory(bytes) => {
                if end > bytes.len() {
                    bytes.resize(end, 0);
                }
                bytes[rel..end].copy_from_slice(data);
            }
            PageStore::Spilled(file) => {
                file.as_file().write_all_at(data, rel as u64)?;
            }
        }
        self.size = self.size.max(end as u64);
        Ok(())
    }

    /// Shrink the page to `new_size` bytes. Growing is not supported.
    pub fn resize(&mut self, new_size: u64) {
        if new_size >= self.size {
            return;
        }
        if let PageStore::Memory(bytes) = &mut self.store {
            bytes.truncate(new_size as usize);
        }
        self.size = new_size;
    }

    /// The full page content as a contiguous buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.size as usize];
        match &self.store {
            PageStore::Memory(data) => out.copy_from_slice(data),
            PageStore::Spilled(file) => file.as_file().read_exact_at(&mut out, 0)?,
        }
        Ok(out)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}
