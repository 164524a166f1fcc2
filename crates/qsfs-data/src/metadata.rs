use std::sync::{Arc, RwLock, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::path;

/// MIME type marking a zero-size object as a persisted symbolic link.
pub const SYMLINK_MIME_TYPE: &str = "application/x-symlink";

/// Block unit used when reporting allocated blocks in stat results.
pub const STAT_BLOCK_UNIT: u64 = 512;

/// Shared handle to a metadata slot owned by the registry.
pub type SharedMeta = Arc<RwLock<FileMetaData>>;

/// Non-owning handle to a metadata slot; dangles after registry eviction.
pub type WeakMeta = Weak<RwLock<FileMetaData>>;

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Classification of a filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    /// Regular file.
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    SymLink,
    /// Block device.
    Block,
    /// Character device.
    Character,
    /// Named pipe.
    Fifo,
    /// Unix domain socket.
    Socket,
}

impl FileType {
    /// The `S_IF*` format bits for this type.
    pub fn format_bits(self) -> u32 {
        match self {
            FileType::File => libc::S_IFREG,
            FileType::Directory => libc::S_IFDIR,
            FileType::SymLink => libc::S_IFLNK,
            FileType::Block => libc::S_IFBLK,
            FileType::Character => libc::S_IFCHR,
            FileType::Fifo => libc::S_IFIFO,
            FileType::Socket => libc::S_IFSOCK,
        }
    }

    /// Human-readable name, used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            FileType::File => "file",
            FileType::Directory => "directory",
            FileType::SymLink => "symlink",
            FileType::Block => "block device",
            FileType::Character => "character device",
            FileType::Fifo => "fifo",
            FileType::Socket => "socket",
        }
    }
}

/// Flattened stat record handed to the FUSE adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// File size in bytes.
    pub size: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Type and permission bits.
    pub mode: u32,
    /// Link count.
    pub nlink: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Device number for device nodes.
    pub dev: u64,
    /// Last access time, unix seconds.
    pub atime: i64,
    /// Last modification time, unix seconds.
    pub mtime: i64,
    /// Last status change time, unix seconds.
    pub ctime: i64,
}

/// Object file metadata: one record per path, owned by the registry.
#[derive(Debug, Clone)]
pub struct FileMetaData {
    /// Full path; directories carry the trailing `/`.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Time of last access, unix seconds.
    pub atime: i64,
    /// Time of last modification, unix seconds.
    pub mtime: i64,
    /// Time of last status change, unix seconds.
    pub ctime: i64,
    /// When this record was fetched or refreshed.
    pub cached_time: i64,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Permission bits (no format bits).
    pub mode: u32,
    /// Entry classification.
    pub file_type: FileType,
    /// MIME type reported by the store.
    pub mime_type: String,
    /// Store-assigned entity tag, used for conditional HEAD.
    pub etag: String,
    /// Server-side encryption flag.
    pub encrypted: bool,
    /// Device number for device nodes.
    pub dev: u64,
    /// Link count; starts at 2 for directories, 1 otherwise.
    pub num_link: u32,
    /// Local writes pending upload.
    pub dirty: bool,
    /// Opened with write intent.
    pub write_open: bool,
    /// Currently open.
    pub file_open: bool,
    /// A download for this entry is in flight.
    pub pending_get: bool,
    /// A create for this entry is in flight.
    pub pending_create: bool,
}

impl FileMetaData {
    /// Build a record. The path of a directory is normalized to carry
    /// the trailing `/`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: &str,
        size: u64,
        atime: i64,
        mtime: i64,
        uid: u32,
        gid: u32,
        mode: u32,
        file_type: FileType,
    ) -> Self {
        let path = if file_type == FileType::Directory {
            path::to_dir_path(file_path)
        } else {
            file_path.to_string()
        };
        let num_link = if file_type == FileType::Directory { 2 } else { 1 };
        FileMetaData {
            path,
            size,
            atime,
            mtime,
            ctime: mtime,
            cached_time: unix_now(),
            uid,
            gid,
            mode,
            file_type,
            mime_type: String::new(),
            etag: String::new(),
            encrypted: false,
            dev: 0,
            num_link,
            dirty: false,
            write_open: false,
            file_open: false,
            pending_get: false,
            pending_create: false,
        }
    }

    /// Attach a MIME type.
    pub fn with_mime_type(mut self, mime: &str) -> Self {
        self.mime_type = mime.to_string();
        self
    }

    /// Attach an entity tag.
    pub fn with_etag(mut self, etag: &str) -> Self {
        self.etag = etag.to_string();
        self
    }

    /// Attach a device number.
    pub fn with_dev(mut self, dev: u64) -> Self {
        self.dev = dev;
        self
    }

    /// True iff this record describes a directory.
    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }

    /// True iff this record describes a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::SymLink
    }

    /// The trailing-`/`-terminated directory this entry belongs to.
    pub fn dir_name(&self) -> Option<String> {
        path::dir_name(&self.path)
    }

    /// The final path component.
    pub fn base_name(&self) -> String {
        path::base_name(&self.path)
    }

    /// Combined `S_IF*` and permission bits.
    pub fn file_type_and_mode(&self) -> u32 {
        self.file_type.format_bits() | (self.mode & 0o7777)
    }

    /// Flatten to a stat record. A directory reserves one block for its
    /// own metadata.
    pub fn to_stat(&self) -> FileStat {
        FileStat {
            size: self.size,
            blocks: self.size / STAT_BLOCK_UNIT + 1,
            mode: self.file_type_and_mode(),
            nlink: self.num_link,
            uid: self.uid,
            gid: self.gid,
            dev: self.dev,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
        }
    }

    /// POSIX access check against this entry's ownership and mode.
    ///
    /// `mask` is a bitwise OR of `R_OK`, `W_OK`, `X_OK`, or `F_OK`.
    /// Root passes everything except execute on entries with no execute
    /// bit at all.
    pub fn access(&self, uid: u32, gid: u32, mask: i32) -> bool {
        if mask == libc::F_OK {
            return true;
        }
        if uid == 0 {
            if mask & libc::X_OK != 0 && self.mode & 0o111 == 0 {
                return false;
            }
            return true;
        }
        let perm = if uid == self.uid {
            (self.mode >> 6) & 0o7
        } else if gid == self.gid {
            (self.mode >> 3) & 0o7
        } else {
            self.mode & 0o7
        };
        if mask & libc::R_OK != 0 && perm & 0o4 == 0 {
            return false;
        }
        if mask & libc::W_OK != 0 && perm & 0o2 == 0 {
            return false;
        }
        if mask & libc::X_OK != 0 && perm & 0o1 == 0 {
            return false;
        }
        true
    }
}

/// Metadata for a directory discovered implicitly (the root at mount, or
/// a parent seen only through LIST results).
pub fn default_directory_meta(dir_path: &str, mtime: i64, uid: u32, gid: u32, mode: u32) -> FileMetaData {
    FileMetaData::new(dir_path, 0, mtime, mtime, uid, gid, mode, FileType::Directory)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_meta(mode: u32) -> FileMetaData {
        FileMetaData::new("/a/f.txt", 100, 1, 1, 1000, 1000, mode, FileType::File)
    }

    #[test]
    fn test_directory_path_normalized() {
        let meta = FileMetaData::new("/a/d", 0, 1, 1, 0, 0, 0o755, FileType::Directory);
        assert_eq!(meta.path, "/a/d/");
        assert!(meta.is_directory());
    }

    #[test]
    fn test_file_path_untouched() {
        let meta = file_meta(0o644);
        assert_eq!(meta.path, "/a/f.txt");
    }

    #[test]
    fn test_link_count_starts_at_two_for_directories() {
        let dir = FileMetaData::new("/d/", 0, 1, 1, 0, 0, 0o755, FileType::Directory);
        assert_eq!(dir.num_link, 2);
        assert_eq!(file_meta(0o644).num_link, 1);
    }

    #[test]
    fn test_file_type_and_mode_combines_bits() {
        let meta = file_meta(0o644);
        assert_eq!(meta.file_type_and_mode(), libc::S_IFREG | 0o644);
    }

    #[test]
    fn test_to_stat_blocks() {
        let meta = file_meta(0o644);
        let st = meta.to_stat();
        assert_eq!(st.size, 100);
        assert_eq!(st.blocks, 1);
        assert_eq!(st.nlink, 1);
    }

    #[test]
    fn test_access_f_ok_always_passes() {
        assert!(file_meta(0o000).access(1000, 1000, libc::F_OK));
    }

    #[test]
    fn test_access_owner_bits() {
        let meta = file_meta(0o600);
        assert!(meta.access(1000, 1000, libc::R_OK | libc::W_OK));
        assert!(!meta.access(1000, 1000, libc::X_OK));
    }

    #[test]
    fn test_access_group_bits() {
        let meta = file_meta(0o640);
        assert!(meta.access(2000, 1000, libc::R_OK));
        assert!(!meta.access(2000, 1000, libc::W_OK));
    }

    #[test]
    fn test_access_other_bits() {
        let meta = file_meta(0o604);
        assert!(meta.access(2000, 2000, libc::R_OK));
        assert!(!meta.access(2000, 2000, libc::W_OK));
    }

    #[test]
    fn test_access_execute_gated_by_execute_bit() {
        let meta = file_meta(0o700);
        assert!(meta.access(1000, 1000, libc::X_OK));
        let meta = file_meta(0o600);
        assert!(!meta.access(1000, 1000, libc::X_OK));
    }

    #[test]
    fn test_access_root_bypasses_rw_but_not_execute() {
        let meta = file_meta(0o000);
        assert!(meta.access(0, 0, libc::R_OK | libc::W_OK));
        assert!(!meta.access(0, 0, libc::X_OK));
        let meta = file_meta(0o100);
        assert!(meta.access(0, 0, libc::X_OK));
    }

    #[test]
    fn test_default_directory_meta() {
        let meta = default_directory_meta("/d", 42, 1, 2, 0o755);
        assert_eq!(meta.path, "/d/");
        assert_eq!(meta.mtime, 42);
        assert_eq!(meta.uid, 1);
        assert_eq!(meta.gid, 2);
        assert!(meta.is_directory());
    }

    #[test]
    fn test_dir_name_and_base_name() {
        let meta = file_meta(0o644);
        assert_eq!(meta.dir_name(), Some("/a/".to_string()));
        assert_eq!(meta.base_name(), "f.txt");
    }
}
