use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, RwLock, Weak};

use tracing::warn;

use crate::metadata::{FileStat, FileType, SharedMeta, WeakMeta};

/// A vertex in the directory tree.
///
/// A node references its metadata slot weakly (the registry owns the
/// record), points back at its parent weakly (the parent owns its
/// children), and owns its children map keyed by child full path.
pub struct Node {
    inner: RwLock<NodeInner>,
}

struct NodeInner {
    meta: WeakMeta,
    parent: Weak<Node>,
    children: HashMap<String, Arc<Node>>,
    symlink_target: Option<String>,
    hard_link: bool,
}

impl Node {
    /// Create a detached node referencing `meta`.
    pub fn new(meta: &SharedMeta) -> Arc<Node> {
        Arc::new(Node {
            inner: RwLock::new(NodeInner {
                meta: Arc::downgrade(meta),
                parent: Weak::new(),
                children: HashMap::new(),
                symlink_target: None,
                hard_link: false,
            }),
        })
    }

    /// The metadata slot, if the registry still holds it.
    pub fn meta(&self) -> Option<SharedMeta> {
        self.inner.read().unwrap().meta.upgrade()
    }

    /// Point this node at a different metadata slot. Outstanding node
    /// references stay valid across the swap.
    pub fn set_meta(&self, meta: &SharedMeta) {
        self.inner.write().unwrap().meta = Arc::downgrade(meta);
    }

    /// True iff the metadata is resident and carries a path.
    pub fn is_operable(&self) -> bool {
        self.meta()
            .map(|m| !m.read().unwrap().path.is_empty())
            .unwrap_or(false)
    }

    /// Full path, or empty when the metadata was evicted.
    pub fn path(&self) -> String {
        self.meta()
            .map(|m| m.read().unwrap().path.clone())
            .unwrap_or_default()
    }

    /// File size in bytes; 0 when the metadata was evicted.
    pub fn file_size(&self) -> u64 {
        self.meta().map(|m| m.read().unwrap().size).unwrap_or(0)
    }

    /// Modification time; 0 when the metadata was evicted.
    pub fn mtime(&self) -> i64 {
        self.meta().map(|m| m.read().unwrap().mtime).unwrap_or(0)
    }

    /// Link count; 0 when the metadata was evicted.
    pub fn num_link(&self) -> u32 {
        self.meta().map(|m| m.read().unwrap().num_link).unwrap_or(0)
    }

    /// Entry classification, if the metadata is resident.
    pub fn file_type(&self) -> Option<FileType> {
        self.meta().map(|m| m.read().unwrap().file_type)
    }

    /// True iff this node is a directory.
    pub fn is_directory(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    /// True iff this node is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.file_type() == Some(FileType::SymLink)
    }

    /// True iff this node is a local-only hard link.
    pub fn is_hard_link(&self) -> bool {
        self.inner.read().unwrap().hard_link
    }

    pub(crate) fn set_hard_link(&self, hard_link: bool) {
        self.inner.write().unwrap().hard_link = hard_link;
    }

    /// True iff local writes are pending upload.
    pub fn is_dirty(&self) -> bool {
        self.meta().map(|m| m.read().unwrap().dirty).unwrap_or(false)
    }

    /// Mark or clear pending local writes.
    pub fn set_dirty(&self, dirty: bool) {
        if let Some(m) = self.meta() {
            m.write().unwrap().dirty = dirty;
        }
    }

    /// True iff the file is currently open.
    pub fn is_file_open(&self) -> bool {
        self.meta()
            .map(|m| m.read().unwrap().file_open)
            .unwrap_or(false)
    }

    /// Mark or clear the open state.
    pub fn set_file_open(&self, open: bool) {
        if let Some(m) = self.meta() {
            m.write().unwrap().file_open = open;
        }
    }

    /// Record a new file size.
    pub fn set_file_size(&self, size: u64) {
        if let Some(m) = self.meta() {
            m.write().unwrap().size = size;
        }
    }

    /// The symlink target, when known.
    pub fn symlink_target(&self) -> Option<String> {
        self.inner.read().unwrap().symlink_target.clone()
    }

    /// Record the symlink target string.
    pub fn set_symlink_target(&self, target: &str) {
        self.inner.write().unwrap().symlink_target = Some(target.to_string());
    }

    /// The parent node, when linked and alive.
    pub fn parent(&self) -> Option<Arc<Node>> {
        self.inner.read().unwrap().parent.upgrade()
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Node>) {
        self.inner.write().unwrap().parent = Arc::downgrade(parent);
    }

    pub(crate) fn clear_parent(&self) {
        self.inner.write().unwrap().parent = Weak::new();
    }

    /// True iff the node has no children.
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().children.is_empty()
    }

    /// True iff `child_path` is a direct child.
    pub fn has_child(&self, child_path: &str) -> bool {
        self.inner.read().unwrap().children.contains_key(child_path)
    }

    /// Direct child lookup by full path.
    pub fn find_child(&self, child_path: &str) -> Option<Arc<Node>> {
        self.inner.read().unwrap().children.get(child_path).cloned()
    }

    /// Snapshot of the direct children.
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.inner.read().unwrap().children.values().cloned().collect()
    }

    /// Sorted set of direct child paths.
    pub fn children_paths(&self) -> BTreeSet<String> {
        self.inner.read().unwrap().children.keys().cloned().collect()
    }

    /// All descendant paths, nearest first.
    pub fn children_paths_recursive(&self) -> VecDeque<String> {
        let mut out = VecDeque::new();
        let mut frontier: VecDeque<Arc<Node>> = self.children().into();
        while let Some(node) = frontier.pop_front() {
            out.push_back(node.path());
            for child in node.children() {
                frontier.push_back(child);
            }
        }
        out
    }

    /// Attach `child` under `parent`. Non-directories refuse children.
    pub(crate) fn insert_child(parent: &Arc<Node>, child: Arc<Node>) {
        if !parent.is_directory() {
            warn!(path = %parent.path(), "refusing to attach a child to a non-directory");
            return;
        }
        let path = child.path();
        if path.is_empty() {
            warn!("refusing to attach a child with no path");
            return;
        }
        child.set_parent(parent);
        parent.inner.write().unwrap().children.insert(path, child);
    }

    /// Detach a child by full path.
    pub(crate) fn remove_child(&self, child_path: &str) -> Option<Arc<Node>> {
        self.inner.write().unwrap().children.remove(child_path)
    }

    /// Re-key a child after a rename.
    pub(crate) fn rename_child(&self, old_path: &str, new_path: &str) {
        let mut inner = self.inner.write().unwrap();
        if let Some(child) = inner.children.remove(old_path) {
            inner.children.insert(new_path.to_string(), child);
        }
    }

    /// POSIX access check against the node's metadata.
    pub fn access(&self, uid: u32, gid: u32, mask: i32) -> bool {
        self.meta()
            .map(|m| m.read().unwrap().access(uid, gid, mask))
            .unwrap_or(false)
    }

    /// Flattened stat record, if the metadata is resident.
    pub fn to_stat(&self) -> Option<FileStat> {
        self.meta().map(|m| m.read().unwrap().to_stat())
    }

    /// Bump the link count, returning the new value.
    pub fn increase_num_link(&self) -> u32 {
        self.meta()
            .map(|m| {
                let mut meta = m.write().unwrap();
                meta.num_link += 1;
                meta.num_link
            })
            .unwrap_or(0)
    }

    /// Drop the link count, returning the new value.
    pub fn decrease_num_link(&self) -> u32 {
        self.meta()
            .map(|m| {
                let mut meta = m.write().unwrap();
                meta.num_link = meta.num_link.saturating_sub(1);
                meta.num_link
            })
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path())
            .field("hard_link", &self.is_hard_link())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FileMetaData, FileType};
    use std::sync::RwLock as StdRwLock;

    fn shared(meta: FileMetaData) -> SharedMeta {
        Arc::new(StdRwLock::new(meta))
    }

    fn file_node(path: &str) -> (SharedMeta, Arc<Node>) {
        let meta = shared(FileMetaData::new(
            path,
            10,
            1,
            1,
            0,
            0,
            0o644,
            FileType::File,
        ));
        let node = Node::new(&meta);
        (meta, node)
    }

    fn dir_node(path: &str) -> (SharedMeta, Arc<Node>) {
        let meta = shared(FileMetaData::new(
            path,
            0,
            1,
            1,
            0,
            0,
            0o755,
            FileType::Directory,
        ));
        let node = Node::new(&meta);
        (meta, node)
    }

    #[test]
    fn test_node_reflects_metadata() {
        let (_meta, node) = file_node("/a/f");
        assert_eq!(node.path(), "/a/f");
        assert_eq!(node.file_size(), 10);
        assert!(!node.is_directory());
        assert!(node.is_operable());
    }

    #[test]
    fn test_node_defaults_after_metadata_eviction() {
        let (meta, node) = file_node("/a/f");
        drop(meta);
        assert_eq!(node.path(), "");
        assert_eq!(node.file_size(), 0);
        assert!(!node.is_operable());
        assert!(node.meta().is_none());
    }

    #[test]
    fn test_insert_and_find_child() {
        let (_dm, dir) = dir_node("/d/");
        let (_fm, file) = file_node("/d/f");
        Node::insert_child(&dir, Arc::clone(&file));
        assert!(dir.has_child("/d/f"));
        assert!(Arc::ptr_eq(&dir.find_child("/d/f").unwrap(), &file));
        assert!(Arc::ptr_eq(&file.parent().unwrap(), &dir));
    }

    #[test]
    fn test_non_directory_refuses_children() {
        let (_fm, file) = file_node("/f");
        let (_cm, child) = file_node("/f/impossible");
        Node::insert_child(&file, child);
        assert!(file.is_empty());
    }

    #[test]
    fn test_remove_child() {
        let (_dm, dir) = dir_node("/d/");
        let (_fm, file) = file_node("/d/f");
        Node::insert_child(&dir, file);
        assert!(dir.remove_child("/d/f").is_some());
        assert!(dir.is_empty());
    }

    #[test]
    fn test_rename_child_rekeys() {
        let (_dm, dir) = dir_node("/d/");
        let (_fm, file) = file_node("/d/f");
        Node::insert_child(&dir, file);
        dir.rename_child("/d/f", "/d/g");
        assert!(!dir.has_child("/d/f"));
        assert!(dir.has_child("/d/g"));
    }

    #[test]
    fn test_children_paths_sorted() {
        let (_dm, dir) = dir_node("/d/");
        let (_m1, f1) = file_node("/d/b");
        let (_m2, f2) = file_node("/d/a");
        Node::insert_child(&dir, f1);
        Node::insert_child(&dir, f2);
        let paths: Vec<String> = dir.children_paths().into_iter().collect();
        assert_eq!(paths, vec!["/d/a".to_string(), "/d/b".to_string()]);
    }

    #[test]
    fn test_children_paths_recursive_nearest_first() {
        let (_dm, root) = dir_node("/d/");
        let (_sm, sub) = dir_node("/d/s/");
        let (_fm, file) = file_node("/d/s/f");
        Node::insert_child(&sub, file);
        Node::insert_child(&root, sub);
        let all: Vec<String> = root.children_paths_recursive().into_iter().collect();
        assert_eq!(all, vec!["/d/s/".to_string(), "/d/s/f".to_string()]);
    }

    #[test]
    fn test_link_count_adjustment() {
        let (_fm, node) = file_node("/f");
        assert_eq!(node.increase_num_link(), 2);
        assert_eq!(node.decrease_num_link(), 1);
        assert_eq!(node.decrease_num_link(), 0);
        assert_eq!(node.decrease_num_link(), 0);
    }

    #[test]
    fn test_symlink_target_roundtrip() {
        let (_fm, node) = file_node("/l");
        assert!(node.symlink_target().is_none());
        node.set_symlink_target("/a/f");
        assert_eq!(node.symlink_target().unwrap(), "/a/f");
    }

    #[test]
    fn test_set_meta_swaps_slot() {
        let (_m1, node) = file_node("/a");
        let m2 = shared(FileMetaData::new(
            "/a",
            99,
            2,
            2,
            0,
            0,
            0o644,
            FileType::File,
        ));
        node.set_meta(&m2);
        assert_eq!(node.file_size(), 99);
    }
}
