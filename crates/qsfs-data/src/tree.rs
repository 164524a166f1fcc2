use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::error::{DataError, Result};
use crate::meta_manager::FileMetaDataManager;
use crate::metadata::{default_directory_meta, FileMetaData};
use crate::node::Node;
use crate::path;

/// The live namespace: a tree of nodes keyed by full path.
///
/// Two indices back the tree: the primary path map, and a parent-dir to
/// children multimap. Every node is registered in the multimap under its
/// dirname, so children inserted before their parent exists are adopted
/// when the parent is finally grown.
pub struct DirectoryTree {
    meta_manager: Arc<FileMetaDataManager>,
    inner: Mutex<TreeInner>,
}

struct TreeInner {
    root: Arc<Node>,
    path_map: HashMap<String, Weak<Node>>,
    children_index: HashMap<String, Vec<Weak<Node>>>,
}

impl DirectoryTree {
    /// Build a tree whose root carries the given attributes.
    pub fn new(
        meta_manager: Arc<FileMetaDataManager>,
        mtime: i64,
        uid: u32,
        gid: u32,
        mode: u32,
    ) -> Self {
        let root_meta = default_directory_meta(path::ROOT_PATH, mtime, uid, gid, mode);
        let slot = meta_manager.add(root_meta);
        let root = Node::new(&slot);
        let mut path_map = HashMap::new();
        path_map.insert(path::ROOT_PATH.to_string(), Arc::downgrade(&root));
        DirectoryTree {
            meta_manager,
            inner: Mutex::new(TreeInner {
                root,
                path_map,
                children_index: HashMap::new(),
            }),
        }
    }

    /// The root node; always present.
    pub fn root(&self) -> Arc<Node> {
        Arc::clone(&self.inner.lock().unwrap().root)
    }

    /// O(1) lookup by full path.
    pub fn find(&self, file_path: &str) -> Option<Arc<Node>> {
        self.inner
            .lock()
            .unwrap()
            .path_map
            .get(file_path)
            .and_then(Weak::upgrade)
    }

    /// True iff a node exists at `file_path`.
    pub fn has(&self, file_path: &str) -> bool {
        self.find(file_path).is_some()
    }

    /// Flat enumeration of the children registered under a directory.
    pub fn find_children(&self, dir_path: &str) -> Vec<Arc<Node>> {
        let dir = path::to_dir_path(dir_path);
        let mut inner = self.inner.lock().unwrap();
        match inner.children_index.get_mut(&dir) {
            Some(entries) => {
                entries.retain(|w| w.upgrade().is_some());
                entries.iter().filter_map(Weak::upgrade).collect()
            }
            None => Vec::new(),
        }
    }

    /// Number of nodes in the tree, the root included.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().path_map.len()
    }

    /// True iff only the root exists.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    /// Idempotent insert-or-update from one metadata record.
    ///
    /// An existing node keeps its identity and is repointed at the
    /// refreshed metadata slot; a new node is created, linked to its
    /// parent when resident, and adopts any orphans already registered
    /// under its path.
    pub fn grow(&self, meta: FileMetaData) -> Result<Arc<Node>> {
        let mut inner = self.inner.lock().unwrap();
        self.grow_locked(&mut inner, meta)
    }

    /// Bulk ingest from a LIST response, holding the lock once.
    pub fn grow_many(&self, metas: Vec<FileMetaData>) {
        let mut inner = self.inner.lock().unwrap();
        for meta in metas {
            if let Err(e) = self.grow_locked(&mut inner, meta) {
                warn!(error = %e, "skipping one entry during bulk grow");
            }
        }
    }

    fn grow_locked(&self, inner: &mut TreeInner, meta: FileMetaData) -> Result<Arc<Node>> {
        let file_path = meta.path.clone();
        if path::is_root(&file_path) {
            let slot = self.meta_manager.add(meta);
            inner.root.set_meta(&slot);
            return Ok(Arc::clone(&inner.root));
        }
        path::validate(&file_path)?;
        let dir_name = meta.dir_name().ok_or_else(|| DataError::InvalidPath {
            path: file_path.clone(),
            reason: "no parent directory".to_string(),
        })?;
        let is_dir = meta.is_directory();
        let slot = self.meta_manager.add(meta);

        if let Some(node) = inner.path_map.get(&file_path).and_then(Weak::upgrade) {
            node.set_meta(&slot);
            return Ok(node);
        }

        let node = Node::new(&slot);
        inner.path_map.insert(file_path.clone(), Arc::downgrade(&node));

        // hook up with the parent, when resident
        if let Some(parent) = inner.path_map.get(&dir_name).and_then(Weak::upgrade) {
            Node::insert_child(&parent, Arc::clone(&node));
        } else {
            debug!(path = %file_path, parent = %dir_name, "parent not resident yet, node left orphaned");
        }

        // a new directory adopts whatever the index already holds for it
        if is_dir {
            if let Some(orphans) = inner.children_index.get(&file_path) {
                for orphan in orphans.clone() {
                    if let Some(child) = orphan.upgrade() {
                        Node::insert_child(&node, child);
                    }
                }
            }
        }

        inner
            .children_index
            .entry(dir_name)
            .or_default()
            .push(Arc::downgrade(&node));
        Ok(node)
    }

    /// Reconcile a directory against a full listing of its children:
    /// children absent from the listing are dropped, listed children are
    /// grown. Returns the directory node.
    pub fn update_directory(
        &self,
        dir_path: &str,
        children_metas: Vec<FileMetaData>,
    ) -> Result<Arc<Node>> {
        let dir = path::to_dir_path(dir_path);
        let mut inner = self.inner.lock().unwrap();

        let mut fresh = Vec::new();
        let mut fresh_paths = std::collections::BTreeSet::new();
        for child in children_metas {
            match child.dir_name() {
                Some(d) if d == dir => {
                    fresh_paths.insert(child.path.clone());
                    fresh.push(child);
                }
                _ => warn!(child = %child.path, dir = %dir, "ignoring listed entry outside the directory"),
            }
        }

        let node = match inner.path_map.get(&dir).and_then(Weak::upgrade) {
            Some(node) => {
                if !node.is_directory() {
                    return Err(DataError::NotDirectory { path: dir });
                }
                let stale: Vec<String> = node
                    .children_paths()
                    .into_iter()
                    .filter(|p| !fresh_paths.contains(p))
                    .collect();
                for gone in stale {
                    debug!(path = %gone, "dropping child no longer present in listing");
                    self.remove_locked(&mut inner, &gone)?;
                }
                node
            }
            None => {
                let meta = default_directory_meta(&dir, 0, 0, 0, 0o755);
                self.grow_locked(&mut inner, meta)?
            }
        };
        for child in fresh {
            self.grow_locked(&mut inner, child)?;
        }
        Ok(node)
    }

    /// Rename a node, rewriting every descendant path key. Aborts with
    /// no mutation when the target exists or the source is the root.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<Arc<Node>> {
        if path::is_root(old_path) {
            return Err(DataError::InvalidPath {
                path: old_path.to_string(),
                reason: "cannot rename root".to_string(),
            });
        }
        path::validate(new_path)?;
        if old_path == new_path {
            return self.find(old_path).ok_or_else(|| DataError::NotFound {
                path: old_path.to_string(),
            });
        }

        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .path_map
            .get(old_path)
            .and_then(Weak::upgrade)
            .ok_or_else(|| DataError::NotFound {
                path: old_path.to_string(),
            })?;
        if inner.path_map.get(new_path).and_then(Weak::upgrade).is_some() {
            warn!(old = %old_path, new = %new_path, "rename target exists, aborting");
            return Err(DataError::AlreadyExists {
                path: new_path.to_string(),
            });
        }

        // the node itself, then every descendant, nearest first
        let mut mappings = vec![(old_path.to_string(), new_path.to_string())];
        for descendant in node.children_paths_recursive() {
            if let Some(suffix) = descendant.strip_prefix(old_path) {
                mappings.push((descendant.clone(), format!("{}{}", new_path, suffix)));
            } else {
                warn!(dir = %old_path, child = %descendant, "descendant outside renamed prefix");
            }
        }

        // detach from the old parent
        if let Some(parent) = node.parent() {
            parent.remove_child(old_path);
        }
        Self::unindex(&mut inner, old_path, &node);

        for (old, new) in &mappings {
            self.meta_manager.rename(old, new);
            if let Some(weak) = inner.path_map.remove(old) {
                inner.path_map.insert(new.clone(), weak);
            }
            if let Some(moved) = inner.path_map.get(new).and_then(Weak::upgrade) {
                if let Some(parent) = moved.parent() {
                    parent.rename_child(old, new);
                }
                if old.as_str() != old_path {
                    Self::unindex(&mut inner, old, &moved);
                    Self::index(&mut inner, new, &moved);
                }
            }
        }

        // attach under the new parent, when resident
        if let Some(dir_name) = path::dir_name(new_path) {
            if let Some(parent) = inner.path_map.get(&dir_name).and_then(Weak::upgrade) {
                Node::insert_child(&parent, Arc::clone(&node));
            } else {
                node.clear_parent();
            }
        }
        Self::index(&mut inner, new_path, &node);

        debug!(old = %old_path, new = %new_path, moved = mappings.len(), "renamed subtree");
        Ok(node)
    }

    /// Detach and drop a node. Children of a removed directory stay in
    /// the index as orphans until a new parent is grown. The metadata
    /// link count is decremented; the record is evicted from the
    /// registry once no links remain.
    pub fn remove(&self, file_path: &str) -> Result<()> {
        if path::is_root(file_path) {
            return Err(DataError::InvalidPath {
                path: file_path.to_string(),
                reason: "cannot remove root".to_string(),
            });
        }
        let mut inner = self.inner.lock().unwrap();
        self.remove_locked(&mut inner, file_path)
    }

    fn remove_locked(&self, inner: &mut TreeInner, file_path: &str) -> Result<()> {
        let node = inner
            .path_map
            .get(file_path)
            .and_then(Weak::upgrade)
            .ok_or_else(|| DataError::NotFound {
                path: file_path.to_string(),
            })?;

        if let Some(parent) = node.parent() {
            parent.remove_child(file_path);
        }
        inner.path_map.remove(file_path);
        Self::unindex(inner, file_path, &node);

        for child in node.children() {
            child.clear_parent();
        }

        let is_dir = node.is_directory();
        let remaining = node.decrease_num_link();
        let evict = if is_dir { remaining <= 1 } else { remaining == 0 };
        if evict {
            if let Some(meta) = node.meta() {
                let meta_path = meta.read().unwrap().path.clone();
                self.meta_manager.erase(&meta_path);
            }
        }
        debug!(path = %file_path, "removed node");
        Ok(())
    }

    /// Create a local-only hard link to a file. The link shares the
    /// target's metadata record; it vanishes on remount because the
    /// object store has no link primitive.
    pub fn hard_link(&self, target_path: &str, link_path: &str) -> Result<Arc<Node>> {
        path::validate(link_path)?;
        let mut inner = self.inner.lock().unwrap();
        let target = inner
            .path_map
            .get(target_path)
            .and_then(Weak::upgrade)
            .ok_or_else(|| DataError::NotFound {
                path: target_path.to_string(),
            })?;
        if target.is_directory() {
            return Err(DataError::IsDirectory {
                path: target_path.to_string(),
            });
        }
        if inner.path_map.contains_key(link_path) {
            return Err(DataError::AlreadyExists {
                path: link_path.to_string(),
            });
        }
        let slot = target.meta().ok_or_else(|| DataError::MetadataEvicted {
            path: target_path.to_string(),
        })?;

        let link = Node::new(&slot);
        link.set_hard_link(true);
        target.increase_num_link();
        inner.path_map.insert(link_path.to_string(), Arc::downgrade(&link));
        if let Some(dir_name) = path::dir_name(link_path) {
            if let Some(parent) = inner.path_map.get(&dir_name).and_then(Weak::upgrade) {
                link.set_parent(&parent);
            }
            inner
                .children_index
                .entry(dir_name)
                .or_default()
                .push(Arc::downgrade(&link));
        }
        Ok(link)
    }

    fn index(inner: &mut TreeInner, file_path: &str, node: &Arc<Node>) {
        if let Some(dir_name) = path::dir_name(file_path) {
            inner
                .children_index
                .entry(dir_name)
                .or_default()
                .push(Arc::downgrade(node));
        }
    }

    fn unindex(inner: &mut TreeInner, file_path: &str, node: &Arc<Node>) {
        if let Some(dir_name) = path::dir_name(file_path) {
            if let Some(entries) = inner.children_index.get_mut(&dir_name) {
                entries.retain(|w| match w.upgrade() {
                    Some(n) => !Arc::ptr_eq(&n, node),
                    None => false,
                });
            }
        }
    }
}
