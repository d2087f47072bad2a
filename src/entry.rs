//! Directory entries and the in-memory directory tree.
//!
//! The tree is an arena: nodes live in one vector and refer to their
//! children by index. The root is a synthetic directory named `/`.

use crate::config::{ATTR_DIRECTORY, ATTR_FILE, MAX_FILENAME_LENGTH};
use crate::error::FileSystemError;
use crate::fat::FAT_EOC;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

impl Default for Permissions {
    fn default() -> Self {
        Permissions {
            read: true,
            write: true,
        }
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            if self.read { "R" } else { "-" },
            if self.write { "W" } else { "-" }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// File length in bytes; for directories the sum of the immediate
    /// file children.
    pub size: u32,
    pub permissions: Permissions,
    pub creation_time: i64,
    pub modification_time: i64,
    /// Empty means no password.
    pub password: String,
    pub start_block: u16,
    pub attribute: u8,
}

impl DirEntry {
    pub fn new_directory(name: &str, now: i64) -> Self {
        DirEntry {
            name: name.to_string(),
            size: 0,
            permissions: Permissions::default(),
            creation_time: now,
            modification_time: now,
            password: String::new(),
            start_block: FAT_EOC,
            attribute: ATTR_DIRECTORY,
        }
    }

    pub fn new_file(name: &str, size: u32, start_block: u16, now: i64) -> Self {
        DirEntry {
            name: name.to_string(),
            size,
            permissions: Permissions::default(),
            creation_time: now,
            modification_time: now,
            password: String::new(),
            start_block,
            attribute: ATTR_FILE,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attribute & ATTR_DIRECTORY != 0
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub enum Node {
    Directory { entry: DirEntry, children: Vec<NodeId> },
    File { entry: DirEntry },
}

impl Node {
    fn new(entry: DirEntry) -> Self {
        if entry.is_directory() {
            Node::Directory {
                entry,
                children: Vec::new(),
            }
        } else {
            Node::File { entry }
        }
    }

    pub fn entry(&self) -> &DirEntry {
        match self {
            Node::Directory { entry, .. } | Node::File { entry } => entry,
        }
    }

    fn entry_mut(&mut self) -> &mut DirEntry {
        match self {
            Node::Directory { entry, .. } | Node::File { entry } => entry,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            Node::Directory { .. } => EntryKind::Directory,
            Node::File { .. } => EntryKind::File,
        }
    }

    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Directory { children, .. } => children,
            Node::File { .. } => &[],
        }
    }
}

/// Splits a path into its non-empty segments.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Splits a path into its parent directory path and final name.
pub fn split_parent(path: &str) -> Result<(String, String), FileSystemError> {
    let mut parts = segments(path);
    let name = parts
        .pop()
        .ok_or_else(|| FileSystemError::InvalidName(path.to_string()))?;
    validate_name(name)?;
    Ok((format!("/{}", parts.join("/")), name.to_string()))
}

pub fn validate_name(name: &str) -> Result<(), FileSystemError> {
    if name.is_empty() || name.contains('/') || name.len() > MAX_FILENAME_LENGTH {
        return Err(FileSystemError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Option<Node>>,
    free_slots: Vec<usize>,
    root: NodeId,
}

impl Tree {
    pub fn new(root: DirEntry) -> Self {
        Tree {
            nodes: vec![Some(Node::new(root))],
            free_slots: Vec::new(),
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0]
            .as_ref()
            .expect("node id refers to a removed node")
    }

    pub fn entry(&self, id: NodeId) -> &DirEntry {
        self.node(id).entry()
    }

    pub fn entry_mut(&mut self, id: NodeId) -> &mut DirEntry {
        self.nodes[id.0]
            .as_mut()
            .expect("node id refers to a removed node")
            .entry_mut()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .find(|&child| self.entry(child).name == name)
    }

    /// Walks the tree from the root. Every segment but the last has to be
    /// a directory; the last may be either kind.
    pub fn resolve(&self, path: &str) -> Result<NodeId, FileSystemError> {
        let parts = segments(path);
        let mut current = self.root;
        for (i, part) in parts.iter().enumerate() {
            let child = self
                .find_child(current, part)
                .ok_or_else(|| FileSystemError::NotFound(path.to_string()))?;
            if i + 1 < parts.len() && self.node(child).kind() != EntryKind::Directory {
                return Err(FileSystemError::NotFound(path.to_string()));
            }
            current = child;
        }
        Ok(current)
    }

    /// Resolves a path that has to name a directory.
    pub fn resolve_directory(&self, path: &str) -> Result<NodeId, FileSystemError> {
        let id = self.resolve(path)?;
        match self.node(id).kind() {
            EntryKind::Directory => Ok(id),
            EntryKind::File => Err(FileSystemError::not_a_directory(path)),
        }
    }

    pub fn create_child(&mut self, parent: NodeId, entry: DirEntry) -> Result<NodeId, FileSystemError> {
        if self.node(parent).kind() != EntryKind::Directory {
            return Err(FileSystemError::not_a_directory(&self.entry(parent).name));
        }
        if self.find_child(parent, &entry.name).is_some() {
            return Err(FileSystemError::AlreadyExists(entry.name));
        }

        let node = Some(Node::new(entry));
        let id = match self.free_slots.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                NodeId(slot)
            }
            None => {
                self.nodes.push(node);
                NodeId(self.nodes.len() - 1)
            }
        };

        if let Some(Node::Directory { children, .. }) = self.nodes[parent.0].as_mut() {
            children.push(id);
        }
        Ok(id)
    }

    /// Detaches the named child and everything below it. Returns the
    /// entries of every removed node, the child itself first.
    pub fn remove_child(
        &mut self,
        parent: NodeId,
        name: &str,
        expected: EntryKind,
    ) -> Result<Vec<DirEntry>, FileSystemError> {
        let child = self
            .find_child(parent, name)
            .ok_or_else(|| FileSystemError::NotFound(name.to_string()))?;
        if self.node(child).kind() != expected {
            return Err(match expected {
                EntryKind::Directory => FileSystemError::not_a_directory(name),
                EntryKind::File => FileSystemError::not_a_file(name),
            });
        }

        if let Some(Node::Directory { children, .. }) = self.nodes[parent.0].as_mut() {
            children.retain(|&c| c != child);
        }

        let mut removed = Vec::new();
        for id in self.preorder(child) {
            if let Some(node) = self.nodes[id.0].take() {
                removed.push(node.entry().clone());
                self.free_slots.push(id.0);
            }
        }
        Ok(removed)
    }

    /// Sum of the sizes of the immediate file children. Subdirectories
    /// are not descended into.
    pub fn directory_size(&self, id: NodeId) -> u32 {
        self.children(id)
            .iter()
            .map(|&c| self.node(c))
            .filter(|n| n.kind() == EntryKind::File)
            .fold(0u32, |acc, n| acc.saturating_add(n.entry().size))
    }

    pub fn refresh_directory_size(&mut self, id: NodeId) {
        let size = self.directory_size(id);
        self.entry_mut(id).size = size;
    }

    /// `id` and all of its descendants, depth-first.
    pub fn preorder(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        order
    }

    /// Every file below the root with its full path, depth-first.
    pub fn files(&self) -> Vec<(String, NodeId)> {
        self.files_under(self.root, "")
    }

    /// Every file below `dir`, whose own path is `prefix`.
    pub fn files_under(&self, dir: NodeId, prefix: &str) -> Vec<(String, NodeId)> {
        self.paths_under(dir, prefix)
            .into_iter()
            .filter(|&(_, id)| self.node(id).kind() == EntryKind::File)
            .collect()
    }

    /// Every directory with its full path, root (`/`) first.
    pub fn directories(&self) -> Vec<(String, NodeId)> {
        let mut dirs = vec![("/".to_string(), self.root)];
        dirs.extend(
            self.paths_under(self.root, "")
                .into_iter()
                .filter(|&(_, id)| self.node(id).kind() == EntryKind::Directory),
        );
        dirs
    }

    fn paths_under(&self, dir: NodeId, prefix: &str) -> Vec<(String, NodeId)> {
        let mut out = Vec::new();
        self.collect_paths(dir, prefix.trim_end_matches('/'), &mut out);
        out
    }

    fn collect_paths(&self, dir: NodeId, prefix: &str, out: &mut Vec<(String, NodeId)>) {
        for &child in self.children(dir) {
            let path = format!("{}/{}", prefix, self.entry(child).name);
            out.push((path.clone(), child));
            if self.node(child).kind() == EntryKind::Directory {
                self.collect_paths(child, &path, out);
            }
        }
    }

    pub fn count_files(&self) -> usize {
        self.preorder(self.root)
            .into_iter()
            .filter(|&id| self.node(id).kind() == EntryKind::File)
            .count()
    }

    /// Directory count, root included.
    pub fn count_directories(&self) -> usize {
        self.preorder(self.root)
            .into_iter()
            .filter(|&id| self.node(id).kind() == EntryKind::Directory)
            .count()
    }

    fn same_subtree(&self, id: NodeId, other: &Tree, other_id: NodeId) -> bool {
        let (a, b) = (self.children(id), other.children(other_id));
        self.entry(id) == other.entry(other_id)
            && self.node(id).kind() == other.node(other_id).kind()
            && a.len() == b.len()
            && a.iter()
                .zip(b)
                .all(|(&x, &y)| self.same_subtree(x, other, y))
    }
}

/// Structural equality; arena slot numbering is ignored.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.same_subtree(self.root, other, other.root)
    }
}
