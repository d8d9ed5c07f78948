//! In-memory filesystem tree.
//!
//! The tree is an arena: every directory is a [`DirNode`] stored in a flat
//! `Vec`, addressed by [`DirId`]. Edits manipulate the arena and never touch
//! the disc image; the image writer later flattens the tree back into an
//! entry table. Detached nodes are left in the arena as garbage until the
//! tree is rebuilt from the table after a successful write.
//!
//! Files carry a [`FileRef`] saying where their data lives right now: still
//! at its original place in the image, in a real file waiting to be
//! imported, or already relocated to a new offset within the image.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Handle to a directory node in a [`FsTree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirId(pub(crate) usize);

/// Where a file's data currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileRef {
    /// Data is at its original location in the image; the value is the
    /// file's index into the loaded entry list.
    OnDisk(usize),
    /// Data is in a real file that has not been written to the image yet.
    Imported(PathBuf),
    /// Data originally at entry `index` has been moved within the image to
    /// `new_start`, but the entry table does not say so yet.
    Relocated {
        /// Index into the loaded entry list for the original entry.
        index: usize,
        /// The data's current offset in the image.
        new_start: u64,
    },
}

/// A file in a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// The file's name.
    pub name: String,
    /// Where the file's data lives.
    pub file: FileRef,
}

/// A child-directory edge.
#[derive(Debug, Clone)]
pub struct DirEdge {
    /// The directory's name.
    pub name: String,
    /// Index into the loaded entry list, or `None` for a directory created
    /// since the last write.
    pub index: Option<usize>,
    /// The child node.
    pub node: DirId,
}

/// A directory's contents.
#[derive(Debug, Clone, Default)]
pub struct DirNode {
    /// Files in this directory, in insertion order.
    pub files: Vec<FileNode>,
    /// Subdirectories, in insertion order.
    pub dirs: Vec<DirEdge>,
}

/// Key into the size map produced by [`FsTree::size_map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeKey {
    /// The whole tree.
    Root,
    /// A directory and everything under it.
    Dir(DirId),
    /// One file, addressed as the `n`th file of a directory.
    File(DirId, usize),
}

/// One slot of a flattened tree, in entry-table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlatItem {
    /// A directory entry.
    Dir {
        /// The directory's name.
        name: String,
        /// Entry-table index of the parent directory (0 is the root).
        parent_index: u32,
        /// Entry-table index of the first entry after this directory's
        /// subtree.
        next_index: u32,
    },
    /// A file entry.
    File {
        /// The file's name.
        name: String,
        /// Where the file's data lives.
        file: FileRef,
    },
}

impl FlatItem {
    /// The item's name.
    pub fn name(&self) -> &str {
        match self {
            FlatItem::Dir { name, .. } | FlatItem::File { name, .. } => name,
        }
    }
}

/// Arena-backed directory tree.
#[derive(Debug, Clone)]
pub struct FsTree {
    nodes: Vec<DirNode>,
    root: DirId,
}

impl Default for FsTree {
    fn default() -> Self {
        Self::new()
    }
}

impl FsTree {
    /// Creates a tree with an empty root.
    pub fn new() -> Self {
        Self {
            nodes: vec![DirNode::default()],
            root: DirId(0),
        }
    }

    /// The root directory.
    pub fn root(&self) -> DirId {
        self.root
    }

    /// Shared access to a directory node.
    pub fn node(&self, id: DirId) -> &DirNode {
        &self.nodes[id.0]
    }

    /// Mutable access to a directory node.
    pub fn node_mut(&mut self, id: DirId) -> &mut DirNode {
        &mut self.nodes[id.0]
    }

    fn alloc(&mut self) -> DirId {
        self.nodes.push(DirNode::default());
        DirId(self.nodes.len() - 1)
    }

    /// Builds a tree from a loaded entry table.
    ///
    /// `is_dir` and `next_index` describe each entry by list index (the
    /// root entry is excluded, so list index `i` is table index `i + 1`);
    /// for directories, `next_index` is the table index of the first entry
    /// after the subtree.
    pub fn from_entries<F, G, N>(count: usize, is_dir: F, next_index: G, name: N) -> Self
    where
        F: Fn(usize) -> bool,
        G: Fn(usize) -> usize,
        N: Fn(usize) -> String,
    {
        let mut tree = Self::new();
        let root = tree.root;
        tree.build_range(root, 0, count, &is_dir, &next_index, &name);
        tree
    }

    fn build_range<F, G, N>(
        &mut self,
        parent: DirId,
        start: usize,
        end: usize,
        is_dir: &F,
        next_index: &G,
        name: &N,
    ) where
        F: Fn(usize) -> bool,
        G: Fn(usize) -> usize,
        N: Fn(usize) -> String,
    {
        let mut i = start;
        while i < end {
            if is_dir(i) {
                // The subtree occupies list indices [i + 1, next - 1).
                let sub_end = next_index(i) - 1;
                let child = self.alloc();
                self.nodes[parent.0].dirs.push(DirEdge {
                    name: name(i),
                    index: Some(i),
                    node: child,
                });
                self.build_range(child, i + 1, sub_end, is_dir, next_index, name);
                i = sub_end;
            } else {
                self.nodes[parent.0].files.push(FileNode {
                    name: name(i),
                    file: FileRef::OnDisk(i),
                });
                i += 1;
            }
        }
    }

    /// Number of entries (files and directories) reachable from the root,
    /// excluding the root itself.
    pub fn count(&self) -> usize {
        let mut n = 0;
        for id in self.reachable() {
            let node = &self.nodes[id.0];
            n += node.files.len() + node.dirs.len();
        }
        n
    }

    /// Directory ids reachable from the root, root first.
    pub fn reachable(&self) -> Vec<DirId> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        let mut seen = HashSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            for edge in &self.nodes[id.0].dirs {
                stack.push(edge.node);
            }
        }
        out
    }

    /// Runs `f` over every reachable file, allowing its [`FileRef`] to be
    /// rewritten in place.
    pub fn for_each_file_mut<F: FnMut(&mut FileNode)>(&mut self, mut f: F) {
        for id in self.reachable() {
            for file in &mut self.nodes[id.0].files {
                f(file);
            }
        }
    }

    /// Resolves a directory path from the root. The empty path is the root.
    pub fn dir_by_path<S: AsRef<str>>(&self, path: &[S]) -> Option<DirId> {
        let mut id = self.root;
        for name in path {
            let name = name.as_ref();
            id = self.nodes[id.0]
                .dirs
                .iter()
                .find(|e| e.name == name)?
                .node;
        }
        Some(id)
    }

    /// Whether a directory already has a child (file or directory) with
    /// this name.
    pub fn contains_name(&self, dir: DirId, name: &str) -> bool {
        let node = &self.nodes[dir.0];
        node.files.iter().any(|f| f.name == name) || node.dirs.iter().any(|d| d.name == name)
    }

    /// Adds an empty directory and returns its id.
    pub fn add_dir(&mut self, parent: DirId, name: String) -> DirId {
        let child = self.alloc();
        self.nodes[parent.0].dirs.push(DirEdge {
            name,
            index: None,
            node: child,
        });
        child
    }

    /// Adds a file.
    pub fn add_file(&mut self, parent: DirId, name: String, file: FileRef) {
        self.nodes[parent.0].files.push(FileNode { name, file });
    }

    /// Removes a file by name, returning it.
    pub fn remove_file(&mut self, dir: DirId, name: &str) -> Option<FileNode> {
        let node = &mut self.nodes[dir.0];
        let pos = node.files.iter().position(|f| f.name == name)?;
        Some(node.files.remove(pos))
    }

    /// Detaches a child directory by name, returning its edge. The subtree
    /// stays in the arena and can be reattached with [`FsTree::attach_dir`].
    pub fn remove_dir(&mut self, dir: DirId, name: &str) -> Option<DirEdge> {
        let node = &mut self.nodes[dir.0];
        let pos = node.dirs.iter().position(|d| d.name == name)?;
        Some(node.dirs.remove(pos))
    }

    /// Reattaches a previously detached directory edge.
    pub fn attach_dir(&mut self, parent: DirId, edge: DirEdge) {
        self.nodes[parent.0].dirs.push(edge);
    }

    /// Deep-copies the subtree rooted at `src` into fresh arena nodes and
    /// returns the copy's root.
    pub fn clone_subtree(&mut self, src: DirId) -> DirId {
        let copy = self.alloc();
        let files = self.nodes[src.0].files.clone();
        self.nodes[copy.0].files = files;
        let edges: Vec<(String, Option<usize>, DirId)> = self.nodes[src.0]
            .dirs
            .iter()
            .map(|e| (e.name.clone(), e.index, e.node))
            .collect();
        for (name, index, node) in edges {
            let child = self.clone_subtree(node);
            self.nodes[copy.0].dirs.push(DirEdge {
                name,
                index,
                node: child,
            });
        }
        copy
    }

    /// Renames a child (file or directory). Returns false if no child has
    /// the old name.
    pub fn rename(&mut self, dir: DirId, from: &str, to: &str) -> bool {
        let node = &mut self.nodes[dir.0];
        if let Some(f) = node.files.iter_mut().find(|f| f.name == from) {
            f.name = to.to_string();
            return true;
        }
        if let Some(d) = node.dirs.iter_mut().find(|d| d.name == from) {
            d.name = to.to_string();
            return true;
        }
        false
    }

    /// Flattens the tree into entry-table order: children of each directory
    /// sorted case-insensitively by name, directories recursed depth-first.
    /// Slot `i` of the result is table index `i + 1`.
    pub fn flatten(&self) -> Vec<FlatItem> {
        let mut out = Vec::new();
        self.flatten_dir(self.root, 0, &mut out);
        out
    }

    fn flatten_dir(&self, dir: DirId, parent_index: u32, out: &mut Vec<FlatItem>) {
        let node = &self.nodes[dir.0];
        enum Child<'a> {
            Dir(&'a DirEdge),
            File(&'a FileNode),
        }
        let mut children: Vec<Child<'_>> = node
            .dirs
            .iter()
            .map(Child::Dir)
            .chain(node.files.iter().map(Child::File))
            .collect();
        children.sort_by_key(|c| match c {
            Child::Dir(e) => (e.name.to_uppercase(), false),
            Child::File(f) => (f.name.to_uppercase(), true),
        });
        for child in children {
            match child {
                Child::Dir(edge) => {
                    let my_index = out.len() as u32 + 1;
                    out.push(FlatItem::Dir {
                        name: edge.name.clone(),
                        parent_index,
                        next_index: 0,
                    });
                    let slot = out.len() - 1;
                    self.flatten_dir(edge.node, my_index, out);
                    let next = out.len() as u32 + 1;
                    if let FlatItem::Dir { next_index, .. } = &mut out[slot] {
                        *next_index = next;
                    }
                }
                Child::File(file) => {
                    out.push(FlatItem::File {
                        name: file.name.clone(),
                        file: file.file.clone(),
                    });
                }
            }
        }
    }

    /// Computes the size of everything in the tree: each file, each
    /// directory (recursively), and the whole tree. `file_size` resolves a
    /// [`FileRef`] to its current data size.
    pub fn size_map<F: Fn(&FileRef) -> u64>(&self, file_size: F) -> HashMap<SizeKey, u64> {
        let mut map = HashMap::new();
        let total = self.dir_size(self.root, &file_size, &mut map);
        map.insert(SizeKey::Root, total);
        map
    }

    fn dir_size<F: Fn(&FileRef) -> u64>(
        &self,
        dir: DirId,
        file_size: &F,
        map: &mut HashMap<SizeKey, u64>,
    ) -> u64 {
        if let Some(&cached) = map.get(&SizeKey::Dir(dir)) {
            return cached;
        }
        let node = &self.nodes[dir.0];
        let mut total = 0;
        for (i, file) in node.files.iter().enumerate() {
            let size = file_size(&file.file);
            map.insert(SizeKey::File(dir, i), size);
            total += size;
        }
        // Collect first so the recursion doesn't hold a borrow of the node.
        let edges: Vec<DirId> = node.dirs.iter().map(|e| e.node).collect();
        for child in edges {
            total += self.dir_size(child, file_size, map);
        }
        map.insert(SizeKey::Dir(dir), total);
        total
    }

    /// Structural equality against another tree: same names, same order,
    /// same file references, ignoring arena node numbering.
    pub fn same_shape(&self, other: &FsTree) -> bool {
        self.dirs_equal(self.root, other, other.root)
    }

    fn dirs_equal(&self, a: DirId, other: &FsTree, b: DirId) -> bool {
        let na = &self.nodes[a.0];
        let nb = &other.nodes[b.0];
        if na.files != nb.files {
            return false;
        }
        if na.dirs.len() != nb.dirs.len() {
            return false;
        }
        na.dirs.iter().zip(&nb.dirs).all(|(ea, eb)| {
            ea.name == eb.name && ea.index == eb.index && self.dirs_equal(ea.node, other, eb.node)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Table layout (list indices):
    //   0: dir "sound" (next = 4, so children are 1..3)
    //   1:   file "bgm.adp"
    //   2:   file "se.adp"
    //   3: file "game.dol"
    fn sample_tree() -> FsTree {
        let names = ["sound", "bgm.adp", "se.adp", "game.dol"];
        FsTree::from_entries(
            4,
            |i| i == 0,
            |i| if i == 0 { 4 } else { 0 },
            |i| names[i].to_string(),
        )
    }

    #[test]
    fn test_from_entries_shape() {
        let tree = sample_tree();
        let root = tree.node(tree.root());
        assert_eq!(root.dirs.len(), 1);
        assert_eq!(root.files.len(), 1);
        assert_eq!(root.dirs[0].name, "sound");
        assert_eq!(root.dirs[0].index, Some(0));
        assert_eq!(root.files[0].name, "game.dol");
        assert_eq!(root.files[0].file, FileRef::OnDisk(3));
        let sound = tree.node(root.dirs[0].node);
        assert_eq!(sound.files.len(), 2);
        assert_eq!(sound.files[0].file, FileRef::OnDisk(1));
        assert_eq!(tree.count(), 4);
    }

    #[test]
    fn test_flatten_sorts_case_insensitively() {
        let mut tree = FsTree::new();
        let root = tree.root();
        tree.add_file(root, "zz.bin".into(), FileRef::OnDisk(0));
        tree.add_file(root, "AA.bin".into(), FileRef::OnDisk(1));
        tree.add_file(root, "mm.bin".into(), FileRef::OnDisk(2));
        let flat = tree.flatten();
        let names: Vec<&str> = flat.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["AA.bin", "mm.bin", "zz.bin"]);
    }

    #[test]
    fn test_flatten_dir_indices() {
        let tree = sample_tree();
        let flat = tree.flatten();
        // "game.dol" < "sound", so the dir lands at table index 2 with its
        // two children after it.
        assert_eq!(flat[0].name(), "game.dol");
        assert_eq!(
            flat[1],
            FlatItem::Dir {
                name: "sound".into(),
                parent_index: 0,
                next_index: 5,
            }
        );
        assert_eq!(flat[2].name(), "bgm.adp");
        assert_eq!(flat[3].name(), "se.adp");
    }

    #[test]
    fn test_nested_dir_parent_and_next() {
        let mut tree = FsTree::new();
        let root = tree.root();
        let a = tree.add_dir(root, "a".into());
        let b = tree.add_dir(a, "b".into());
        tree.add_file(b, "deep.bin".into(), FileRef::OnDisk(0));
        tree.add_file(root, "z.bin".into(), FileRef::OnDisk(1));
        let flat = tree.flatten();
        assert_eq!(
            flat[0],
            FlatItem::Dir {
                name: "a".into(),
                parent_index: 0,
                next_index: 4,
            }
        );
        assert_eq!(
            flat[1],
            FlatItem::Dir {
                name: "b".into(),
                parent_index: 1,
                next_index: 4,
            }
        );
        assert_eq!(flat[2].name(), "deep.bin");
        assert_eq!(flat[3].name(), "z.bin");
    }

    #[test]
    fn test_dir_by_path_and_contains() {
        let tree = sample_tree();
        let sound = tree.dir_by_path(&["sound"]).unwrap();
        assert!(tree.contains_name(sound, "bgm.adp"));
        assert!(!tree.contains_name(sound, "game.dol"));
        assert!(tree.dir_by_path(&["video"]).is_none());
        assert_eq!(tree.dir_by_path::<&str>(&[]).unwrap(), tree.root());
    }

    #[test]
    fn test_remove_and_attach_roundtrip() {
        let mut tree = sample_tree();
        let root = tree.root();
        let pristine = tree.clone();
        let edge = tree.remove_dir(root, "sound").unwrap();
        assert!(!tree.same_shape(&pristine));
        assert_eq!(tree.count(), 1);
        tree.attach_dir(root, edge);
        assert!(tree.same_shape(&pristine));
    }

    #[test]
    fn test_clone_subtree_is_independent() {
        let mut tree = sample_tree();
        let root = tree.root();
        let sound = tree.dir_by_path(&["sound"]).unwrap();
        let copy = tree.clone_subtree(sound);
        tree.attach_dir(root, DirEdge {
            name: "sound2".into(),
            index: None,
            node: copy,
        });
        tree.remove_file(copy, "bgm.adp").unwrap();
        assert!(tree.contains_name(sound, "bgm.adp"));
        assert!(!tree.contains_name(copy, "bgm.adp"));
        assert_eq!(tree.count(), 6);
    }

    #[test]
    fn test_size_map() {
        let tree = sample_tree();
        let sizes = tree.size_map(|f| match f {
            FileRef::OnDisk(1) => 100,
            FileRef::OnDisk(2) => 30,
            FileRef::OnDisk(3) => 5000,
            _ => 0,
        });
        let sound = tree.dir_by_path(&["sound"]).unwrap();
        assert_eq!(sizes[&SizeKey::Dir(sound)], 130);
        assert_eq!(sizes[&SizeKey::Root], 5130);
        assert_eq!(sizes[&SizeKey::File(sound, 0)], 100);
    }

    #[test]
    fn test_rename() {
        let mut tree = sample_tree();
        let root = tree.root();
        assert!(tree.rename(root, "game.dol", "main.dol"));
        assert!(tree.contains_name(root, "main.dol"));
        assert!(tree.rename(root, "sound", "audio"));
        assert!(tree.dir_by_path(&["audio"]).is_some());
        assert!(!tree.rename(root, "nope", "x"));
    }
}
