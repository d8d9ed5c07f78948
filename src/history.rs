//! Undo/redo journal over tree mutations.
//!
//! All user-level edits (move, copy, delete, new directory, rename, import)
//! go through a [`History`], which performs them on the tree and records
//! enough to walk back and forth along a linear journal. Conflicts (name
//! collisions, bad names, missing items) are reported as values, not
//! errors, so a caller can offer per-item choices; conflicting items are
//! skipped and the rest of a batch still runs.
//!
//! The journal addresses items by path from the root. It is only valid
//! against the tree it was built against: after the image is written or
//! reloaded the tree is rebuilt and the journal must be cleared.

use std::path::{Path, PathBuf};

use log::warn;

use crate::import;
use crate::names;
use crate::tree::{DirEdge, DirId, FileNode, FileRef, FsTree};

/// Path of an item in the tree: parent directory names, then the item name.
pub type ItemPath = Vec<String>;

/// Why an item in a batch could not be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// The destination name is already taken.
    Exists(ItemPath),
    /// The name is not representable in the filesystem.
    InvalidName(String),
    /// The destination's parent directory does not exist.
    MissingParent(ItemPath),
    /// The source item does not exist.
    MissingSource(ItemPath),
    /// A directory cannot be moved or copied into its own subtree.
    IntoSelf(ItemPath),
}

// A detached tree item held for undo/redo.
#[derive(Debug, Clone)]
enum Detached {
    File(FileNode),
    Dir(DirEdge),
}

#[derive(Debug, Clone)]
struct DeletedItem {
    path: ItemPath,
    item: Detached,
}

#[derive(Debug)]
enum Action {
    Move(Vec<(ItemPath, ItemPath)>),
    Copy {
        pairs: Vec<(ItemPath, ItemPath)>,
        // Destination items captured while undone, for reattachment on redo.
        undone: Vec<DeletedItem>,
    },
    Delete(Vec<DeletedItem>),
    NewDir(ItemPath),
    Rename {
        path: ItemPath,
        new_name: String,
    },
    Import {
        dir_path: ItemPath,
        names: Vec<String>,
        undone: Vec<DeletedItem>,
    },
}

/// Linear edit journal.
#[derive(Debug, Default)]
pub struct History {
    actions: Vec<Action>,
    pos: usize,
}

fn split(path: &[String]) -> Option<(&[String], &str)> {
    let (name, parents) = path.split_last()?;
    Some((parents, name))
}

fn detach(tree: &mut FsTree, path: &[String]) -> Option<(DirId, Detached)> {
    let (parents, name) = split(path)?;
    let dir = tree.dir_by_path(parents)?;
    if let Some(file) = tree.remove_file(dir, name) {
        return Some((dir, Detached::File(file)));
    }
    tree.remove_dir(dir, name).map(|e| (dir, Detached::Dir(e)))
}

fn attach(tree: &mut FsTree, parent: DirId, item: Detached) {
    match item {
        Detached::File(file) => tree.node_mut(parent).files.push(file),
        Detached::Dir(edge) => tree.attach_dir(parent, edge),
    }
}

// `prefix` names a directory; is `path` inside it (or equal)?
fn is_self_or_descendant(prefix: &[String], path: &[String]) -> bool {
    path.len() >= prefix.len() && &path[..prefix.len()] == prefix
}

impl History {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether there is an action to undo.
    pub fn can_undo(&self) -> bool {
        self.pos > 0
    }

    /// Whether there is an action to redo.
    pub fn can_redo(&self) -> bool {
        self.pos < self.actions.len()
    }

    /// Drops the whole journal. Call after the tree has been rebuilt from
    /// the image.
    pub fn clear(&mut self) {
        self.actions.clear();
        self.pos = 0;
    }

    fn record(&mut self, action: Action) {
        self.actions.truncate(self.pos);
        self.actions.push(action);
        self.pos = self.actions.len();
    }

    /// Moves items. Each pair is `(source_path, destination_path)`; the
    /// destination path includes the item's (possibly new) name. Returns
    /// the conflicts for items that were skipped.
    pub fn move_items(
        &mut self,
        tree: &mut FsTree,
        moves: &[(ItemPath, ItemPath)],
    ) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        let mut performed = Vec::new();
        for (src, dest) in moves {
            match self.move_one(tree, src, dest) {
                Ok(()) => performed.push((src.clone(), dest.clone())),
                Err(c) => conflicts.push(c),
            }
        }
        if !performed.is_empty() {
            self.record(Action::Move(performed));
        }
        conflicts
    }

    fn move_one(
        &mut self,
        tree: &mut FsTree,
        src: &[String],
        dest: &[String],
    ) -> Result<(), Conflict> {
        let (dest_parents, dest_name) = split(dest).ok_or_else(|| Conflict::MissingParent(dest.to_vec()))?;
        if !names::valid_name(dest_name) {
            return Err(Conflict::InvalidName(dest_name.to_string()));
        }
        if is_self_or_descendant(src, dest_parents) {
            return Err(Conflict::IntoSelf(src.to_vec()));
        }
        let dest_dir = tree
            .dir_by_path(dest_parents)
            .ok_or_else(|| Conflict::MissingParent(dest.to_vec()))?;
        if tree.contains_name(dest_dir, dest_name) {
            return Err(Conflict::Exists(dest.to_vec()));
        }
        let (_, mut item) = detach(tree, src).ok_or_else(|| Conflict::MissingSource(src.to_vec()))?;
        match &mut item {
            Detached::File(f) => f.name = dest_name.to_string(),
            Detached::Dir(e) => e.name = dest_name.to_string(),
        }
        // Resolve again: detaching may not invalidate ids, but the
        // destination could be the same directory the item left.
        let dest_dir = match tree.dir_by_path(dest_parents) {
            Some(d) => d,
            None => dest_dir,
        };
        attach(tree, dest_dir, item);
        Ok(())
    }

    /// Copies items. Each pair is `(source_path, destination_path)`.
    /// Directory sources are deep-copied. Returns skipped items' conflicts.
    pub fn copy_items(
        &mut self,
        tree: &mut FsTree,
        copies: &[(ItemPath, ItemPath)],
    ) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        let mut performed = Vec::new();
        for (src, dest) in copies {
            match copy_one(tree, src, dest) {
                Ok(()) => performed.push((src.clone(), dest.clone())),
                Err(c) => conflicts.push(c),
            }
        }
        if !performed.is_empty() {
            self.record(Action::Copy {
                pairs: performed,
                undone: Vec::new(),
            });
        }
        conflicts
    }

    /// Deletes items. Returns conflicts for paths that did not resolve.
    pub fn delete(&mut self, tree: &mut FsTree, paths: &[ItemPath]) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        let mut deleted = Vec::new();
        for path in paths {
            match detach(tree, path) {
                Some((_, item)) => deleted.push(DeletedItem {
                    path: path.clone(),
                    item,
                }),
                None => conflicts.push(Conflict::MissingSource(path.clone())),
            }
        }
        if !deleted.is_empty() {
            self.record(Action::Delete(deleted));
        }
        conflicts
    }

    /// Creates an empty directory at `path`.
    pub fn new_dir(&mut self, tree: &mut FsTree, path: &[String]) -> Option<Conflict> {
        let (parents, name) = match split(path) {
            Some(x) => x,
            None => return Some(Conflict::MissingParent(path.to_vec())),
        };
        if !names::valid_name(name) {
            return Some(Conflict::InvalidName(name.to_string()));
        }
        let parent = match tree.dir_by_path(parents) {
            Some(d) => d,
            None => return Some(Conflict::MissingParent(path.to_vec())),
        };
        if tree.contains_name(parent, name) {
            return Some(Conflict::Exists(path.to_vec()));
        }
        tree.add_dir(parent, name.to_string());
        self.record(Action::NewDir(path.to_vec()));
        None
    }

    /// Renames the item at `path` to `new_name` within its directory.
    pub fn rename(
        &mut self,
        tree: &mut FsTree,
        path: &[String],
        new_name: &str,
    ) -> Option<Conflict> {
        let (parents, old_name) = match split(path) {
            Some(x) => x,
            None => return Some(Conflict::MissingSource(path.to_vec())),
        };
        if !names::valid_name(new_name) {
            return Some(Conflict::InvalidName(new_name.to_string()));
        }
        let dir = match tree.dir_by_path(parents) {
            Some(d) => d,
            None => return Some(Conflict::MissingSource(path.to_vec())),
        };
        if new_name != old_name && tree.contains_name(dir, new_name) {
            let mut dest = parents.to_vec();
            dest.push(new_name.to_string());
            return Some(Conflict::Exists(dest));
        }
        if !tree.rename(dir, old_name, new_name) {
            return Some(Conflict::MissingSource(path.to_vec()));
        }
        self.record(Action::Rename {
            path: path.to_vec(),
            new_name: new_name.to_string(),
        });
        None
    }

    /// Imports real files into the directory at `dir_path`, named after
    /// their file names. Returns skipped items' conflicts.
    pub fn import_files(
        &mut self,
        tree: &mut FsTree,
        dir_path: &[String],
        files: &[PathBuf],
    ) -> Vec<Conflict> {
        let dir = match tree.dir_by_path(dir_path) {
            Some(d) => d,
            None => return vec![Conflict::MissingParent(dir_path.to_vec())],
        };
        let mut conflicts = Vec::new();
        let mut added = Vec::new();
        for path in files {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) if names::valid_name(n) => n.to_string(),
                _ => {
                    conflicts.push(Conflict::InvalidName(path.to_string_lossy().into_owned()));
                    continue;
                }
            };
            if tree.contains_name(dir, &name) {
                let mut p = dir_path.to_vec();
                p.push(name);
                conflicts.push(Conflict::Exists(p));
                continue;
            }
            tree.add_file(dir, name.clone(), FileRef::Imported(path.clone()));
            added.push(name);
        }
        if !added.is_empty() {
            self.record(Action::Import {
                dir_path: dir_path.to_vec(),
                names: added,
                undone: Vec::new(),
            });
        }
        conflicts
    }

    /// Imports a real directory as a new subdirectory `name` of the
    /// directory at `dir_path`.
    ///
    /// # Errors
    ///
    /// I/O failures and unrepresentable names inside the imported tree
    /// surface as errors; collisions at the attach point come back as a
    /// [`Conflict`].
    pub fn import_dir(
        &mut self,
        tree: &mut FsTree,
        dir_path: &[String],
        source: &Path,
        name: &str,
    ) -> crate::error::Result<Option<Conflict>> {
        if !names::valid_name(name) {
            return Ok(Some(Conflict::InvalidName(name.to_string())));
        }
        let dir = match tree.dir_by_path(dir_path) {
            Some(d) => d,
            None => return Ok(Some(Conflict::MissingParent(dir_path.to_vec()))),
        };
        if tree.contains_name(dir, name) {
            let mut p = dir_path.to_vec();
            p.push(name.to_string());
            return Ok(Some(Conflict::Exists(p)));
        }
        let fragment = import::tree_from_dir(source)?;
        import::attach_fragment(tree, dir, name.to_string(), &fragment);
        self.record(Action::Import {
            dir_path: dir_path.to_vec(),
            names: vec![name.to_string()],
            undone: Vec::new(),
        });
        Ok(None)
    }

    /// Undoes the most recent action, if any.
    pub fn undo(&mut self, tree: &mut FsTree) {
        if self.pos == 0 {
            return;
        }
        self.pos -= 1;
        match &mut self.actions[self.pos] {
            Action::Move(pairs) => {
                for (src, dest) in pairs.iter().rev() {
                    move_back(tree, dest, src);
                }
            }
            Action::Copy { pairs, undone } => {
                for (_, dest) in pairs.iter().rev() {
                    match detach(tree, dest) {
                        Some((_, item)) => undone.push(DeletedItem {
                            path: dest.clone(),
                            item,
                        }),
                        None => warn!("undo: copy destination {:?} missing", dest),
                    }
                }
            }
            Action::Delete(items) => {
                for deleted in items.iter().rev() {
                    reattach(tree, deleted);
                }
            }
            Action::NewDir(path) => {
                if detach(tree, path).is_none() {
                    warn!("undo: new directory {:?} missing", path);
                }
            }
            Action::Rename { path, new_name } => {
                if let Some((parents, old_name)) = split(path) {
                    if let Some(dir) = tree.dir_by_path(parents) {
                        tree.rename(dir, new_name, old_name);
                    }
                }
            }
            Action::Import {
                dir_path,
                names,
                undone,
            } => {
                for name in names.iter().rev() {
                    let mut path = dir_path.clone();
                    path.push(name.clone());
                    match detach(tree, &path) {
                        Some((_, item)) => undone.push(DeletedItem { path, item }),
                        None => warn!("undo: imported item {:?} missing", name),
                    }
                }
            }
        }
    }

    /// Redoes the most recently undone action, if any.
    pub fn redo(&mut self, tree: &mut FsTree) {
        if self.pos >= self.actions.len() {
            return;
        }
        match &mut self.actions[self.pos] {
            Action::Move(pairs) => {
                for (src, dest) in pairs.iter() {
                    move_back(tree, src, dest);
                }
            }
            Action::Copy { undone, .. } | Action::Import { undone, .. } => {
                for deleted in undone.drain(..).rev() {
                    reattach(tree, &deleted);
                }
            }
            Action::Delete(items) => {
                for deleted in items.iter_mut() {
                    if let Some((_, item)) = detach(tree, &deleted.path) {
                        deleted.item = item;
                    } else {
                        warn!("redo: deleted item {:?} missing", deleted.path);
                    }
                }
            }
            Action::NewDir(path) => {
                if let Some((parents, name)) = split(path) {
                    if let Some(parent) = tree.dir_by_path(parents) {
                        tree.add_dir(parent, name.to_string());
                    }
                }
            }
            Action::Rename { path, new_name } => {
                if let Some((parents, old_name)) = split(path) {
                    if let Some(dir) = tree.dir_by_path(parents) {
                        tree.rename(dir, old_name, new_name);
                    }
                }
            }
        }
        self.pos += 1;
    }
}

fn reattach(tree: &mut FsTree, deleted: &DeletedItem) {
    if let Some((parents, _)) = split(&deleted.path) {
        match tree.dir_by_path(parents) {
            Some(parent) => attach(tree, parent, deleted.item.clone()),
            None => warn!("cannot restore {:?}: parent missing", deleted.path),
        }
    }
}

// Bare move used by undo/redo: no conflict checking, renames to the
// destination's last component.
fn move_back(tree: &mut FsTree, from: &[String], to: &[String]) {
    let (item, dest_name) = match (detach(tree, from), split(to)) {
        (Some((_, item)), Some((_, name))) => (item, name.to_string()),
        _ => {
            warn!("history replay: cannot move {:?} to {:?}", from, to);
            return;
        }
    };
    let mut item = item;
    match &mut item {
        Detached::File(f) => f.name = dest_name,
        Detached::Dir(e) => e.name = dest_name,
    }
    if let Some((parents, _)) = split(to) {
        match tree.dir_by_path(parents) {
            Some(parent) => attach(tree, parent, item),
            None => warn!("history replay: parent of {:?} missing", to),
        }
    }
}

fn copy_one(tree: &mut FsTree, src: &[String], dest: &[String]) -> Result<(), Conflict> {
    let (dest_parents, dest_name) = split(dest).ok_or_else(|| Conflict::MissingParent(dest.to_vec()))?;
    if !names::valid_name(dest_name) {
        return Err(Conflict::InvalidName(dest_name.to_string()));
    }
    if is_self_or_descendant(src, dest_parents) {
        return Err(Conflict::IntoSelf(src.to_vec()));
    }
    let dest_dir = tree
        .dir_by_path(dest_parents)
        .ok_or_else(|| Conflict::MissingParent(dest.to_vec()))?;
    if tree.contains_name(dest_dir, dest_name) {
        return Err(Conflict::Exists(dest.to_vec()));
    }
    let (src_parents, src_name) = split(src).ok_or_else(|| Conflict::MissingSource(src.to_vec()))?;
    let src_dir = tree
        .dir_by_path(src_parents)
        .ok_or_else(|| Conflict::MissingSource(src.to_vec()))?;
    if let Some(file) = tree
        .node(src_dir)
        .files
        .iter()
        .find(|f| f.name == src_name)
        .cloned()
    {
        tree.add_file(dest_dir, dest_name.to_string(), file.file);
        return Ok(());
    }
    let src_node = tree
        .node(src_dir)
        .dirs
        .iter()
        .find(|d| d.name == src_name)
        .map(|d| d.node)
        .ok_or_else(|| Conflict::MissingSource(src.to_vec()))?;
    let copy = tree.clone_subtree(src_node);
    tree.attach_dir(
        dest_dir,
        DirEdge {
            name: dest_name.to_string(),
            index: None,
            node: copy,
        },
    );
    Ok(())
}
