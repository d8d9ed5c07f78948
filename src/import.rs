//! Importing real-filesystem directories into the tree.
//!
//! A directory on disk is turned into a standalone tree fragment whose file
//! references all point at real paths. Every name in the fragment is
//! validated before the fragment is handed back, so a caller can merge it
//! into a live tree without re-checking.

use std::path::Path;

use log::warn;

use crate::error::{FsError, Result};
use crate::names;
use crate::tree::{DirId, FileRef, FsTree};

/// Builds a tree fragment from a real directory.
///
/// The fragment's root corresponds to `path` itself; files reference their
/// real paths and are copied into the image on the next write.
///
/// # Errors
///
/// Fails with [`FsError::InvalidName`] if any name in the subtree is not
/// representable in the filesystem. A directory that cannot be listed
/// becomes an empty node.
pub fn tree_from_dir(path: &Path) -> Result<FsTree> {
    let mut tree = FsTree::new();
    let root = tree.root();
    fill_from_dir(&mut tree, root, path)?;
    Ok(tree)
}

fn fill_from_dir(tree: &mut FsTree, dir: DirId, path: &Path) -> Result<()> {
    let listing = match std::fs::read_dir(path) {
        Ok(l) => l,
        Err(e) => {
            warn!("cannot list '{}': {}", path.display(), e);
            return Ok(());
        }
    };
    let mut items: Vec<(String, std::path::PathBuf, bool)> = Vec::new();
    for entry in listing {
        let entry = entry?;
        let name = entry
            .file_name()
            .into_string()
            .map_err(|os| FsError::InvalidName(os.to_string_lossy().into_owned()))?;
        if !names::valid_name(&name) {
            return Err(FsError::InvalidName(name));
        }
        let is_dir = entry.file_type()?.is_dir();
        items.push((name, entry.path(), is_dir));
    }
    // Directory listing order is platform-dependent.
    items.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, child_path, is_dir) in items {
        if is_dir {
            let child = tree.add_dir(dir, name);
            fill_from_dir(tree, child, &child_path)?;
        } else {
            // Anything that is not a directory is treated as a file; a
            // non-regular file fails later, when its data is copied.
            tree.add_file(dir, name, FileRef::Imported(child_path));
        }
    }
    Ok(())
}

/// Deep-copies a fragment's contents into `tree` as a new directory `name`
/// under `parent`, returning the new directory's id.
///
/// The caller is responsible for conflict checking; this blindly attaches.
pub fn attach_fragment(
    tree: &mut FsTree,
    parent: DirId,
    name: String,
    fragment: &FsTree,
) -> DirId {
    let dest = tree.add_dir(parent, name);
    copy_nodes(tree, dest, fragment, fragment.root());
    dest
}

fn copy_nodes(tree: &mut FsTree, dest: DirId, fragment: &FsTree, src: DirId) {
    let node = fragment.node(src);
    for file in &node.files {
        tree.add_file(dest, file.name.clone(), file.file.clone());
    }
    for edge in &node.dirs {
        let child = tree.add_dir(dest, edge.name.clone());
        copy_nodes(tree, child, fragment, edge.node);
    }
}
