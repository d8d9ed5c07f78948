//! The write algorithm: reconciling the in-memory tree to the image.
//!
//! A write flattens the tree into a new entry table, relocates files that
//! were planned to move, evacuates files that the grown table would
//! overwrite, allocates space for imported files, copies data in two phases
//! split by overlap safety, then commits the table in one pass. Until the
//! commit, the on-disk table is untouched: everything written before it
//! lands in free space, so an early failure or cancel leaves a fully
//! consistent image.
//!
//! Errors carry the handled flag from [`WriteError`]: handled means the
//! image and tree are exactly as before the call; anything else means the
//! caller must reload before further mutation.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::layout::{self, Entry};
use super::{alloc, build_tree, GcFs};
use crate::copy::{copy_files, CopyJob, CopyOptions, CopyOutcome, CopySource, Location};
use crate::error::{FsError, WriteError};
use crate::names;
use crate::progress::{Cancelled, CopyController, ProgressFn};
use crate::tree::{FileRef, FlatItem};

/// How a write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The tree was written to the image; engine state is refreshed.
    Written,
    /// The tree had no unwritten edits; the image was not touched.
    NoChanges,
    /// The write was cancelled. [`Cancelled::Safe`] means the image is
    /// untouched and the tree still holds its edits; [`Cancelled::Forced`]
    /// during the dirty phase may have left the image inconsistent.
    Cancelled(Cancelled),
}

struct OldFile {
    slot: usize,
    start: u64,
    size: u64,
}

struct NewFile {
    slot: usize,
    path: PathBuf,
    size: u64,
}

struct MovingFile {
    slot: usize,
    old_start: u64,
    new_start: u64,
    size: u64,
}

impl GcFs {
    /// Writes all tree edits to the image.
    ///
    /// `tmp_dir` is where evacuated files are staged (system default when
    /// `None`); it needs enough free space for every file that currently
    /// sits where the new table will be. The controller and `progress`
    /// work as in the bulk copy engine; plain cancellation is granted in
    /// every phase up to the point where referenced data starts being
    /// overwritten.
    ///
    /// # Errors
    ///
    /// A [`WriteError`] with the handled flag set means the image and tree
    /// are untouched. Without it, the image may be inconsistent and the
    /// engine must be reloaded before further mutation.
    pub fn write(
        &mut self,
        tmp_dir: Option<&Path>,
        ctl: &CopyController,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> std::result::Result<WriteOutcome, WriteError> {
        if !self.changed() {
            return Ok(WriteOutcome::NoChanges);
        }

        // Step 1: flatten the tree and lay out the new string table.
        let flat = self.tree.flatten();
        let mut name_offsets = Vec::with_capacity(flat.len());
        let mut str_bytes = Vec::new();
        for item in &flat {
            name_offsets.push(str_bytes.len() as u32);
            let enc = names::encode(item.name()).map_err(WriteError::handled)?;
            str_bytes.extend_from_slice(&enc);
            str_bytes.push(0);
        }
        let n = flat.len() as u64;
        let fst_size = (n + 1) * layout::ENTRY_SIZE + str_bytes.len() as u64;
        let data_start = self.fs_start + fst_size;

        // Classify every file slot by where its data is now.
        let mut old_files = Vec::new();
        let mut new_files = Vec::new();
        let mut moving = Vec::new();
        for (slot, item) in flat.iter().enumerate() {
            let file = match item {
                FlatItem::File { file, .. } => file,
                FlatItem::Dir { .. } => continue,
            };
            match file {
                FileRef::OnDisk(i) => {
                    let e = self
                        .entries
                        .get(*i)
                        .ok_or_else(|| WriteError::handled(FsError::NoSuchEntry(*i)))?;
                    old_files.push(OldFile {
                        slot,
                        start: e.start as u64,
                        size: e.size as u64,
                    });
                }
                FileRef::Imported(path) => {
                    let meta = std::fs::metadata(path)
                        .map_err(|e| WriteError::handled(FsError::Io(e)))?;
                    if !meta.is_file() {
                        return Err(WriteError::handled(FsError::NotAFile(path.clone())));
                    }
                    new_files.push(NewFile {
                        slot,
                        path: path.clone(),
                        size: meta.len(),
                    });
                }
                FileRef::Relocated { index, new_start } => {
                    let e = self
                        .entries
                        .get(*index)
                        .ok_or_else(|| WriteError::handled(FsError::NoSuchEntry(*index)))?;
                    moving.push(MovingFile {
                        slot,
                        old_start: e.start as u64,
                        new_start: *new_start,
                        size: e.size as u64,
                    });
                }
            }
        }

        // Once relocated, moving files are obstacles at their new offsets.
        let after_move: Vec<OldFile> = old_files
            .iter()
            .map(|o| OldFile {
                slot: o.slot,
                start: o.start,
                size: o.size,
            })
            .chain(moving.iter().map(|m| OldFile {
                slot: m.slot,
                start: m.new_start,
                size: m.size,
            }))
            .collect();
        let (evacuate, keep): (Vec<&OldFile>, Vec<&OldFile>) =
            after_move.iter().partition(|o| o.start < data_start);

        let moving_bytes: u64 = moving.iter().map(|m| m.size).sum();
        let evac_bytes: u64 = evacuate.iter().map(|o| o.size).sum();
        let import_bytes: u64 = new_files.iter().map(|f| f.size).sum();
        let total = moving_bytes + evac_bytes * 2 + import_bytes;

        let mut img = self.open_rw().map_err(WriteError::handled)?;
        let orig_len = img
            .metadata()
            .map_err(|e| WriteError::handled(e.into()))?
            .len();
        // Shrink back to the original length; a no-op unless the image was
        // speculatively grown.
        let restore = |img: &File| {
            if let Err(e) = img.set_len(orig_len) {
                warn!("could not restore image length: {}", e);
            }
        };

        // Step 3: relocate moving files inside the image.
        if !moving.is_empty() {
            let needed = moving.iter().map(|m| m.new_start + m.size).max().unwrap_or(0);
            if needed > orig_len {
                img.set_len(needed)
                    .map_err(|e| WriteError::handled(e.into()))?;
            }
            let jobs: Vec<CopyJob> = moving
                .iter()
                .map(|m| CopyJob {
                    source: CopySource {
                        location: Location::Image { start: m.old_start },
                        size: Some(m.size),
                    },
                    dests: vec![Location::Image {
                        start: m.new_start,
                    }],
                    name: flat[m.slot].name().to_string(),
                })
                .collect();
            let opts = self.copy_opts(true, 0, total);
            match copy_files(Some(&mut img), &jobs, &opts, ctl, progress.as_deref_mut()) {
                Ok(CopyOutcome::Done { failed }) if failed.is_empty() => {}
                Ok(CopyOutcome::Done { failed }) => {
                    restore(&img);
                    let name = flat[moving[failed[0]].slot].name().to_string();
                    return Err(WriteError::handled(FsError::CopyFailed(name)));
                }
                Ok(CopyOutcome::Cancelled(c)) => {
                    restore(&img);
                    return Ok(WriteOutcome::Cancelled(c));
                }
                Err(e) => {
                    restore(&img);
                    return Err(WriteError::handled(e));
                }
            }
        }

        // Step 4: evacuate files overlapping the new table region to
        // temporary storage. Failures here are not flagged handled.
        let tmp = if evacuate.is_empty() {
            None
        } else {
            let tmp = match tmp_dir {
                Some(d) => tempfile::tempdir_in(d),
                None => tempfile::tempdir(),
            };
            let tmp = match tmp {
                Ok(t) => t,
                Err(e) => {
                    restore(&img);
                    return Err(WriteError::handled(e.into()));
                }
            };
            debug!(
                "evacuating {} files to {}",
                evacuate.len(),
                tmp.path().display()
            );
            let mut jobs = Vec::with_capacity(evacuate.len());
            let mut staged = Vec::with_capacity(evacuate.len());
            for (k, o) in evacuate.iter().enumerate() {
                let path = tmp.path().join(format!("{:04}.tmp", k));
                jobs.push(CopyJob {
                    source: CopySource {
                        location: Location::Image { start: o.start },
                        size: Some(o.size),
                    },
                    dests: vec![Location::Path {
                        path: path.clone(),
                        start: 0,
                    }],
                    name: flat[o.slot].name().to_string(),
                });
                staged.push(NewFile {
                    slot: o.slot,
                    path,
                    size: o.size,
                });
            }
            let opts = self.copy_opts(true, moving_bytes, total);
            match copy_files(Some(&mut img), &jobs, &opts, ctl, progress.as_deref_mut()) {
                Ok(CopyOutcome::Done { failed }) if failed.is_empty() => {}
                Ok(CopyOutcome::Done { failed }) => {
                    restore(&img);
                    return Err(WriteError::unhandled(FsError::CopyFailed(
                        jobs[failed[0]].name.clone(),
                    )));
                }
                Ok(CopyOutcome::Cancelled(c)) => {
                    restore(&img);
                    return Ok(WriteOutcome::Cancelled(c));
                }
                Err(e) => {
                    restore(&img);
                    return Err(WriteError::unhandled(e));
                }
            }
            new_files.extend(staged);
            Some(tmp)
        };

        // Step 5: place new files (imports + evacuees).
        let keep_ranges: Vec<(u64, u64)> = keep.iter().map(|o| (o.start, o.size)).collect();
        let sizes: Vec<(usize, u64)> = new_files.iter().map(|f| (f.slot, f.size)).collect();
        let (placements, data_end) = alloc::allocate(data_start, &keep_ranges, &sizes);
        let place_by_slot: HashMap<usize, u64> =
            placements.iter().map(|p| (p.item, p.start)).collect();

        if data_end > orig_len {
            if let Err(e) = img.set_len(data_end) {
                restore(&img);
                return Err(WriteError::handled(e.into()));
            }
        }

        // Step 6: copy new data, clean placements before dirty ones. Dirty
        // means the destination overlaps a file range of the table as it
        // was when this call started.
        let orig_ranges: Vec<(u64, u64)> = self
            .entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| (e.start as u64, e.size as u64))
            .collect();
        let overlaps_original = |start: u64, size: u64| {
            orig_ranges
                .iter()
                .any(|&(s, len)| start < s + len && s < start + size)
        };
        let mut clean = Vec::new();
        let mut dirty = Vec::new();
        for f in &new_files {
            let dest = place_by_slot[&f.slot];
            let job = CopyJob {
                source: CopySource {
                    location: Location::Path {
                        path: f.path.clone(),
                        start: 0,
                    },
                    size: Some(f.size),
                },
                dests: vec![Location::Image { start: dest }],
                name: flat[f.slot].name().to_string(),
            };
            if overlaps_original(dest, f.size) {
                dirty.push(job);
            } else {
                clean.push(job);
            }
        }
        let clean_bytes: u64 = clean
            .iter()
            .map(|j| j.source.size.unwrap_or(0))
            .sum();

        let opts = self.copy_opts(true, moving_bytes + evac_bytes, total);
        match copy_files(Some(&mut img), &clean, &opts, ctl, progress.as_deref_mut()) {
            Ok(CopyOutcome::Done { failed }) if failed.is_empty() => {}
            Ok(CopyOutcome::Done { failed }) => {
                restore(&img);
                return Err(WriteError::handled(FsError::CopyFailed(
                    clean[failed[0]].name.clone(),
                )));
            }
            Ok(CopyOutcome::Cancelled(c)) => {
                restore(&img);
                return Ok(WriteOutcome::Cancelled(c));
            }
            Err(e) => {
                restore(&img);
                return Err(WriteError::handled(e));
            }
        }

        if !dirty.is_empty() {
            debug!("dirty phase: {} files overwrite replaced data", dirty.len());
            let opts = self.copy_opts(false, moving_bytes + evac_bytes + clean_bytes, total);
            match copy_files(Some(&mut img), &dirty, &opts, ctl, progress.as_deref_mut()) {
                Ok(CopyOutcome::Done { failed }) if failed.is_empty() => {}
                Ok(CopyOutcome::Done { failed }) => {
                    return Err(WriteError::unhandled(FsError::CopyFailed(
                        dirty[failed[0]].name.clone(),
                    )));
                }
                // Only a force-cancel gets through here; replaced data may
                // be partially overwritten.
                Ok(CopyOutcome::Cancelled(c)) => return Ok(WriteOutcome::Cancelled(c)),
                Err(e) => return Err(WriteError::unhandled(e)),
            }
        }

        // Step 7: commit the new table.
        let mut slot_place: HashMap<usize, (u64, u64)> = HashMap::new();
        for o in &after_move {
            if place_by_slot.contains_key(&o.slot) {
                continue;
            }
            slot_place.insert(o.slot, (o.start, o.size));
        }
        for f in &new_files {
            slot_place.insert(f.slot, (place_by_slot[&f.slot], f.size));
        }

        let mut new_entries = Vec::with_capacity(flat.len());
        for (slot, item) in flat.iter().enumerate() {
            let entry = match item {
                FlatItem::Dir {
                    parent_index,
                    next_index,
                    ..
                } => Entry {
                    is_dir: true,
                    name_offset: name_offsets[slot],
                    start: *parent_index,
                    size: *next_index,
                },
                FlatItem::File { .. } => {
                    let (start, size) = slot_place[&slot];
                    Entry {
                        is_dir: false,
                        name_offset: name_offsets[slot],
                        start: start as u32,
                        size: size as u32,
                    }
                }
            };
            new_entries.push(entry);
        }

        self.commit_table(&mut img, &new_entries, &str_bytes, fst_size)
            .map_err(WriteError::unhandled)?;

        // Truncate if the image shrank.
        let extent = new_entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.start as u64 + e.size as u64)
            .max()
            .unwrap_or(0)
            .max(self.fs_start + fst_size);
        let cur_len = img
            .metadata()
            .map_err(|e| WriteError::unhandled(e.into()))?
            .len();
        if cur_len > extent {
            img.set_len(extent)
                .map_err(|e| WriteError::unhandled(e.into()))?;
        }

        // Refresh engine state from what was just written.
        self.fst_size = fst_size;
        self.num_entries = flat.len() as u32 + 1;
        self.str_start = self.fs_start + self.num_entries as u64 * layout::ENTRY_SIZE;
        self.names = flat.iter().map(|i| i.name().to_string()).collect();
        self.entries = new_entries;
        self.tree = build_tree(&self.entries, &self.names);
        drop(tmp);
        debug!(
            "wrote {} entries, table {:#x} bytes, data ends at {:#x}",
            self.num_entries, self.fst_size, extent
        );
        Ok(WriteOutcome::Written)
    }

    fn copy_opts(&self, allow_cancel: bool, offset: u64, total: u64) -> CopyOptions {
        CopyOptions {
            overwrite: true,
            allow_cancel,
            block_size: self.options.block_size,
            pause_wait: self.options.pause_wait,
            progress_offset: offset,
            progress_total: Some(total),
        }
    }

    fn commit_table(
        &self,
        img: &mut File,
        entries: &[Entry],
        str_bytes: &[u8],
        fst_size: u64,
    ) -> crate::error::Result<()> {
        use crate::binio;
        binio::write_u32(img, layout::OFF_FST_SIZE, fst_size as u32)?;
        let root = Entry {
            is_dir: true,
            name_offset: 0,
            start: 0,
            size: entries.len() as u32 + 1,
        };
        let mut table = Vec::with_capacity((entries.len() + 1) * 12 + str_bytes.len());
        table.extend_from_slice(&root.encode());
        for e in entries {
            table.extend_from_slice(&e.encode());
        }
        table.extend_from_slice(str_bytes);
        binio::write_bytes(img, self.fs_start, &table)?;
        Ok(())
    }
}
