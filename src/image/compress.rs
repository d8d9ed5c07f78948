//! Image compaction and fixed-size restoration.
//!
//! Images of this format routinely carry huge free spans between the string
//! table and the file data, plus holes opened by deletions. A quick
//! compress plans in-image relocations only: each file is moved into the
//! earliest free gap that fits it and lies before its current position,
//! then the right-most file is pulled in against the end of the previous
//! one. The plan never stages data outside the image; realizing it reuses
//! the write algorithm's relocation path. Space vacated by a planned move
//! is not reoffered as a gap within the same plan; it is reclaimed on the
//! next write.
//!
//! Decompression restores the standard fixed image size, compressing first
//! if the data does not fit.

use std::cmp::Reverse;

use log::debug;

use super::layout::{self, align4};
use super::{alloc, build_tree, GcFs};
use crate::error::{FsError, Result, WriteError};
use crate::names;
use crate::progress::{Cancelled, CopyController, ProgressFn};
use crate::tree::{DirId, FileRef};

use super::write::WriteOutcome;

/// How a compress or decompress run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressOutcome {
    /// The image was modified.
    Changed,
    /// There was nothing to reclaim; the image was not touched.
    NoChanges,
    /// The run was cancelled; the image is unchanged and planned
    /// relocations were discarded.
    Cancelled(Cancelled),
}

struct PlannedFile {
    dir: DirId,
    file_idx: usize,
    entry_idx: usize,
    pos: u64,
    size: u64,
}

struct QuickPlan {
    changed: bool,
    orig_size: u64,
    new_size: u64,
}

impl GcFs {
    // Plans a quick compress by rewriting tree file references to
    // relocation markers. Returns None if the tree has no on-disk files.
    fn quick_compress_plan(&mut self) -> Result<Option<QuickPlan>> {
        let mut files = Vec::new();
        for dir in self.tree.reachable() {
            for (file_idx, file) in self.tree.node(dir).files.iter().enumerate() {
                let (entry_idx, pos) = match file.file {
                    FileRef::OnDisk(i) => match self.entries.get(i) {
                        Some(e) => (i, e.start as u64),
                        None => return Err(FsError::NoSuchEntry(i)),
                    },
                    FileRef::Relocated { index, new_start } => (index, new_start),
                    // Imported files have no on-disk position to reclaim.
                    FileRef::Imported(_) => continue,
                };
                let size = self.entries.get(entry_idx).map_or(0, |e| e.size as u64);
                files.push(PlannedFile {
                    dir,
                    file_idx,
                    entry_idx,
                    pos,
                    size,
                });
            }
        }
        if files.is_empty() {
            return Ok(None);
        }
        files.sort_by_key(|f| Reverse(f.pos));
        let orig_size = files[0].pos + files[0].size;

        // End of the string table, computed from the loaded names rather
        // than fst_size, which may carry padding.
        let mut names_end = 0u64;
        for (e, name) in self.entries.iter().zip(&self.names) {
            names_end = names_end.max(e.name_offset as u64 + names::encoded_len(name)? as u64);
        }
        let data_start = self.str_start + names_end;

        let occupied: Vec<(u64, u64)> = files.iter().map(|f| (f.pos, f.size)).collect();
        let mut gaps = alloc::free_gaps(data_start, &occupied);

        // Repeatedly move files into earlier gaps until a full pass makes
        // no progress. Vacated ranges are deliberately not added back.
        let mut changed = false;
        let mut pass_changed = true;
        while pass_changed {
            pass_changed = false;
            for f in files.iter_mut() {
                let found = gaps
                    .iter()
                    .position(|g| g.len >= f.size && g.start < f.pos);
                if let Some(gi) = found {
                    let gap = gaps[gi];
                    self.tree.node_mut(f.dir).files[f.file_idx].file = FileRef::Relocated {
                        index: f.entry_idx,
                        new_start: gap.start,
                    };
                    f.pos = gap.start;
                    let gap_end = gap.start + gap.len;
                    let rest = align4(gap.start + f.size);
                    if rest < gap_end {
                        gaps[gi] = alloc::Gap {
                            start: rest,
                            len: gap_end - rest,
                        };
                    } else {
                        gaps.remove(gi);
                    }
                    pass_changed = true;
                    changed = true;
                }
            }
            files.sort_by_key(|f| Reverse(f.pos));
        }

        // Pull the right-most file in against the end of the previous one.
        // Safe even when the ranges overlap: data only moves earlier.
        let prev_end = if files.len() > 1 {
            files[1].pos + files[1].size
        } else {
            data_start
        };
        let start = align4(prev_end);
        if files[0].pos > start {
            let f = &mut files[0];
            self.tree.node_mut(f.dir).files[f.file_idx].file = FileRef::Relocated {
                index: f.entry_idx,
                new_start: start,
            };
            f.pos = start;
            changed = true;
        }
        let new_size = files[0].pos + files[0].size;
        debug!(
            "quick compress plan: changed={}, {:#x} -> {:#x}",
            changed, orig_size, new_size
        );
        Ok(Some(QuickPlan {
            changed,
            orig_size,
            new_size,
        }))
    }

    /// Removes free space from the image, shrinking it.
    ///
    /// Any unwritten tree edits are discarded first; write them before
    /// compressing if you want to keep them.
    ///
    /// # Errors
    ///
    /// As for [`GcFs::write`]; on a handled error or a cancel the planned
    /// relocations are discarded and the image is unchanged.
    pub fn compress(
        &mut self,
        ctl: &CopyController,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> std::result::Result<CompressOutcome, WriteError> {
        self.tree = build_tree(&self.entries, &self.names);
        let plan = self.quick_compress_plan().map_err(WriteError::handled)?;
        if !plan.is_some_and(|p| p.changed) {
            return Ok(CompressOutcome::NoChanges);
        }
        self.realize_plan(ctl, progress)
    }

    // Writes out a tree that already carries relocation markers.
    fn realize_plan(
        &mut self,
        ctl: &CopyController,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> std::result::Result<CompressOutcome, WriteError> {
        match self.write(None, ctl, progress) {
            Ok(WriteOutcome::Written) => Ok(CompressOutcome::Changed),
            Ok(WriteOutcome::NoChanges) => Ok(CompressOutcome::NoChanges),
            Ok(WriteOutcome::Cancelled(c)) => {
                self.tree = build_tree(&self.entries, &self.names);
                Ok(CompressOutcome::Cancelled(c))
            }
            Err(e) => {
                if e.is_handled() {
                    self.tree = build_tree(&self.entries, &self.names);
                }
                Err(e)
            }
        }
    }

    /// Resizes the image to the standard single-layer size
    /// ([`layout::FULL_IMAGE_SIZE`]).
    ///
    /// If the file data currently extends past that size, a compress is
    /// attempted first; if even compressed data would not fit, this fails
    /// with a handled [`FsError::TooLarge`] and changes nothing.
    pub fn decompress(
        &mut self,
        ctl: &CopyController,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> std::result::Result<CompressOutcome, WriteError> {
        let target = layout::FULL_IMAGE_SIZE;
        let size = self
            .entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.start as u64 + e.size as u64)
            .max()
            .unwrap_or(0);
        if size > target {
            let plan = self.quick_compress_plan().map_err(WriteError::handled)?;
            if let Some(p) = &plan {
                debug!(
                    "decompress needs compression: {:#x} -> {:#x} (target {:#x})",
                    p.orig_size, p.new_size, target
                );
            }
            let fits = plan.as_ref().is_some_and(|p| p.changed && p.new_size <= target);
            if !fits {
                self.tree = build_tree(&self.entries, &self.names);
                return Err(WriteError::handled(FsError::TooLarge { size, target }));
            }
            if let CompressOutcome::Cancelled(c) = self.realize_plan(ctl, progress)? {
                return Ok(CompressOutcome::Cancelled(c));
            }
        } else if size == target {
            return Ok(CompressOutcome::NoChanges);
        }
        let img = self.open_rw().map_err(WriteError::handled)?;
        img.set_len(target)
            .map_err(|e| WriteError::handled(e.into()))?;
        debug!("image resized to {:#x} bytes", target);
        Ok(CompressOutcome::Changed)
    }
}
