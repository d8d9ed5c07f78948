//! The filesystem engine.
//!
//! [`GcFs`] owns the parsed entry table, string table and in-memory tree
//! for one disc image. Loading reads and sanity-checks the whole table;
//! edits happen on the tree only; [`GcFs::write`] reconciles the tree back
//! to the image. The image file itself is opened per operation, never held
//! open across calls.

pub mod alloc;
pub mod compress;
pub mod layout;
pub mod write;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use log::debug;

use crate::binio;
use crate::config::FsOptions;
use crate::copy::{copy_files, CopyJob, CopyOptions, CopyOutcome, CopySource, Location};
use crate::error::{FsError, Result};
use crate::names;
use crate::progress::{Cancelled, CopyController, ProgressFn};
use crate::tree::{DirId, FileRef, FsTree, SizeKey};

use layout::Entry;

/// Fixed-offset header fields of a disc image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscInfo {
    /// 4-character game code.
    pub code: String,
    /// Disc version byte.
    pub version: u8,
    /// Game name from the header.
    pub name: String,
    /// Apploader version string.
    pub apploader_version: String,
}

/// Decoded fields of an `opening.bnr` banner file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BnrInfo {
    /// Raw banner image data.
    pub img: Vec<u8>,
    /// Short game name.
    pub name: String,
    /// Short developer name.
    pub developer: String,
    /// Full game name.
    pub full_name: String,
    /// Full developer name.
    pub full_developer: String,
    /// Game description.
    pub description: String,
}

/// What to extract: an on-disk entry, a tree directory, or the whole tree.
#[derive(Debug, Clone, Copy)]
pub enum ExtractItem {
    /// A file entry by its index into [`GcFs::entries`].
    Index(usize),
    /// A directory of the current tree, extracted recursively.
    Dir(DirId),
    /// The tree root.
    Root,
}

/// How an extraction run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// All items were attempted; `failed` holds `(name, destination)` of
    /// the ones that could not be written.
    Done {
        /// Items that failed.
        failed: Vec<(String, PathBuf)>,
    },
    /// The run was cancelled.
    Cancelled(Cancelled),
}

/// Filesystem engine for one disc image.
#[derive(Debug)]
pub struct GcFs {
    pub(crate) path: PathBuf,
    pub(crate) options: FsOptions,
    pub(crate) fs_start: u64,
    pub(crate) fst_size: u64,
    pub(crate) num_entries: u32,
    pub(crate) str_start: u64,
    pub(crate) entries: Vec<Entry>,
    pub(crate) names: Vec<String>,
    pub(crate) tree: FsTree,
}

struct Table {
    fs_start: u64,
    fst_size: u64,
    num_entries: u32,
    str_start: u64,
    entries: Vec<Entry>,
    names: Vec<String>,
}

fn invalid(msg: &str) -> FsError {
    FsError::InvalidDisk(msg.to_string())
}

fn load_table(f: &mut File, opts: &FsOptions) -> Result<Table> {
    let magic = binio::read_u32(f, layout::OFF_MAGIC).map_err(|_| invalid("image too small"))?;
    if magic != layout::DVD_MAGIC {
        return Err(invalid("DVD magic word missing"));
    }
    let fs_start = binio::read_u32(f, layout::OFF_FS_START)? as u64;
    let fst_size = binio::read_u32(f, layout::OFF_FST_SIZE)? as u64;
    let file_len = f.metadata()?.len();
    if opts.sanity_checks {
        if !(layout::MIN_FS_START..=layout::MAX_FS_START).contains(&fs_start) {
            return Err(invalid("implausible filesystem start offset"));
        }
        if fst_size > layout::MAX_FST_SIZE {
            return Err(invalid("implausible filesystem table size"));
        }
        if fs_start + fst_size > file_len {
            return Err(invalid("filesystem table runs past end of image"));
        }
    }
    let num_entries = binio::read_u32(f, fs_start + 0x8).map_err(|_| invalid("truncated table"))?;
    if opts.sanity_checks {
        if num_entries == 0 {
            return Err(invalid("filesystem has no entries"));
        }
        if num_entries > layout::MAX_ENTRIES {
            return Err(invalid("implausible entry count"));
        }
        if fst_size < num_entries as u64 * layout::ENTRY_SIZE {
            return Err(invalid("entry table larger than filesystem table"));
        }
    }
    let str_start = fs_start + num_entries as u64 * layout::ENTRY_SIZE;
    let str_end = fs_start + fst_size;
    let mut entries = Vec::with_capacity(num_entries.saturating_sub(1) as usize);
    let mut table_names = Vec::with_capacity(entries.capacity());
    for i in 1..num_entries as u64 {
        let raw = binio::read_bytes(f, fs_start + i * layout::ENTRY_SIZE, 12)?;
        let raw: [u8; 12] = raw
            .try_into()
            .map_err(|_| invalid("truncated entry table"))?;
        let entry = Entry::decode(&raw);
        if opts.sanity_checks {
            let name_pos = str_start + entry.name_offset as u64;
            if name_pos >= str_end {
                return Err(invalid("entry name outside string table"));
            }
            if entry.is_dir {
                if entry.start as u64 >= num_entries as u64 {
                    return Err(invalid("directory parent out of range"));
                }
                // The subtree end must lie strictly after the entry itself,
                // or rebuilding the tree would walk a negative range.
                if entry.size as u64 <= i {
                    return Err(invalid("directory subtree end before entry"));
                }
                if entry.size as u64 > num_entries as u64 {
                    return Err(invalid("directory subtree end out of range"));
                }
            }
        }
        let raw_name = binio::read_until_nul(
            f,
            str_start + entry.name_offset as u64,
            layout::MAX_NAME_LEN,
        )?;
        if opts.sanity_checks && raw_name.len() >= layout::MAX_NAME_LEN {
            return Err(invalid("entry name too long"));
        }
        table_names.push(names::decode(&raw_name)?);
        entries.push(entry);
    }
    Ok(Table {
        fs_start,
        fst_size,
        num_entries,
        str_start,
        entries,
        names: table_names,
    })
}

fn build_tree(entries: &[Entry], table_names: &[String]) -> FsTree {
    FsTree::from_entries(
        entries.len(),
        |i| entries[i].is_dir,
        |i| entries[i].size as usize,
        |i| table_names[i].clone(),
    )
}

impl GcFs {
    /// Loads the filesystem table of the image at `path`.
    ///
    /// # Errors
    ///
    /// Fails with [`FsError::InvalidDisk`] if the image fails a format or
    /// sanity check, or with an I/O error if it cannot be read.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_options(path, FsOptions::default())
    }

    /// Loads the image with explicit options.
    pub fn with_options<P: AsRef<Path>>(path: P, options: FsOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut f = File::open(&path)?;
        let table = load_table(&mut f, &options)?;
        let tree = build_tree(&table.entries, &table.names);
        debug!(
            "loaded '{}': {} entries, table at {:#x}+{:#x}",
            path.display(),
            table.num_entries,
            table.fs_start,
            table.fst_size
        );
        Ok(Self {
            path,
            options,
            fs_start: table.fs_start,
            fst_size: table.fst_size,
            num_entries: table.num_entries,
            str_start: table.str_start,
            entries: table.entries,
            names: table.names,
            tree,
        })
    }

    /// The image's path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The loaded entry table, excluding the implicit root. List index `i`
    /// is table index `i + 1`.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Entry names, indexed like [`GcFs::entries`].
    pub fn entry_names(&self) -> &[String] {
        &self.names
    }

    /// The in-memory tree.
    pub fn tree(&self) -> &FsTree {
        &self.tree
    }

    /// Mutable access to the tree. Edits only touch memory until
    /// [`GcFs::write`] is called.
    pub fn tree_mut(&mut self) -> &mut FsTree {
        &mut self.tree
    }

    /// Re-reads the table from disk, discarding all unwritten tree edits.
    ///
    /// On error the engine is left unchanged.
    pub fn update(&mut self) -> Result<()> {
        let mut f = File::open(&self.path)?;
        let table = load_table(&mut f, &self.options)?;
        self.tree = build_tree(&table.entries, &table.names);
        self.fs_start = table.fs_start;
        self.fst_size = table.fst_size;
        self.num_entries = table.num_entries;
        self.str_start = table.str_start;
        self.entries = table.entries;
        self.names = table.names;
        Ok(())
    }

    /// Whether the tree has unwritten edits.
    pub fn changed(&self) -> bool {
        !self.tree.same_shape(&build_tree(&self.entries, &self.names))
    }

    /// Whether the table on disk differs from the one loaded. This is an
    /// advisory staleness probe, not a lock; it does not modify cached
    /// state.
    pub fn disk_changed(&self) -> Result<bool> {
        let mut f = File::open(&self.path)?;
        let table = match load_table(&mut f, &self.options) {
            Ok(t) => t,
            // An image that no longer parses has certainly changed.
            Err(FsError::InvalidDisk(_)) => return Ok(true),
            Err(e) => return Err(e),
        };
        Ok(table.fs_start != self.fs_start
            || table.fst_size != self.fst_size
            || table.entries != self.entries
            || table.names != self.names)
    }

    /// Reads the fixed header fields.
    pub fn info(&self) -> Result<DiscInfo> {
        let mut f = File::open(&self.path)?;
        let code = binio::read_bytes(&mut f, layout::OFF_GAME_CODE, 4)?;
        let version = binio::read_u8(&mut f, layout::OFF_VERSION)?;
        let raw_name =
            binio::read_until_nul(&mut f, layout::OFF_GAME_NAME, layout::MAX_GAME_NAME)?;
        let apploader = binio::read_until_nul(
            &mut f,
            layout::APPLOADER_START,
            layout::APPLOADER_VERSION_LEN,
        )?;
        Ok(DiscInfo {
            code: names::decode_lossy(&code),
            version,
            name: names::decode_lossy(&raw_name),
            apploader_version: names::decode_lossy(&apploader),
        })
    }

    /// Reads the banner. With `index`, that entry is used; otherwise the
    /// first entry named `opening.bnr` is.
    ///
    /// # Errors
    ///
    /// [`FsError::BannerMissing`] if no banner entry was found,
    /// [`FsError::BannerInvalid`] if its magic word is not `BNR1`/`BNR2`.
    pub fn banner_info(&self, index: Option<usize>) -> Result<BnrInfo> {
        let index = match index {
            Some(i) => i,
            None => self
                .names
                .iter()
                .zip(&self.entries)
                .position(|(name, e)| !e.is_dir && name == "opening.bnr")
                .ok_or(FsError::BannerMissing)?,
        };
        let entry = *self.entries.get(index).ok_or(FsError::NoSuchEntry(index))?;
        if entry.is_dir {
            return Err(FsError::EntryIsDirectory(index));
        }
        let start = entry.start as u64;
        let mut f = File::open(&self.path)?;
        let magic = binio::read_bytes(&mut f, start, 4)?;
        if magic != b"BNR1" && magic != b"BNR2" {
            return Err(FsError::BannerInvalid);
        }
        let text = |f: &mut File, (off, len): (u64, usize)| -> Result<String> {
            let raw = binio::read_until_nul(f, start + off, len)?;
            Ok(names::decode_lossy(&raw))
        };
        Ok(BnrInfo {
            img: binio::read_bytes(&mut f, start + layout::BNR_IMG_START, layout::BNR_IMG_LEN)?,
            name: text(&mut f, layout::BNR_NAME)?,
            developer: text(&mut f, layout::BNR_DEVELOPER)?,
            full_name: text(&mut f, layout::BNR_FULL_NAME)?,
            full_developer: text(&mut f, layout::BNR_FULL_DEVELOPER)?,
            description: text(&mut f, layout::BNR_DESCRIPTION)?,
        })
    }

    /// Reads part of a file entry's data: `size` bytes from `start` within
    /// the file, clamped to the file's length.
    pub fn read_file(&self, index: usize, start: u64, size: Option<u64>) -> Result<Vec<u8>> {
        let entry = *self.entries.get(index).ok_or(FsError::NoSuchEntry(index))?;
        if entry.is_dir {
            return Err(FsError::EntryIsDirectory(index));
        }
        let file_size = entry.size as u64;
        let start = start.min(file_size);
        let avail = file_size - start;
        let want = size.map_or(avail, |s| s.min(avail));
        let mut f = File::open(&self.path)?;
        Ok(binio::read_bytes(
            &mut f,
            entry.start as u64 + start,
            want as usize,
        )?)
    }

    /// The fixed regions of the image outside the filesystem table, as
    /// `(name, start, size)`.
    pub fn extra_files(&self) -> Result<Vec<(String, u64, u64)>> {
        let mut f = File::open(&self.path)?;
        let appldr_size = binio::read_u32(&mut f, layout::OFF_APPLOADER_SIZE)? as u64;
        let dol_start = binio::read_u32(&mut f, layout::OFF_DOL_START)? as u64;
        Ok(vec![
            ("boot.bin".to_string(), 0, layout::BOOT_END),
            (
                "bi2.bin".to_string(),
                layout::BOOT_END,
                layout::BI2_END - layout::BOOT_END,
            ),
            (
                "appldr.bin".to_string(),
                layout::APPLOADER_START,
                appldr_size,
            ),
            (
                "main.dol".to_string(),
                dol_start,
                self.fs_start.saturating_sub(dol_start),
            ),
        ])
    }

    // Resolves a file reference to its data size right now.
    pub(crate) fn file_ref_size(&self, file: &FileRef) -> u64 {
        match file {
            FileRef::OnDisk(i) | FileRef::Relocated { index: i, .. } => {
                self.entries.get(*i).map_or(0, |e| e.size as u64)
            }
            FileRef::Imported(path) => std::fs::metadata(path).map_or(0, |m| m.len()),
        }
    }

    // Resolves a file reference to a copy source.
    pub(crate) fn file_ref_source(&self, file: &FileRef) -> CopySource {
        match file {
            FileRef::OnDisk(i) => CopySource {
                location: Location::Image {
                    start: self.entries.get(*i).map_or(0, |e| e.start as u64),
                },
                size: Some(self.file_ref_size(file)),
            },
            FileRef::Relocated { new_start, .. } => CopySource {
                location: Location::Image { start: *new_start },
                size: Some(self.file_ref_size(file)),
            },
            FileRef::Imported(path) => CopySource {
                location: Location::Path {
                    path: path.clone(),
                    start: 0,
                },
                size: None,
            },
        }
    }

    /// Per-node size map of the current tree; see [`FsTree::size_map`].
    pub fn tree_sizes(&self) -> HashMap<SizeKey, u64> {
        self.tree.size_map(|f| self.file_ref_size(f))
    }

    /// Extracts items to real paths.
    ///
    /// Directories are materialized recursively; existing destinations are
    /// only overwritten when `overwrite` is set. Returns the failed
    /// `(name, destination)` pairs, or the cancellation sentinel.
    pub fn extract(
        &self,
        items: &[(ExtractItem, PathBuf)],
        overwrite: bool,
        ctl: &CopyController,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ExtractOutcome> {
        let mut jobs = Vec::new();
        let mut failed = Vec::new();
        for (item, dest) in items {
            match item {
                ExtractItem::Index(i) => {
                    let entry = *self.entries.get(*i).ok_or(FsError::NoSuchEntry(*i))?;
                    if entry.is_dir {
                        return Err(FsError::EntryIsDirectory(*i));
                    }
                    jobs.push(CopyJob {
                        source: CopySource {
                            location: Location::Image {
                                start: entry.start as u64,
                            },
                            size: Some(entry.size as u64),
                        },
                        dests: vec![Location::Path {
                            path: dest.clone(),
                            start: 0,
                        }],
                        name: self.names[*i].clone(),
                    });
                }
                ExtractItem::Dir(id) => {
                    self.collect_dir_jobs(*id, dest, overwrite, &mut jobs, &mut failed)?;
                }
                ExtractItem::Root => {
                    self.collect_dir_jobs(self.tree.root(), dest, overwrite, &mut jobs, &mut failed)?;
                }
            }
        }
        self.run_extract_jobs(jobs, failed, overwrite, ctl, progress)
    }

    fn collect_dir_jobs(
        &self,
        dir: DirId,
        dest: &Path,
        overwrite: bool,
        jobs: &mut Vec<CopyJob>,
        failed: &mut Vec<(String, PathBuf)>,
    ) -> Result<()> {
        match std::fs::create_dir(dest) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && overwrite => {}
            Err(_) => {
                let name = dest
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                failed.push((name, dest.to_path_buf()));
                return Ok(());
            }
        }
        let node = self.tree.node(dir);
        for file in &node.files {
            jobs.push(CopyJob {
                source: self.file_ref_source(&file.file),
                dests: vec![Location::Path {
                    path: dest.join(&file.name),
                    start: 0,
                }],
                name: file.name.clone(),
            });
        }
        for edge in &node.dirs {
            self.collect_dir_jobs(edge.node, &dest.join(&edge.name), overwrite, jobs, failed)?;
        }
        Ok(())
    }

    fn run_extract_jobs(
        &self,
        jobs: Vec<CopyJob>,
        mut failed: Vec<(String, PathBuf)>,
        overwrite: bool,
        ctl: &CopyController,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ExtractOutcome> {
        let mut img = File::open(&self.path)?;
        let opts = CopyOptions {
            overwrite,
            allow_cancel: true,
            block_size: self.options.block_size,
            pause_wait: self.options.pause_wait,
            ..Default::default()
        };
        match copy_files(Some(&mut img), &jobs, &opts, ctl, progress)? {
            CopyOutcome::Done {
                failed: failed_jobs,
            } => {
                for i in failed_jobs {
                    if let Some(Location::Path { path, .. }) = jobs[i].dests.first() {
                        failed.push((jobs[i].name.clone(), path.clone()));
                    }
                }
                Ok(ExtractOutcome::Done { failed })
            }
            CopyOutcome::Cancelled(c) => Ok(ExtractOutcome::Cancelled(c)),
        }
    }

    /// Extracts the fixed non-filesystem regions named in `items` as
    /// `(region_name, destination)` pairs; region names are those returned
    /// by [`GcFs::extra_files`].
    pub fn extract_extra_files(
        &self,
        items: &[(String, PathBuf)],
        overwrite: bool,
        ctl: &CopyController,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ExtractOutcome> {
        let regions = self.extra_files()?;
        let mut jobs = Vec::new();
        let mut failed = Vec::new();
        for (name, dest) in items {
            match regions.iter().find(|(n, _, _)| n == name) {
                Some((_, start, size)) => jobs.push(CopyJob {
                    source: CopySource {
                        location: Location::Image { start: *start },
                        size: Some(*size),
                    },
                    dests: vec![Location::Path {
                        path: dest.clone(),
                        start: 0,
                    }],
                    name: name.clone(),
                }),
                None => failed.push((name.clone(), dest.clone())),
            }
        }
        self.run_extract_jobs(jobs, failed, overwrite, ctl, progress)
    }

    // Largest byte offset used by any file entry's data.
    pub(crate) fn data_end(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.start as u64 + e.size as u64)
            .max()
            .unwrap_or(0)
            .max(self.fs_start + self.fst_size)
    }

    // Opens the image read-write.
    pub(crate) fn open_rw(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?)
    }
}
