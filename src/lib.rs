//! gcdisc - A GameCube disc image filesystem library
//!
//! This library reads and edits the filesystem of GameCube-style disc
//! images: the flat entry table, its string table, and the file data
//! scattered across the image.
//!
//! # Features
//!
//! - **In-memory editing**: move, copy, delete, rename, create directories
//!   and import real files without touching the image until written
//! - **Gap-aware writing**: new data is placed into existing free space,
//!   growing the image only when it has to
//! - **Compaction**: in-place defragmentation and restoration of the
//!   standard fixed image size
//! - **Cooperative control**: long operations report progress and honour
//!   pause and two-tier cancellation at block boundaries
//! - **Undo journal**: a linear history over all tree edits
//!
//! # Example
//!
//! ```no_run
//! use gcdisc::{CopyController, GcFs};
//!
//! let mut fs = GcFs::open("game.iso").unwrap();
//! let root = fs.tree().root();
//! fs.tree_mut().remove_file(root, "opening.bnr");
//! fs.write(None, &CopyController::new(), None).unwrap();
//! ```

pub mod binio;
pub mod config;
pub mod copy;
pub mod error;
pub mod history;
pub mod image;
pub mod import;
pub mod names;
pub mod progress;
pub mod search;
pub mod tree;

// Re-export commonly used types
pub use config::{FsOptions, BLOCK_SIZE, PAUSE_WAIT};
pub use copy::{copy_files, CopyJob, CopyOptions, CopyOutcome, CopySource, Location};
pub use error::{FsError, Result, WriteError};
pub use history::{Conflict, History, ItemPath};
pub use image::compress::CompressOutcome;
pub use image::write::WriteOutcome;
pub use image::{BnrInfo, DiscInfo, ExtractItem, ExtractOutcome, GcFs};
pub use import::tree_from_dir;
pub use progress::{Cancelled, CopyController, CopyState, ProgressFn};
pub use search::{search_tree, Match, SearchOptions};
pub use tree::{DirId, FileRef, FlatItem, FsTree, SizeKey};
