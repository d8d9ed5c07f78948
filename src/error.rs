//! Error types for the gcdisc library.
//!
//! Failures that leave both the disc image and the in-memory tree untouched
//! are *handled*; callers may keep using the engine after a handled error.
//! An unhandled error means the image, the in-memory state, or both may be
//! inconsistent, and no further mutating operation should be attempted until
//! the image has been reloaded.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for all filesystem operations.
#[derive(Error, Debug)]
pub enum FsError {
    /// I/O error on the disc image or a real file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image failed a load-time format or sanity check. No further
    /// operation may be performed on this image.
    #[error("invalid disc image: {0}")]
    InvalidDisk(String),

    /// A path given as an import source is not a regular file.
    #[error("'{0}' is not a valid file")]
    NotAFile(PathBuf),

    /// An entry index does not refer to anything in the table.
    #[error("there is no entry with index {0}")]
    NoSuchEntry(usize),

    /// A file operation was given the index of a directory.
    #[error("entry {0} is a directory")]
    EntryIsDirectory(usize),

    /// The disc has no banner file and none was specified.
    #[error("disc has no 'opening.bnr' file")]
    BannerMissing,

    /// The banner file's magic word is not BNR1 or BNR2.
    #[error("invalid BNR file")]
    BannerInvalid,

    /// A name cannot be represented in the filesystem's codec or contains
    /// forbidden characters.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// A search term could not be compiled as a regular expression.
    #[error("invalid search pattern: {0}")]
    BadPattern(String),

    /// The image cannot be shrunk to the requested size.
    #[error("the disc is too large to fit in {target} bytes")]
    TooLarge {
        /// Size of the image's file data extent in bytes.
        size: u64,
        /// The fixed size the image had to fit in.
        target: u64,
    },

    /// A bulk copy reported per-job failures that abort the operation.
    #[error("couldn't copy '{0}' to the disc image")]
    CopyFailed(String),
}

/// Type alias for Results using [`FsError`].
pub type Result<T> = std::result::Result<T, FsError>;

/// An error from a mutating operation, tagged with whether the disc image
/// and in-memory tree are guaranteed unaltered.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct WriteError {
    #[source]
    source: FsError,
    handled: bool,
}

impl WriteError {
    /// Wraps an error that occurred before any destructive step; the image
    /// and tree are untouched.
    pub fn handled(source: FsError) -> Self {
        Self {
            source,
            handled: true,
        }
    }

    /// Wraps an error raised after a destructive step began; the image may
    /// be inconsistent.
    pub fn unhandled(source: FsError) -> Self {
        Self {
            source,
            handled: false,
        }
    }

    /// Whether the disc image and in-memory tree are guaranteed unaltered.
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// The underlying failure.
    pub fn source_error(&self) -> &FsError {
        &self.source
    }

    /// Unwraps the underlying failure.
    pub fn into_source(self) -> FsError {
        self.source
    }
}
