//! Configuration for the filesystem engine.
//!
//! The original tooling this format comes from used module-level globals for
//! tuning; here everything is carried by an explicit [`FsOptions`] value
//! passed to the engine constructor.

use std::time::Duration;

/// Default copy block size in bytes (1 MiB).
pub const BLOCK_SIZE: usize = 0x10_0000;

/// Default interval between control-state polls while a copy is paused.
pub const PAUSE_WAIT: Duration = Duration::from_millis(100);

/// Options for a [`GcFs`](crate::GcFs) instance.
#[derive(Debug, Clone)]
pub struct FsOptions {
    /// Maximum amount of data to read and write at a time during bulk
    /// copies. Also the granularity of progress reporting and of
    /// pause/cancel polling.
    pub block_size: usize,
    /// How long to sleep between control-state polls while paused.
    pub pause_wait: Duration,
    /// Whether to run sanity checks when loading the filesystem table.
    ///
    /// Disabling this is not recommended, but may be necessary for a valid
    /// disc that happens to fall outside the checks.
    pub sanity_checks: bool,
}

impl Default for FsOptions {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            pause_wait: PAUSE_WAIT,
            sanity_checks: true,
        }
    }
}

impl FsOptions {
    /// Returns options with a custom copy block size.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Returns options with sanity checks disabled.
    pub fn without_sanity_checks(mut self) -> Self {
        self.sanity_checks = false;
        self
    }
}
