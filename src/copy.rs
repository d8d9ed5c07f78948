//! Bulk block copy engine.
//!
//! Everything that moves file data around goes through [`copy_files`]:
//! extracting entries to real files, importing real files into the image, and
//! relocating data within the image itself. A copy endpoint is either a
//! byte offset inside the open disc image or a position in a file on disk,
//! so a single job list can mix all of those freely, including jobs whose
//! source and destination are both the image.
//!
//! Failures are per-job: a job that cannot be completed is recorded and the
//! remaining jobs still run. The caller decides whether any failure aborts
//! the wider operation.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::warn;

use crate::config::{BLOCK_SIZE, PAUSE_WAIT};
use crate::error::Result;
use crate::progress::{Cancelled, CopyController, CopyState, ProgressFn};

/// One endpoint of a copy: a position in the open disc image, or a position
/// in a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Byte offset into the disc image the engine was given.
    Image {
        /// Offset of the first byte to read or write.
        start: u64,
    },
    /// A file on disk.
    Path {
        /// The file's path. As a destination, the file is created (or
        /// truncated, if overwriting is allowed).
        path: PathBuf,
        /// Offset of the first byte to read or write.
        start: u64,
    },
}

/// A copy source: a location plus how many bytes to take from it.
#[derive(Debug, Clone)]
pub struct CopySource {
    /// Where the bytes come from.
    pub location: Location,
    /// Number of bytes to copy; `None` means the whole file, and is only
    /// meaningful for [`Location::Path`] sources.
    pub size: Option<u64>,
}

/// One copy job: a source fanned out to one or more destinations.
#[derive(Debug, Clone)]
pub struct CopyJob {
    /// Where the bytes come from.
    pub source: CopySource,
    /// Where the bytes go. Every destination receives the full source.
    pub dests: Vec<Location>,
    /// Display name passed to the progress callback.
    pub name: String,
}

/// Options for a [`copy_files`] run.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Whether a [`Location::Path`] destination that already exists may be
    /// overwritten. If not, the job fails.
    pub overwrite: bool,
    /// Whether a plain cancel request is granted. Safe phases set this;
    /// phases that have already overwritten data deny plain cancels and
    /// only honour a force-cancel.
    pub allow_cancel: bool,
    /// Block size for reads and writes.
    pub block_size: usize,
    /// Sleep interval while paused.
    pub pause_wait: Duration,
    /// Added to the byte count passed to the progress callback, so that a
    /// run split over several [`copy_files`] calls reports one continuous
    /// range.
    pub progress_offset: u64,
    /// Total passed to the progress callback; defaults to the sum of this
    /// run's job sizes.
    pub progress_total: Option<u64>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            allow_cancel: true,
            block_size: BLOCK_SIZE,
            pause_wait: PAUSE_WAIT,
            progress_offset: 0,
            progress_total: None,
        }
    }
}

/// How a [`copy_files`] run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    /// All jobs were attempted. `failed` holds the indices (into the job
    /// list) of the jobs that could not be completed.
    Done {
        /// Indices of failed jobs.
        failed: Vec<usize>,
    },
    /// The run was cancelled before all jobs were attempted.
    Cancelled(Cancelled),
}

impl CopyOutcome {
    /// Whether the run finished with every job succeeding.
    pub fn is_clean(&self) -> bool {
        matches!(self, CopyOutcome::Done { failed } if failed.is_empty())
    }
}

// Open handle for one endpoint. `None` means the shared image handle.
enum Endpoint {
    Image,
    File(File),
}

struct OpenDest {
    endpoint: Endpoint,
    pos: u64,
}

/// Runs a list of copy jobs.
///
/// `image` is the open disc image; it is required whenever any job uses a
/// [`Location::Image`] endpoint and may be `None` for pure file-to-file
/// runs. The controller is polled once per block; `progress` (if given) is
/// called once per block with `(bytes_done, bytes_total, job_name)`.
///
/// # Errors
///
/// Only infrastructure failures (seeking the image handle) surface as
/// `Err`. Per-job I/O problems are reported through
/// [`CopyOutcome::Done`]'s failure list instead.
pub fn copy_files(
    mut image: Option<&mut File>,
    jobs: &[CopyJob],
    opts: &CopyOptions,
    ctl: &CopyController,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<CopyOutcome> {
    let mut failed = Vec::new();
    // Resolve job sizes up front so the total is known from the first
    // progress call. A source that cannot be measured fails immediately.
    let mut sizes = Vec::with_capacity(jobs.len());
    for (i, job) in jobs.iter().enumerate() {
        match job_size(job) {
            Ok(size) => sizes.push(size),
            Err(e) => {
                warn!("cannot stat copy source for '{}': {}", job.name, e);
                failed.push(i);
                sizes.push(0);
            }
        }
    }
    let run_total: u64 = sizes.iter().sum();
    let total = opts.progress_total.unwrap_or(run_total);
    let mut done = opts.progress_offset;

    for (i, job) in jobs.iter().enumerate() {
        if failed.contains(&i) {
            continue;
        }
        match copy_one(
            image.as_deref_mut(),
            job,
            sizes[i],
            opts,
            ctl,
            progress.as_deref_mut(),
            &mut done,
            total,
        )? {
            JobResult::Ok => {}
            JobResult::Failed => failed.push(i),
            JobResult::Cancelled(c) => return Ok(CopyOutcome::Cancelled(c)),
        }
    }
    Ok(CopyOutcome::Done { failed })
}

enum JobResult {
    Ok,
    Failed,
    Cancelled(Cancelled),
}

fn job_size(job: &CopyJob) -> std::io::Result<u64> {
    if let Some(size) = job.source.size {
        return Ok(size);
    }
    match &job.source.location {
        Location::Image { .. } => Ok(0),
        Location::Path { path, start } => {
            let meta = std::fs::metadata(path)?;
            if !meta.is_file() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ));
            }
            Ok(meta.len().saturating_sub(*start))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn copy_one(
    mut image: Option<&mut File>,
    job: &CopyJob,
    size: u64,
    opts: &CopyOptions,
    ctl: &CopyController,
    mut progress: Option<&mut ProgressFn<'_>>,
    done: &mut u64,
    total: u64,
) -> Result<JobResult> {
    // Open the source.
    let (mut src, mut src_pos) = match &job.source.location {
        Location::Image { start } => {
            if image.is_none() {
                warn!("'{}': image source but no image handle", job.name);
                return Ok(JobResult::Failed);
            }
            (Endpoint::Image, *start)
        }
        Location::Path { path, start } => match File::open(path) {
            Ok(f) => (Endpoint::File(f), *start),
            Err(e) => {
                warn!("cannot open '{}': {}", path.display(), e);
                return Ok(JobResult::Failed);
            }
        },
    };
    if let Endpoint::File(f) = &mut src {
        if f.seek(SeekFrom::Start(src_pos)).is_err() {
            return Ok(JobResult::Failed);
        }
    }

    // Open every destination before moving any bytes.
    let mut dests = Vec::with_capacity(job.dests.len());
    for dest in &job.dests {
        match dest {
            Location::Image { start } => {
                if image.is_none() {
                    warn!("'{}': image destination but no image handle", job.name);
                    return Ok(JobResult::Failed);
                }
                dests.push(OpenDest {
                    endpoint: Endpoint::Image,
                    pos: *start,
                });
            }
            Location::Path { path, start } => {
                if !opts.overwrite && *start == 0 && path.exists() {
                    warn!("destination '{}' already exists", path.display());
                    return Ok(JobResult::Failed);
                }
                let open = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(*start == 0)
                    .open(path);
                let mut f = match open {
                    Ok(f) => f,
                    Err(e) => {
                        warn!("cannot create '{}': {}", path.display(), e);
                        return Ok(JobResult::Failed);
                    }
                };
                if f.seek(SeekFrom::Start(*start)).is_err() {
                    return Ok(JobResult::Failed);
                }
                dests.push(OpenDest {
                    endpoint: Endpoint::File(f),
                    pos: *start,
                });
            }
        }
    }

    let mut buf = vec![0u8; opts.block_size];
    let mut remaining = size;
    while remaining > 0 {
        if let Some(c) = poll_control(ctl, opts) {
            return Ok(JobResult::Cancelled(c));
        }
        let want = (opts.block_size as u64).min(remaining) as usize;
        let n = match &mut src {
            Endpoint::Image => {
                // The image handle is shared with destinations, so position
                // it before every read.
                let img = image.as_deref_mut().ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "image handle lost")
                })?;
                img.seek(SeekFrom::Start(src_pos))?;
                read_full(img, &mut buf[..want])?
            }
            Endpoint::File(f) => match read_full(f, &mut buf[..want]) {
                Ok(n) => n,
                Err(e) => {
                    warn!("read error on '{}': {}", job.name, e);
                    return Ok(JobResult::Failed);
                }
            },
        };
        if n == 0 {
            warn!("'{}' is shorter than expected", job.name);
            return Ok(JobResult::Failed);
        }
        src_pos += n as u64;
        for dest in &mut dests {
            match &mut dest.endpoint {
                Endpoint::Image => {
                    let img = image.as_deref_mut().ok_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::Other, "image handle lost")
                    })?;
                    img.seek(SeekFrom::Start(dest.pos))?;
                    img.write_all(&buf[..n])?;
                }
                Endpoint::File(f) => {
                    if let Err(e) = f.write_all(&buf[..n]) {
                        warn!("write error on '{}': {}", job.name, e);
                        return Ok(JobResult::Failed);
                    }
                }
            }
            dest.pos += n as u64;
        }
        remaining -= n as u64;
        *done += n as u64;
        if let Some(p) = progress.as_deref_mut() {
            p(*done, total, &job.name);
        }
    }
    Ok(JobResult::Ok)
}

// Fills as much of `buf` as the source allows; a short count means EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// Handles any pending pause/cancel request, blocking while paused.
fn poll_control(ctl: &CopyController, opts: &CopyOptions) -> Option<Cancelled> {
    loop {
        match ctl.state() {
            CopyState::Running | CopyState::CancelDenied => return None,
            CopyState::PauseRequested => {
                ctl.set(CopyState::Paused);
            }
            CopyState::Paused => {
                thread::sleep(opts.pause_wait);
            }
            CopyState::CancelRequested => {
                if opts.allow_cancel {
                    ctl.set(CopyState::CancelGranted);
                    return Some(Cancelled::Safe);
                }
                ctl.set(CopyState::CancelDenied);
            }
            CopyState::CancelGranted => return Some(Cancelled::Safe),
            CopyState::ForceCancel => return Some(Cancelled::Forced),
        }
    }
}
