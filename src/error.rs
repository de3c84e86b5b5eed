//! Error taxonomy for the segment engine.
//!
//! Every failure maps to one [`SegmentError`] variant, and every variant maps
//! to a stable small negative integer via [`SegmentError::code`] so callers
//! can branch on the category without matching on message text.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::segment::matrix::HandleState;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, SegmentError>;

/// Coarse grouping of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad dimensions, bad cell coordinates, wrong buffer sizes.
    Parameter,
    /// Missing path or a backing file that already exists.
    Naming,
    /// Seek/read/write failures on the backing file.
    Io,
    /// The file would not fit the file-offset type, or the disk is full.
    Capacity,
    /// Allocation failure for tile buffers or bookkeeping.
    Resource,
    /// The handle has been released or closed.
    State,
}

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Segment file name is empty")]
    EmptyPath,

    #[error("Segment file exists already: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("Illegal segment configuration parameter(s): {0}")]
    InvalidParameters(String),

    #[error("Unable to create segment file {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Unable to re-open segment file {}: {source}", path.display())]
    Reopen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Out of memory allocating {what} ({bytes} bytes)")]
    OutOfMemory { what: &'static str, bytes: usize },

    #[error("I/O error while {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Disk full while {op}: {source}")]
    DiskFull {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Segment file size overflows {bits}-bit file offsets; large file support is required")]
    Overflow { bits: u32 },

    #[error("Segment handle is {0}")]
    NotOpen(HandleState),

    #[error("Cell ({row}, {col}) is outside the {nrows}x{ncols} matrix")]
    OutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },

    #[error("Buffer holds {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },

    #[error("Invalid segment file header: {0}")]
    BadHeader(String),

    #[error("Short read of tile {tile}: got {got} bytes, expected {expected}")]
    ShortRead {
        tile: usize,
        got: usize,
        expected: usize,
    },
}

impl SegmentError {
    /// Wrap an I/O error, promoting "no space left" to [`SegmentError::DiskFull`].
    pub fn io(op: &'static str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::StorageFull {
            SegmentError::DiskFull { op, source }
        } else {
            SegmentError::Io { op, source }
        }
    }

    /// Stable negative integer code for this error.
    pub fn code(&self) -> i32 {
        match self {
            SegmentError::EmptyPath => -1,
            SegmentError::AlreadyExists(_) => -2,
            SegmentError::InvalidParameters(_) => -3,
            SegmentError::Create { .. } => -4,
            SegmentError::Reopen { .. } => -5,
            SegmentError::OutOfMemory { .. } => -6,
            SegmentError::Io { .. } => -7,
            SegmentError::DiskFull { .. } => -8,
            SegmentError::Overflow { .. } => -9,
            SegmentError::NotOpen(_) => -10,
            SegmentError::OutOfBounds { .. } => -11,
            SegmentError::BufferSize { .. } => -12,
            SegmentError::BadHeader(_) => -13,
            SegmentError::ShortRead { .. } => -14,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            SegmentError::InvalidParameters(_)
            | SegmentError::OutOfBounds { .. }
            | SegmentError::BufferSize { .. } => ErrorCategory::Parameter,
            SegmentError::EmptyPath | SegmentError::AlreadyExists(_) => ErrorCategory::Naming,
            SegmentError::Create { .. }
            | SegmentError::Reopen { .. }
            | SegmentError::Io { .. }
            | SegmentError::BadHeader(_)
            | SegmentError::ShortRead { .. } => ErrorCategory::Io,
            SegmentError::Overflow { .. } | SegmentError::DiskFull { .. } => {
                ErrorCategory::Capacity
            }
            SegmentError::OutOfMemory { .. } => ErrorCategory::Resource,
            SegmentError::NotOpen(_) => ErrorCategory::State,
        }
    }
}

/// Allocate a zeroed byte buffer, reporting allocation failure instead of aborting.
pub(crate) fn try_zeroed(bytes: usize, what: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes)
        .map_err(|_| SegmentError::OutOfMemory { what, bytes })?;
    buf.resize(bytes, 0);
    Ok(buf)
}
