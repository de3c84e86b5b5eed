//! Tiling geometry, the fixed-size file header, and backing-file formatting.
//!
//! File layout (native byte order, scratch format only):
//!
//! ```text
//! offset 0:  nrows   (i64)
//! offset 8:  ncols   (i64)
//! offset 16: srows   (i32)
//! offset 20: scols   (i32)
//! offset 24: len     (i32)
//! offset 28: tile 0, tile 1, ... row-major, each srows*scols*len bytes
//! ```

use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, warn};

use crate::error::{try_zeroed, Result, SegmentError};

/// Size of the on-disk header in bytes.
pub const HEADER_SIZE: u64 = 28;

/// Width of the file-offset type used when no preference is given.
pub const LARGE_FILE_OFFSET_BITS: u32 = 64;

/// Width of the file-offset type without large file support.
pub const SMALL_FILE_OFFSET_BITS: u32 = 32;

/// How the tile area of a freshly formatted file is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Write zeros over every tile.
    ZeroFill,
    /// Only extend the file to its final length by writing the last byte.
    Sparse,
}

/// Validated tiling geometry of one matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    nrows: usize,
    ncols: usize,
    srows: usize,
    scols: usize,
    len: usize,
    tiles_per_row: usize,
    tiles_per_col: usize,
    ntiles: usize,
    tile_bytes: usize,
}

impl Geometry {
    /// Build and validate a geometry. Every dimension must be positive and
    /// representable in its header field.
    pub fn new(nrows: usize, ncols: usize, srows: usize, scols: usize, len: usize) -> Result<Self> {
        for (name, value) in [
            ("nrows", nrows),
            ("ncols", ncols),
            ("srows", srows),
            ("scols", scols),
            ("len", len),
        ] {
            if value == 0 {
                return Err(SegmentError::InvalidParameters(format!("{name} must be > 0")));
            }
        }
        if i64::try_from(nrows).is_err() || i64::try_from(ncols).is_err() {
            return Err(SegmentError::InvalidParameters(
                "nrows/ncols exceed the header's 64-bit fields".into(),
            ));
        }
        for (name, value) in [("srows", srows), ("scols", scols), ("len", len)] {
            if i32::try_from(value).is_err() {
                return Err(SegmentError::InvalidParameters(format!(
                    "{name} = {value} exceeds the header's 32-bit field"
                )));
            }
        }

        let tiles_per_row = ncols.div_ceil(scols);
        let tiles_per_col = nrows.div_ceil(srows);
        let ntiles = tiles_per_row
            .checked_mul(tiles_per_col)
            .ok_or(SegmentError::Overflow { bits: usize::BITS })?;
        let tile_bytes = srows
            .checked_mul(scols)
            .and_then(|cells| cells.checked_mul(len))
            .ok_or(SegmentError::Overflow { bits: usize::BITS })?;

        Ok(Self {
            nrows,
            ncols,
            srows,
            scols,
            len,
            tiles_per_row,
            tiles_per_col,
            ntiles,
            tile_bytes,
        })
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn srows(&self) -> usize {
        self.srows
    }

    pub fn scols(&self) -> usize {
        self.scols
    }

    /// Bytes per cell.
    pub fn cell_len(&self) -> usize {
        self.len
    }

    /// Tiles across one tile-row, `ceil(ncols / scols)`.
    pub fn tiles_per_row(&self) -> usize {
        self.tiles_per_row
    }

    /// Tiles down one tile-column, `ceil(nrows / srows)`.
    pub fn tiles_per_col(&self) -> usize {
        self.tiles_per_col
    }

    /// Total number of tiles.
    pub fn ntiles(&self) -> usize {
        self.ntiles
    }

    /// Bytes in one tile, `srows * scols * len`.
    pub fn tile_bytes(&self) -> usize {
        self.tile_bytes
    }

    /// Width of the last tile-column when `ncols` is not a multiple of `scols` (0 otherwise).
    pub fn spill(&self) -> usize {
        self.ncols % self.scols
    }

    /// Bytes in one full matrix row.
    pub fn row_bytes(&self) -> usize {
        self.ncols * self.len
    }

    /// Bytes of the whole matrix held flat in memory, if addressable.
    pub fn matrix_bytes(&self) -> Option<usize> {
        self.nrows
            .checked_mul(self.ncols)
            .and_then(|cells| cells.checked_mul(self.len))
    }

    /// Whether `(row, col)` lies inside the matrix.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.nrows && col < self.ncols
    }

    /// Total backing-file size (header plus all tiles) under a file-offset type
    /// of `offset_bits` width.
    ///
    /// The size is computed twice: once in the offset type with wrapping
    /// arithmetic, once in 128 bits. If the two disagree the offset type
    /// cannot address the file and [`SegmentError::Overflow`] is returned.
    pub fn file_size(&self, offset_bits: u32) -> Result<u64> {
        let wide = self.ntiles as i128 * self.tile_bytes as i128 + HEADER_SIZE as i128;
        let native = if offset_bits <= SMALL_FILE_OFFSET_BITS {
            (self.ntiles as i32)
                .wrapping_mul(self.tile_bytes as i32)
                .wrapping_add(HEADER_SIZE as i32) as i128
        } else {
            (self.ntiles as i64)
                .wrapping_mul(self.tile_bytes as i64)
                .wrapping_add(HEADER_SIZE as i64) as i128
        };

        if native != wide {
            warn!(
                ntiles = self.ntiles,
                tile_bytes = self.tile_bytes,
                offset_bits,
                "Segment file size overflows the file-offset type"
            );
            return Err(SegmentError::Overflow { bits: offset_bits });
        }
        Ok(wide as u64)
    }

    fn encode_header(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&(self.nrows as i64).to_ne_bytes());
        buf[8..16].copy_from_slice(&(self.ncols as i64).to_ne_bytes());
        buf[16..20].copy_from_slice(&(self.srows as i32).to_ne_bytes());
        buf[20..24].copy_from_slice(&(self.scols as i32).to_ne_bytes());
        buf[24..28].copy_from_slice(&(self.len as i32).to_ne_bytes());
        buf
    }

    fn decode_header(buf: &[u8; HEADER_SIZE as usize]) -> Result<Self> {
        let i64_at = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            i64::from_ne_bytes(raw)
        };
        let i32_at = |at: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&buf[at..at + 4]);
            i32::from_ne_bytes(raw)
        };

        let fields = [
            ("nrows", i64_at(0)),
            ("ncols", i64_at(8)),
            ("srows", i32_at(16) as i64),
            ("scols", i32_at(20) as i64),
            ("len", i32_at(24) as i64),
        ];
        let mut dims = [0usize; 5];
        for (slot, (name, value)) in dims.iter_mut().zip(fields) {
            *slot = usize::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| SegmentError::BadHeader(format!("{name} = {value}")))?;
        }
        Geometry::new(dims[0], dims[1], dims[2], dims[3], dims[4])
    }
}

/// Write the header at the start of `target`.
pub fn write_header<W: Write + Seek>(target: &mut W, geometry: &Geometry) -> Result<()> {
    target
        .seek(SeekFrom::Start(0))
        .map_err(|e| SegmentError::io("seeking to segment header", e))?;
    target
        .write_all(&geometry.encode_header())
        .map_err(|e| SegmentError::io("writing segment header", e))
}

/// Read and validate the header at the start of `source`.
pub fn read_header<R: Read + Seek>(source: &mut R) -> Result<Geometry> {
    source
        .seek(SeekFrom::Start(0))
        .map_err(|e| SegmentError::io("seeking to segment header", e))?;
    let mut buf = [0u8; HEADER_SIZE as usize];
    source.read_exact(&mut buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            SegmentError::BadHeader("file is shorter than the header".into())
        } else {
            SegmentError::io("reading segment header", e)
        }
    })?;
    Geometry::decode_header(&buf)
}

/// Format `target` as a segment file and zero-fill every tile, so tiles that
/// are never written read back as zeros.
pub fn format<W: Write + Seek>(target: &mut W, geometry: &Geometry) -> Result<u64> {
    format_with(target, geometry, FillMode::ZeroFill, LARGE_FILE_OFFSET_BITS)
}

/// Format `target` as a segment file, only extending it to its final length.
///
/// Faster than [`format`]; unwritten tiles rely on sparse-file zero semantics.
pub fn format_nofill<W: Write + Seek>(target: &mut W, geometry: &Geometry) -> Result<u64> {
    format_with(target, geometry, FillMode::Sparse, LARGE_FILE_OFFSET_BITS)
}

/// Format with an explicit fill mode and file-offset width. Returns the file size.
pub fn format_with<W: Write + Seek>(
    target: &mut W,
    geometry: &Geometry,
    fill: FillMode,
    offset_bits: u32,
) -> Result<u64> {
    let size = geometry.file_size(offset_bits)?;

    write_header(target, geometry)?;

    match fill {
        FillMode::ZeroFill => {
            let zeros = try_zeroed(geometry.tile_bytes(), "zero-fill buffer")?;
            for _ in 0..geometry.ntiles() {
                target
                    .write_all(&zeros)
                    .map_err(|e| SegmentError::io("zero-filling segment file", e))?;
            }
        }
        FillMode::Sparse => {
            target
                .seek(SeekFrom::Start(size - 1))
                .map_err(|e| SegmentError::io("seeking to end of segment file", e))?;
            target
                .write_all(&[0u8])
                .map_err(|e| SegmentError::io("extending segment file", e))?;
        }
    }

    debug!(
        nrows = geometry.nrows(),
        ncols = geometry.ncols(),
        srows = geometry.srows(),
        scols = geometry.scols(),
        len = geometry.cell_len(),
        ntiles = geometry.ntiles(),
        size,
        fill = ?fill,
        "Formatted segment file"
    );

    Ok(size)
}
