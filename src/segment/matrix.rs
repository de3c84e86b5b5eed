//! `SegmentMatrix`: the public handle over one tiled matrix.
//!
//! A handle is either disk-backed (a bounded [`TileCache`] over a backing
//! file) or, when the requested slot count covers every tile, a single flat
//! in-memory buffer with no file at all.
//!
//! # Release vs close
//!
//! [`SegmentMatrix::release`] frees the cache memory and nothing else: dirty
//! tiles are **not** written back and the backing file is neither closed nor
//! deleted. Call [`SegmentMatrix::flush`] first if the file must hold every
//! write. [`SegmentMatrix::close`] releases, closes the file, and deletes it
//! when the handle created it.
//!
//! A handle is single-threaded: every access takes `&mut self` because even
//! reads may page tiles in and out.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use tracing::{debug, warn};

use crate::cache::pager::{CacheStats, TileCache};
use crate::config::CacheConfig;
use crate::error::{try_zeroed, Result, SegmentError};
use crate::segment::address::AddressTranslator;
use crate::segment::layout::{self, Geometry};
use crate::transfer::disk_io::{DiskIo, IoStats};

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Open,
    Released,
    Closed,
}

impl std::fmt::Display for HandleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleState::Open => write!(f, "open"),
            HandleState::Released => write!(f, "released"),
            HandleState::Closed => write!(f, "closed"),
        }
    }
}

/// Where cell bytes live.
#[derive(Debug)]
enum Backend {
    /// Whole matrix in one row-major buffer.
    Memory { data: Vec<u8> },
    /// Tiles paged through a bounded cache. `cache` is `None` after release.
    Disk {
        cache: Option<TileCache>,
        io: DiskIo<File>,
    },
}

/// Out-of-core 2-D matrix of fixed-size cells.
#[derive(Debug)]
pub struct SegmentMatrix {
    geometry: Geometry,
    translator: AddressTranslator,
    nseg: usize,
    /// Backing file created by this handle, deleted on close.
    path: Option<PathBuf>,
    state: HandleState,
    backend: Backend,
}

impl SegmentMatrix {
    /// Open a new matrix of `nrows x ncols` cells of `len` bytes, tiled
    /// `srows x scols`, keeping at most `nseg` tiles in memory.
    ///
    /// If `nseg` covers every tile the matrix is held entirely in memory and
    /// `path` is never touched. Otherwise `path` must not exist yet; it is
    /// created and formatted as the backing file. On failure after creation
    /// the partially written file is left in place for the caller to remove.
    pub fn open<P: AsRef<Path>>(
        path: P,
        nrows: usize,
        ncols: usize,
        srows: usize,
        scols: usize,
        len: usize,
        nseg: usize,
    ) -> Result<Self> {
        let geometry = Geometry::new(nrows, ncols, srows, scols, len)?;
        let config = CacheConfig {
            segments: nseg,
            ..CacheConfig::default()
        };
        Self::open_with(path, geometry, &config)
    }

    /// [`SegmentMatrix::open`] with an explicit cache configuration.
    pub fn open_with<P: AsRef<Path>>(path: P, geometry: Geometry, config: &CacheConfig) -> Result<Self> {
        let nseg = config.segments;
        if nseg == 0 {
            return Err(SegmentError::InvalidParameters("nseg must be > 0".into()));
        }

        if config.memory_mode && nseg >= geometry.ntiles() {
            return Self::open_memory(geometry, nseg);
        }

        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(SegmentError::EmptyPath);
        }
        if path.exists() {
            return Err(SegmentError::AlreadyExists(path.to_path_buf()));
        }
        geometry.file_size(config.offset_bits())?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    SegmentError::AlreadyExists(path.to_path_buf())
                } else {
                    SegmentError::Create {
                        path: path.to_path_buf(),
                        source: e,
                    }
                }
            })?;

        layout::format_with(&mut file, &geometry, config.fill_mode(), config.offset_bits())?;
        drop(file);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| SegmentError::Reopen {
                path: path.to_path_buf(),
                source: e,
            })?;

        debug!(path = %path.display(), nseg, ntiles = geometry.ntiles(), "Using disk cache");
        Self::setup(file, geometry, nseg, Some(path.to_path_buf()))
    }

    /// Wrap an already formatted backing file opened for reading and writing.
    ///
    /// The handle does not own the file's path: [`SegmentMatrix::close`]
    /// writes back dirty tiles and closes the file but deletes nothing.
    pub fn init(mut file: File, nseg: usize) -> Result<Self> {
        let geometry = layout::read_header(&mut file)?;
        debug!(
            nrows = geometry.nrows(),
            ncols = geometry.ncols(),
            nseg,
            "Attaching to formatted segment file"
        );
        Self::setup(file, geometry, nseg, None)
    }

    fn open_memory(geometry: Geometry, nseg: usize) -> Result<Self> {
        let bytes = geometry.matrix_bytes().ok_or(SegmentError::OutOfMemory {
            what: "memory cache",
            bytes: usize::MAX,
        })?;
        let data = try_zeroed(bytes, "memory cache")?;
        debug!(bytes, ntiles = geometry.ntiles(), nseg, "Using memory cache");

        Ok(Self {
            geometry,
            translator: AddressTranslator::new(&geometry),
            nseg,
            path: None,
            state: HandleState::Open,
            backend: Backend::Memory { data },
        })
    }

    fn setup(file: File, geometry: Geometry, nseg: usize, path: Option<PathBuf>) -> Result<Self> {
        if nseg == 0 {
            return Err(SegmentError::InvalidParameters("nseg must be > 0".into()));
        }
        let nseg = if nseg > geometry.ntiles() {
            warn!(
                requested = nseg,
                ntiles = geometry.ntiles(),
                "Segment count exceeds tile count, clamping"
            );
            geometry.ntiles()
        } else {
            nseg
        };

        let translator = AddressTranslator::new(&geometry);
        let cache = TileCache::new(nseg, geometry.ntiles(), geometry.tile_bytes())?;
        let io = DiskIo::new(file, translator, geometry.tile_bytes());

        debug!(
            address = ?translator.address_strategy(),
            seek = ?translator.seek_strategy(),
            "Address translation selected"
        );

        Ok(Self {
            geometry,
            translator,
            nseg,
            path,
            state: HandleState::Open,
            backend: Backend::Disk {
                cache: Some(cache),
                io,
            },
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn nrows(&self) -> usize {
        self.geometry.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.geometry.ncols()
    }

    /// Number of resident tile slots (after clamping).
    pub fn nseg(&self) -> usize {
        self.nseg
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Backing file owned by this handle, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn translator(&self) -> &AddressTranslator {
        &self.translator
    }

    /// Whether the whole matrix is held in one memory buffer.
    pub fn is_memory_mode(&self) -> bool {
        matches!(self.backend, Backend::Memory { .. })
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        match &self.backend {
            Backend::Disk { cache: Some(cache), .. } => Some(*cache.stats()),
            _ => None,
        }
    }

    pub fn io_stats(&self) -> Option<IoStats> {
        match &self.backend {
            Backend::Disk { io, .. } => Some(*io.stats()),
            Backend::Memory { .. } => None,
        }
    }

    /// Tiles currently resident, least recently used first. Empty in memory mode.
    pub fn resident_tiles(&self) -> Vec<usize> {
        match &self.backend {
            Backend::Disk { cache: Some(cache), .. } => cache.lru_tiles(),
            _ => Vec::new(),
        }
    }

    /// Copy cell `(row, col)` into `out` (exactly `len` bytes).
    pub fn get(&mut self, row: usize, col: usize, out: &mut [u8]) -> Result<()> {
        self.check_open()?;
        self.check_cell(row, col)?;
        let len = self.geometry.cell_len();
        check_buf(len, out.len())?;

        match &mut self.backend {
            Backend::Memory { data } => {
                let at = (row * self.geometry.ncols() + col) * len;
                out.copy_from_slice(&data[at..at + len]);
            }
            Backend::Disk { cache, io } => {
                let cache = cache.as_mut().ok_or(SegmentError::NotOpen(self.state))?;
                let (tile, offset) = self.translator.translate(row, col);
                let slot = cache.page_in(tile, io)?;
                out.copy_from_slice(&cache.slot_data(slot)[offset..offset + len]);
            }
        }
        Ok(())
    }

    /// Copy `value` (exactly `len` bytes) into cell `(row, col)`.
    ///
    /// The write is visible to later reads at once but reaches the file only
    /// when its tile is paged out, flushed, or the handle is closed.
    pub fn put(&mut self, row: usize, col: usize, value: &[u8]) -> Result<()> {
        self.check_open()?;
        self.check_cell(row, col)?;
        let len = self.geometry.cell_len();
        check_buf(len, value.len())?;

        match &mut self.backend {
            Backend::Memory { data } => {
                let at = (row * self.geometry.ncols() + col) * len;
                data[at..at + len].copy_from_slice(value);
            }
            Backend::Disk { cache, io } => {
                let cache = cache.as_mut().ok_or(SegmentError::NotOpen(self.state))?;
                let (tile, offset) = self.translator.translate(row, col);
                let slot = cache.page_in(tile, io)?;
                cache.slot_data_mut(slot)[offset..offset + len].copy_from_slice(value);
                cache.mark_dirty(slot);
            }
        }
        Ok(())
    }

    /// Read cell `(row, col)` as a `T` whose size equals the cell length.
    pub fn get_as<T: Pod>(&mut self, row: usize, col: usize) -> Result<T> {
        let mut value: T = bytemuck::Zeroable::zeroed();
        self.get(row, col, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    /// Write `value` into cell `(row, col)`; its size must equal the cell length.
    pub fn put_as<T: Pod>(&mut self, row: usize, col: usize, value: &T) -> Result<()> {
        self.put(row, col, bytemuck::bytes_of(value))
    }

    /// Copy all of row `row` into `out` (exactly `ncols * len` bytes).
    pub fn get_row(&mut self, row: usize, out: &mut [u8]) -> Result<()> {
        self.check_open()?;
        self.check_row(row)?;
        check_buf(self.geometry.row_bytes(), out.len())?;

        let spans = RowSpans::new(&self.geometry);
        match &mut self.backend {
            Backend::Memory { data } => {
                let at = row * self.geometry.row_bytes();
                let n = out.len();
                out.copy_from_slice(&data[at..at + n]);
            }
            Backend::Disk { cache, io } => {
                let cache = cache.as_mut().ok_or(SegmentError::NotOpen(self.state))?;
                for (col, pos, bytes) in spans {
                    let (tile, offset) = self.translator.translate(row, col);
                    let slot = cache.page_in(tile, io)?;
                    out[pos..pos + bytes].copy_from_slice(&cache.slot_data(slot)[offset..offset + bytes]);
                }
            }
        }
        Ok(())
    }

    /// Overwrite all of row `row` from `buf` (exactly `ncols * len` bytes).
    pub fn put_row(&mut self, row: usize, buf: &[u8]) -> Result<()> {
        self.check_open()?;
        self.check_row(row)?;
        check_buf(self.geometry.row_bytes(), buf.len())?;

        let spans = RowSpans::new(&self.geometry);
        match &mut self.backend {
            Backend::Memory { data } => {
                let at = row * self.geometry.row_bytes();
                data[at..at + buf.len()].copy_from_slice(buf);
            }
            Backend::Disk { cache, io } => {
                let cache = cache.as_mut().ok_or(SegmentError::NotOpen(self.state))?;
                for (col, pos, bytes) in spans {
                    let (tile, offset) = self.translator.translate(row, col);
                    let slot = cache.page_in(tile, io)?;
                    cache.slot_data_mut(slot)[offset..offset + bytes].copy_from_slice(&buf[pos..pos + bytes]);
                    cache.mark_dirty(slot);
                }
            }
        }
        Ok(())
    }

    /// Write every dirty tile back to the file without evicting. Returns the
    /// number of tiles written (always 0 in memory mode).
    pub fn flush(&mut self) -> Result<usize> {
        self.check_open()?;
        match &mut self.backend {
            Backend::Memory { .. } => Ok(0),
            Backend::Disk { cache, io } => {
                let cache = cache.as_mut().ok_or(SegmentError::NotOpen(self.state))?;
                let written = cache.flush(io)?;
                debug!(written, "Flushed dirty tiles");
                Ok(written)
            }
        }
    }

    /// Free the tile buffers and bookkeeping.
    ///
    /// Dirty tiles are discarded without being written, and the backing file
    /// stays open and on disk until the handle is dropped or closed.
    pub fn release(&mut self) -> Result<()> {
        self.check_open()?;
        match &mut self.backend {
            Backend::Memory { data } => *data = Vec::new(),
            Backend::Disk { cache, .. } => {
                if let Some(c) = cache.take() {
                    let dirty = c.dirty_count();
                    if dirty > 0 {
                        debug!(dirty, "Releasing cache with unflushed tiles");
                    }
                }
            }
        }
        self.state = HandleState::Released;
        debug!("Segment released");
        Ok(())
    }

    /// Release, close the backing file, and delete it if this handle created it.
    ///
    /// For a handle attached with [`SegmentMatrix::init`] the file survives,
    /// so dirty tiles are written back first.
    pub fn close(mut self) -> Result<()> {
        if self.state == HandleState::Open {
            if self.path.is_none() {
                self.flush()?;
            }
            self.release()?;
        }
        self.state = HandleState::Closed;

        let SegmentMatrix { backend, path, .. } = self;
        drop(backend);

        if let Some(path) = path {
            fs::remove_file(&path).map_err(|e| SegmentError::io("removing segment file", e))?;
            debug!(path = %path.display(), "Segment file removed");
        }
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            HandleState::Open => Ok(()),
            other => Err(SegmentError::NotOpen(other)),
        }
    }

    fn check_cell(&self, row: usize, col: usize) -> Result<()> {
        if self.geometry.contains(row, col) {
            Ok(())
        } else {
            Err(SegmentError::OutOfBounds {
                row,
                col,
                nrows: self.geometry.nrows(),
                ncols: self.geometry.ncols(),
            })
        }
    }

    fn check_row(&self, row: usize) -> Result<()> {
        self.check_cell(row, 0)
    }
}

fn check_buf(expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(SegmentError::BufferSize { expected, got });
    }
    Ok(())
}

/// Column spans of one row, one per tile-column: `(first col, byte position
/// in the row buffer, byte count)`. Full-width spans come first, then the
/// narrower spill span when `ncols` is not a multiple of `scols`.
#[derive(Debug, Clone, Copy)]
struct RowSpans {
    col: usize,
    full_cols: usize,
    spill: usize,
    scols: usize,
    len: usize,
}

impl RowSpans {
    fn new(geometry: &Geometry) -> Self {
        Self {
            col: 0,
            full_cols: geometry.ncols() - geometry.spill(),
            spill: geometry.spill(),
            scols: geometry.scols(),
            len: geometry.cell_len(),
        }
    }
}

impl Iterator for RowSpans {
    type Item = (usize, usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let col = self.col;
        let width = if col < self.full_cols {
            self.scols
        } else if col == self.full_cols && self.spill > 0 {
            self.spill
        } else {
            return None;
        };
        self.col += width;
        Some((col, col * self.len, width * self.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_row_spans_with_spill() {
        let g = Geometry::new(4, 12, 2, 5, 2).unwrap();
        let spans: Vec<_> = RowSpans::new(&g).collect();
        assert_eq!(spans, vec![(0, 0, 10), (5, 10, 10), (10, 20, 4)]);

        let g = Geometry::new(4, 10, 2, 5, 1).unwrap();
        let spans: Vec<_> = RowSpans::new(&g).collect();
        assert_eq!(spans, vec![(0, 0, 5), (5, 5, 5)]);

        // Matrix narrower than one tile: only the spill span.
        let g = Geometry::new(4, 3, 2, 5, 1).unwrap();
        let spans: Vec<_> = RowSpans::new(&g).collect();
        assert_eq!(spans, vec![(0, 0, 3)]);
    }

    #[test]
    fn test_memory_mode_selected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("never-created");
        let mut seg = SegmentMatrix::open(&path, 10, 10, 5, 5, 4, 4).unwrap();
        assert!(seg.is_memory_mode());
        assert!(!path.exists());
        assert!(seg.path().is_none());

        seg.put_as(3, 7, &42u32).unwrap();
        assert_eq!(seg.get_as::<u32>(3, 7).unwrap(), 42);
        seg.close().unwrap();
    }

    #[test]
    fn test_memory_mode_can_be_disabled() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("seg");
        let g = Geometry::new(10, 10, 5, 5, 4).unwrap();
        let config = CacheConfig {
            segments: 4,
            memory_mode: false,
            ..CacheConfig::default()
        };
        let seg = SegmentMatrix::open_with(&path, g, &config).unwrap();
        assert!(!seg.is_memory_mode());
        assert!(path.exists());
        seg.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_bounds_and_buffer_checks() {
        let tmp = TempDir::new().unwrap();
        let mut seg = SegmentMatrix::open(tmp.path().join("seg"), 20, 20, 4, 4, 8, 2).unwrap();

        let mut out = [0u8; 8];
        let err = seg.get(20, 0, &mut out).unwrap_err();
        assert!(matches!(err, SegmentError::OutOfBounds { row: 20, .. }));
        let err = seg.put(0, 0, &[0u8; 4]).unwrap_err();
        assert!(matches!(err, SegmentError::BufferSize { expected: 8, got: 4 }));
        let err = seg.get_as::<u32>(0, 0).unwrap_err();
        assert_eq!(err.code(), -12);
        let mut row = vec![0u8; 10];
        assert!(seg.get_row(0, &mut row).is_err());
        seg.close().unwrap();
    }

    #[test]
    fn test_access_after_release_fails() {
        let tmp = TempDir::new().unwrap();
        let mut seg = SegmentMatrix::open(tmp.path().join("seg"), 20, 20, 4, 4, 8, 2).unwrap();
        seg.put_as(1, 1, &1.5f64).unwrap();
        seg.release().unwrap();
        assert_eq!(seg.state(), HandleState::Released);

        let err = seg.get_as::<f64>(1, 1).unwrap_err();
        assert!(matches!(err, SegmentError::NotOpen(HandleState::Released)));
        assert!(seg.release().is_err());
        assert!(seg.flush().is_err());
        assert!(seg.cache_stats().is_none());
        seg.close().unwrap();
    }
}
