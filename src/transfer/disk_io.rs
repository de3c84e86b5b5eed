//! Tile I/O against the backing file.
//!
//! A tile is always read or written as one unit of `srows * scols * len`
//! bytes at the offset given by the address translator. Short writes and
//! seek failures are hard errors; no partial-tile retry is attempted.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{trace, warn};

use crate::error::{Result, SegmentError};
use crate::segment::address::AddressTranslator;
use crate::transfer::TileStore;

/// Transfer statistics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IoStats {
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_bytes_read: u64,
    pub total_bytes_written: u64,
    /// Reads that started at or past end-of-file and produced a zero tile.
    pub zero_tiles: u64,
}

/// Tile reader/writer over a seekable file.
#[derive(Debug)]
pub struct DiskIo<F = File> {
    file: F,
    translator: AddressTranslator,
    tile_bytes: usize,
    stats: IoStats,
}

impl<F: Read + Write + Seek> DiskIo<F> {
    pub fn new(file: F, translator: AddressTranslator, tile_bytes: usize) -> Self {
        Self {
            file,
            translator,
            tile_bytes,
            stats: IoStats::default(),
        }
    }

    pub fn stats(&self) -> &IoStats {
        &self.stats
    }

    pub fn get_ref(&self) -> &F {
        &self.file
    }

    /// Give back the underlying file.
    pub fn into_inner(self) -> F {
        self.file
    }

    fn seek_to(&mut self, tile: usize) -> Result<u64> {
        let offset = self.translator.seek(tile);
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| SegmentError::io("seeking to tile", e))?;
        Ok(offset)
    }

    fn check_len(&self, got: usize) -> Result<()> {
        if got != self.tile_bytes {
            return Err(SegmentError::BufferSize {
                expected: self.tile_bytes,
                got,
            });
        }
        Ok(())
    }
}

impl<F: Read + Write + Seek> TileStore for DiskIo<F> {
    fn read_tile(&mut self, tile: usize, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        let offset = self.seek_to(tile)?;

        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(tile, offset, error = %e, "Tile read failed");
                    return Err(SegmentError::io("reading tile", e));
                }
            }
        }

        if filled == 0 {
            // Past the end of a file that was never extended over this tile.
            buf.fill(0);
            self.stats.zero_tiles += 1;
            trace!(tile, offset, "Tile beyond end of file, zero-filled");
        } else if filled != buf.len() {
            warn!(tile, offset, got = filled, expected = buf.len(), "Short tile read");
            return Err(SegmentError::ShortRead {
                tile,
                got: filled,
                expected: buf.len(),
            });
        }

        self.stats.total_reads += 1;
        self.stats.total_bytes_read += filled as u64;
        trace!(tile, offset, size = buf.len(), "Read tile");
        Ok(())
    }

    fn write_tile(&mut self, tile: usize, buf: &[u8]) -> Result<()> {
        self.check_len(buf.len())?;
        let offset = self.seek_to(tile)?;

        self.file.write_all(buf).map_err(|e| {
            warn!(tile, offset, error = %e, "Tile write failed");
            SegmentError::io("writing tile", e)
        })?;

        self.stats.total_writes += 1;
        self.stats.total_bytes_written += buf.len() as u64;
        trace!(tile, offset, size = buf.len(), "Wrote tile");
        Ok(())
    }
}
