//! Cell and tile address translation.
//!
//! `translate(row, col)` yields the owning tile index and the byte offset of
//! the cell inside that tile; `seek(tile)` yields the tile's byte offset in
//! the backing file. Each has a shift-based and an arithmetic strategy,
//! picked once from the geometry and never changed for the handle's lifetime.

use crate::segment::layout::{Geometry, HEADER_SIZE};

/// Strategy for `(row, col) -> (tile, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStrategy {
    /// `srows` and `scols` are powers of two: shifts and masks.
    Shift { srow_bits: u32, scol_bits: u32 },
    /// General case: division and remainder.
    Divide,
}

/// Strategy for `tile -> byte offset in file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekStrategy {
    /// Tile byte size is a power of two.
    Shift { size_bits: u32 },
    /// General case: multiply.
    Multiply,
}

impl AddressStrategy {
    pub fn for_geometry(geometry: &Geometry) -> Self {
        if geometry.srows().is_power_of_two() && geometry.scols().is_power_of_two() {
            AddressStrategy::Shift {
                srow_bits: geometry.srows().trailing_zeros(),
                scol_bits: geometry.scols().trailing_zeros(),
            }
        } else {
            AddressStrategy::Divide
        }
    }
}

impl SeekStrategy {
    pub fn for_geometry(geometry: &Geometry) -> Self {
        if geometry.tile_bytes().is_power_of_two() {
            SeekStrategy::Shift {
                size_bits: geometry.tile_bytes().trailing_zeros(),
            }
        } else {
            SeekStrategy::Multiply
        }
    }
}

/// Maps logical cells to tiles and tiles to file offsets.
#[derive(Debug, Clone, Copy)]
pub struct AddressTranslator {
    srows: usize,
    scols: usize,
    len: usize,
    tiles_per_row: usize,
    tile_bytes: usize,
    address: AddressStrategy,
    seek: SeekStrategy,
}

impl AddressTranslator {
    /// Pick the cheapest strategies the geometry allows.
    pub fn new(geometry: &Geometry) -> Self {
        Self::with_strategies(
            geometry,
            AddressStrategy::for_geometry(geometry),
            SeekStrategy::for_geometry(geometry),
        )
    }

    /// Force the general arithmetic path regardless of geometry.
    pub fn general(geometry: &Geometry) -> Self {
        Self::with_strategies(geometry, AddressStrategy::Divide, SeekStrategy::Multiply)
    }

    fn with_strategies(geometry: &Geometry, address: AddressStrategy, seek: SeekStrategy) -> Self {
        Self {
            srows: geometry.srows(),
            scols: geometry.scols(),
            len: geometry.cell_len(),
            tiles_per_row: geometry.tiles_per_row(),
            tile_bytes: geometry.tile_bytes(),
            address,
            seek,
        }
    }

    pub fn address_strategy(&self) -> AddressStrategy {
        self.address
    }

    pub fn seek_strategy(&self) -> SeekStrategy {
        self.seek
    }

    /// `(tile_index, byte offset within tile)` of cell `(row, col)`.
    #[inline]
    pub fn translate(&self, row: usize, col: usize) -> (usize, usize) {
        match self.address {
            AddressStrategy::Shift { srow_bits, scol_bits } => {
                let tile = (row >> srow_bits) * self.tiles_per_row + (col >> scol_bits);
                let cell = ((row & (self.srows - 1)) << scol_bits) + (col & (self.scols - 1));
                (tile, cell * self.len)
            }
            AddressStrategy::Divide => {
                let tile = (row / self.srows) * self.tiles_per_row + col / self.scols;
                let cell = (row % self.srows) * self.scols + col % self.scols;
                (tile, cell * self.len)
            }
        }
    }

    /// Byte offset of tile `tile` in the backing file.
    #[inline]
    pub fn seek(&self, tile: usize) -> u64 {
        let body = match self.seek {
            SeekStrategy::Shift { size_bits } => (tile as u64) << size_bits,
            SeekStrategy::Multiply => tile as u64 * self.tile_bytes as u64,
        };
        HEADER_SIZE + body
    }
}
