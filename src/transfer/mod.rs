//! Data transfer between tile slots and the backing file.
//!
//! - [`disk_io`]: positional whole-tile reads and writes on the segment file

pub mod disk_io;

use crate::error::Result;

/// Backing storage addressed by tile index.
///
/// Buffers are always exactly one tile long.
pub trait TileStore {
    /// Fill `buf` with the contents of `tile`.
    fn read_tile(&mut self, tile: usize, buf: &mut [u8]) -> Result<()>;

    /// Persist `buf` as the contents of `tile`.
    fn write_tile(&mut self, tile: usize, buf: &[u8]) -> Result<()>;
}
