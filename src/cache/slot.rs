//! Segment control blocks: one in-memory tile buffer plus its binding and dirty flag.

use crate::error::{try_zeroed, Result};

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Not bound to any tile.
    Free,
    /// Holds a tile whose bytes match the backing file.
    Clean,
    /// Holds a tile modified since it was last written out.
    Dirty,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotState::Free => write!(f, "free"),
            SlotState::Clean => write!(f, "clean"),
            SlotState::Dirty => write!(f, "dirty"),
        }
    }
}

/// A single tile slot.
#[derive(Debug)]
pub struct Slot {
    /// Tile currently held, if any.
    tile: Option<usize>,

    /// Set by writes, cleared by page-out.
    dirty: bool,

    /// Exactly one tile of bytes.
    buf: Vec<u8>,
}

impl Slot {
    /// Allocate a free slot able to hold `tile_bytes` bytes.
    pub fn new(tile_bytes: usize) -> Result<Self> {
        Ok(Self {
            tile: None,
            dirty: false,
            buf: try_zeroed(tile_bytes, "tile slot")?,
        })
    }

    pub fn state(&self) -> SlotState {
        match (self.tile, self.dirty) {
            (None, _) => SlotState::Free,
            (Some(_), false) => SlotState::Clean,
            (Some(_), true) => SlotState::Dirty,
        }
    }

    pub fn tile(&self) -> Option<usize> {
        self.tile
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Bind to `tile` as a clean resident.
    pub fn bind(&mut self, tile: usize) {
        self.tile = Some(tile);
        self.dirty = false;
    }

    /// Return to the free state. The buffer keeps its stale bytes.
    pub fn unbind(&mut self) -> Option<usize> {
        self.dirty = false;
        self.tile.take()
    }

    pub fn mark_dirty(&mut self) {
        debug_assert!(self.tile.is_some(), "dirtying a free slot");
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}
