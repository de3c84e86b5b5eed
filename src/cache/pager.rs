//! Tile cache: the paging core.
//!
//! A fixed pool of `nseg` slots, a load index mapping tile -> slot, a stack of
//! free slots, and an age queue. `page_in` makes a tile resident (evicting the
//! least recently used slot when the pool is full, flushing it first if
//! dirty); `page_out` writes a dirty slot back.

use tracing::{debug, trace, warn};

use crate::cache::evictor::AgeQueue;
use crate::cache::slot::{Slot, SlotState};
use crate::error::{Result, SegmentError};
use crate::transfer::TileStore;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// `page_in` calls satisfied by a resident tile.
    pub hits: u64,
    /// `page_in` calls that had to read the tile.
    pub misses: u64,
    /// Slots reclaimed from a resident tile.
    pub evictions: u64,
    /// Tiles read into a slot.
    pub page_ins: u64,
    /// Dirty slots written back.
    pub page_outs: u64,
}

/// Load-index entry of a tile that holds no slot.
const NOT_RESIDENT: u32 = u32::MAX;

/// The in-memory working set of tiles.
#[derive(Debug)]
pub struct TileCache {
    slots: Vec<Slot>,

    /// tile index -> slot index, or `NOT_RESIDENT`.
    load_index: Vec<u32>,

    /// Unbound slots, popped from the end.
    free_slots: Vec<usize>,

    ages: AgeQueue,

    /// Slot returned by the last `page_in`.
    current: Option<usize>,

    stats: CacheStats,
}

impl TileCache {
    /// Allocate `nslots` slots of `tile_bytes` each for a matrix of `ntiles` tiles.
    pub fn new(nslots: usize, ntiles: usize, tile_bytes: usize) -> Result<Self> {
        if nslots == 0 {
            return Err(SegmentError::InvalidParameters("nseg must be > 0".into()));
        }
        if nslots >= NOT_RESIDENT as usize {
            return Err(SegmentError::InvalidParameters(format!(
                "nseg {nslots} exceeds {}",
                NOT_RESIDENT - 1
            )));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(nslots)
            .map_err(|_| SegmentError::OutOfMemory {
                what: "slot table",
                bytes: nslots.saturating_mul(std::mem::size_of::<Slot>()),
            })?;
        for _ in 0..nslots {
            slots.push(Slot::new(tile_bytes)?);
        }

        let mut load_index = Vec::new();
        load_index
            .try_reserve_exact(ntiles)
            .map_err(|_| SegmentError::OutOfMemory {
                what: "load index",
                bytes: ntiles.saturating_mul(std::mem::size_of::<u32>()),
            })?;
        load_index.resize(ntiles, NOT_RESIDENT);

        // Reversed so slot 0 is handed out first.
        let free_slots = (0..nslots).rev().collect();

        debug!(nslots, ntiles, tile_bytes, "Tile cache initialized");

        Ok(Self {
            slots,
            load_index,
            free_slots,
            ages: AgeQueue::new(nslots),
            current: None,
            stats: CacheStats::default(),
        })
    }

    pub fn nslots(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Slot currently holding `tile`, if resident.
    pub fn slot_of(&self, tile: usize) -> Option<usize> {
        self.load_index
            .get(tile)
            .copied()
            .filter(|&slot| slot != NOT_RESIDENT)
            .map(|slot| slot as usize)
    }

    pub fn is_resident(&self, tile: usize) -> bool {
        self.slot_of(tile).is_some()
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot].state()
    }

    /// Resident tiles from least to most recently used.
    pub fn lru_tiles(&self) -> Vec<usize> {
        self.ages
            .iter_oldest_first()
            .filter_map(|s| self.slots[s].tile())
            .collect()
    }

    pub fn dirty_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_dirty()).count()
    }

    pub fn slot_data(&self, slot: usize) -> &[u8] {
        self.slots[slot].data()
    }

    pub fn slot_data_mut(&mut self, slot: usize) -> &mut [u8] {
        self.slots[slot].data_mut()
    }

    pub fn mark_dirty(&mut self, slot: usize) {
        self.slots[slot].mark_dirty();
    }

    /// Make `tile` resident and return its slot.
    pub fn page_in<S: TileStore>(&mut self, tile: usize, store: &mut S) -> Result<usize> {
        if tile >= self.load_index.len() {
            return Err(SegmentError::InvalidParameters(format!(
                "tile {tile} out of range ({} tiles)",
                self.load_index.len()
            )));
        }

        if let Some(cur) = self.current {
            if self.slots[cur].tile() == Some(tile) {
                self.stats.hits += 1;
                return Ok(cur);
            }
        }

        if let Some(slot) = self.slot_of(tile) {
            self.stats.hits += 1;
            self.ages.touch(slot);
            self.current = Some(slot);
            return Ok(slot);
        }

        self.stats.misses += 1;
        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => self.evict_oldest(store)?,
        };

        if let Err(e) = store.read_tile(tile, self.slots[slot].data_mut()) {
            warn!(tile, slot, error = %e, "Page-in failed");
            self.free_slots.push(slot);
            return Err(e);
        }

        self.slots[slot].bind(tile);
        self.load_index[tile] = slot as u32;
        self.ages.touch(slot);
        self.current = Some(slot);
        self.stats.page_ins += 1;
        trace!(tile, slot, "Paged in tile");
        Ok(slot)
    }

    /// Write `slot` back if it is dirty.
    pub fn page_out<S: TileStore>(&mut self, slot: usize, store: &mut S) -> Result<()> {
        let s = &mut self.slots[slot];
        let Some(tile) = s.tile() else {
            return Ok(());
        };
        if !s.is_dirty() {
            return Ok(());
        }

        store.write_tile(tile, s.data())?;
        s.mark_clean();
        self.stats.page_outs += 1;
        trace!(tile, slot, "Paged out tile");
        Ok(())
    }

    /// Write back every dirty slot, keeping all tiles resident. Returns the count written.
    pub fn flush<S: TileStore>(&mut self, store: &mut S) -> Result<usize> {
        let mut written = 0;
        for slot in 0..self.slots.len() {
            if self.slots[slot].is_dirty() {
                self.page_out(slot, store)?;
                written += 1;
            }
        }
        Ok(written)
    }

    /// Reclaim the least recently used slot, flushing it first when dirty.
    ///
    /// If the flush fails the victim stays bound and dirty.
    fn evict_oldest<S: TileStore>(&mut self, store: &mut S) -> Result<usize> {
        let victim = self
            .ages
            .oldest()
            .ok_or_else(|| SegmentError::InvalidParameters("no slot to evict".into()))?;

        self.page_out(victim, store)?;

        if let Some(tile) = self.slots[victim].unbind() {
            self.load_index[tile] = NOT_RESIDENT;
            trace!(tile, slot = victim, "Evicted tile");
        }
        self.ages.remove(victim);
        if self.current == Some(victim) {
            self.current = None;
        }
        self.stats.evictions += 1;
        Ok(victim)
    }
}
