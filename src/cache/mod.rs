//! Tile cache management.
//!
//! - [`slot`]: segment control blocks (tile buffer + dirty flag)
//! - [`evictor`]: recency queue that picks the least recently used slot
//! - [`pager`]: page-in/page-out over a fixed slot pool

pub mod evictor;
pub mod pager;
pub mod slot;
