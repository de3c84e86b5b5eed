//! Tiled matrix storage.
//!
//! - [`layout`]: geometry, file header, formatting
//! - [`address`]: cell -> tile and tile -> file offset translation
//! - [`matrix`]: the `SegmentMatrix` handle (open, get/put, rows, release, close)

pub mod address;
pub mod layout;
pub mod matrix;

pub use layout::{format, format_nofill, read_header, Geometry, HEADER_SIZE};
pub use matrix::{HandleState, SegmentMatrix};
