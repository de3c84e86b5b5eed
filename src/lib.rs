//! segment-store: out-of-core storage for large 2-D matrices.
//!
//! A matrix of fixed-size cells is cut into rectangular tiles. Only a bounded
//! number of tiles is kept in memory; the rest live in a backing file and are
//! paged in and out on demand (least recently used first, dirty tiles written
//! back before their slot is reused):
//!
//!   get/put/get_row → address translation → tile cache → backing file
//!
//! When the slot budget covers every tile, the matrix is simply held in one
//! flat buffer and no file is created.
//!
//! ```no_run
//! use segment_store::SegmentMatrix;
//!
//! # fn main() -> segment_store::Result<()> {
//! let mut seg = SegmentMatrix::open("/tmp/elevation.seg", 10_000, 10_000, 64, 64, 8, 32)?;
//! seg.put_as(5_000, 42, &3.25f64)?;
//! assert_eq!(seg.get_as::<f64>(5_000, 42)?, 3.25);
//! seg.close()?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod segment;
pub mod transfer;

pub use config::CacheConfig;
pub use error::{ErrorCategory, Result, SegmentError};
pub use segment::{format, format_nofill, read_header, Geometry, HandleState, SegmentMatrix};
