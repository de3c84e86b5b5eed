//! End-to-end lifecycle tests: open, release, close, init and error paths.

use std::fs::{self, File, OpenOptions};

use segment_store::config::CacheConfig;
use segment_store::{format, ErrorCategory, Geometry, SegmentError, SegmentMatrix};
use tempfile::TempDir;

fn reopen(path: &std::path::Path) -> File {
    OpenOptions::new().read(true).write(true).open(path).unwrap()
}

// 40x40 u32 cells in 10x10 tiles, two slots. Tile k holds cell (0, 10 * k).
fn fill_four_tiles(seg: &mut SegmentMatrix) {
    for k in 0..4usize {
        seg.put_as(0, k * 10, &(k as u32 + 1)).unwrap();
    }
}

#[test]
fn test_release_discards_resident_dirty_tiles() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("seg");
    let mut seg = SegmentMatrix::open(&path, 40, 40, 10, 10, 4, 2).unwrap();

    fill_four_tiles(&mut seg);
    // Tiles 0 and 1 were evicted (and written); 2 and 3 are still dirty in memory.
    assert_eq!(seg.resident_tiles(), vec![2, 3]);
    seg.release().unwrap();
    assert!(path.exists());

    let mut view = SegmentMatrix::init(reopen(&path), 2).unwrap();
    assert_eq!(view.get_as::<u32>(0, 0).unwrap(), 1);
    assert_eq!(view.get_as::<u32>(0, 10).unwrap(), 2);
    assert_eq!(view.get_as::<u32>(0, 20).unwrap(), 0);
    assert_eq!(view.get_as::<u32>(0, 30).unwrap(), 0);
    view.close().unwrap();

    seg.close().unwrap();
    assert!(!path.exists());
}

#[test]
fn test_flush_then_release_is_durable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("seg");
    let mut seg = SegmentMatrix::open(&path, 40, 40, 10, 10, 4, 2).unwrap();

    fill_four_tiles(&mut seg);
    assert_eq!(seg.flush().unwrap(), 2);
    assert_eq!(seg.flush().unwrap(), 0);
    seg.release().unwrap();

    let mut view = SegmentMatrix::init(reopen(&path), 3).unwrap();
    for k in 0..4usize {
        assert_eq!(view.get_as::<u32>(0, k * 10).unwrap(), k as u32 + 1);
    }
    view.close().unwrap();
    seg.close().unwrap();
}

#[test]
fn test_close_removes_file_and_path_is_reusable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("seg");

    let mut seg = SegmentMatrix::open(&path, 30, 30, 8, 8, 8, 3).unwrap();
    assert_eq!(seg.path(), Some(path.as_path()));
    seg.put_as(29, 29, &-1.0f64).unwrap();
    seg.close().unwrap();
    assert!(!path.exists());

    let mut seg = SegmentMatrix::open(&path, 30, 30, 8, 8, 8, 3).unwrap();
    assert_eq!(seg.get_as::<f64>(29, 29).unwrap(), 0.0);
    seg.close().unwrap();
}

#[test]
fn test_init_handle_close_flushes_and_keeps_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("formatted.seg");
    let g = Geometry::new(25, 25, 10, 10, 2).unwrap();
    {
        let mut file = File::create(&path).unwrap();
        let size = format(&mut file, &g).unwrap();
        assert_eq!(size, g.file_size(64).unwrap());
    }

    let mut seg = SegmentMatrix::init(reopen(&path), 2).unwrap();
    assert_eq!(*seg.geometry(), g);
    assert!(seg.path().is_none());
    for row in 0..25 {
        let values: Vec<u16> = (0..25).map(|col| (row * 25 + col) as u16).collect();
        seg.put_row(row, bytemuck::cast_slice(&values)).unwrap();
    }
    seg.close().unwrap();
    assert!(path.exists());

    let mut seg = SegmentMatrix::init(reopen(&path), 2).unwrap();
    let mut buf = vec![0u8; 50];
    seg.get_row(24, &mut buf).unwrap();
    let row: &[u16] = bytemuck::cast_slice(&buf);
    assert_eq!(row[0], 600);
    assert_eq!(row[24], 624);
    seg.close().unwrap();
}

#[test]
fn test_init_clamps_segment_count() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("formatted.seg");
    let g = Geometry::new(20, 20, 5, 5, 4).unwrap();
    format(&mut File::create(&path).unwrap(), &g).unwrap();

    let seg = SegmentMatrix::init(reopen(&path), 100).unwrap();
    assert_eq!(seg.nseg(), 16);
    assert!(!seg.is_memory_mode());
    seg.close().unwrap();
}

#[test]
fn test_init_rejects_missing_header() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("empty.seg");
    File::create(&path).unwrap();

    let err = SegmentMatrix::init(reopen(&path), 2).unwrap_err();
    assert_eq!(err.code(), -13);
}

#[test]
fn test_init_with_oversized_tile_count_is_out_of_memory() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("huge.seg");
    // 2^30 x 2^30 one-byte tiles: a valid header, but 2^60 tiles to index.
    let mut header = Vec::with_capacity(28);
    header.extend_from_slice(&(1i64 << 30).to_ne_bytes());
    header.extend_from_slice(&(1i64 << 30).to_ne_bytes());
    for field in [1i32, 1, 1] {
        header.extend_from_slice(&field.to_ne_bytes());
    }
    fs::write(&path, &header).unwrap();

    let err = SegmentMatrix::init(reopen(&path), 4).unwrap_err();
    assert!(matches!(err, SegmentError::OutOfMemory { .. }));
    assert_eq!(err.code(), -6);
    assert!(matches!(err.category(), ErrorCategory::Resource));
}

#[test]
fn test_existing_file_is_not_touched() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("seg");
    fs::write(&path, b"keep me").unwrap();

    let err = SegmentMatrix::open(&path, 40, 40, 10, 10, 4, 2).unwrap_err();
    assert!(matches!(err, SegmentError::AlreadyExists(_)));
    assert_eq!(err.code(), -2);
    assert!(matches!(err.category(), ErrorCategory::Naming));
    assert_eq!(fs::read(&path).unwrap(), b"keep me");
}

#[test]
fn test_empty_path() {
    let err = SegmentMatrix::open("", 40, 40, 10, 10, 4, 2).unwrap_err();
    assert!(matches!(err, SegmentError::EmptyPath));
    assert_eq!(err.code(), -1);

    // Memory mode never looks at the path.
    let seg = SegmentMatrix::open("", 40, 40, 10, 10, 4, 16).unwrap();
    assert!(seg.is_memory_mode());
    seg.close().unwrap();
}

#[test]
fn test_invalid_parameters_create_nothing() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("seg");

    for (nrows, ncols, srows, scols, len, nseg) in [
        (0, 40, 10, 10, 4, 2),
        (40, 0, 10, 10, 4, 2),
        (40, 40, 0, 10, 4, 2),
        (40, 40, 10, 0, 4, 2),
        (40, 40, 10, 10, 0, 2),
        (40, 40, 10, 10, 4, 0),
    ] {
        let err = SegmentMatrix::open(&path, nrows, ncols, srows, scols, len, nseg).unwrap_err();
        assert_eq!(err.code(), -3, "{nrows} {ncols} {srows} {scols} {len} {nseg}");
        assert!(matches!(err.category(), ErrorCategory::Parameter));
    }
    assert!(!path.exists());
}

#[test]
fn test_offset_overflow_creates_nothing() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("huge.seg");
    let g = Geometry::new(100_000, 100_000, 64, 64, 8).unwrap();
    let config = CacheConfig {
        segments: 4,
        large_file_support: false,
        ..CacheConfig::default()
    };

    let err = SegmentMatrix::open_with(&path, g, &config).unwrap_err();
    assert!(matches!(err, SegmentError::Overflow { bits: 32 }));
    assert_eq!(err.code(), -9);
    assert!(matches!(err.category(), ErrorCategory::Capacity));
    assert!(!path.exists());
}

#[test]
fn test_closed_state_after_release_then_close() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("seg");
    let mut seg = SegmentMatrix::open(&path, 40, 40, 10, 10, 4, 2).unwrap();
    seg.put_as(39, 39, &9u32).unwrap();
    seg.release().unwrap();
    let err = seg.put_as(0, 0, &1u32).unwrap_err();
    assert_eq!(err.code(), -10);
    seg.close().unwrap();
    assert!(!path.exists());
}
