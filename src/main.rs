//! segment-probe: exercise an out-of-core segment matrix end to end.
//!
//! Creates a scratch backing file, fills every cell with a known `f64`,
//! reads the matrix back by point and by row, verifies every sampled value,
//! and prints a JSON summary of the geometry, cache mode and statistics.

use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use segment_store::config::{Cli, Config};
use segment_store::SegmentMatrix;

#[derive(Debug, Serialize)]
struct Summary {
    nrows: usize,
    ncols: usize,
    srows: usize,
    scols: usize,
    ntiles: usize,
    nseg: usize,
    memory_mode: bool,
    cells_checked: u64,
    elapsed_ms: u128,
    hits: u64,
    misses: u64,
    evictions: u64,
    page_outs: u64,
    bytes_read: u64,
    bytes_written: u64,
}

fn cell_value(row: usize, col: usize, ncols: usize) -> f64 {
    (row * ncols + col) as f64 * 0.5
}

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "segment_store=debug,segment_probe=debug"
    } else {
        "segment_store=info,segment_probe=info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("segment-probe v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    config.apply_cli(&cli);
    let geometry = config.geometry.geometry().context("invalid geometry")?;

    info!(
        nrows = geometry.nrows(),
        ncols = geometry.ncols(),
        srows = geometry.srows(),
        scols = geometry.scols(),
        len = geometry.cell_len(),
        ntiles = geometry.ntiles(),
        segments = config.cache.segments,
        resident_bytes = config.cache.resident_bytes(&geometry),
        "Configuration loaded"
    );

    if geometry.cell_len() != std::mem::size_of::<f64>() {
        bail!("the probe writes f64 cells; set geometry.len to 8");
    }

    let path = config
        .scratch
        .dir
        .join(format!("segment-{}.seg", uuid::Uuid::new_v4()));
    let mut seg = SegmentMatrix::open_with(&path, geometry, &config.cache)
        .with_context(|| format!("opening segment file {}", path.display()))?;

    let started = Instant::now();
    let ncols = geometry.ncols();

    // Fill row by row.
    let mut row_buf = vec![0f64; ncols];
    for row in 0..geometry.nrows() {
        for (col, cell) in row_buf.iter_mut().enumerate() {
            *cell = cell_value(row, col, ncols);
        }
        seg.put_row(row, bytemuck::cast_slice(&row_buf))?;
    }

    // Read back: strided points, then whole rows.
    let stride = config.probe.stride.max(1);
    let mut checked = 0u64;
    for pass in 0..config.probe.passes {
        let mut idx = pass;
        while idx < geometry.nrows() * ncols {
            let (row, col) = (idx / ncols, idx % ncols);
            let got: f64 = seg.get_as(row, col)?;
            if got != cell_value(row, col, ncols) {
                error!(row, col, got, "Point read-back mismatch");
                bail!("value mismatch at ({row}, {col})");
            }
            checked += 1;
            idx += stride;
        }

        for row in 0..geometry.nrows() {
            seg.get_row(row, bytemuck::cast_slice_mut(&mut row_buf))?;
            for (col, got) in row_buf.iter().enumerate() {
                if *got != cell_value(row, col, ncols) {
                    error!(row, col, got, "Row read-back mismatch");
                    bail!("row value mismatch at ({row}, {col})");
                }
            }
            checked += ncols as u64;
        }
    }

    let cache = seg.cache_stats().unwrap_or_default();
    let io = seg.io_stats().unwrap_or_default();
    let summary = Summary {
        nrows: geometry.nrows(),
        ncols,
        srows: geometry.srows(),
        scols: geometry.scols(),
        ntiles: geometry.ntiles(),
        nseg: seg.nseg(),
        memory_mode: seg.is_memory_mode(),
        cells_checked: checked,
        elapsed_ms: started.elapsed().as_millis(),
        hits: cache.hits,
        misses: cache.misses,
        evictions: cache.evictions,
        page_outs: cache.page_outs,
        bytes_read: io.total_bytes_read,
        bytes_written: io.total_bytes_written,
    };

    seg.close().context("closing segment")?;

    info!(cells_checked = checked, "Probe complete");
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
