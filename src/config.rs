//! Runtime configuration for segment-store.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! The library only consumes [`CacheConfig`]; the rest drives the probe binary.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::segment::layout::{FillMode, Geometry, LARGE_FILE_OFFSET_BITS, SMALL_FILE_OFFSET_BITS};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "segment-probe", about = "Exercise an out-of-core segment matrix")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "segment.json")]
    pub config: PathBuf,

    /// Override the number of matrix rows.
    #[arg(long)]
    pub rows: Option<usize>,

    /// Override the number of matrix columns.
    #[arg(long)]
    pub cols: Option<usize>,

    /// Override the number of resident tile slots.
    #[arg(long)]
    pub segments: Option<usize>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Matrix and tile dimensions.
    pub geometry: GeometryConfig,

    /// Cache sizing and format options.
    pub cache: CacheConfig,

    /// Where backing files are created.
    pub scratch: ScratchConfig,

    /// Probe workload shape.
    pub probe: ProbeConfig,
}

/// Matrix and tile dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub nrows: usize,
    pub ncols: usize,
    /// Rows per tile.
    pub srows: usize,
    /// Columns per tile.
    pub scols: usize,
    /// Bytes per cell.
    pub len: usize,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            nrows: 2048,
            ncols: 2048,
            srows: 64,
            scols: 64,
            len: 8,
        }
    }
}

impl GeometryConfig {
    pub fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.nrows, self.ncols, self.srows, self.scols, self.len)
    }
}

/// Cache sizing and backing-file format options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of resident tile slots (`nseg`).
    pub segments: usize,

    /// Hold the whole matrix in memory when `segments` covers every tile.
    pub memory_mode: bool,

    /// Allow 64-bit file offsets. When false, files larger than a 32-bit
    /// offset can address are rejected.
    pub large_file_support: bool,

    /// Zero-fill every tile when formatting instead of extending a sparse file.
    pub zero_fill: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            segments: 16,
            memory_mode: true,
            large_file_support: true,
            zero_fill: false,
        }
    }
}

impl CacheConfig {
    pub fn offset_bits(&self) -> u32 {
        if self.large_file_support {
            LARGE_FILE_OFFSET_BITS
        } else {
            SMALL_FILE_OFFSET_BITS
        }
    }

    pub fn fill_mode(&self) -> FillMode {
        if self.zero_fill {
            FillMode::ZeroFill
        } else {
            FillMode::Sparse
        }
    }

    /// Bytes of tile memory the cache will hold for `geometry`.
    pub fn resident_bytes(&self, geometry: &Geometry) -> usize {
        self.segments.min(geometry.ntiles()) * geometry.tile_bytes()
    }
}

/// Scratch file placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Directory for backing files.
    pub dir: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

/// Probe workload shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Number of full read-back passes.
    pub passes: usize,

    /// Step between sampled cells during point read-back.
    pub stride: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            passes: 1,
            stride: 7,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(rows) = cli.rows {
            self.geometry.nrows = rows;
        }
        if let Some(cols) = cli.cols {
            self.geometry.ncols = cols;
        }
        if let Some(segments) = cli.segments {
            self.cache.segments = segments;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.segments, 16);
        assert!(cfg.cache.memory_mode);
        assert_eq!(cfg.cache.offset_bits(), 64);
        assert_eq!(cfg.cache.fill_mode(), FillMode::Sparse);
        assert_eq!(cfg.geometry.geometry().unwrap().ntiles(), 32 * 32);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: Config =
            serde_json::from_str(r#"{"geometry": {"nrows": 100}, "cache": {"large_file_support": false}}"#)
                .unwrap();
        assert_eq!(cfg.geometry.nrows, 100);
        assert_eq!(cfg.geometry.ncols, 2048);
        assert_eq!(cfg.cache.offset_bits(), 32);
        assert_eq!(cfg.probe.stride, 7);
    }

    #[test]
    fn test_resident_bytes() {
        let cfg = CacheConfig {
            segments: 4,
            ..CacheConfig::default()
        };
        let g = Geometry::new(100, 100, 10, 10, 8).unwrap();
        assert_eq!(cfg.resident_bytes(&g), 4 * 800);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["segment-probe", "--rows", "10", "--segments", "3"]);
        let mut cfg = Config::default();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.geometry.nrows, 10);
        assert_eq!(cfg.geometry.ncols, 2048);
        assert_eq!(cfg.cache.segments, 3);
    }
}
