/// patch-to-map: renders one variable on one date from the patch value store
/// as a float64 GeoTIFF on the grid of the basin layer.
///
/// Usage:
///   patch-to-map <host> <keyspace> <basin> <hillslope> <zone> <patch> \
///                <output> <variable> <date> [--config run.json] [...]
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use patchmap_core::geotiff::OutputCompression;
use patchmap_core::index::NoDataPolicy;
use patchmap_core::{CqlStore, LayerSet, PatchMapper, RunConfig};
use tracing::{info, Level};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "patch-to-map",
    about = "Map per-patch store values onto the basin/hillslope/zone/patch raster grid"
)]
struct Args {
    /// Store contact point(s): `host`, `host:port`, or a comma-separated list
    host: String,

    /// Keyspace holding the value table
    keyspace: String,

    /// Basin raster; defines the output grid
    basin: PathBuf,

    /// Hillslope raster
    hillslope: PathBuf,

    /// Zone raster
    zone: PathBuf,

    /// Patch raster
    patch: PathBuf,

    /// Output GeoTIFF (overwritten if present)
    output: PathBuf,

    /// Variable name, e.g. sat_def_z
    variable: String,

    /// Date string as stored, e.g. 1985-01-02
    date: String,

    /// JSON run configuration; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Store table queried inside the keyspace
    #[arg(long)]
    table: Option<String>,

    /// No-data value written to cells without a store value
    #[arg(long, allow_negative_numbers = true)]
    no_data: Option<f64>,

    /// Output compression: lzw, deflate or none
    #[arg(long)]
    compression: Option<OutputCompression>,

    /// Largest grid (cells) joined into a dense buffer
    #[arg(long)]
    dense_cell_limit: Option<usize>,

    /// Compare every layer against the basin layer's no-data value
    #[arg(long)]
    reference_no_data: bool,

    /// Also require all layers to share the basin layer's origin
    #[arg(long)]
    check_origin: bool,

    /// Write the run summary as JSON to this path
    #[arg(long)]
    summary: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn log_level(&self) -> Level {
        match (self.quiet, self.verbose) {
            (true, _) => Level::WARN,
            (false, 0) => Level::INFO,
            (false, 1) => Level::DEBUG,
            (false, _) => Level::TRACE,
        }
    }

    fn layer_paths(&self) -> LayerSet<PathBuf> {
        LayerSet::new(
            self.basin.clone(),
            self.hillslope.clone(),
            self.zone.clone(),
            self.patch.clone(),
        )
    }

    /// Config file (or defaults) with the command-line overrides applied.
    fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                RunConfig::from_json(&text)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => RunConfig::default(),
        };
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        if let Some(no_data) = self.no_data {
            config.output_no_data = no_data;
        }
        if let Some(compression) = self.compression {
            config.compression = compression;
        }
        if let Some(limit) = self.dense_cell_limit {
            config.dense_cell_limit = limit;
        }
        if self.reference_no_data {
            config.no_data_policy = NoDataPolicy::Reference;
        }
        if self.check_origin {
            config.check_origin = true;
        }
        Ok(config)
    }
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .init();

    let config = args.run_config()?;
    let mapper = PatchMapper::open(&args.layer_paths(), config)
        .context("preparing categorical layers")?;

    let mut store = CqlStore::connect(&args.host)
        .with_context(|| format!("connecting to {}", args.host))?;
    let query = mapper.query(&args.keyspace, &args.variable, &args.date);
    let summary = mapper
        .render(&mut store, &query, &args.output)
        .with_context(|| format!("rendering {} on {}", args.variable, args.date))?;

    info!(
        output = %args.output.display(),
        matched = summary.join.rows_matched,
        unmatched = summary.join.rows_unmatched,
        "done"
    );

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}
