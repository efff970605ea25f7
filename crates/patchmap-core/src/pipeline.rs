//! Orchestrator: open and align the layers, build the patch index, then
//! render any number of variable/date queries against it.
//!
//! Stage order for one map:
//!   1. Open the basin layer; it defines the output geometry.
//!   2. Open hillslope, zone and patch; each must align with the basin.
//!   3. Build the patch index (once per `PatchMapper`).
//!   4. Fetch the store rows for the query.
//!   5. Join rows onto the value grid.
//!   6. Create the output raster, rasterize, record no-data, close.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{PatchMapError, PatchMapResult};
use crate::geometry::{validate_alignment, AlignmentPolicy, GridGeometry};
use crate::geotiff::{GeoTiffLayer, GeoTiffWriter, OutputCompression};
use crate::index::{build_patch_index, IndexStats, NoDataPolicy, PatchIndex};
use crate::join::{resolve_rows, JoinStats, ValueGrid};
use crate::layers::{LayerRole, LayerSet};
use crate::raster::{BandSink, CategoricalBand};
use crate::rasterize::{rasterize, RasterStats};
use crate::store::{KeyedStore, VariableQuery, DEFAULT_TABLE};

// ── Configuration ────────────────────────────────────────────────────────────

/// Tunables of a run. Every field has a default, so a config file only
/// needs the fields it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Sentinel written to cells without a resolved value.
    pub output_no_data: f64,
    pub compression: OutputCompression,
    /// Store table holding (variable, date, patchid, value).
    pub table: String,
    /// Largest grid (in cells) joined into a dense buffer; bigger grids use
    /// the sparse row → column map.
    pub dense_cell_limit: usize,
    pub no_data_policy: NoDataPolicy,
    /// Also require every layer to share the basin layer's origin.
    pub check_origin: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_no_data: -9999.0,
            compression: OutputCompression::Lzw,
            table: DEFAULT_TABLE.to_string(),
            dense_cell_limit: 16 * 1024 * 1024,
            no_data_policy: NoDataPolicy::PerLayer,
            check_origin: false,
        }
    }
}

impl RunConfig {
    pub fn from_json(text: &str) -> PatchMapResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| PatchMapError::precondition(format!("invalid run config: {e}")))
    }

    fn alignment(&self) -> AlignmentPolicy {
        AlignmentPolicy {
            check_origin: self.check_origin,
        }
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// What one rendered map contains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub variable: String,
    pub date: String,
    pub output: Option<PathBuf>,
    pub width: usize,
    pub height: usize,
    pub index_keys: usize,
    pub index: IndexStats,
    pub join: JoinStats,
    pub raster: RasterStats,
}

// ── Mapper ───────────────────────────────────────────────────────────────────

/// Validated geometry plus the patch index built from it.
#[derive(Debug, Clone)]
pub struct PatchMapper {
    geometry: GridGeometry,
    index: PatchIndex,
    config: RunConfig,
}

impl PatchMapper {
    /// Open the four GeoTIFF layers, check their alignment against the basin
    /// layer and index them.
    pub fn open(paths: &LayerSet<PathBuf>, config: RunConfig) -> PatchMapResult<Self> {
        for (role, path) in paths.iter() {
            info!(layer = %role, path = %path.display(), "categorical layer");
        }
        let basin = GeoTiffLayer::open(&paths.basin)?;
        let reference = basin.geometry().clone();
        info!(
            width = reference.width,
            height = reference.height,
            projection = %reference.projection,
            "reference geometry from basin layer"
        );

        let policy = config.alignment();
        let open_aligned = |role: LayerRole| -> PatchMapResult<GeoTiffLayer> {
            let layer = GeoTiffLayer::open(paths.get(role))?;
            validate_alignment(role, &reference, layer.geometry(), policy)?;
            Ok(layer)
        };
        let hillslope = open_aligned(LayerRole::Hillslope)?;
        let zone = open_aligned(LayerRole::Zone)?;
        let patch = open_aligned(LayerRole::Patch)?;

        let mut layers = LayerSet::new(basin, hillslope, zone, patch);
        Self::from_layers(reference, &mut layers, config)
    }

    /// Index already-open bands. Alignment is the caller's responsibility;
    /// only each band's width and height are checked against `geometry`.
    pub fn from_layers<B: CategoricalBand>(
        geometry: GridGeometry,
        layers: &mut LayerSet<B>,
        config: RunConfig,
    ) -> PatchMapResult<Self> {
        let index = build_patch_index(
            layers,
            geometry.width,
            geometry.height,
            config.no_data_policy,
        )?;
        let stats = index.stats();
        info!(
            keys = index.len(),
            indexed_pixels = stats.indexed_pixels,
            "patch index ready"
        );
        if stats.aliased_pixels > 0 {
            warn!(
                aliased_pixels = stats.aliased_pixels,
                "pixels share a patch key with another pixel; only the last one is mapped"
            );
        }
        Ok(Self {
            geometry,
            index,
            config,
        })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn index(&self) -> &PatchIndex {
        &self.index
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Query for `variable` on `date` against this mapper's table.
    pub fn query(&self, keyspace: &str, variable: &str, date: &str) -> VariableQuery {
        VariableQuery::new(keyspace, variable, date).with_table(self.config.table.clone())
    }

    fn resolve<K: KeyedStore + ?Sized>(
        &self,
        store: &mut K,
        query: &VariableQuery,
    ) -> PatchMapResult<(ValueGrid, JoinStats)> {
        let rows = store.fetch(query)?;
        info!(
            variable = %query.variable,
            date = %query.date,
            rows = rows.len(),
            "store rows fetched"
        );

        let mut grid = ValueGrid::for_grid(
            self.geometry.width,
            self.geometry.height,
            self.config.dense_cell_limit,
        );
        let join = resolve_rows(&self.index, rows, &mut grid);
        if join.rows_unmatched > 0 {
            warn!(
                unmatched = join.rows_unmatched,
                "store rows without a pixel in this geometry were dropped"
            );
        }
        Ok((grid, join))
    }

    fn summary(
        &self,
        query: &VariableQuery,
        output: Option<PathBuf>,
        join: JoinStats,
        raster: RasterStats,
    ) -> RunSummary {
        RunSummary {
            variable: query.variable.clone(),
            date: query.date.clone(),
            output,
            width: self.geometry.width,
            height: self.geometry.height,
            index_keys: self.index.len(),
            index: self.index.stats(),
            join,
            raster,
        }
    }

    /// Render one map into any band sink.
    pub fn render_into<K, S>(
        &self,
        store: &mut K,
        query: &VariableQuery,
        sink: &mut S,
    ) -> PatchMapResult<RunSummary>
    where
        K: KeyedStore + ?Sized,
        S: BandSink + ?Sized,
    {
        let (grid, join) = self.resolve(store, query)?;
        let raster = rasterize(
            &grid,
            self.geometry.width,
            self.geometry.height,
            self.config.output_no_data,
            sink,
        )?;
        Ok(self.summary(query, None, join, raster))
    }

    /// Render one map to a GeoTIFF at `output`. The file is only created once
    /// the store rows have been fetched.
    pub fn render<K: KeyedStore + ?Sized>(
        &self,
        store: &mut K,
        query: &VariableQuery,
        output: &Path,
    ) -> PatchMapResult<RunSummary> {
        let (grid, join) = self.resolve(store, query)?;

        let mut writer = GeoTiffWriter::create(output, &self.geometry, self.config.compression)?;
        let raster = rasterize(
            &grid,
            self.geometry.width,
            self.geometry.height,
            self.config.output_no_data,
            &mut writer,
        )?;
        writer.finish()?;
        info!(
            output = %output.display(),
            cells_with_value = raster.cells_with_value,
            "map written"
        );
        Ok(self.summary(query, Some(output.to_path_buf()), join, raster))
    }
}
