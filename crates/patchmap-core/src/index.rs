//! Composite key indexer: scans the four categorical layers and maps every
//! patch key to a pixel that carries it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PatchMapError, PatchMapResult};
use crate::key::PatchKey;
use crate::layers::{LayerRole, LayerSet};
use crate::raster::{widen_no_data, CategoricalBand};

/// Pixel position, column first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelCoord {
    pub col: usize,
    pub row: usize,
}

impl PixelCoord {
    pub fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }
}

/// Which no-data sentinel each layer is compared against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDataPolicy {
    /// Each layer against its own declared sentinel.
    #[default]
    PerLayer,
    /// Every layer against the basin layer's sentinel.
    Reference,
}

/// Counters gathered while indexing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Pixels with data in all four layers.
    pub indexed_pixels: usize,
    /// Pixels skipped because at least one layer was no-data.
    pub no_data_pixels: usize,
    /// Indexed pixels whose key was already held by another pixel.
    pub aliased_pixels: usize,
}

/// Patch key → pixel coordinate. Built once per geometry, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PatchIndex {
    entries: HashMap<PatchKey, PixelCoord>,
    stats: IndexStats,
}

impl PatchIndex {
    pub fn get(&self, key: &PatchKey) -> Option<PixelCoord> {
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        self.stats
    }

    /// Store `key → coord`, the last write for a key wins.
    pub fn insert(&mut self, key: PatchKey, coord: PixelCoord) -> Option<PixelCoord> {
        self.entries.insert(key, coord)
    }
}

/// No-data value of each layer in the u32 comparison domain.
fn comparison_no_data<B: CategoricalBand>(
    layers: &LayerSet<B>,
    policy: NoDataPolicy,
) -> LayerSet<Option<u32>> {
    let reference = layers.basin.no_data();
    layers.by_ref().map(|_, band| {
        let declared = match policy {
            NoDataPolicy::PerLayer => band.no_data(),
            NoDataPolicy::Reference => reference,
        };
        declared.and_then(widen_no_data)
    })
}

/// Build the patch index from four aligned categorical layers.
///
/// All cell types are checked before the first scanline is read. Rows are
/// scanned top to bottom, one scanline per layer; a pixel that is no-data in
/// any layer contributes nothing.
#[tracing::instrument(skip(layers))]
pub fn build_patch_index<B: CategoricalBand>(
    layers: &mut LayerSet<B>,
    width: usize,
    height: usize,
    policy: NoDataPolicy,
) -> PatchMapResult<PatchIndex> {
    for (role, band) in layers.iter() {
        let cell_type = band.cell_type();
        if !cell_type.is_categorical() {
            return Err(PatchMapError::precondition(format!(
                "{role} layer has unsupported cell type {cell_type} \
                 (expected byte, uint16, int16, uint32 or int32)"
            )));
        }
        if band.size() != (width, height) {
            return Err(PatchMapError::precondition(format!(
                "{role} layer is {:?}, expected {:?}",
                band.size(),
                (width, height)
            )));
        }
    }

    let no_data = comparison_no_data(layers, policy);
    for (role, nd) in no_data.iter() {
        debug!(layer = %role, no_data = ?nd, "no-data in comparison domain");
    }
    let no_data = [no_data.basin, no_data.hillslope, no_data.zone, no_data.patch];

    let mut scanlines = [
        vec![0u32; width],
        vec![0u32; width],
        vec![0u32; width],
        vec![0u32; width],
    ];
    let mut index = PatchIndex::default();

    for row in 0..height {
        for (role, line) in LayerRole::ALL.into_iter().zip(scanlines.iter_mut()) {
            layers.get_mut(role).read_scanline(row, line)?;
        }

        for col in 0..width {
            let cells = [
                scanlines[0][col],
                scanlines[1][col],
                scanlines[2][col],
                scanlines[3][col],
            ];
            if cells.iter().zip(&no_data).any(|(&c, nd)| Some(c) == *nd) {
                index.stats.no_data_pixels += 1;
                continue;
            }
            let key = PatchKey::new(cells[0], cells[1], cells[2], cells[3]);
            if index.insert(key, PixelCoord::new(col, row)).is_some() {
                index.stats.aliased_pixels += 1;
            }
            index.stats.indexed_pixels += 1;
        }
    }

    debug!(
        keys = index.len(),
        indexed = index.stats.indexed_pixels,
        no_data = index.stats.no_data_pixels,
        aliased = index.stats.aliased_pixels,
        "patch index built"
    );
    Ok(index)
}
