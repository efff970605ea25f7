//! Join resolver: places store values onto the pixel grid through the patch
//! index.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::index::PatchIndex;
use crate::key::PatchKey;

/// One row returned by the value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyedRow {
    pub patch_id: String,
    pub value: f64,
}

impl KeyedRow {
    pub fn new(patch_id: impl Into<String>, value: f64) -> Self {
        Self {
            patch_id: patch_id.into(),
            value,
        }
    }
}

/// Resolved values by pixel. Absent cells are written as no-data.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueGrid {
    /// Row-major, one slot per cell.
    Dense {
        width: usize,
        height: usize,
        cells: Vec<Option<f64>>,
    },
    /// Row → column → value, only resolved cells present.
    Sparse { rows: BTreeMap<usize, BTreeMap<usize, f64>> },
}

impl ValueGrid {
    pub fn dense(width: usize, height: usize) -> Self {
        ValueGrid::Dense {
            width,
            height,
            cells: vec![None; width * height],
        }
    }

    pub fn sparse() -> Self {
        ValueGrid::Sparse {
            rows: BTreeMap::new(),
        }
    }

    /// Dense when `width × height` fits in `dense_cell_limit`, sparse otherwise.
    pub fn for_grid(width: usize, height: usize, dense_cell_limit: usize) -> Self {
        match width.checked_mul(height) {
            Some(cells) if cells <= dense_cell_limit => Self::dense(width, height),
            _ => Self::sparse(),
        }
    }

    /// Set the value at a cell, returning the value it replaced.
    pub fn set(&mut self, col: usize, row: usize, value: f64) -> Option<f64> {
        match self {
            ValueGrid::Dense { width, height, cells } => {
                assert!(col < *width && row < *height, "cell ({col}, {row}) outside grid");
                cells[row * *width + col].replace(value)
            }
            ValueGrid::Sparse { rows } => rows.entry(row).or_default().insert(col, value),
        }
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        match self {
            ValueGrid::Dense { width, height, cells } => {
                if col < *width && row < *height {
                    cells[row * *width + col]
                } else {
                    None
                }
            }
            ValueGrid::Sparse { rows } => rows.get(&row).and_then(|r| r.get(&col)).copied(),
        }
    }

    /// Number of cells holding a value.
    pub fn resolved_cells(&self) -> usize {
        match self {
            ValueGrid::Dense { cells, .. } => cells.iter().filter(|c| c.is_some()).count(),
            ValueGrid::Sparse { rows } => rows.values().map(BTreeMap::len).sum(),
        }
    }

    pub fn is_dense(&self) -> bool {
        matches!(self, ValueGrid::Dense { .. })
    }
}

/// Counters gathered while joining.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    pub rows_received: usize,
    pub rows_matched: usize,
    /// Rows whose identifier is not a key of the index. Dropped.
    pub rows_unmatched: usize,
    /// Matched rows that replaced a value already placed on the same cell.
    pub cells_overwritten: usize,
}

/// Resolve every row against `index` and store its value in `grid`.
///
/// Rows are applied in iteration order, so for repeated identifiers the
/// later row wins. Unmatched identifiers are counted and dropped.
#[tracing::instrument(skip_all, fields(keys = index.len()))]
pub fn resolve_rows<I>(index: &PatchIndex, rows: I, grid: &mut ValueGrid) -> JoinStats
where
    I: IntoIterator<Item = KeyedRow>,
{
    let mut stats = JoinStats::default();
    for row in rows {
        stats.rows_received += 1;
        let coord = row
            .patch_id
            .parse::<PatchKey>()
            .ok()
            .and_then(|key| index.get(&key));
        let Some(coord) = coord else {
            trace!(patch_id = %row.patch_id, "no pixel for patch, dropping row");
            stats.rows_unmatched += 1;
            continue;
        };
        stats.rows_matched += 1;
        if grid.set(coord.col, coord.row, row.value).is_some() {
            stats.cells_overwritten += 1;
        }
    }
    debug!(
        received = stats.rows_received,
        matched = stats.rows_matched,
        unmatched = stats.rows_unmatched,
        "rows resolved"
    );
    stats
}
