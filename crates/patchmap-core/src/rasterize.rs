//! Rasterizer: expands the value grid into full rows of output cells.

use serde::{Deserialize, Serialize};

use crate::error::{PatchMapError, PatchMapResult};
use crate::join::ValueGrid;
use crate::raster::BandSink;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterStats {
    pub cells_with_value: usize,
    pub cells_no_data: usize,
}

/// Write every cell of a `width × height` grid to `sink`, row by row.
///
/// A cell takes its resolved value if the grid has one, `no_data` otherwise.
/// The sentinel is recorded on the sink after the last row.
pub fn rasterize<S: BandSink + ?Sized>(
    grid: &ValueGrid,
    width: usize,
    height: usize,
    no_data: f64,
    sink: &mut S,
) -> PatchMapResult<RasterStats> {
    if let ValueGrid::Dense { width: w, height: h, .. } = grid {
        if (*w, *h) != (width, height) {
            return Err(PatchMapError::precondition(format!(
                "value grid is {w}×{h}, output is {width}×{height}"
            )));
        }
    }

    let mut stats = RasterStats::default();
    let mut line = vec![no_data; width];

    for row in 0..height {
        let mut resolved = 0;
        match grid {
            ValueGrid::Dense { cells, .. } => {
                for (out, cell) in line.iter_mut().zip(&cells[row * width..(row + 1) * width]) {
                    *out = match cell {
                        Some(value) => {
                            resolved += 1;
                            *value
                        }
                        None => no_data,
                    };
                }
            }
            ValueGrid::Sparse { rows } => {
                line.fill(no_data);
                if let Some(bucket) = rows.get(&row) {
                    for (&col, &value) in bucket.range(..width) {
                        line[col] = value;
                        resolved += 1;
                    }
                }
            }
        }
        stats.cells_with_value += resolved;
        stats.cells_no_data += width - resolved;
        sink.write_row(row, &line)?;
    }

    sink.set_no_data(no_data)?;
    Ok(stats)
}
