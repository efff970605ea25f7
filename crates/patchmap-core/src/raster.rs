//! Band-level traits the core components read from and write to, plus
//! in-memory implementations of both.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PatchMapError, PatchMapResult};

/// Sample type of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Int8,
    UInt64,
    Int64,
    Float32,
    Float64,
    Unknown,
}

impl CellType {
    /// Integer widths a categorical layer may use.
    pub fn is_categorical(self) -> bool {
        matches!(
            self,
            CellType::Byte | CellType::UInt16 | CellType::Int16 | CellType::UInt32 | CellType::Int32
        )
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CellType::Byte => "byte",
            CellType::UInt16 => "uint16",
            CellType::Int16 => "int16",
            CellType::UInt32 => "uint32",
            CellType::Int32 => "int32",
            CellType::Int8 => "int8",
            CellType::UInt64 => "uint64",
            CellType::Int64 => "int64",
            CellType::Float32 => "float32",
            CellType::Float64 => "float64",
            CellType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Map a declared no-data value into the u32 domain cells are compared in.
///
/// Truncated to an integer and reinterpreted as two's complement, the same
/// way signed cells are widened. Non-finite or fractional sentinels cannot
/// equal any integer cell and yield `None`.
pub fn widen_no_data(no_data: f64) -> Option<u32> {
    if !no_data.is_finite() || no_data.fract() != 0.0 {
        return None;
    }
    Some(no_data as i64 as u32)
}

/// Single-band categorical raster read one scanline at a time.
pub trait CategoricalBand {
    /// `(width, height)` in pixels.
    fn size(&self) -> (usize, usize);

    fn cell_type(&self) -> CellType;

    fn no_data(&self) -> Option<f64>;

    /// Fill `buf` (length = width) with row `row`, widened to u32.
    fn read_scanline(&mut self, row: usize, buf: &mut [u32]) -> PatchMapResult<()>;
}

impl<B: CategoricalBand + ?Sized> CategoricalBand for &mut B {
    fn size(&self) -> (usize, usize) {
        (**self).size()
    }

    fn cell_type(&self) -> CellType {
        (**self).cell_type()
    }

    fn no_data(&self) -> Option<f64> {
        (**self).no_data()
    }

    fn read_scanline(&mut self, row: usize, buf: &mut [u32]) -> PatchMapResult<()> {
        (**self).read_scanline(row, buf)
    }
}

/// Single-band float64 output written row by row in ascending row order.
pub trait BandSink {
    fn write_row(&mut self, row: usize, values: &[f64]) -> PatchMapResult<()>;

    /// Record the band's no-data sentinel. Called once, after the last row.
    fn set_no_data(&mut self, no_data: f64) -> PatchMapResult<()>;
}

/// Copy `src` into a scanline buffer, checking the row length.
pub(crate) fn copy_row(row: usize, src: &[u32], buf: &mut [u32]) -> PatchMapResult<()> {
    if src.len() != buf.len() {
        return Err(PatchMapError::precondition(format!(
            "scanline {row} has {} cells but the buffer holds {}",
            src.len(),
            buf.len()
        )));
    }
    buf.copy_from_slice(src);
    Ok(())
}

// ── In-memory categorical layer ──────────────────────────────────────────────

/// Categorical layer held in memory, row-major, already widened to u32.
#[derive(Debug, Clone)]
pub struct MemoryLayer {
    pub width: usize,
    pub height: usize,
    pub cell_type: CellType,
    pub no_data: Option<f64>,
    pub cells: Vec<u32>,
    /// Number of scanlines served so far.
    pub reads: usize,
}

impl MemoryLayer {
    pub fn new(width: usize, height: usize, cells: Vec<u32>) -> Self {
        assert_eq!(cells.len(), width * height, "cell count must equal width × height");
        Self {
            width,
            height,
            cell_type: CellType::UInt32,
            no_data: None,
            cells,
            reads: 0,
        }
    }

    /// Same value everywhere.
    pub fn filled(width: usize, height: usize, value: u32) -> Self {
        Self::new(width, height, vec![value; width * height])
    }

    pub fn with_no_data(mut self, no_data: f64) -> Self {
        self.no_data = Some(no_data);
        self
    }

    pub fn with_cell_type(mut self, cell_type: CellType) -> Self {
        self.cell_type = cell_type;
        self
    }

    pub fn set(&mut self, col: usize, row: usize, value: u32) {
        self.cells[row * self.width + col] = value;
    }
}

impl CategoricalBand for MemoryLayer {
    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn cell_type(&self) -> CellType {
        self.cell_type
    }

    fn no_data(&self) -> Option<f64> {
        self.no_data
    }

    fn read_scanline(&mut self, row: usize, buf: &mut [u32]) -> PatchMapResult<()> {
        if row >= self.height {
            return Err(PatchMapError::precondition(format!(
                "scanline {row} out of range (height {})",
                self.height
            )));
        }
        self.reads += 1;
        let start = row * self.width;
        copy_row(row, &self.cells[start..start + self.width], buf)
    }
}

// ── In-memory output band ────────────────────────────────────────────────────

/// Float64 band collected in memory, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRaster {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f64>,
    pub no_data: Option<f64>,
}

impl MemoryRaster {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            values: Vec::with_capacity(width * height),
            no_data: None,
        }
    }

    pub fn get(&self, col: usize, row: usize) -> f64 {
        self.values[row * self.width + col]
    }
}

impl BandSink for MemoryRaster {
    fn write_row(&mut self, row: usize, values: &[f64]) -> PatchMapResult<()> {
        if values.len() != self.width || row * self.width != self.values.len() {
            return Err(PatchMapError::precondition(format!(
                "row {row} written out of order or with {} cells (width {})",
                values.len(),
                self.width
            )));
        }
        self.values.extend_from_slice(values);
        Ok(())
    }

    fn set_no_data(&mut self, no_data: f64) -> PatchMapResult<()> {
        self.no_data = Some(no_data);
        Ok(())
    }
}
