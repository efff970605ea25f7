//! GeoTIFF reading and writing on top of the pure-Rust `tiff` crate.
//!
//! Georeferencing is carried by the GeoTIFF tags:
//!   ModelPixelScale + ModelTiepoint (north-up) or ModelTransformation (rotated),
//!   GeoKeyDirectory / GeoDoubleParams / GeoAsciiParams (spatial reference),
//!   GDAL_NODATA (ASCII no-data sentinel).
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tiff::decoder::{ChunkType, Decoder, DecodingResult, Limits};
use tiff::encoder::compression::{self, Compression};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;
use tiff::TiffResult;

use crate::error::{PatchMapError, PatchMapResult};
use crate::geometry::{GeoTransform, GridGeometry, SpatialReference};
use crate::raster::{copy_row, BandSink, CategoricalBand, CellType};

// ── Header ───────────────────────────────────────────────────────────────────

struct Header {
    geometry: GridGeometry,
    cell_type: CellType,
    no_data: Option<f64>,
}

fn open_decoder(path: &Path) -> PatchMapResult<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| PatchMapError::open(path, e))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| PatchMapError::open(path, e))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

fn read_header<R: Read + Seek>(path: &Path, decoder: &mut Decoder<R>) -> PatchMapResult<Header> {
    let open_err = |e: tiff::TiffError| PatchMapError::open(path, e);

    let (width, height) = decoder.dimensions().map_err(open_err)?;
    let cell_type = match decoder.colortype().map_err(open_err)? {
        tiff::ColorType::Gray(bits) => sample_cell_type(decoder, bits).map_err(open_err)?,
        other => {
            return Err(PatchMapError::precondition(format!(
                "{} is not a single-band raster ({other:?})",
                path.display()
            )))
        }
    };
    let transform = read_transform(decoder)
        .map_err(open_err)?
        .ok_or_else(|| PatchMapError::open(path, "geotransform cannot be fetched"))?;
    let projection = read_spatial_reference(decoder).map_err(open_err)?;
    let no_data = match find_string(decoder, Tag::GdalNodata).map_err(open_err)? {
        Some(text) => Some(parse_no_data(&text).ok_or_else(|| {
            PatchMapError::open(path, format!("unparseable GDAL_NODATA value {text:?}"))
        })?),
        None => None,
    };

    Ok(Header {
        geometry: GridGeometry {
            width: width as usize,
            height: height as usize,
            transform,
            projection,
        },
        cell_type,
        no_data,
    })
}

/// Cell type from bits per sample and the SampleFormat tag (1 = uint, 2 = int, 3 = float).
fn sample_cell_type<R: Read + Seek>(decoder: &mut Decoder<R>, bits: u8) -> TiffResult<CellType> {
    let format = match decoder.find_tag(Tag::SampleFormat)? {
        Some(value) => value.into_u32()?,
        None => 1,
    };
    Ok(match (format, bits) {
        (1, 8) => CellType::Byte,
        (1, 16) => CellType::UInt16,
        (1, 32) => CellType::UInt32,
        (1, 64) => CellType::UInt64,
        (2, 8) => CellType::Int8,
        (2, 16) => CellType::Int16,
        (2, 32) => CellType::Int32,
        (2, 64) => CellType::Int64,
        (3, 32) => CellType::Float32,
        (3, 64) => CellType::Float64,
        _ => CellType::Unknown,
    })
}

fn find_f64s<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> TiffResult<Option<Vec<f64>>> {
    decoder.find_tag(tag)?.map(|v| v.into_f64_vec()).transpose()
}

fn find_string<R: Read + Seek>(decoder: &mut Decoder<R>, tag: Tag) -> TiffResult<Option<String>> {
    decoder.find_tag(tag)?.map(|v| v.into_string()).transpose()
}

fn read_transform<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<Option<GeoTransform>> {
    // 4×4 row-major model transformation matrix.
    if let Some(m) = find_f64s(decoder, Tag::ModelTransformationTag)? {
        if m.len() >= 8 {
            return Ok(Some(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]])));
        }
    }
    let scale = find_f64s(decoder, Tag::ModelPixelScaleTag)?;
    let tiepoint = find_f64s(decoder, Tag::ModelTiepointTag)?;
    Ok(match (scale, tiepoint) {
        (Some(s), Some(t)) if s.len() >= 2 && t.len() >= 6 => {
            let (sx, sy) = (s[0], s[1]);
            Some(GeoTransform([t[3] - t[0] * sx, sx, 0.0, t[4] + t[1] * sy, 0.0, -sy]))
        }
        _ => None,
    })
}

fn read_spatial_reference<R: Read + Seek>(decoder: &mut Decoder<R>) -> TiffResult<SpatialReference> {
    let key_directory = match decoder.find_tag(Tag::GeoKeyDirectoryTag)? {
        Some(value) => value
            .into_u32_vec()?
            .into_iter()
            .map(|word| word as u16)
            .collect(),
        None => Vec::new(),
    };
    let double_params = find_f64s(decoder, Tag::GeoDoubleParamsTag)?.unwrap_or_default();
    let ascii_params = find_string(decoder, Tag::GeoAsciiParamsTag)?
        .map(|s| s.trim_end_matches('\0').to_string())
        .unwrap_or_default();
    Ok(SpatialReference {
        key_directory,
        double_params,
        ascii_params,
    })
}

fn parse_no_data(text: &str) -> Option<f64> {
    text.trim_matches(|c: char| c.is_whitespace() || c == '\0')
        .parse()
        .ok()
}

// ── Categorical input layer ──────────────────────────────────────────────────

/// Full-width rows decoded from one strip, or from one row of tiles.
#[derive(Debug, Default)]
struct RowBand {
    first_row: usize,
    rows: usize,
    cells: Vec<u32>,
}

impl RowBand {
    fn covers(&self, row: usize) -> bool {
        row >= self.first_row && row < self.first_row + self.rows
    }

    fn row(&self, row: usize, width: usize) -> &[u32] {
        let start = (row - self.first_row) * width;
        &self.cells[start..start + width]
    }
}

/// Widen a decoded chunk into the u32 comparison domain.
fn widen_cells(decoded: DecodingResult) -> Option<Vec<u32>> {
    Some(match decoded {
        DecodingResult::U8(v) => v.into_iter().map(u32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(u32::from).collect(),
        DecodingResult::U32(v) => v,
        // Signed cells keep their bit pattern in the u32 domain.
        DecodingResult::I16(v) => v.into_iter().map(|c| i32::from(c) as u32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|c| c as u32).collect(),
        _ => return None,
    })
}

/// Categorical GeoTIFF layer. The header (geometry, cell type, no-data) is
/// read on open; pixels are decoded one strip or tile row at a time as
/// scanlines are requested, and only the chunk covering the current row is
/// kept.
pub struct GeoTiffLayer {
    path: PathBuf,
    header: Header,
    decoder: Decoder<BufReader<File>>,
    band: RowBand,
}

impl GeoTiffLayer {
    pub fn open(path: impl AsRef<Path>) -> PatchMapResult<Self> {
        let path = path.as_ref();
        let mut decoder = open_decoder(path)?;
        let header = read_header(path, &mut decoder)?;
        Ok(Self {
            path: path.to_path_buf(),
            header,
            decoder,
            band: RowBand::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.header.geometry
    }

    /// Decode the rows sharing a chunk row with `row`. On failure the
    /// previously cached band is left untouched.
    fn load_band(&mut self, row: usize) -> PatchMapResult<RowBand> {
        let GridGeometry { width, height, .. } = self.header.geometry;
        let (chunk_width, chunk_height) = self.decoder.chunk_dimensions();
        let (chunk_width, chunk_height) = (chunk_width as usize, chunk_height as usize);
        let chunk_row = row / chunk_height;
        let first_row = chunk_row * chunk_height;
        let rows = chunk_height.min(height - first_row);
        let mut cells = vec![0u32; width * rows];

        let chunks_across = match self.decoder.get_chunk_type() {
            ChunkType::Strip => 1,
            ChunkType::Tile => width.div_ceil(chunk_width),
        };
        for chunk_col in 0..chunks_across {
            let index = (chunk_row * chunks_across + chunk_col) as u32;
            let decoded = self
                .decoder
                .read_chunk(index)
                .map_err(|e| PatchMapError::open(&self.path, e))?;
            let data = widen_cells(decoded).ok_or_else(|| {
                PatchMapError::precondition(format!(
                    "{} has unsupported cell type {}",
                    self.path.display(),
                    self.header.cell_type
                ))
            })?;

            let (data_width, data_height) = self.decoder.chunk_data_dimensions(index);
            let (data_width, data_height) = (data_width as usize, data_height as usize);
            let left = chunk_col * chunk_width;
            if data_height != rows
                || data.len() != data_width * data_height
                || left + data_width > width
            {
                return Err(PatchMapError::open(
                    &self.path,
                    format!("chunk {index} decoded to {data_width}×{data_height} cells"),
                ));
            }
            for (r, src) in data.chunks_exact(data_width).enumerate() {
                let dst = r * width + left;
                cells[dst..dst + data_width].copy_from_slice(src);
            }
        }

        Ok(RowBand {
            first_row,
            rows,
            cells,
        })
    }
}

impl CategoricalBand for GeoTiffLayer {
    fn size(&self) -> (usize, usize) {
        (self.header.geometry.width, self.header.geometry.height)
    }

    fn cell_type(&self) -> CellType {
        self.header.cell_type
    }

    fn no_data(&self) -> Option<f64> {
        self.header.no_data
    }

    fn read_scanline(&mut self, row: usize, buf: &mut [u32]) -> PatchMapResult<()> {
        if !self.header.cell_type.is_categorical() {
            return Err(PatchMapError::precondition(format!(
                "{} has unsupported cell type {}",
                self.path.display(),
                self.header.cell_type
            )));
        }
        if row >= self.header.geometry.height {
            return Err(PatchMapError::precondition(format!(
                "scanline {row} out of range for {}",
                self.path.display()
            )));
        }
        if !self.band.covers(row) {
            self.band = self.load_band(row)?;
        }
        copy_row(row, self.band.row(row, self.header.geometry.width), buf)
    }
}

// ── Float output ─────────────────────────────────────────────────────────────

/// Compression applied to the output raster. All options are lossless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCompression {
    #[default]
    Lzw,
    Deflate,
    None,
}

impl fmt::Display for OutputCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputCompression::Lzw => "lzw",
            OutputCompression::Deflate => "deflate",
            OutputCompression::None => "none",
        })
    }
}

impl FromStr for OutputCompression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lzw" => Ok(OutputCompression::Lzw),
            "deflate" => Ok(OutputCompression::Deflate),
            "none" => Ok(OutputCompression::None),
            other => Err(format!("unknown compression {other:?} (expected lzw, deflate or none)")),
        }
    }
}

/// Single-band float64 GeoTIFF. The file is created up front; rows are
/// buffered and the image is encoded by [`GeoTiffWriter::finish`].
pub struct GeoTiffWriter {
    path: PathBuf,
    file: File,
    geometry: GridGeometry,
    compression: OutputCompression,
    values: Vec<f64>,
    no_data: Option<f64>,
}

impl GeoTiffWriter {
    pub fn create(
        path: impl AsRef<Path>,
        geometry: &GridGeometry,
        compression: OutputCompression,
    ) -> PatchMapResult<Self> {
        let path = path.as_ref();
        if u32::try_from(geometry.width).is_err() || u32::try_from(geometry.height).is_err() {
            return Err(PatchMapError::precondition(format!(
                "{}×{} exceeds the TIFF size limit",
                geometry.width, geometry.height
            )));
        }
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            geometry: geometry.clone(),
            compression,
            values: Vec::with_capacity(geometry.cell_count()),
            no_data: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encode the buffered rows and tags, then flush and close the file.
    pub fn finish(self) -> PatchMapResult<()> {
        if self.values.len() != self.geometry.cell_count() {
            return Err(PatchMapError::precondition(format!(
                "{}: {} of {} cells written",
                self.path.display(),
                self.values.len(),
                self.geometry.cell_count()
            )));
        }
        let mut writer = BufWriter::new(self.file);
        {
            let mut encoder = TiffEncoder::new(&mut writer)?;
            let image = Image {
                geometry: &self.geometry,
                values: &self.values,
                no_data: self.no_data,
            };
            match self.compression {
                OutputCompression::Lzw => image.encode(&mut encoder, compression::Lzw)?,
                OutputCompression::Deflate => {
                    image.encode(&mut encoder, compression::Deflate::default())?
                }
                OutputCompression::None => image.encode(&mut encoder, compression::Uncompressed)?,
            }
        }
        writer.flush()?;
        Ok(())
    }
}

impl BandSink for GeoTiffWriter {
    fn write_row(&mut self, row: usize, values: &[f64]) -> PatchMapResult<()> {
        let width = self.geometry.width;
        if values.len() != width || row * width != self.values.len() {
            return Err(PatchMapError::precondition(format!(
                "{}: row {row} written out of order or with {} cells (width {width})",
                self.path.display(),
                values.len()
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

struct Image<'a> {
    geometry: &'a GridGeometry,
    values: &'a [f64],
    no_data: Option<f64>,
}

impl Image<'_> {
    fn encode<W: Write + Seek, D: Compression>(
        &self,
        encoder: &mut TiffEncoder<W>,
        compression: D,
    ) -> TiffResult<()> {
        let mut image = encoder.new_image_with_compression::<colortype::Gray64Float, D>(
            self.geometry.width as u32,
            self.geometry.height as u32,
            compression,
        )?;
        let dir = image.encoder();

        let t = self.geometry.transform.0;
        if self.geometry.transform.is_north_up() {
            dir.write_tag(Tag::ModelPixelScaleTag, &[t[1], -t[5], 0.0][..])?;
            dir.write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, t[0], t[3], 0.0][..])?;
        } else {
            let matrix = [
                t[1], t[2], 0.0, t[0], //
                t[4], t[5], 0.0, t[3], //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(Tag::ModelTransformationTag, &matrix[..])?;
        }

        let srs = &self.geometry.projection;
        if !srs.key_directory.is_empty() {
            dir.write_tag(Tag::GeoKeyDirectoryTag, &srs.key_directory[..])?;
        }
        if !srs.double_params.is_empty() {
            dir.write_tag(Tag::GeoDoubleParamsTag, &srs.double_params[..])?;
        }
        if !srs.ascii_params.is_empty() {
            dir.write_tag(Tag::GeoAsciiParamsTag, srs.ascii_params.as_str())?;
        }
        if let Some(no_data) = self.no_data {
            dir.write_tag(Tag::GdalNodata, no_data.to_string().as_str())?;
        }

        image.write_data(self.values)
    }
}

// ── Float input ──────────────────────────────────────────────────────────────

/// A float raster read back in full.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatRaster {
    pub geometry: GridGeometry,
    pub no_data: Option<f64>,
    pub values: Vec<f64>,
}

/// Read a single-band float32/float64 GeoTIFF (such as a rendered map).
pub fn read_float_raster(path: impl AsRef<Path>) -> PatchMapResult<FloatRaster> {
    let path = path.as_ref();
    let mut decoder = open_decoder(path)?;
    let header = read_header(path, &mut decoder)?;
    let values = match decoder.read_image()? {
        DecodingResult::F64(v) => v,
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        _ => {
            return Err(PatchMapError::precondition(format!(
                "{} is {}, expected a float raster",
                path.display(),
                header.cell_type
            )))
        }
    };
    Ok(FloatRaster {
        geometry: header.geometry,
        no_data: header.no_data,
        values,
    })
}
