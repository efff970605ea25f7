//! Small GeoTIFF fixtures for tests.

use std::fs::{self, File};
use std::path::Path;

use tiff::encoder::colortype::{self, ColorType};
use tiff::encoder::compression::{Compression, Lzw, Uncompressed};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;

use crate::geometry::GridGeometry;

fn write_georeferenced<C: ColorType, D: Compression>(
    path: &Path,
    geometry: &GridGeometry,
    data: &[C::Inner],
    no_data: Option<f64>,
    compression: D,
    rows_per_strip: Option<u32>,
) where
    [C::Inner]: TiffValue,
{
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder
        .new_image_with_compression::<C, D>(
            geometry.width as u32,
            geometry.height as u32,
            compression,
        )
        .unwrap();
    if let Some(rows) = rows_per_strip {
        image.rows_per_strip(rows).unwrap();
    }
    let t = geometry.transform.0;
    let dir = image.encoder();
    dir.write_tag(Tag::ModelPixelScaleTag, &[t[1], -t[5], 0.0][..]).unwrap();
    dir.write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, t[0], t[3], 0.0][..]).unwrap();
    let srs = &geometry.projection;
    dir.write_tag(Tag::GeoKeyDirectoryTag, &srs.key_directory[..]).unwrap();
    dir.write_tag(Tag::GeoAsciiParamsTag, srs.ascii_params.as_str()).unwrap();
    if let Some(nd) = no_data {
        dir.write_tag(Tag::GdalNodata, nd.to_string().as_str()).unwrap();
    }
    image.write_data(data).unwrap();
}

/// North-up uint16 categorical layer.
pub(crate) fn write_categorical_u16(
    path: &Path,
    geometry: &GridGeometry,
    cells: &[u16],
    no_data: Option<f64>,
) {
    write_georeferenced::<colortype::Gray16, _>(path, geometry, cells, no_data, Uncompressed, None);
}

/// LZW uint16 layer split into strips of `rows_per_strip` rows.
pub(crate) fn write_categorical_u16_strips(
    path: &Path,
    geometry: &GridGeometry,
    cells: &[u16],
    rows_per_strip: u32,
) {
    write_georeferenced::<colortype::Gray16, _>(
        path,
        geometry,
        cells,
        None,
        Lzw,
        Some(rows_per_strip),
    );
}

/// North-up uint8 categorical layer.
pub(crate) fn write_categorical_u8(
    path: &Path,
    geometry: &GridGeometry,
    cells: &[u8],
    no_data: Option<f64>,
) {
    write_georeferenced::<colortype::Gray8, _>(path, geometry, cells, no_data, Uncompressed, None);
}

pub(crate) fn write_categorical_i16(
    path: &Path,
    geometry: &GridGeometry,
    cells: &[i16],
    no_data: Option<f64>,
) {
    write_georeferenced::<colortype::GrayI16, _>(path, geometry, cells, no_data, Uncompressed, None);
}

pub(crate) fn write_categorical_i32(
    path: &Path,
    geometry: &GridGeometry,
    cells: &[i32],
    no_data: Option<f64>,
) {
    write_georeferenced::<colortype::GrayI32, _>(path, geometry, cells, no_data, Uncompressed, None);
}

pub(crate) fn write_categorical_u32(
    path: &Path,
    geometry: &GridGeometry,
    cells: &[u32],
    no_data: Option<f64>,
) {
    write_georeferenced::<colortype::Gray32, _>(path, geometry, cells, no_data, Uncompressed, None);
}

/// North-up float32 layer without a no-data tag.
pub(crate) fn write_float32(path: &Path, geometry: &GridGeometry, cells: &[f32]) {
    write_georeferenced::<colortype::Gray32Float, _>(path, geometry, cells, None, Uncompressed, None);
}

/// Overwrite `len` bytes of the first strip with 0xFF.
pub(crate) fn corrupt_first_strip(path: &Path, len: usize) {
    let (offset, count) = {
        let mut decoder = tiff::decoder::Decoder::new(File::open(path).unwrap()).unwrap();
        let offsets = decoder.get_tag_u32_vec(Tag::StripOffsets).unwrap();
        let counts = decoder.get_tag_u32_vec(Tag::StripByteCounts).unwrap();
        (offsets[0] as usize, counts[0] as usize)
    };
    let mut bytes = fs::read(path).unwrap();
    bytes[offset..offset + len.min(count)].fill(0xFF);
    fs::write(path, bytes).unwrap();
}

// ── Hand-built tiled layer ───────────────────────────────────────────────────

const SHORT: u16 = 3;
const LONG: u16 = 4;
const ASCII: u16 = 2;
const DOUBLE: u16 = 12;

/// Uncompressed little-endian uint8 layer stored as `tile × tile` tiles.
/// The encoder only writes strips, so the file is laid out by hand.
pub(crate) fn write_tiled_u8(path: &Path, geometry: &GridGeometry, tile: usize, cells: &[u8]) {
    let (width, height) = (geometry.width, geometry.height);
    let (across, down) = (width.div_ceil(tile), height.div_ceil(tile));

    // Header, then tile data, then out-of-line tag values, then the IFD.
    let mut data = Vec::new();
    let mut offsets = Vec::new();
    for tile_row in 0..down {
        for tile_col in 0..across {
            offsets.push((8 + data.len()) as u32);
            for r in 0..tile {
                for c in 0..tile {
                    let (row, col) = (tile_row * tile + r, tile_col * tile + c);
                    data.push(if row < height && col < width { cells[row * width + col] } else { 0 });
                }
            }
        }
    }
    let counts = vec![(tile * tile) as u32; offsets.len()];

    let t = geometry.transform.0;
    let srs = &geometry.projection;
    let le_u16 = |v: &[u16]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();
    let le_u32 = |v: &[u32]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();
    let le_f64 = |v: &[f64]| v.iter().flat_map(|x| x.to_le_bytes()).collect::<Vec<u8>>();
    let mut ascii = srs.ascii_params.clone().into_bytes();
    ascii.push(0);

    // (tag, type, count, payload), sorted by tag.
    let entries: Vec<(u16, u16, usize, Vec<u8>)> = vec![
        (256, LONG, 1, le_u32(&[width as u32])),
        (257, LONG, 1, le_u32(&[height as u32])),
        (258, SHORT, 1, le_u16(&[8])),
        (259, SHORT, 1, le_u16(&[1])),
        (262, SHORT, 1, le_u16(&[1])),
        (277, SHORT, 1, le_u16(&[1])),
        (322, LONG, 1, le_u32(&[tile as u32])),
        (323, LONG, 1, le_u32(&[tile as u32])),
        (324, LONG, offsets.len(), le_u32(&offsets)),
        (325, LONG, counts.len(), le_u32(&counts)),
        (33550, DOUBLE, 3, le_f64(&[t[1], -t[5], 0.0])),
        (33922, DOUBLE, 6, le_f64(&[0.0, 0.0, 0.0, t[0], t[3], 0.0])),
        (34735, SHORT, srs.key_directory.len(), le_u16(&srs.key_directory)),
        (34737, ASCII, ascii.len(), ascii),
    ];

    let extra_base = 8 + data.len();
    let mut extra = Vec::new();
    let mut ifd = Vec::new();
    ifd.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, kind, count, payload) in &entries {
        ifd.extend_from_slice(&tag.to_le_bytes());
        ifd.extend_from_slice(&kind.to_le_bytes());
        ifd.extend_from_slice(&(*count as u32).to_le_bytes());
        if payload.len() <= 4 {
            let mut inline = payload.clone();
            inline.resize(4, 0);
            ifd.extend_from_slice(&inline);
        } else {
            if extra.len() % 2 == 1 {
                extra.push(0);
            }
            ifd.extend_from_slice(&((extra_base + extra.len()) as u32).to_le_bytes());
            extra.extend_from_slice(payload);
        }
    }
    ifd.extend_from_slice(&0u32.to_le_bytes());
    if extra.len() % 2 == 1 {
        extra.push(0);
    }
    let ifd_offset = (extra_base + extra.len()) as u32;

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"II");
    bytes.extend_from_slice(&42u16.to_le_bytes());
    bytes.extend_from_slice(&ifd_offset.to_le_bytes());
    bytes.extend_from_slice(&data);
    bytes.extend_from_slice(&extra);
    bytes.extend_from_slice(&ifd);
    fs::write(path, bytes).unwrap();
}
