//! Grid geometry shared by every input layer and the output raster, and the
//! alignment check that enforces it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PatchMapError, PatchMapResult};
use crate::layers::LayerRole;

/// Affine pixel → georeferenced transform, GDAL coefficient order:
/// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform (no rotation). `pixel_height` is normally negative.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self([origin_x, pixel_width, 0.0, origin_y, 0.0, pixel_height])
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    pub fn pixel_width(&self) -> f64 {
        self.0[1]
    }

    pub fn pixel_height(&self) -> f64 {
        self.0[5]
    }

    pub fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }
}

/// Spatial reference as carried by GeoTIFF: the key directory plus the
/// double and ASCII parameter blocks it points into. Compared structurally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpatialReference {
    pub key_directory: Vec<u16>,
    pub double_params: Vec<f64>,
    pub ascii_params: String,
}

/// GeoTIFF `GTCitationGeoKey`.
const GT_CITATION_GEO_KEY: u16 = 1026;
/// GeoTIFF `GeoAsciiParamsTag`, used as a key location.
const GEO_ASCII_PARAMS_TAG: u16 = 34737;

impl SpatialReference {
    /// Reference described only by a citation string (e.g. a WKT or EPSG label).
    pub fn from_citation(citation: &str) -> Self {
        let ascii_params = format!("{citation}|");
        let count = u16::try_from(ascii_params.len()).unwrap_or(u16::MAX);
        Self {
            key_directory: vec![
                1, 1, 0, 1, // header: version 1.1.0, one key
                GT_CITATION_GEO_KEY, GEO_ASCII_PARAMS_TAG, count, 0,
            ],
            double_params: Vec::new(),
            ascii_params,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.key_directory.is_empty() && self.double_params.is_empty() && self.ascii_params.is_empty()
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("<none>");
        }
        write!(
            f,
            "{:?} ({} geokey words, {} double params)",
            self.ascii_params.trim_end_matches('|'),
            self.key_directory.len(),
            self.double_params.len()
        )
    }
}

/// Size, placement and projection of a raster grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    pub projection: SpatialReference,
}

impl GridGeometry {
    pub fn cell_count(&self) -> usize {
        self.width * self.height
    }
}

/// Which attributes [`validate_alignment`] compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentPolicy {
    /// Also require an identical geotransform origin.
    pub check_origin: bool,
}

/// Require `candidate` to share the reference grid exactly.
///
/// Checked in order: pixel height, pixel width, raster width, raster height,
/// projection, then (optionally) origin. The first mismatch is reported.
pub fn validate_alignment(
    layer: LayerRole,
    reference: &GridGeometry,
    candidate: &GridGeometry,
    policy: AlignmentPolicy,
) -> PatchMapResult<()> {
    let mismatch = |attribute: &'static str, expected: String, found: String| {
        Err(PatchMapError::Alignment {
            layer,
            attribute,
            expected,
            found,
        })
    };

    let (ref_t, cand_t) = (&reference.transform, &candidate.transform);
    if cand_t.pixel_height() != ref_t.pixel_height() {
        return mismatch(
            "pixel height",
            ref_t.pixel_height().to_string(),
            cand_t.pixel_height().to_string(),
        );
    }
    if cand_t.pixel_width() != ref_t.pixel_width() {
        return mismatch(
            "pixel width",
            ref_t.pixel_width().to_string(),
            cand_t.pixel_width().to_string(),
        );
    }
    if candidate.width != reference.width {
        return mismatch(
            "raster width",
            reference.width.to_string(),
            candidate.width.to_string(),
        );
    }
    if candidate.height != reference.height {
        return mismatch(
            "raster height",
            reference.height.to_string(),
            candidate.height.to_string(),
        );
    }
    if candidate.projection != reference.projection {
        return mismatch(
            "projection",
            reference.projection.to_string(),
            candidate.projection.to_string(),
        );
    }
    if policy.check_origin && cand_t.origin() != ref_t.origin() {
        return mismatch(
            "origin",
            format!("{:?}", ref_t.origin()),
            format!("{:?}", cand_t.origin()),
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> GridGeometry {
        GridGeometry {
            width: 40,
            height: 30,
            transform: GeoTransform::north_up(270_000.0, 3_880_000.0, 10.0, -10.0),
            projection: SpatialReference::from_citation("NAD83 / UTM zone 17N"),
        }
    }

    fn attribute_of(err: PatchMapError) -> &'static str {
        match err {
            PatchMapError::Alignment { attribute, .. } => attribute,
            other => panic!("expected alignment error, got {other}"),
        }
    }

    #[test]
    fn identical_geometry_passes() {
        let r = reference();
        validate_alignment(LayerRole::Zone, &r, &r.clone(), AlignmentPolicy::default()).unwrap();
    }

    #[test]
    fn each_attribute_is_reported() {
        let r = reference();
        let policy = AlignmentPolicy::default();

        let mut c = r.clone();
        c.transform.0[5] = -30.0;
        assert_eq!(
            attribute_of(validate_alignment(LayerRole::Hillslope, &r, &c, policy).unwrap_err()),
            "pixel height"
        );

        let mut c = r.clone();
        c.transform.0[1] = 30.0;
        assert_eq!(
            attribute_of(validate_alignment(LayerRole::Hillslope, &r, &c, policy).unwrap_err()),
            "pixel width"
        );

        let mut c = r.clone();
        c.width += 1;
        assert_eq!(
            attribute_of(validate_alignment(LayerRole::Zone, &r, &c, policy).unwrap_err()),
            "raster width"
        );

        let mut c = r.clone();
        c.height -= 1;
        assert_eq!(
            attribute_of(validate_alignment(LayerRole::Zone, &r, &c, policy).unwrap_err()),
            "raster height"
        );

        let mut c = r.clone();
        c.projection = SpatialReference::from_citation("WGS 84");
        assert_eq!(
            attribute_of(validate_alignment(LayerRole::Patch, &r, &c, policy).unwrap_err()),
            "projection"
        );
    }

    #[test]
    fn pixel_size_comparison_is_exact() {
        let r = reference();
        let mut c = r.clone();
        c.transform.0[1] = 10.0 + 1e-12;
        assert!(validate_alignment(LayerRole::Zone, &r, &c, AlignmentPolicy::default()).is_err());
    }

    #[test]
    fn origin_only_checked_when_requested() {
        let r = reference();
        let mut c = r.clone();
        c.transform.0[0] += 10.0;
        validate_alignment(LayerRole::Patch, &r, &c, AlignmentPolicy::default()).unwrap();
        let strict = AlignmentPolicy { check_origin: true };
        assert_eq!(
            attribute_of(validate_alignment(LayerRole::Patch, &r, &c, strict).unwrap_err()),
            "origin"
        );
    }

    #[test]
    fn error_names_offending_layer() {
        let r = reference();
        let mut c = r.clone();
        c.width = 7;
        match validate_alignment(LayerRole::Hillslope, &r, &c, AlignmentPolicy::default()) {
            Err(PatchMapError::Alignment { layer, expected, found, .. }) => {
                assert_eq!(layer, LayerRole::Hillslope);
                assert_eq!(expected, "40");
                assert_eq!(found, "7");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
