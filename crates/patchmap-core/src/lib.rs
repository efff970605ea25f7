//! Patch-to-map: renders per-patch values from a keyed store onto the pixel
//! grid defined by four aligned categorical rasters (basin, hillslope, zone,
//! patch).
//!
//! A pixel's patch key is `basin:hillslope:zone:patch`. The index maps each
//! key to a pixel, store rows are joined through it, and the result is
//! written as a single-band float64 GeoTIFF.

pub mod error;
pub mod geometry;
pub mod geotiff;
pub mod index;
pub mod join;
pub mod key;
pub mod layers;
pub mod pipeline;
pub mod raster;
pub mod rasterize;
pub mod store;

#[cfg(test)]
mod testutil;

pub use error::{PatchMapError, PatchMapResult};
pub use key::PatchKey;
pub use layers::{LayerRole, LayerSet};
pub use pipeline::{PatchMapper, RunConfig, RunSummary};
pub use store::{CqlStore, KeyedStore, MemoryStore, VariableQuery};
