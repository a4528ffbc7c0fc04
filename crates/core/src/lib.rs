//! # AquaSat Core
//!
//! Core types shared by the AquaSat crates.
//!
//! This crate provides:
//! - `Raster<T>`: Generic raster grid type
//! - `GeoTransform`: North-up geographic georeferencing for a pixel grid
//! - `BandStack`: co-registered bands keyed by logical name
//! - `BoundingBox` / `TimeRange`: the area and period of an analysis request

pub mod error;
pub mod geo;
pub mod raster;

pub use error::{Error, Result};
pub use geo::{BoundingBox, TimeRange};
pub use raster::{BandStack, GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::geo::{BoundingBox, TimeRange};
    pub use crate::raster::{BandStack, GeoTransform, Raster, RasterElement};
}
