//! Request validation: bounding-box geometry, area bounds and the output
//! pixel grid.
//!
//! Checks run in a fixed order (coordinates, area, resolution, grid size) so
//! a geometry problem is always reported before any resolution adjustment.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use aquasat_core::BoundingBox;

use crate::registry::SensorProfile;

/// Configurable bounds applied by [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationLimits {
    /// Smallest accepted bbox side, degrees
    pub min_extent_deg: f64,
    /// Largest accepted bbox side, degrees
    pub max_extent_deg: f64,
    /// Largest accepted output dimension, pixels
    pub max_raster_px: usize,
    /// Approximate ground distance of one degree
    pub metres_per_degree: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            min_extent_deg: 0.001,
            max_extent_deg: 10.0,
            max_raster_px: 2500,
            metres_per_degree: 111_000.0,
        }
    }
}

impl ValidationLimits {
    /// Reject limits no request could satisfy.
    pub fn check(&self) -> Result<(), ValidationError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.min_extent_deg) || !positive(self.max_extent_deg) {
            return Err(ValidationError::InvalidLimits(format!(
                "extents must be positive, got min {} max {}",
                self.min_extent_deg, self.max_extent_deg
            )));
        }
        if self.min_extent_deg > self.max_extent_deg {
            return Err(ValidationError::InvalidLimits(format!(
                "min extent {}° exceeds max extent {}°",
                self.min_extent_deg, self.max_extent_deg
            )));
        }
        if self.max_raster_px == 0 {
            return Err(ValidationError::InvalidLimits(
                "maxRasterPx must be at least 1".into(),
            ));
        }
        if !positive(self.metres_per_degree) {
            return Err(ValidationError::InvalidLimits(format!(
                "metresPerDegree must be positive, got {}",
                self.metres_per_degree
            )));
        }
        Ok(())
    }
}

/// Resolution and output dimensions a request will be fetched at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedGrid {
    pub resolution_m: f64,
    pub width: usize,
    pub height: usize,
    /// Adjustments made while resolving
    pub notes: Vec<String>,
}

impl ResolvedGrid {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("bbox {name} is not a finite number ({value})")]
    NonFinite { name: &'static str, value: f64 },

    #[error("bbox {name} = {value} is outside the valid range [{min}, {max}]")]
    OutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("bbox {low_name} ({low}) must be less than {high_name} ({high})")]
    Inverted {
        low_name: &'static str,
        low: f64,
        high_name: &'static str,
        high: f64,
    },

    #[error("bbox {axis} of {extent}° is below the minimum area of {min}° per side")]
    BelowMinimumArea {
        axis: &'static str,
        extent: f64,
        min: f64,
    },

    #[error("bbox {axis} of {extent}° exceeds the maximum area of {max}° per side")]
    ExceedsMaximumArea {
        axis: &'static str,
        extent: f64,
        max: f64,
    },

    #[error("resolution must be a positive number of metres, got {value}")]
    InvalidResolution { value: f64 },

    #[error("invalid validation limits: {0}")]
    InvalidLimits(String),
}

/// Validate `bbox` and resolve the output grid for `profile`.
pub fn validate(
    bbox: &BoundingBox,
    resolution_m: f64,
    profile: &SensorProfile,
    limits: &ValidationLimits,
) -> Result<ResolvedGrid, ValidationError> {
    limits.check()?;
    check_coordinates(bbox)?;
    check_extent(bbox, limits)?;

    if !resolution_m.is_finite() || resolution_m <= 0.0 {
        return Err(ValidationError::InvalidResolution {
            value: resolution_m,
        });
    }

    let mut notes = Vec::new();
    let mut resolution = resolution_m;

    if resolution < profile.native_resolution_m {
        let note = format!(
            "requested resolution {}m is finer than {} native {}m, using {}m",
            resolution_m, profile.id, profile.native_resolution_m, profile.native_resolution_m
        );
        warn!("{}", note);
        notes.push(note);
        resolution = profile.native_resolution_m;
    }

    let (mut width, mut height) = pixel_dimensions(bbox, resolution, limits);

    if width > limits.max_raster_px || height > limits.max_raster_px {
        let max_deg = bbox.width_deg().max(bbox.height_deg());
        let coarser = resolution.max(max_deg * limits.metres_per_degree / limits.max_raster_px as f64);
        let note = format!(
            "{}x{} px exceeds the {} px limit, coarsening resolution from {}m to {:.2}m",
            width, height, limits.max_raster_px, resolution, coarser
        );
        info!("{}", note);
        notes.push(note);
        resolution = coarser;
        (width, height) = pixel_dimensions(bbox, resolution, limits);
    }

    Ok(ResolvedGrid {
        resolution_m: resolution,
        width: width.min(limits.max_raster_px),
        height: height.min(limits.max_raster_px),
        notes,
    })
}

fn check_coordinates(bbox: &BoundingBox) -> Result<(), ValidationError> {
    let coords = [
        ("west", bbox.west, 180.0),
        ("south", bbox.south, 90.0),
        ("east", bbox.east, 180.0),
        ("north", bbox.north, 90.0),
    ];
    for (name, value, bound) in coords {
        if !value.is_finite() {
            return Err(ValidationError::NonFinite { name, value });
        }
        if !(-bound..=bound).contains(&value) {
            return Err(ValidationError::OutOfRange {
                name,
                value,
                min: -bound,
                max: bound,
            });
        }
    }

    if bbox.west >= bbox.east {
        return Err(ValidationError::Inverted {
            low_name: "west",
            low: bbox.west,
            high_name: "east",
            high: bbox.east,
        });
    }
    if bbox.south >= bbox.north {
        return Err(ValidationError::Inverted {
            low_name: "south",
            low: bbox.south,
            high_name: "north",
            high: bbox.north,
        });
    }
    Ok(())
}

fn check_extent(bbox: &BoundingBox, limits: &ValidationLimits) -> Result<(), ValidationError> {
    for (axis, extent) in [("width", bbox.width_deg()), ("height", bbox.height_deg())] {
        if extent < limits.min_extent_deg {
            return Err(ValidationError::BelowMinimumArea {
                axis,
                extent,
                min: limits.min_extent_deg,
            });
        }
        if extent > limits.max_extent_deg {
            return Err(ValidationError::ExceedsMaximumArea {
                axis,
                extent,
                max: limits.max_extent_deg,
            });
        }
    }
    Ok(())
}

/// Output grid for `bbox` at `resolution_m`, at least one pixel per side
fn pixel_dimensions(bbox: &BoundingBox, resolution_m: f64, limits: &ValidationLimits) -> (usize, usize) {
    let (_, center_lat) = bbox.center();
    let width_m = bbox.width_deg() * limits.metres_per_degree * center_lat.to_radians().cos();
    let height_m = bbox.height_deg() * limits.metres_per_degree;
    let px = |m: f64| ((m / resolution_m).round() as usize).max(1);
    (px(width_m), px(height_m))
}
