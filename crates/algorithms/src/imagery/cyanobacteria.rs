//! Cyanobacteria bloom estimate from the water index
//!
//! An empirical density curve over open water:
//! `density = max_density * exp(-index * decay)` cells/mL for pixels whose
//! index is above `water_above`, zero elsewhere. The mean density over those
//! pixels sets the bloom severity.

use serde::{Deserialize, Serialize};
use aquasat_core::raster::Raster;

/// Parameters of the density curve and the severity bands
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BloomParams {
    /// Index value above which a pixel is open water for the estimate
    pub water_above: f64,
    /// Density at index 0, cells/mL
    pub max_density: f64,
    pub decay: f64,
    /// Mean density from which a bloom is moderate
    pub moderate_from: f64,
    /// Mean density from which a bloom is high
    pub high_from: f64,
}

impl Default for BloomParams {
    fn default() -> Self {
        Self {
            water_above: 0.2,
            max_density: 10_000.0,
            decay: 10.0,
            moderate_from: 2_000.0,
            high_from: 5_000.0,
        }
    }
}

/// Bloom severity band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BloomSeverity {
    Low,
    Moderate,
    High,
}

impl BloomSeverity {
    /// Confidence in the band, percent. Higher densities are less certain.
    pub fn confidence(self) -> f64 {
        match self {
            BloomSeverity::Low => 80.0,
            BloomSeverity::Moderate => 70.0,
            BloomSeverity::High => 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CyanobacteriaEstimate {
    /// Mean density over open-water pixels
    pub density_cells_per_ml: f64,
    pub severity: BloomSeverity,
    /// Percent
    pub confidence: f64,
    /// Pixels the mean was taken over
    pub pixels: usize,
}

/// Per-pixel density in cells/mL; `NaN` stays `NaN`.
pub fn density_field(index: &Raster<f64>, params: &BloomParams) -> Raster<f64> {
    index.map(|v| {
        if v.is_nan() {
            f64::NAN
        } else if v > params.water_above {
            (-v * params.decay).exp() * params.max_density
        } else {
            0.0
        }
    })
}

/// Mean density and severity, or `None` when no pixel is open water.
pub fn estimate_cyanobacteria(
    index: &Raster<f64>,
    params: &BloomParams,
) -> Option<CyanobacteriaEstimate> {
    let density = density_field(index, params);
    let (sum, pixels) = density
        .data()
        .iter()
        .filter(|d| **d > 0.0)
        .fold((0.0, 0usize), |(s, n), d| (s + d, n + 1));
    if pixels == 0 {
        return None;
    }

    let mean = sum / pixels as f64;
    let severity = if mean < params.moderate_from {
        BloomSeverity::Low
    } else if mean < params.high_from {
        BloomSeverity::Moderate
    } else {
        BloomSeverity::High
    };

    Some(CyanobacteriaEstimate {
        density_cells_per_ml: mean,
        severity,
        confidence: severity.confidence(),
        pixels,
    })
}
