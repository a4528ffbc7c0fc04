//! Water-quality classification and area aggregation
//!
//! Water pixels are split into three disjoint quality classes by their water
//! index value, and the share of each class is reported as a percentage of
//! the water area:
//!
//! | class    | rule                          |
//! |----------|-------------------------------|
//! | clear    | `v > clear_above`             |
//! | moderate | `moderate_from <= v <= clear_above` |
//! | degraded | `v < moderate_from`           |

use serde::{Deserialize, Serialize};
use aquasat_core::raster::Raster;
use aquasat_core::{Error, Result};

use super::water::{count_in_water, is_sentinel, WaterMask};

/// Cut-offs used by [`classify`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityThresholds {
    /// Water mask threshold on the primary index
    pub water: f64,
    pub clear_above: f64,
    pub moderate_from: f64,
    /// Secondary index value above which algae count as present
    pub algal: f64,
    /// Primary index value below which a water pixel feeds the algal proxy
    pub proxy_index_below: f64,
    /// Scale of the proxy estimate
    pub proxy_weight: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            water: 0.03,
            clear_above: 0.12,
            moderate_from: 0.06,
            algal: 0.15,
            proxy_index_below: 0.08,
            proxy_weight: 0.15,
        }
    }
}

/// Where the algal-presence figure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgalSource {
    /// Counted from the gated secondary index
    Measured,
    /// Estimated from low water-index values
    Proxy,
}

/// Aggregated classification. Percentages are in [0, 100] and unrounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationSummary {
    pub water_coverage: f64,
    pub clear_water: f64,
    pub moderate_quality: f64,
    pub degraded_quality: f64,
    pub algal_presence: f64,
    pub algal_source: AlgalSource,
    pub valid_pixels: usize,
    pub water_pixels: usize,
    /// Mean water index over water pixels
    pub mean_index: Option<f64>,
    pub std_index: Option<f64>,
}

impl ClassificationSummary {
    /// Summary of an area with no water
    fn dry(valid_pixels: usize) -> Self {
        Self {
            water_coverage: 0.0,
            clear_water: 0.0,
            moderate_quality: 0.0,
            degraded_quality: 0.0,
            algal_presence: 0.0,
            algal_source: AlgalSource::Proxy,
            valid_pixels,
            water_pixels: 0,
            mean_index: None,
            std_index: None,
        }
    }
}

/// Classify the water pixels of `index` and aggregate to percentages.
///
/// `secondary` is the gated algal index; when it is absent, or holds no valid
/// value inside the water mask, algal presence falls back to the proxy
/// estimate.
///
/// # Errors
/// Fails when `water_mask` or `secondary` does not match the shape of `index`.
pub fn classify(
    index: &Raster<f64>,
    water_mask: &WaterMask,
    secondary: Option<&Raster<f64>>,
    thresholds: &QualityThresholds,
) -> Result<ClassificationSummary> {
    if water_mask.shape() != index.shape() {
        let (ar, ac) = water_mask.shape();
        return Err(Error::SizeMismatch {
            er: index.rows(),
            ec: index.cols(),
            ar,
            ac,
        });
    }
    if let Some(sec) = secondary {
        index.check_same_shape(sec)?;
    }

    let valid_pixels = index.valid_count();
    let water_pixels = water_mask.water_count();
    if water_pixels == 0 {
        return Ok(ClassificationSummary::dry(valid_pixels));
    }

    let water_n = water_pixels as f64;
    let pct = |count: usize| count as f64 / water_n * 100.0;

    let clear = count_in_water(index, water_mask, |v| v > thresholds.clear_above);
    let degraded = count_in_water(index, water_mask, |v| v < thresholds.moderate_from);
    let moderate = water_pixels - clear - degraded;

    let (mean_index, std_index) = water_statistics(index, water_mask);

    let measured = secondary.and_then(|sec| {
        let valid = count_in_water(sec, water_mask, |v| !v.is_nan() && !is_sentinel(v));
        if valid == 0 {
            return None;
        }
        Some(count_in_water(sec, water_mask, |v| {
            !is_sentinel(v) && v > thresholds.algal
        }))
    });

    let (algal_presence, algal_source) = match measured {
        Some(count) => (pct(count), AlgalSource::Measured),
        None => {
            let low = count_in_water(index, water_mask, |v| v < thresholds.proxy_index_below);
            (pct(low) * thresholds.proxy_weight, AlgalSource::Proxy)
        }
    };

    Ok(ClassificationSummary {
        water_coverage: water_n / valid_pixels as f64 * 100.0,
        clear_water: pct(clear),
        moderate_quality: pct(moderate),
        degraded_quality: pct(degraded),
        algal_presence,
        algal_source,
        valid_pixels,
        water_pixels,
        mean_index,
        std_index,
    })
}

fn water_statistics(index: &Raster<f64>, mask: &WaterMask) -> (Option<f64>, Option<f64>) {
    let values: Vec<f64> = index
        .data()
        .iter()
        .zip(mask.as_array().iter())
        .filter(|(_, w)| **w)
        .map(|(&v, _)| v)
        .collect();

    if values.is_empty() {
        return (None, None);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (Some(mean), Some(var.sqrt()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imagery::water::{gate_by_water, NON_WATER_SENTINEL};
    use approx::assert_relative_eq;

    fn run(values: Vec<f64>, secondary: Option<Vec<f64>>) -> ClassificationSummary {
        let n = values.len();
        let index = Raster::from_vec(values, 1, n).unwrap();
        let t = QualityThresholds::default();
        let mask = WaterMask::from_index(&index, t.water);
        let sec = secondary.map(|s| {
            let raw = Raster::from_vec(s, 1, n).unwrap();
            gate_by_water(&raw, &index, t.water).unwrap()
        });
        classify(&index, &mask, sec.as_ref(), &t).unwrap()
    }

    #[test]
    fn test_no_water_short_circuits() {
        let s = run(vec![-0.2; 10], Some(vec![0.9; 10]));
        assert_eq!(s.water_pixels, 0);
        assert_eq!(s.valid_pixels, 10);
        assert_eq!(s.water_coverage, 0.0);
        assert_eq!(s.clear_water, 0.0);
        assert_eq!(s.algal_presence, 0.0);
        assert!(s.mean_index.is_none());
    }

    #[test]
    fn test_partition_is_disjoint() {
        // two clear, two moderate (boundaries inclusive), two degraded, four land
        let s = run(
            vec![0.5, 0.13, 0.12, 0.06, 0.059, 0.04, -0.1, -0.3, 0.0, 0.03],
            None,
        );
        assert_eq!(s.water_pixels, 6);
        assert_relative_eq!(s.water_coverage, 60.0, epsilon = 1e-9);
        assert_relative_eq!(s.clear_water, 100.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(s.moderate_quality, 100.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(s.degraded_quality, 100.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(
            s.clear_water + s.moderate_quality + s.degraded_quality,
            100.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_nan_excluded_from_coverage() {
        let s = run(vec![0.5, 0.5, f64::NAN, f64::NAN], None);
        assert_eq!(s.valid_pixels, 2);
        assert_relative_eq!(s.water_coverage, 100.0);
    }

    #[test]
    fn test_measured_algal_presence() {
        let s = run(vec![0.5; 4], Some(vec![0.2, 0.1, 0.16, 0.15]));
        assert_eq!(s.algal_source, AlgalSource::Measured);
        assert_relative_eq!(s.algal_presence, 50.0);
    }

    #[test]
    fn test_measured_ignores_land_pixels() {
        let s = run(vec![0.5, 0.5, -0.5, -0.5], Some(vec![0.9, 0.0, 0.9, 0.9]));
        assert_eq!(s.algal_source, AlgalSource::Measured);
        assert_relative_eq!(s.algal_presence, 50.0);
    }

    #[test]
    fn test_proxy_when_secondary_absent() {
        let s = run(vec![0.05, 0.07, 0.2, 0.3], None);
        assert_eq!(s.algal_source, AlgalSource::Proxy);
        // half of the water is below 0.08
        assert_relative_eq!(s.algal_presence, 50.0 * 0.15, epsilon = 1e-9);
    }

    #[test]
    fn test_proxy_when_secondary_all_sentinel() {
        let n = 4;
        let index = Raster::from_vec(vec![0.05; n], 1, n).unwrap();
        let t = QualityThresholds::default();
        let mask = WaterMask::from_index(&index, t.water);
        let sec = Raster::filled(1, n, NON_WATER_SENTINEL);

        let s = classify(&index, &mask, Some(&sec), &t).unwrap();
        assert_eq!(s.algal_source, AlgalSource::Proxy);
        assert_relative_eq!(s.algal_presence, 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_water_statistics() {
        let s = run(vec![0.1, 0.3, -0.5], None);
        assert_relative_eq!(s.mean_index.unwrap(), 0.2, epsilon = 1e-12);
        assert_relative_eq!(s.std_index.unwrap(), 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_shape_mismatch() {
        let index: Raster<f64> = Raster::filled(2, 2, 0.5);
        let mask = WaterMask::from_index(&Raster::filled(3, 3, 0.5), 0.03);
        assert!(classify(&index, &mask, None, &QualityThresholds::default()).is_err());
    }

    #[test]
    fn test_summary_json_names() {
        let s = run(vec![0.5], None);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["algalSource"], "proxy");
        assert!(json.get("waterCoverage").is_some());
    }
}
