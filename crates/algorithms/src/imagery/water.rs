//! Water masking and secondary-index gating

use ndarray::{Array2, Zip};
use aquasat_core::raster::Raster;
use aquasat_core::Result;

/// Water index value above which a pixel counts as water
pub const DEFAULT_WATER_THRESHOLD: f64 = 0.03;

/// Value written into secondary indices outside the water mask
pub const NON_WATER_SENTINEL: f64 = -9999.0;

/// Anything at or below this is treated as the sentinel
const SENTINEL_CUTOFF: f64 = -9990.0;

/// Whether `v` carries the non-water sentinel
pub fn is_sentinel(v: f64) -> bool {
    v <= SENTINEL_CUTOFF
}

/// Boolean water mask aligned with the primary water index.
#[derive(Debug, Clone)]
pub struct WaterMask {
    mask: Array2<bool>,
    water_count: usize,
}

impl WaterMask {
    /// Water where `index > threshold`; `NaN` pixels are never water.
    pub fn from_index(index: &Raster<f64>, threshold: f64) -> Self {
        let mask = index.data().mapv(|v| v > threshold);
        let water_count = mask.iter().filter(|&&w| w).count();
        Self { mask, water_count }
    }

    pub fn is_water(&self, row: usize, col: usize) -> bool {
        self.mask.get((row, col)).copied().unwrap_or(false)
    }

    pub fn water_count(&self) -> usize {
        self.water_count
    }

    pub fn shape(&self) -> (usize, usize) {
        self.mask.dim()
    }

    pub fn as_array(&self) -> &Array2<bool> {
        &self.mask
    }
}

/// Replace every pixel of `secondary` whose water index is not above
/// `threshold` with [`NON_WATER_SENTINEL`].
pub fn gate_by_water(
    secondary: &Raster<f64>,
    water_index: &Raster<f64>,
    threshold: f64,
) -> Result<Raster<f64>> {
    secondary.zip_map(water_index, |s, w| {
        if w > threshold {
            s
        } else {
            NON_WATER_SENTINEL
        }
    })
}

/// [`gate_by_water`] driven by an existing mask
pub fn gate_by_mask(secondary: &Raster<f64>, mask: &WaterMask) -> Result<Raster<f64>> {
    let mask_raster = Raster::from_array(mask.as_array().mapv(|w| if w { 1.0 } else { 0.0 }));
    secondary.zip_map(&mask_raster, |s, w: f64| if w > 0.5 { s } else { NON_WATER_SENTINEL })
}

/// Count of mask pixels satisfying `pred` on `raster`, restricted to water
pub(crate) fn count_in_water<F>(raster: &Raster<f64>, mask: &WaterMask, pred: F) -> usize
where
    F: Fn(f64) -> bool,
{
    let mut count = 0;
    Zip::from(raster.data())
        .and(mask.as_array())
        .for_each(|&v, &w| {
            if w && pred(v) {
                count += 1;
            }
        });
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> Raster<f64> {
        Raster::from_vec(vec![0.5, 0.03, -0.2, f64::NAN, 0.031, 0.2], 2, 3).unwrap()
    }

    #[test]
    fn test_mask_strictly_above_threshold() {
        let mask = WaterMask::from_index(&index(), DEFAULT_WATER_THRESHOLD);

        assert_eq!(mask.water_count(), 3);
        assert!(mask.is_water(0, 0));
        assert!(!mask.is_water(0, 1));
        assert!(!mask.is_water(1, 0));
        assert!(mask.is_water(1, 1));
        assert!(!mask.is_water(9, 9));
    }

    #[test]
    fn test_gate_by_water() {
        let secondary = Raster::filled(2, 3, 0.4);
        let gated = gate_by_water(&secondary, &index(), DEFAULT_WATER_THRESHOLD).unwrap();

        assert_eq!(gated.get(0, 0).unwrap(), 0.4);
        assert_eq!(gated.get(0, 1).unwrap(), NON_WATER_SENTINEL);
        assert_eq!(gated.get(1, 0).unwrap(), NON_WATER_SENTINEL);
        assert!(is_sentinel(gated.get(0, 2).unwrap()));
    }

    #[test]
    fn test_gate_by_mask_matches_gate_by_water() {
        let secondary = Raster::from_vec(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], 2, 3).unwrap();
        let mask = WaterMask::from_index(&index(), DEFAULT_WATER_THRESHOLD);

        let a = gate_by_water(&secondary, &index(), DEFAULT_WATER_THRESHOLD).unwrap();
        let b = gate_by_mask(&secondary, &mask).unwrap();
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_gate_shape_mismatch() {
        let secondary: Raster<f64> = Raster::new(3, 3);
        assert!(gate_by_water(&secondary, &index(), DEFAULT_WATER_THRESHOLD).is_err());
    }
}
