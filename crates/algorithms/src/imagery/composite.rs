//! RGB composites built from reflectance bands

use aquasat_core::raster::{BandStack, Raster};
use aquasat_core::Result;

use super::water::WaterMask;

/// Brightening applied to surface reflectance for display
pub const TRUE_COLOR_GAIN: f64 = 3.5;

/// Land dimming in the water-detection composite
pub const LAND_DIM: f64 = 0.7;

/// Colour painted over water pixels
pub const WATER_RGB: [f64; 3] = [0.0, 0.0, 0.8];

/// Three display channels in [0, 1]
#[derive(Debug, Clone)]
pub struct RgbComposite {
    pub red: Raster<f64>,
    pub green: Raster<f64>,
    pub blue: Raster<f64>,
}

impl RgbComposite {
    pub fn shape(&self) -> (usize, usize) {
        self.red.shape()
    }
}

fn channels(bands: &BandStack) -> Result<[&Raster<f64>; 3]> {
    Ok([
        bands.require("red")?,
        bands.require("green")?,
        bands.require("blue")?,
    ])
}

/// `gain * reflectance` clamped to [0, 1]
pub fn true_color(bands: &BandStack) -> Result<RgbComposite> {
    let [r, g, b] = channels(bands)?;
    let stretch = |v: f64| (v * TRUE_COLOR_GAIN).clamp(0.0, 1.0);
    Ok(RgbComposite {
        red: r.map(stretch),
        green: g.map(stretch),
        blue: b.map(stretch),
    })
}

/// Water pixels painted [`WATER_RGB`], land shown as dimmed reflectance
pub fn water_detection(bands: &BandStack, mask: &WaterMask) -> Result<RgbComposite> {
    let [r, g, b] = channels(bands)?;
    let mask_raster = Raster::from_array(mask.as_array().mapv(|w| if w { 1.0 } else { 0.0 }));

    let paint = |band: &Raster<f64>, water: f64| {
        band.zip_map(&mask_raster, move |v, m: f64| {
            if m > 0.5 {
                water
            } else {
                (v * LAND_DIM).clamp(0.0, 1.0)
            }
        })
    };

    Ok(RgbComposite {
        red: paint(r, WATER_RGB[0])?,
        green: paint(g, WATER_RGB[1])?,
        blue: paint(b, WATER_RGB[2])?,
    })
}
