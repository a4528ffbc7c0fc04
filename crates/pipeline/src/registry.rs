//! Sensor registry: band assignments, native resolution, compositing and
//! index formulas for every supported sensor.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;
use aquasat_algorithms::imagery::{Expr, DEFAULT_WATER_THRESHOLD, NON_WATER_SENTINEL};
use aquasat_cloud::{BandRef, Compositing};

/// Primary water index
pub const NDWI: &str = "ndwi";
/// Vegetation index
pub const NDVI: &str = "ndvi";
/// Chlorophyll/algal proxy
pub const ALGAL: &str = "algal";

/// Profile returned for unknown sensor ids
pub const DEFAULT_SENSOR: &str = "sentinel2";

/// Static description of one sensor/collection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorProfile {
    pub id: String,
    pub display_name: String,
    /// Provider collection id
    pub collection: String,
    /// Logical band name to provider band code
    pub bands: BTreeMap<String, String>,
    pub native_resolution_m: f64,
    pub compositing: Compositing,
    /// Index name to formula over logical band names
    pub formulas: BTreeMap<String, Expr>,
}

impl SensorProfile {
    pub fn band_code(&self, name: &str) -> Option<&str> {
        self.bands.get(name).map(String::as_str)
    }

    pub fn formula(&self, index: &str) -> Option<&Expr> {
        self.formulas.get(index)
    }

    pub fn supports(&self, index: &str) -> bool {
        self.formulas.contains_key(index)
    }

    /// Provider band references for every band `expr` reads.
    ///
    /// Fails with the first band the profile does not map.
    pub fn band_refs(&self, expr: &Expr) -> Result<Vec<BandRef>, String> {
        self.band_refs_for(expr.bands())
    }

    pub fn band_refs_for<'a, I>(&self, names: I) -> Result<Vec<BandRef>, String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .map(|name| {
                self.band_code(name)
                    .map(|code| BandRef::new(name, code))
                    .ok_or_else(|| format!("sensor '{}' has no band '{}'", self.id, name))
            })
            .collect()
    }

    /// Every formula may only reference mapped bands
    pub fn check_formulas(&self) -> Result<(), String> {
        for (index, expr) in &self.formulas {
            self.band_refs(expr)
                .map_err(|e| format!("formula '{}': {}", index, e))?;
        }
        Ok(())
    }
}

/// Immutable set of sensor profiles with a fallback for unknown ids.
#[derive(Debug, Clone)]
pub struct SensorRegistry {
    profiles: Vec<SensorProfile>,
    default_idx: usize,
}

impl Default for SensorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SensorRegistry {
    /// Registry holding the built-in sensor table
    pub fn builtin() -> Self {
        let profiles = builtin_profiles();
        let default_idx = profiles
            .iter()
            .position(|p| p.id == DEFAULT_SENSOR)
            .unwrap_or(0);
        Self {
            profiles,
            default_idx,
        }
    }

    /// Case-insensitive lookup; unknown ids resolve to the default profile.
    pub fn profile_for(&self, sensor_id: &str) -> &SensorProfile {
        match self.get(sensor_id) {
            Some(profile) => profile,
            None => {
                let fallback = &self.profiles[self.default_idx];
                warn!(
                    requested = sensor_id,
                    fallback = %fallback.id,
                    "unknown sensor, using default profile"
                );
                fallback
            }
        }
    }

    /// Exact lookup without fallback
    pub fn get(&self, sensor_id: &str) -> Option<&SensorProfile> {
        let wanted = sensor_id.trim();
        self.profiles
            .iter()
            .find(|p| p.id.eq_ignore_ascii_case(wanted))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(|p| p.id.as_str())
    }

    pub fn profiles(&self) -> &[SensorProfile] {
        &self.profiles
    }

    pub fn default_profile(&self) -> &SensorProfile {
        &self.profiles[self.default_idx]
    }
}

// ---------------------------------------------------------------------------
// Built-in table
// ---------------------------------------------------------------------------

fn b(name: &str) -> Expr {
    Expr::band(name)
}

fn lit(v: f64) -> Expr {
    Expr::lit(v)
}

/// Evaluate `index` only where `nd(green, nir_band)` marks water
fn water_gated(nir_band: &str, index: Expr) -> Expr {
    Expr::threshold_select(
        Expr::nd(b("green"), b(nir_band)),
        DEFAULT_WATER_THRESHOLD,
        index,
        lit(NON_WATER_SENTINEL),
    )
}

/// 0.5 NDCI + 0.3 RECI + 0.2 MCARI from the red-edge bands
fn sentinel2_algal() -> Expr {
    let ndci = Expr::nd(b("red_edge1"), b("red"));
    let reci = b("red_edge3") / b("red_edge1") - lit(1.0);
    let mcari = ((b("red_edge1") - b("red")) - lit(0.2) * (b("red_edge1") - b("green")))
        * (b("red_edge1") / b("red"));
    water_gated(
        "nir_narrow",
        lit(0.5) * ndci + lit(0.3) * reci + lit(0.2) * mcari,
    )
}

/// NIR/red, tri-band and SWIR/NIR ratio blend
fn landsat_algal() -> Expr {
    let nir_red = b("nir") / b("red");
    let triband = (b("green") / b("red")) / b("blue");
    let swir_nir = b("swir1") / b("nir");
    water_gated(
        "nir",
        lit(0.6) * nir_red + lit(0.3) * triband - lit(0.1) * swir_nir,
    )
}

fn ratio_algal() -> Expr {
    water_gated("nir", (b("nir") / b("red")) * (b("green") / b("blue")))
}

fn standard_formulas(algal: Expr) -> BTreeMap<String, Expr> {
    BTreeMap::from([
        (NDWI.to_string(), Expr::nd(b("green"), b("nir"))),
        (NDVI.to_string(), Expr::nd(b("nir"), b("red"))),
        (ALGAL.to_string(), algal),
    ])
}

fn band_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

const SENTINEL2_BANDS: &[(&str, &str)] = &[
    ("red", "B04"),
    ("green", "B03"),
    ("blue", "B02"),
    ("nir", "B08"),
    ("swir1", "B11"),
    ("swir2", "B12"),
    ("red_edge1", "B05"),
    ("red_edge2", "B06"),
    ("red_edge3", "B07"),
    ("nir_narrow", "B8A"),
];

const LANDSAT_OLI_BANDS: &[(&str, &str)] = &[
    ("red", "B04"),
    ("green", "B03"),
    ("blue", "B02"),
    ("nir", "B05"),
    ("swir1", "B06"),
    ("swir2", "B07"),
];

const LANDSAT_TM_BANDS: &[(&str, &str)] = &[
    ("red", "B03"),
    ("green", "B02"),
    ("blue", "B01"),
    ("nir", "B04"),
    ("swir1", "B05"),
    ("swir2", "B07"),
];

const MODIS_BANDS: &[(&str, &str)] = &[
    ("red", "B01"),
    ("green", "B04"),
    ("blue", "B03"),
    ("nir", "B02"),
    ("swir1", "B06"),
    ("swir2", "B07"),
];

fn profile(
    id: &str,
    display_name: &str,
    collection: &str,
    bands: &[(&str, &str)],
    native_resolution_m: f64,
    compositing: Compositing,
    algal: Expr,
) -> SensorProfile {
    SensorProfile {
        id: id.into(),
        display_name: display_name.into(),
        collection: collection.into(),
        bands: band_map(bands),
        native_resolution_m,
        compositing,
        formulas: standard_formulas(algal),
    }
}

fn builtin_profiles() -> Vec<SensorProfile> {
    use Compositing::{LeastCloud, MostRecent};

    vec![
        profile("sentinel2", "Sentinel-2 L2A", "sentinel-2-l2a", SENTINEL2_BANDS, 10.0, LeastCloud, sentinel2_algal()),
        profile("sentinel2_l1c", "Sentinel-2 L1C", "sentinel-2-l1c", SENTINEL2_BANDS, 10.0, LeastCloud, sentinel2_algal()),
        profile("landsat8", "Landsat 8/9 L2", "landsat-ot-l2", LANDSAT_OLI_BANDS, 30.0, MostRecent, landsat_algal()),
        profile("landsat8_l1", "Landsat 8/9 L1", "landsat-ot-l1", LANDSAT_OLI_BANDS, 30.0, MostRecent, landsat_algal()),
        profile("landsat7", "Landsat 7 ETM+", "landsat-etm-l2", LANDSAT_TM_BANDS, 30.0, MostRecent, landsat_algal()),
        profile("landsat5", "Landsat 5 TM", "landsat-tm-l2", LANDSAT_TM_BANDS, 30.0, MostRecent, landsat_algal()),
        profile("hls", "Harmonized Landsat Sentinel", "landsat-ot-l2", LANDSAT_OLI_BANDS, 30.0, MostRecent, ratio_algal()),
        profile("modis", "MODIS", "modis", MODIS_BANDS, 250.0, MostRecent, ratio_algal()),
    ]
}
