//! Analysis configuration file.
//!
//! ```json
//! {
//!   "bbox": [-122.52, 37.70, -122.15, 37.90],
//!   "timeRange": ["2023-06-01", "2023-06-30"],
//!   "sensor": "landsat8",
//!   "resolution": 60,
//!   "provider": { "baseUrl": "https://provider.example/api/v1" },
//!   "extraIndices": { "ndti": "nd(red, green)" }
//! }
//! ```
//!
//! `bboxCoords`, `timeInterval` and `dataSource` are accepted as aliases.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use aquasat_algorithms::imagery::{BloomParams, Expr, QualityThresholds};
use aquasat_core::{BoundingBox, TimeRange};

use crate::backend::BackendConfig;
use crate::error::PipelineError;
use crate::fetch::FetcherConfig;
use crate::pipeline::AnalysisRequest;
use crate::registry::DEFAULT_SENSOR;
use crate::validate::{ValidationError, ValidationLimits};

/// Period analysed when the config names none
pub const DEFAULT_TIME_RANGE: (&str, &str) = ("2023-01-01", "2023-12-31");

/// Default output resolution, metres
pub const DEFAULT_RESOLUTION_M: f64 = 60.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config {path}: {source}")]
    Limits {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}

fn default_sensor() -> String {
    DEFAULT_SENSOR.to_string()
}

fn default_resolution() -> f64 {
    DEFAULT_RESOLUTION_M
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    #[serde(alias = "bboxCoords", deserialize_with = "bbox_from_any")]
    pub bbox: BoundingBox,

    #[serde(
        alias = "timeInterval",
        default,
        deserialize_with = "time_range_from_any",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_range: Option<TimeRange>,

    #[serde(alias = "dataSource", default = "default_sensor")]
    pub sensor: String,

    /// Requested resolution in metres
    #[serde(default = "default_resolution")]
    pub resolution: f64,

    #[serde(default)]
    pub limits: ValidationLimits,

    #[serde(default)]
    pub thresholds: QualityThresholds,

    #[serde(default)]
    pub bloom: BloomParams,

    #[serde(default)]
    pub provider: FetcherConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Index name to formula text, see [`Expr::parse`]
    #[serde(default)]
    pub extra_indices: BTreeMap<String, String>,
}

impl AnalysisConfig {
    pub fn new(bbox: BoundingBox) -> Self {
        Self {
            bbox,
            time_range: None,
            sensor: default_sensor(),
            resolution: DEFAULT_RESOLUTION_M,
            limits: ValidationLimits::default(),
            thresholds: QualityThresholds::default(),
            bloom: BloomParams::default(),
            provider: FetcherConfig::default(),
            backend: BackendConfig::default(),
            extra_indices: BTreeMap::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.limits.check().map_err(|source| ConfigError::Limits {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    /// Configured period, or [`DEFAULT_TIME_RANGE`]
    pub fn time_range(&self) -> Result<TimeRange, PipelineError> {
        match self.time_range {
            Some(range) => Ok(range),
            None => Ok(TimeRange::parse(DEFAULT_TIME_RANGE.0, DEFAULT_TIME_RANGE.1)?),
        }
    }

    /// Parse every extra index formula.
    pub fn extra_formulas(&self) -> Result<BTreeMap<String, Expr>, PipelineError> {
        self.extra_indices
            .iter()
            .map(|(name, text)| {
                Expr::parse(text)
                    .map(|expr| (name.clone(), expr))
                    .map_err(|e| PipelineError::InvalidFormula {
                        name: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect()
    }

    pub fn to_request(&self) -> Result<AnalysisRequest, PipelineError> {
        Ok(AnalysisRequest {
            bbox: self.bbox,
            time_range: self.time_range()?,
            sensor: self.sensor.clone(),
            resolution_m: self.resolution,
            thresholds: self.thresholds,
            bloom: self.bloom,
            extra_indices: self.extra_formulas()?,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BboxRepr {
    Coords([f64; 4]),
    Named(BoundingBox),
}

fn bbox_from_any<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BoundingBox, D::Error> {
    Ok(match BboxRepr::deserialize(deserializer)? {
        BboxRepr::Coords(c) => BoundingBox::from(c),
        BboxRepr::Named(b) => b,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeRangeRepr {
    Pair([String; 2]),
    Named { start: String, end: String },
}

fn time_range_from_any<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<TimeRange>, D::Error> {
    let (start, end) = match TimeRangeRepr::deserialize(deserializer)? {
        TimeRangeRepr::Pair([start, end]) => (start, end),
        TimeRangeRepr::Named { start, end } => (start, end),
    };
    TimeRange::parse(&start, &end)
        .map(Some)
        .map_err(serde::de::Error::custom)
}
