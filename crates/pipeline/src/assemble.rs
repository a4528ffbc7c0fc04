//! Result assembly: the JSON contract handed to result consumers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use aquasat_algorithms::imagery::{AlgalSource, ClassificationSummary, CyanobacteriaEstimate};
use aquasat_cloud::Compositing;
use aquasat_core::{BoundingBox, TimeRange};

use crate::fetch::FetchState;
use crate::validate::ResolvedGrid;

/// Which optional products made it into the analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputAvailability {
    pub true_color: bool,
    pub algal_index: bool,
    pub water_detection: bool,
}

/// Run facts known to the pipeline before assembly.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub sensor: String,
    pub collection: String,
    pub compositing: Compositing,
    pub time_range: TimeRange,
    pub grid: ResolvedGrid,
    pub backend: String,
    pub notes: Vec<String>,
    pub fetches: BTreeMap<String, FetchState>,
    /// Mean over water of each extra index that was computed
    pub extra_indices: BTreeMap<String, f64>,
    pub cyanobacteria: Option<CyanobacteriaEstimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub sensor: String,
    pub collection: String,
    pub compositing: Compositing,
    pub time_range: TimeRange,
    pub resolution_m: f64,
    pub width: usize,
    pub height: usize,
    pub valid_pixels: usize,
    pub water_pixels: usize,
    /// Share of the grid with a valid water-index sample, in [0, 1]
    pub data_quality: f64,
    pub mean_index: Option<f64>,
    pub std_index: Option<f64>,
    pub algal_source: AlgalSource,
    pub backend: String,
    pub notes: Vec<String>,
    pub fetches: BTreeMap<String, FetchState>,
    pub extra_indices: BTreeMap<String, f64>,
    /// Bloom estimate; absent when no pixel is open water
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cyanobacteria: Option<CyanobacteriaEstimate>,
}

/// Successful analysis. Percentages are rounded to one decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub bbox: BoundingBox,
    pub water_coverage: f64,
    pub clear_water: f64,
    pub moderate_quality: f64,
    pub degraded_quality: f64,
    pub algal_presence: f64,
    pub data_source: String,
    pub true_color_available: bool,
    pub algal_index_available: bool,
    pub water_detection_available: bool,
    pub metadata: ResultMetadata,
}

/// Failed analysis: zeroed figures plus the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFailure {
    pub water_coverage: f64,
    pub clear_water: f64,
    pub moderate_quality: f64,
    pub algal_presence: f64,
    pub error: String,
}

impl AnalysisFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            water_coverage: 0.0,
            clear_water: 0.0,
            moderate_quality: 0.0,
            algal_presence: 0.0,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisOutcome {
    Success(AnalysisResult),
    Failure(AnalysisFailure),
}

impl AnalysisOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisOutcome::Success(_))
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        match self {
            AnalysisOutcome::Success(r) => Some(r),
            AnalysisOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            AnalysisOutcome::Success(_) => None,
            AnalysisOutcome::Failure(f) => Some(&f.error),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Round the quality classes to one decimal so they still sum to the
/// rounded total (largest remainder, ties to the earlier class).
fn round1_partition(parts: [f64; 3]) -> [f64; 3] {
    let scaled = parts.map(|p| p * 10.0);
    let target = scaled.iter().sum::<f64>().round() as i64;
    let mut units = scaled.map(|p| p.floor() as i64);

    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| {
        let fa = scaled[a] - scaled[a].floor();
        let fb = scaled[b] - scaled[b].floor();
        fb.total_cmp(&fa).then(a.cmp(&b))
    });
    let missing = (target - units.iter().sum::<i64>()).clamp(0, 3) as usize;
    for &i in order.iter().take(missing) {
        units[i] += 1;
    }
    units.map(|u| u as f64 / 10.0)
}

/// Build the result record. Pure.
pub fn assemble(
    bbox: BoundingBox,
    summary: &ClassificationSummary,
    availability: OutputAvailability,
    metadata: RunMetadata,
) -> AnalysisResult {
    let total = metadata.grid.pixel_count();
    let data_quality = if total == 0 {
        0.0
    } else {
        round3(summary.valid_pixels as f64 / total as f64)
    };

    let [clear_water, moderate_quality, degraded_quality] = round1_partition([
        summary.clear_water,
        summary.moderate_quality,
        summary.degraded_quality,
    ]);

    AnalysisResult {
        bbox,
        water_coverage: round1(summary.water_coverage),
        clear_water,
        moderate_quality,
        degraded_quality,
        algal_presence: round1(summary.algal_presence),
        data_source: metadata.sensor.clone(),
        true_color_available: availability.true_color,
        algal_index_available: availability.algal_index,
        water_detection_available: availability.water_detection,
        metadata: ResultMetadata {
            sensor: metadata.sensor,
            collection: metadata.collection,
            compositing: metadata.compositing,
            time_range: metadata.time_range,
            resolution_m: metadata.grid.resolution_m,
            width: metadata.grid.width,
            height: metadata.grid.height,
            valid_pixels: summary.valid_pixels,
            water_pixels: summary.water_pixels,
            data_quality,
            mean_index: summary.mean_index.map(round3),
            std_index: summary.std_index.map(round3),
            algal_source: summary.algal_source,
            backend: metadata.backend,
            notes: metadata.notes,
            fetches: metadata.fetches,
            extra_indices: metadata
                .extra_indices
                .into_iter()
                .map(|(k, v)| (k, round3(v)))
                .collect(),
            cyanobacteria: metadata.cyanobacteria.map(|c| CyanobacteriaEstimate {
                density_cells_per_ml: round1(c.density_cells_per_ml),
                ..c
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquasat_algorithms::imagery::BloomSeverity;

    fn summary() -> ClassificationSummary {
        ClassificationSummary {
            water_coverage: 40.04,
            clear_water: 33.333_333,
            moderate_quality: 33.333_333,
            degraded_quality: 33.333_334,
            algal_presence: 2.25,
            algal_source: AlgalSource::Proxy,
            valid_pixels: 90,
            water_pixels: 36,
            mean_index: Some(0.123_456),
            std_index: Some(0.01),
        }
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            sensor: "landsat8".into(),
            collection: "landsat-ot-l2".into(),
            compositing: Compositing::MostRecent,
            time_range: TimeRange::parse("2023-06-01", "2023-06-30").unwrap(),
            grid: ResolvedGrid {
                resolution_m: 60.0,
                width: 10,
                height: 10,
                notes: Vec::new(),
            },
            backend: "formula".into(),
            notes: vec!["algal: provider timed out".into()],
            fetches: BTreeMap::from([("water_index".to_string(), FetchState::Fulfilled)]),
            extra_indices: BTreeMap::new(),
            cyanobacteria: None,
        }
    }

    #[test]
    fn test_rounding_and_flags() {
        let availability = OutputAvailability {
            true_color: true,
            algal_index: false,
            water_detection: true,
        };
        let bbox = BoundingBox::new(-122.52, 37.70, -122.15, 37.90);
        let result = assemble(bbox, &summary(), availability, metadata());

        assert_eq!(result.water_coverage, 40.0);
        assert_eq!(result.clear_water, 33.3);
        assert_eq!(result.algal_presence, 2.3);
        assert_eq!(result.data_source, "landsat8");
        assert!(!result.algal_index_available);
        assert_eq!(result.metadata.data_quality, 0.9);
        assert_eq!(result.metadata.mean_index, Some(0.123));
    }

    #[test]
    fn test_partition_rounding_never_exceeds_total() {
        // one clear, one moderate, four degraded
        let sixths = [100.0 / 6.0, 100.0 / 6.0, 400.0 / 6.0];
        let rounded = round1_partition(sixths);
        let total: f64 = rounded.iter().sum();
        assert!((total - 100.0).abs() < 1e-9, "{}", total);
        for (r, raw) in rounded.iter().zip(sixths) {
            assert!((r - raw).abs() <= 0.1, "{} vs {}", r, raw);
        }

        assert_eq!(round1_partition([0.0; 3]), [0.0; 3]);
        assert_eq!(round1_partition([100.0, 0.0, 0.0]), [100.0, 0.0, 0.0]);
    }

    #[test]
    fn test_json_field_names() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let result = assemble(bbox, &summary(), OutputAvailability::default(), metadata());
        let json = serde_json::to_value(AnalysisOutcome::Success(result)).unwrap();

        for key in [
            "bbox",
            "waterCoverage",
            "clearWater",
            "moderateQuality",
            "degradedQuality",
            "algalPresence",
            "dataSource",
            "trueColorAvailable",
            "algalIndexAvailable",
            "waterDetectionAvailable",
            "metadata",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["bbox"]["west"], 0.0);
        assert_eq!(json["metadata"]["timeRange"]["start"], "2023-06-01");
        assert_eq!(json["metadata"]["compositing"], "most-recent");
        assert_eq!(json["metadata"]["fetches"]["water_index"], "fulfilled");
        assert!(json["metadata"].get("cyanobacteria").is_none());
    }

    #[test]
    fn test_cyanobacteria_reported() {
        let mut meta = metadata();
        meta.cyanobacteria = Some(CyanobacteriaEstimate {
            density_cells_per_ml: 1224.564_28,
            severity: BloomSeverity::Low,
            confidence: 80.0,
            pixels: 12,
        });
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let result = assemble(bbox, &summary(), OutputAvailability::default(), meta);
        let json = serde_json::to_value(&result).unwrap();

        let cyano = &json["metadata"]["cyanobacteria"];
        assert_eq!(cyano["densityCellsPerMl"], 1224.6);
        assert_eq!(cyano["severity"], "low");
        assert_eq!(cyano["confidence"], 80.0);
    }

    #[test]
    fn test_failure_shape() {
        let outcome = AnalysisOutcome::Failure(AnalysisFailure::new("provider timed out"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["waterCoverage"], 0.0);
        assert_eq!(json["clearWater"], 0.0);
        assert_eq!(json["moderateQuality"], 0.0);
        assert_eq!(json["algalPresence"], 0.0);
        assert_eq!(json["error"], "provider timed out");
        assert!(!outcome.is_success());

        let back: AnalysisOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back.error(), Some("provider timed out"));
    }
}
