//! Analysis orchestration.
//!
//! One call runs validate, fetch, index, classify and assemble in order.
//! Only the water index is mandatory; every other output degrades to an
//! availability flag and a note when it cannot be produced.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use tracing::{error, info, warn};
use aquasat_algorithms::imagery::{
    compute_index, estimate_cyanobacteria, gate_by_mask, true_color, water_detection, BloomParams,
    Expr, QualityThresholds, RgbComposite, WaterMask,
};
use aquasat_core::{BoundingBox, Raster, TimeRange};

use crate::assemble::{
    assemble, AnalysisFailure, AnalysisOutcome, AnalysisResult, OutputAvailability, RunMetadata,
};
use crate::backend::{select_backend, AnalysisBackend, AnalysisInputs};
use crate::config::AnalysisConfig;
use crate::error::{PipelineError, Result};
use crate::fetch::{Availability, FailureKind, FetchLedger, ImageFetcher, OutputKind, RasterResult};
use crate::registry::{SensorProfile, SensorRegistry, ALGAL};
use crate::validate::{validate, ResolvedGrid, ValidationError, ValidationLimits};

/// One analysis call.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub bbox: BoundingBox,
    pub time_range: TimeRange,
    /// Sensor id; unknown ids use the default profile
    pub sensor: String,
    pub resolution_m: f64,
    pub thresholds: QualityThresholds,
    pub bloom: BloomParams,
    /// Additional formulas whose water mean is reported in metadata
    pub extra_indices: BTreeMap<String, Expr>,
}

impl AnalysisRequest {
    pub fn new(bbox: BoundingBox, time_range: TimeRange, sensor: impl Into<String>) -> Self {
        Self {
            bbox,
            time_range,
            sensor: sensor.into(),
            resolution_m: crate::config::DEFAULT_RESOLUTION_M,
            thresholds: QualityThresholds::default(),
            bloom: BloomParams::default(),
            extra_indices: BTreeMap::new(),
        }
    }

    pub fn with_resolution(mut self, resolution_m: f64) -> Self {
        self.resolution_m = resolution_m;
        self
    }

    pub fn with_thresholds(mut self, thresholds: QualityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_bloom(mut self, bloom: BloomParams) -> Self {
        self.bloom = bloom;
        self
    }

    pub fn with_extra_index(mut self, name: impl Into<String>, formula: Expr) -> Self {
        self.extra_indices.insert(name.into(), formula);
        self
    }
}

/// Result record plus the rasters it was derived from.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub result: AnalysisResult,
    pub water_index: Raster<f64>,
    pub water_mask: WaterMask,
    /// Secondary index gated to water, sentinel elsewhere
    pub algal_index: Option<Raster<f64>>,
    pub true_color: Option<RgbComposite>,
    pub water_detection: Option<RgbComposite>,
}

/// The water-index pipeline. Holds no per-call state.
pub struct Pipeline {
    registry: SensorRegistry,
    fetcher: ImageFetcher,
    backend: Box<dyn AnalysisBackend>,
    limits: ValidationLimits,
}

impl Pipeline {
    pub fn new(
        registry: SensorRegistry,
        fetcher: ImageFetcher,
        backend: Box<dyn AnalysisBackend>,
        limits: ValidationLimits,
    ) -> Self {
        Self {
            registry,
            fetcher,
            backend,
            limits,
        }
    }

    /// Pipeline with the HTTP provider and the configured backend
    pub fn from_config(config: &AnalysisConfig) -> aquasat_cloud::Result<Self> {
        Ok(Self::new(
            SensorRegistry::builtin(),
            ImageFetcher::from_config(&config.provider)?,
            select_backend(&config.backend),
            config.limits,
        ))
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    /// Resolve the profile and grid without touching the network.
    pub fn plan(
        &self,
        request: &AnalysisRequest,
    ) -> std::result::Result<(&SensorProfile, ResolvedGrid), ValidationError> {
        let profile = self.registry.profile_for(&request.sensor);
        let grid = validate(&request.bbox, request.resolution_m, profile, &self.limits)?;
        Ok((profile, grid))
    }

    /// Run the analysis; any failure is returned as an error.
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult> {
        self.analyze_full(request).map(|analysis| analysis.result)
    }

    /// Run the analysis and always produce an outcome.
    ///
    /// Errors, and panics inside the analysis, become
    /// [`AnalysisOutcome::Failure`].
    pub fn run(&self, request: &AnalysisRequest) -> AnalysisOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.analyze(request))) {
            Ok(Ok(result)) => AnalysisOutcome::Success(result),
            Ok(Err(err)) => {
                error!(error = %err, "analysis failed");
                AnalysisOutcome::Failure(AnalysisFailure::new(err.to_string()))
            }
            Err(payload) => {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(error = %msg, "analysis aborted");
                AnalysisOutcome::Failure(AnalysisFailure::new(format!("internal error: {}", msg)))
            }
        }
    }

    pub fn analyze_full(&self, request: &AnalysisRequest) -> Result<Analysis> {
        let (profile, grid) = self.plan(request)?;
        let thresholds = &request.thresholds;
        info!(
            sensor = %profile.id,
            width = grid.width,
            height = grid.height,
            resolution_m = grid.resolution_m,
            "starting analysis"
        );

        let mut ledger = FetchLedger::new();
        let mut notes = grid.notes.clone();

        // Primary water index
        let primary = self.fetcher.fetch_tracked(
            &mut ledger,
            profile,
            &request.bbox,
            &request.time_range,
            &grid,
            OutputKind::WaterIndex,
        )?;
        let water_index = primary_index(&primary)?;

        if water_index.valid_count() == 0 {
            return Err(PipelineError::NoValidData);
        }
        let water_mask = WaterMask::from_index(&water_index, thresholds.water);
        let cyanobacteria = estimate_cyanobacteria(&water_index, &request.bloom);

        // Optional outputs
        let mut outputs = Vec::new();
        if profile.supports(ALGAL) {
            outputs.push(OutputKind::Index(ALGAL.to_string()));
        }
        outputs.push(OutputKind::TrueColor);
        for (name, formula) in &request.extra_indices {
            outputs.push(OutputKind::Custom {
                name: name.clone(),
                formula: formula.clone(),
            });
        }
        let results = self.fetcher.fetch_all(
            &mut ledger,
            profile,
            &request.bbox,
            &request.time_range,
            &grid,
            outputs,
        )?;

        let mut algal_index = None;
        let mut true_color_rgb = None;
        let mut water_detection_rgb = None;
        let mut extra_indices = BTreeMap::new();

        for result in &results {
            let label = result.label();
            let bands = match &result.availability {
                Availability::Fulfilled(bands) => bands,
                Availability::Failed { kind, reason } => {
                    notes.push(format!("{} unavailable ({}): {}", label, kind, reason));
                    continue;
                }
            };

            match (&result.request.output, &result.request.formula) {
                (OutputKind::TrueColor, _) => {
                    match true_color(bands).and_then(|tc| {
                        water_detection(bands, &water_mask).map(|wd| (tc, wd))
                    }) {
                        Ok((tc, wd)) => {
                            true_color_rgb = Some(tc);
                            water_detection_rgb = Some(wd);
                        }
                        Err(e) => absorb(&mut notes, &label, e),
                    }
                }
                (OutputKind::Index(_), Some(formula)) => {
                    match compute_index(bands, formula).and_then(|raw| gate_by_mask(&raw, &water_mask)) {
                        Ok(gated) => algal_index = Some(gated),
                        Err(e) => absorb(&mut notes, &label, e),
                    }
                }
                (OutputKind::Custom { name, .. }, Some(formula)) => {
                    match compute_index(bands, formula) {
                        Ok(field) => match water_mean(&field, &water_mask) {
                            Some(mean) => {
                                extra_indices.insert(name.clone(), mean);
                            }
                            None => notes.push(format!("{}: no valid value over water", label)),
                        },
                        Err(e) => absorb(&mut notes, &label, e),
                    }
                }
                _ => {}
            }
        }

        let summary = self.backend.analyze(&AnalysisInputs {
            index: &water_index,
            mask: &water_mask,
            secondary: algal_index.as_ref(),
            thresholds,
        })?;

        let availability = OutputAvailability {
            true_color: true_color_rgb.is_some(),
            algal_index: algal_index.is_some(),
            water_detection: water_detection_rgb.is_some(),
        };

        info!(
            water_coverage = summary.water_coverage,
            water_pixels = summary.water_pixels,
            algal_source = ?summary.algal_source,
            bloom = ?cyanobacteria.as_ref().map(|c| c.severity),
            "analysis complete"
        );

        let metadata = RunMetadata {
            sensor: profile.id.clone(),
            collection: profile.collection.clone(),
            compositing: profile.compositing,
            time_range: request.time_range,
            grid,
            backend: self.backend.name().to_string(),
            notes,
            fetches: ledger.into_map(),
            extra_indices,
            cyanobacteria,
        };

        Ok(Analysis {
            result: assemble(request.bbox, &summary, availability, metadata),
            water_index,
            water_mask,
            algal_index,
            true_color: true_color_rgb,
            water_detection: water_detection_rgb,
        })
    }
}

fn primary_index(primary: &RasterResult) -> Result<Raster<f64>> {
    let bands = match &primary.availability {
        Availability::Fulfilled(bands) => bands,
        Availability::Failed { kind, reason } => {
            return Err(PipelineError::PrimaryUnavailable {
                kind: *kind,
                reason: reason.clone(),
            })
        }
    };
    let formula = primary
        .request
        .formula
        .as_ref()
        .ok_or_else(|| PipelineError::PrimaryUnavailable {
            kind: FailureKind::Unsupported,
            reason: "no water index formula".into(),
        })?;
    Ok(compute_index(bands, formula)?)
}

fn absorb(notes: &mut Vec<String>, label: &str, err: aquasat_core::Error) {
    warn!(output = label, error = %err, "output dropped");
    notes.push(format!("{}: {}", label, err));
}

/// Mean of the finite values of `field` inside the water mask
fn water_mean(field: &Raster<f64>, mask: &WaterMask) -> Option<f64> {
    let (sum, n) = field
        .data()
        .iter()
        .zip(mask.as_array().iter())
        .filter(|(v, w)| **w && v.is_finite())
        .fold((0.0, 0usize), |(s, n), (v, _)| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}
