//! Image fetcher: one provider call per output, failures captured per output.
//!
//! Each output moves through
//!
//! ```text
//! NotRequested -> Requested -> Fulfilled
//!                           \-> Failed
//! ```
//!
//! and the fetcher never retries; retry and backoff belong to the provider
//! client underneath.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use aquasat_algorithms::imagery::Expr;
use aquasat_cloud::{
    BandRef, Compositing, HttpImageryProvider, ImageryProvider, PixelRequest,
    ProcessClientOptions, ProviderError,
};
use aquasat_core::{BandStack, BoundingBox, TimeRange};

use crate::registry::{SensorProfile, NDWI};
use crate::validate::ResolvedGrid;

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// One thing the pipeline asks the provider for.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputKind {
    /// The primary water index; its failure fails the analysis
    WaterIndex,
    /// Red, green and blue reflectance for the RGB composites
    TrueColor,
    /// A formula from the sensor profile
    Index(String),
    /// A user-supplied formula
    Custom { name: String, formula: Expr },
}

impl OutputKind {
    /// Stable name used in logs, the ledger and result metadata
    pub fn label(&self) -> String {
        match self {
            OutputKind::WaterIndex => "water_index".into(),
            OutputKind::TrueColor => "true_color".into(),
            OutputKind::Index(name) => name.clone(),
            OutputKind::Custom { name, .. } => format!("custom:{}", name),
        }
    }

    pub fn encoding(&self) -> OutputEncoding {
        match self {
            OutputKind::TrueColor => OutputEncoding::Rgb,
            _ => OutputEncoding::Float32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputEncoding {
    Float32,
    Rgb,
}

/// Everything needed to fetch one output. Built per output, per call.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub sensor: String,
    pub collection: String,
    pub compositing: Compositing,
    pub bbox: BoundingBox,
    pub time_range: TimeRange,
    pub resolution_m: f64,
    pub width: usize,
    pub height: usize,
    pub output: OutputKind,
    /// Formula evaluated locally over the fetched bands; `None` for true colour
    pub formula: Option<Expr>,
    pub bands: Vec<BandRef>,
    pub encoding: OutputEncoding,
}

impl FetchRequest {
    pub fn pixel_request(&self) -> PixelRequest {
        PixelRequest {
            collection: self.collection.clone(),
            compositing: self.compositing,
            bbox: self.bbox,
            time_range: self.time_range,
            width: self.width,
            height: self.height,
            bands: self.bands.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Provider error or malformed response
    Provider,
    /// Provider did not answer in time
    Timeout,
    /// Response held no samples
    Empty,
    /// The sensor cannot produce this output
    Unsupported,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Provider => "provider",
            FailureKind::Timeout => "timeout",
            FailureKind::Empty => "empty",
            FailureKind::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum Availability {
    Fulfilled(BandStack),
    Failed { kind: FailureKind, reason: String },
}

/// Outcome of one fetch, paired with the request that produced it.
#[derive(Debug, Clone)]
pub struct RasterResult {
    pub request: FetchRequest,
    pub availability: Availability,
}

impl RasterResult {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self.availability, Availability::Fulfilled(_))
    }

    pub fn bands(&self) -> Option<&BandStack> {
        match &self.availability {
            Availability::Fulfilled(stack) => Some(stack),
            Availability::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match &self.availability {
            Availability::Fulfilled(_) => None,
            Availability::Failed { kind, reason } => Some((*kind, reason)),
        }
    }

    pub fn label(&self) -> String {
        self.request.output.label()
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FetchState {
    NotRequested,
    Requested,
    Fulfilled,
    Failed,
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Fulfilled | FetchState::Failed)
    }

    fn can_become(&self, next: FetchState) -> bool {
        matches!(
            (self, next),
            (FetchState::NotRequested, FetchState::Requested)
                | (FetchState::Requested, FetchState::Fulfilled)
                | (FetchState::Requested, FetchState::Failed)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("output '{output}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        output: String,
        from: FetchState,
        to: FetchState,
    },
}

/// Per-output fetch progress for one analysis call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchLedger {
    states: BTreeMap<String, FetchState>,
}

impl FetchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state; outputs never seen are `NotRequested`
    pub fn state(&self, output: &str) -> FetchState {
        self.states
            .get(output)
            .copied()
            .unwrap_or(FetchState::NotRequested)
    }

    pub fn transition(&mut self, output: &str, to: FetchState) -> Result<(), LedgerError> {
        let from = self.state(output);
        if !from.can_become(to) {
            return Err(LedgerError::InvalidTransition {
                output: output.to_string(),
                from,
                to,
            });
        }
        self.states.insert(output.to_string(), to);
        Ok(())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, FetchState)> {
        self.states.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn into_map(self) -> BTreeMap<String, FetchState> {
        self.states
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Connection settings for the networked provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetcherConfig {
    pub base_url: String,
    /// Bearer token; falls back to `AQUASAT_API_TOKEN`
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        let defaults = ProcessClientOptions::default();
        Self {
            base_url: defaults.base_url,
            token: None,
            request_timeout_secs: defaults.request_timeout.as_secs(),
            max_retries: defaults.max_retries,
        }
    }
}

impl From<&FetcherConfig> for ProcessClientOptions {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            token: config.token.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.max_retries,
        }
    }
}

/// Issues provider calls and turns every outcome into a [`RasterResult`].
pub struct ImageFetcher {
    provider: Box<dyn ImageryProvider>,
}

impl ImageFetcher {
    pub fn new(provider: Box<dyn ImageryProvider>) -> Self {
        Self { provider }
    }

    /// Fetcher backed by the HTTP provider
    pub fn from_config(config: &FetcherConfig) -> aquasat_cloud::Result<Self> {
        let provider = HttpImageryProvider::new(config.into())?;
        Ok(Self::new(Box::new(provider)))
    }

    /// Fetch one output. Never fails; problems become [`Availability::Failed`].
    pub fn fetch(
        &self,
        profile: &SensorProfile,
        bbox: &BoundingBox,
        time_range: &TimeRange,
        grid: &ResolvedGrid,
        output: OutputKind,
    ) -> RasterResult {
        let (formula, bands) = match resolve_output(profile, &output) {
            Ok(resolved) => resolved,
            Err(reason) => {
                debug!(output = %output.label(), %reason, "output not supported");
                let request = build_request(profile, bbox, time_range, grid, output, None, Vec::new());
                return failed(request, FailureKind::Unsupported, reason);
            }
        };
        let request = build_request(profile, bbox, time_range, grid, output, formula, bands);

        info!(
            output = %request.output.label(),
            sensor = %request.sensor,
            width = request.width,
            height = request.height,
            "fetching"
        );

        let availability = match self.provider.get_pixels(&request.pixel_request()) {
            Ok(stack) => check_stack(stack, &request),
            Err(err) => {
                let kind = match err {
                    ProviderError::Timeout(_) => FailureKind::Timeout,
                    ProviderError::Empty(_) => FailureKind::Empty,
                    ProviderError::Unavailable(_) => FailureKind::Provider,
                };
                Availability::Failed {
                    kind,
                    reason: err.to_string(),
                }
            }
        };

        if let Availability::Failed { kind, reason } = &availability {
            warn!(output = %request.output.label(), %kind, %reason, "fetch failed");
        }

        RasterResult {
            request,
            availability,
        }
    }

    /// [`fetch`](Self::fetch) while recording progress in `ledger`.
    pub fn fetch_tracked(
        &self,
        ledger: &mut FetchLedger,
        profile: &SensorProfile,
        bbox: &BoundingBox,
        time_range: &TimeRange,
        grid: &ResolvedGrid,
        output: OutputKind,
    ) -> Result<RasterResult, LedgerError> {
        let label = output.label();
        ledger.transition(&label, FetchState::Requested)?;
        let result = self.fetch(profile, bbox, time_range, grid, output);
        let state = if result.is_fulfilled() {
            FetchState::Fulfilled
        } else {
            FetchState::Failed
        };
        ledger.transition(&label, state)?;
        Ok(result)
    }

    /// Fetch several outputs in order; one failing does not stop the rest.
    pub fn fetch_all(
        &self,
        ledger: &mut FetchLedger,
        profile: &SensorProfile,
        bbox: &BoundingBox,
        time_range: &TimeRange,
        grid: &ResolvedGrid,
        outputs: Vec<OutputKind>,
    ) -> Result<Vec<RasterResult>, LedgerError> {
        outputs
            .into_iter()
            .map(|output| self.fetch_tracked(ledger, profile, bbox, time_range, grid, output))
            .collect()
    }
}

fn resolve_output(
    profile: &SensorProfile,
    output: &OutputKind,
) -> Result<(Option<Expr>, Vec<BandRef>), String> {
    let formula = match output {
        OutputKind::TrueColor => {
            let bands = profile.band_refs_for(["red", "green", "blue"])?;
            return Ok((None, bands));
        }
        OutputKind::WaterIndex => profile.formula(NDWI).cloned(),
        OutputKind::Index(name) => profile.formula(name).cloned(),
        OutputKind::Custom { formula, .. } => Some(formula.clone()),
    }
    .ok_or_else(|| format!("sensor '{}' has no formula for {}", profile.id, output.label()))?;

    let bands = profile.band_refs(&formula)?;
    Ok((Some(formula), bands))
}

fn build_request(
    profile: &SensorProfile,
    bbox: &BoundingBox,
    time_range: &TimeRange,
    grid: &ResolvedGrid,
    output: OutputKind,
    formula: Option<Expr>,
    bands: Vec<BandRef>,
) -> FetchRequest {
    FetchRequest {
        sensor: profile.id.clone(),
        collection: profile.collection.clone(),
        compositing: profile.compositing,
        bbox: *bbox,
        time_range: *time_range,
        resolution_m: grid.resolution_m,
        width: grid.width,
        height: grid.height,
        encoding: output.encoding(),
        output,
        formula,
        bands,
    }
}

fn check_stack(stack: BandStack, request: &FetchRequest) -> Availability {
    if stack.is_empty() || stack.is_all_nodata() {
        return Availability::Failed {
            kind: FailureKind::Empty,
            reason: "provider returned no samples".into(),
        };
    }
    if stack.shape() != Some((request.height, request.width)) {
        return Availability::Failed {
            kind: FailureKind::Provider,
            reason: format!(
                "provider returned {:?}, expected {}x{}",
                stack.shape(),
                request.height,
                request.width
            ),
        };
    }
    if let Some(missing) = request.bands.iter().find(|b| !stack.contains(&b.name)) {
        return Availability::Failed {
            kind: FailureKind::Provider,
            reason: format!("provider response lacks band '{}'", missing.name),
        };
    }
    Availability::Fulfilled(stack)
}

fn failed(request: FetchRequest, kind: FailureKind, reason: String) -> RasterResult {
    RasterResult {
        request,
        availability: Availability::Failed { kind, reason },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{SensorRegistry, ALGAL};
    use aquasat_core::Raster;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Provider answering every band with a constant, counting calls
    struct ConstProvider {
        value: f64,
        calls: Arc<AtomicUsize>,
    }

    impl ImageryProvider for ConstProvider {
        fn get_pixels(&self, req: &PixelRequest) -> Result<BandStack, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut stack = BandStack::new();
            for band in &req.bands {
                stack
                    .insert(band.name.clone(), Raster::filled(req.height, req.width, self.value))
                    .map_err(|e| ProviderError::Unavailable(e.to_string()))?;
            }
            Ok(stack)
        }
    }

    struct FailingProvider(fn() -> ProviderError);

    impl ImageryProvider for FailingProvider {
        fn get_pixels(&self, _req: &PixelRequest) -> Result<BandStack, ProviderError> {
            Err((self.0)())
        }
    }

    fn grid() -> ResolvedGrid {
        ResolvedGrid {
            resolution_m: 60.0,
            width: 4,
            height: 3,
            notes: Vec::new(),
        }
    }

    fn fetch_with(
        provider: impl ImageryProvider + 'static,
        sensor: &str,
        output: OutputKind,
    ) -> RasterResult {
        let registry = SensorRegistry::builtin();
        let fetcher = ImageFetcher::new(Box::new(provider));
        fetcher.fetch(
            registry.profile_for(sensor),
            &BoundingBox::new(-122.52, 37.70, -122.15, 37.90),
            &TimeRange::parse("2023-06-01", "2023-06-30").unwrap(),
            &grid(),
            output,
        )
    }

    #[test]
    fn test_water_index_requests_ndwi_bands() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = ConstProvider {
            value: 0.2,
            calls: calls.clone(),
        };
        let result = fetch_with(provider, "landsat8", OutputKind::WaterIndex);

        assert!(result.is_fulfilled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let codes: Vec<_> = result.request.bands.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, vec!["B03", "B05"]);
        assert_eq!(result.request.collection, "landsat-ot-l2");
        assert_eq!(result.request.encoding, OutputEncoding::Float32);
        assert_eq!(result.bands().unwrap().shape(), Some((3, 4)));
    }

    #[test]
    fn test_true_color_bands() {
        let provider = ConstProvider {
            value: 0.1,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let result = fetch_with(provider, "modis", OutputKind::TrueColor);
        let codes: Vec<_> = result.request.bands.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, vec!["B01", "B04", "B03"]);
        assert_eq!(result.request.encoding, OutputEncoding::Rgb);
        assert!(result.request.formula.is_none());
    }

    #[test]
    fn test_provider_errors_map_to_kinds() {
        let cases: [(fn() -> ProviderError, FailureKind); 3] = [
            (|| ProviderError::Timeout("30s".into()), FailureKind::Timeout),
            (|| ProviderError::Empty("nothing".into()), FailureKind::Empty),
            (|| ProviderError::Unavailable("503".into()), FailureKind::Provider),
        ];
        for (make, kind) in cases {
            let result = fetch_with(FailingProvider(make), "sentinel2", OutputKind::Index(ALGAL.into()));
            assert_eq!(result.failure().map(|(k, _)| k), Some(kind));
        }
    }

    #[test]
    fn test_all_nodata_is_empty() {
        let provider = ConstProvider {
            value: f64::NAN,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let result = fetch_with(provider, "sentinel2", OutputKind::WaterIndex);
        assert_eq!(result.failure().map(|(k, _)| k), Some(FailureKind::Empty));
    }

    #[test]
    fn test_unknown_index_is_unsupported_without_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = ConstProvider {
            value: 0.2,
            calls: calls.clone(),
        };
        let result = fetch_with(provider, "sentinel2", OutputKind::Index("turbidity".into()));
        assert_eq!(result.failure().map(|(k, _)| k), Some(FailureKind::Unsupported));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_custom_formula_with_unmapped_band() {
        let provider = ConstProvider {
            value: 0.2,
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let output = OutputKind::Custom {
            name: "ndre".into(),
            formula: Expr::parse("nd(nir, red_edge1)").unwrap(),
        };
        let result = fetch_with(provider, "landsat8", output);
        let (kind, reason) = result.failure().unwrap();
        assert_eq!(kind, FailureKind::Unsupported);
        assert!(reason.contains("red_edge1"));
    }

    #[test]
    fn test_ledger_transitions() {
        let mut ledger = FetchLedger::new();
        assert_eq!(ledger.state("ndvi"), FetchState::NotRequested);

        ledger.transition("ndvi", FetchState::Requested).unwrap();
        ledger.transition("ndvi", FetchState::Failed).unwrap();
        assert!(ledger.state("ndvi").is_terminal());

        let err = ledger.transition("ndvi", FetchState::Requested).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InvalidTransition {
                output: "ndvi".into(),
                from: FetchState::Failed,
                to: FetchState::Requested,
            }
        );
        assert!(ledger.transition("algal", FetchState::Fulfilled).is_err());
    }

    #[test]
    fn test_fetch_all_tracks_each_output() {
        let registry = SensorRegistry::builtin();
        let fetcher = ImageFetcher::new(Box::new(ConstProvider {
            value: 0.2,
            calls: Arc::new(AtomicUsize::new(0)),
        }));
        let mut ledger = FetchLedger::new();
        let results = fetcher
            .fetch_all(
                &mut ledger,
                registry.profile_for("modis"),
                &BoundingBox::new(0.0, 0.0, 1.0, 1.0),
                &TimeRange::parse("2023-06-01", "2023-06-30").unwrap(),
                &grid(),
                vec![OutputKind::TrueColor, OutputKind::Index("missing".into())],
            )
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(ledger.state("true_color"), FetchState::Fulfilled);
        assert_eq!(ledger.state("missing"), FetchState::Failed);

        // an output cannot be fetched twice in one call
        let again = fetcher.fetch_tracked(
            &mut ledger,
            registry.profile_for("modis"),
            &BoundingBox::new(0.0, 0.0, 1.0, 1.0),
            &TimeRange::parse("2023-06-01", "2023-06-30").unwrap(),
            &grid(),
            OutputKind::TrueColor,
        );
        assert!(again.is_err());
    }
}
