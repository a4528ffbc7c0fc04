//! # AquaSat Pipeline
//!
//! Sensor-parameterized water-index analysis.
//!
//! A call moves through five stages:
//!
//! 1. **registry**: the sensor profile (bands, resolution, formulas)
//! 2. **validate**: bounding-box checks and the output pixel grid
//! 3. **fetch**: one provider request per output, failures recorded per output
//! 4. **backend**: water mask, quality classes and algal presence
//! 5. **assemble**: the camelCase JSON result
//!
//! [`Pipeline::run`] never fails; errors come back as
//! [`AnalysisOutcome::Failure`].

pub mod assemble;
pub mod backend;
pub mod config;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod registry;
pub mod validate;

pub use assemble::{
    assemble, AnalysisFailure, AnalysisOutcome, AnalysisResult, OutputAvailability,
    ResultMetadata, RunMetadata,
};
pub use backend::{
    select_backend, AnalysisBackend, AnalysisInputs, BackendConfig, BackendError, FormulaBackend,
    ToolboxBackend, ToolboxConfig,
};
pub use config::{AnalysisConfig, ConfigError};
pub use error::{PipelineError, Result};
pub use fetch::{
    Availability, FailureKind, FetchLedger, FetchRequest, FetchState, FetcherConfig,
    ImageFetcher, OutputKind, RasterResult,
};
pub use pipeline::{Analysis, AnalysisRequest, Pipeline};
pub use registry::{SensorProfile, SensorRegistry};
pub use validate::{validate, ResolvedGrid, ValidationError, ValidationLimits};
