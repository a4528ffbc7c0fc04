//! # AquaSat Algorithms
//!
//! Per-pixel spectral analysis for the water-index pipeline.
//!
//! ## Modules
//!
//! - **imagery**: band-math expressions, index evaluation, water masking,
//!   quality classification, RGB composites

pub mod imagery;
pub(crate) mod maybe_rayon;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::imagery::{
        classify, compute_index, gate_by_water, AlgalSource, ClassificationSummary, Expr,
        QualityThresholds, WaterMask,
    };
    pub use aquasat_core::prelude::*;
}
