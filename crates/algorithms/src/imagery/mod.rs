//! Imagery analysis algorithms
//!
//! - Expressions: band-math formula trees and their parser
//! - Indices: per-pixel formula evaluation over a band stack
//! - Water: water mask and secondary-index gating
//! - Classify: quality classes and area percentages
//! - Cyanobacteria: bloom density and severity estimate
//! - Composite: true-colour and water-detection RGB rasters

mod classify;
mod composite;
mod cyanobacteria;
mod expr;
mod indices;
mod water;

pub use classify::{classify, AlgalSource, ClassificationSummary, QualityThresholds};
pub use composite::{true_color, water_detection, RgbComposite};
pub use cyanobacteria::{
    density_field, estimate_cyanobacteria, BloomParams, BloomSeverity, CyanobacteriaEstimate,
};
pub use expr::Expr;
pub use indices::{compute_index, normalized_difference};
pub use water::{
    gate_by_mask, gate_by_water, is_sentinel, WaterMask, DEFAULT_WATER_THRESHOLD,
    NON_WATER_SENTINEL,
};
