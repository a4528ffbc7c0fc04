use thiserror::Error;

use crate::backend::BackendError;
use crate::fetch::{FailureKind, LedgerError};
use crate::validate::ValidationError;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("water index unavailable ({kind}): {reason}")]
    PrimaryUnavailable { kind: FailureKind, reason: String },

    #[error("no valid pixels for the requested area and period")]
    NoValidData,

    #[error("invalid formula for '{name}': {reason}")]
    InvalidFormula { name: String, reason: String },

    #[error("computation failed: {0}")]
    Computation(#[from] aquasat_core::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
