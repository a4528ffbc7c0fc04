//! Error types for the imagery-provider client.

use thiserror::Error;

/// Errors produced while talking to the imagery provider.
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("cannot decode provider response: {reason}")]
    Decode { reason: String },

    #[error("core error: {0}")]
    Core(#[from] aquasat_core::Error),
}

impl CloudError {
    /// Whether the failure was the provider not answering in time
    pub fn is_timeout(&self) -> bool {
        match self {
            CloudError::Timeout(_) => true,
            CloudError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Result alias for cloud operations.
pub type Result<T> = std::result::Result<T, CloudError>;
