//! The imagery-provider boundary.
//!
//! The pipeline asks a provider for a set of bands over a bounding box and
//! period, resampled onto a fixed pixel grid, and gets back a [`BandStack`]
//! keyed by logical band name. [`HttpImageryProvider`](crate::HttpImageryProvider)
//! is the networked implementation; tests use in-memory providers.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use aquasat_core::{BandStack, BoundingBox, TimeRange};

use crate::error::CloudError;

/// How the provider picks among overlapping scenes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compositing {
    /// Least cloud cover first
    LeastCloud,
    /// Latest acquisition first
    MostRecent,
}

impl Compositing {
    /// Mosaicking order name understood by the provider
    pub fn provider_order(&self) -> &'static str {
        match self {
            Compositing::LeastCloud => "leastCC",
            Compositing::MostRecent => "mostRecent",
        }
    }
}

impl std::fmt::Display for Compositing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compositing::LeastCloud => f.write_str("least-cloud"),
            Compositing::MostRecent => f.write_str("most-recent"),
        }
    }
}

/// One band to fetch: the logical name it is returned under and the
/// provider's own code for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRef {
    pub name: String,
    pub code: String,
}

impl BandRef {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// A single provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelRequest {
    pub collection: String,
    pub compositing: Compositing,
    pub bbox: BoundingBox,
    pub time_range: TimeRange,
    /// Output grid width in pixels
    pub width: usize,
    pub height: usize,
    pub bands: Vec<BandRef>,
}

impl PixelRequest {
    /// Number of samples a complete response carries
    pub fn sample_count(&self) -> usize {
        self.width * self.height * self.bands.len()
    }
}

/// Why a provider call produced no usable data.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("provider returned no data: {0}")]
    Empty(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl From<CloudError> for ProviderError {
    fn from(err: CloudError) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

/// Source of raster samples.
///
/// Calls are synchronous from the caller's view; implementations that do
/// network I/O block on their own runtime.
pub trait ImageryProvider: Send + Sync {
    fn get_pixels(&self, request: &PixelRequest) -> Result<BandStack, ProviderError>;
}

impl<P: ImageryProvider + ?Sized> ImageryProvider for Box<P> {
    fn get_pixels(&self, request: &PixelRequest) -> Result<BandStack, ProviderError> {
        (**self).get_pixels(request)
    }
}

impl<P: ImageryProvider + ?Sized> ImageryProvider for std::sync::Arc<P> {
    fn get_pixels(&self, request: &PixelRequest) -> Result<BandStack, ProviderError> {
        (**self).get_pixels(request)
    }
}
