//! Blocking imagery provider backed by [`ProcessClient`].
//!
//! Owns a single-threaded Tokio runtime so the pipeline can stay
//! synchronous. Must not be called from inside another Tokio runtime.

use aquasat_core::BandStack;

use crate::error::{CloudError, Result};
use crate::process_client::{ProcessClient, ProcessClientOptions};
use crate::provider::{ImageryProvider, PixelRequest, ProviderError};

/// [`ImageryProvider`] that talks HTTP to the provider's `/process` endpoint.
pub struct HttpImageryProvider {
    rt: tokio::runtime::Runtime,
    inner: ProcessClient,
}

impl HttpImageryProvider {
    pub fn new(options: ProcessClientOptions) -> Result<Self> {
        Self::from_client(ProcessClient::new(options)?)
    }

    /// Wrap an already configured async client.
    pub fn from_client(inner: ProcessClient) -> Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| CloudError::Network(e.to_string()))?;

        Ok(Self { rt, inner })
    }

    /// Fetch and decode one request (blocking).
    pub fn fetch(&self, request: &PixelRequest) -> Result<BandStack> {
        self.rt.block_on(self.inner.fetch(request))
    }

    pub fn endpoint(&self) -> &str {
        self.inner.endpoint()
    }
}

impl ImageryProvider for HttpImageryProvider {
    fn get_pixels(&self, request: &PixelRequest) -> std::result::Result<BandStack, ProviderError> {
        let stack = self.fetch(request)?;
        if stack.is_empty() || stack.is_all_nodata() {
            return Err(ProviderError::Empty(format!(
                "no samples for {} over the requested period",
                request.collection
            )));
        }
        Ok(stack)
    }
}
