//! # AquaSat Cloud
//!
//! Client for the remote imagery provider.
//!
//! Band requests are posted as JSON to the provider's `/process` endpoint,
//! which answers with raw little-endian `f32` samples on the requested grid.
//! Transient failures are retried with exponential backoff and a static
//! bearer token is attached when configured.
//!
//! [`HttpImageryProvider`] wraps the async [`ProcessClient`] in its own
//! runtime and implements the synchronous [`ImageryProvider`] trait the
//! pipeline consumes.

pub mod auth;
pub mod blocking;
pub mod error;
pub mod http;
pub mod process_client;
pub mod provider;

pub use blocking::HttpImageryProvider;
pub use error::{CloudError, Result};
pub use process_client::{decode_samples, ProcessClient, ProcessClientOptions, ProcessRequest};
pub use provider::{BandRef, Compositing, ImageryProvider, PixelRequest, ProviderError};
