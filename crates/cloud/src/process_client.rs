//! Async client for the provider's `/process` endpoint.
//!
//! The provider resamples the requested bands onto the output grid and
//! answers with `width * height * bands` little-endian `f32` samples,
//! pixel-interleaved in row-major order:
//!
//! ```text
//! px(0,0): b0 b1 .. bn | px(0,1): b0 b1 .. bn | ...
//! ```
//!
//! Non-finite samples are the provider's no-data and become `NaN`.

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use tracing::{debug, info};
use aquasat_core::{BandStack, GeoTransform, Raster};

use crate::auth::{BearerAuth, CloudAuth, NoAuth};
use crate::error::{CloudError, Result};
use crate::http::HttpClient;
use crate::provider::PixelRequest;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

/// JSON body posted to `{base_url}/process`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    /// `[west, south, east, north]`
    pub bbox: [f64; 4],
    pub crs: &'static str,
    pub from: String,
    pub to: String,
    pub collection: String,
    pub mosaicking: &'static str,
    /// Provider band codes, in sample order
    pub bands: Vec<String>,
    pub width: usize,
    pub height: usize,
    pub sample_type: &'static str,
}

impl From<&PixelRequest> for ProcessRequest {
    fn from(req: &PixelRequest) -> Self {
        Self {
            bbox: req.bbox.to_array(),
            crs: "EPSG:4326",
            from: format!("{}T00:00:00Z", req.time_range.start()),
            to: format!("{}T23:59:59Z", req.time_range.end()),
            collection: req.collection.clone(),
            mosaicking: req.compositing.provider_order(),
            bands: req.bands.iter().map(|b| b.code.clone()).collect(),
            width: req.width,
            height: req.height,
            sample_type: "FLOAT32",
        }
    }
}

/// Split a pixel-interleaved `f32` body into one raster per band.
pub fn decode_samples(body: &[u8], request: &PixelRequest) -> Result<BandStack> {
    let n_bands = request.bands.len();
    let (rows, cols) = (request.height, request.width);
    let expected = request.sample_count() * 4;

    if n_bands == 0 || rows == 0 || cols == 0 {
        return Err(CloudError::Decode {
            reason: format!("empty grid {}x{} with {} bands", cols, rows, n_bands),
        });
    }
    if body.len() != expected {
        return Err(CloudError::Decode {
            reason: format!(
                "expected {} bytes for {}x{}x{} f32 samples, got {}",
                expected, cols, rows, n_bands, body.len()
            ),
        });
    }

    let mut samples = vec![0f32; request.sample_count()];
    LittleEndian::read_f32_into(body, &mut samples);

    let transform = GeoTransform::for_bbox(&request.bbox, cols, rows);
    let mut stack = BandStack::new();
    for (b, band) in request.bands.iter().enumerate() {
        let data: Vec<f64> = samples
            .iter()
            .skip(b)
            .step_by(n_bands)
            .map(|&v| if v.is_finite() { v as f64 } else { f64::NAN })
            .collect();
        let mut raster = Raster::from_vec(data, rows, cols)?;
        raster.set_transform(transform);
        stack.insert(band.name.clone(), raster)?;
    }

    Ok(stack)
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for [`ProcessClient`].
#[derive(Debug, Clone)]
pub struct ProcessClientOptions {
    /// Provider root, `/process` is appended.
    pub base_url: String,
    /// Bearer token; `None` falls back to `AQUASAT_API_TOKEN`, then to no auth.
    pub token: Option<String>,
    /// Per-request timeout (default 60 s).
    pub request_timeout: Duration,
    /// Maximum retries on transient failures (default 3).
    pub max_retries: u32,
}

impl Default for ProcessClientOptions {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api/v1".into(),
            token: None,
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Async client for band requests.
pub struct ProcessClient {
    http: HttpClient,
    auth: Box<dyn CloudAuth>,
    endpoint: String,
}

impl ProcessClient {
    pub fn new(options: ProcessClientOptions) -> Result<Self> {
        let auth: Box<dyn CloudAuth> = match options.token.as_deref() {
            Some(token) => Box::new(BearerAuth::new(token)?),
            None => match BearerAuth::from_env() {
                Ok(auth) => Box::new(auth),
                Err(_) => {
                    debug!("no provider token configured, sending unauthenticated requests");
                    Box::new(NoAuth)
                }
            },
        };

        let http = HttpClient::new(options.request_timeout, options.max_retries)?;
        let endpoint = format!("{}/process", options.base_url.trim_end_matches('/'));

        Ok(Self {
            http,
            auth,
            endpoint,
        })
    }

    /// Use a custom signer instead of the configured token.
    pub fn with_auth(mut self, auth: Box<dyn CloudAuth>) -> Self {
        self.auth = auth;
        self
    }

    /// Shorten the retry delay, mainly for tests against local servers.
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.http = self.http.with_backoff(base);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch and decode the bands of one request.
    pub async fn fetch(&self, request: &PixelRequest) -> Result<BandStack> {
        let body = ProcessRequest::from(request);
        info!(
            collection = %body.collection,
            bands = ?body.bands,
            width = body.width,
            height = body.height,
            "requesting bands"
        );

        let bytes = self
            .http
            .post_json(&self.endpoint, &body, self.auth.as_ref())
            .await?;
        debug!(bytes = bytes.len(), "provider response received");

        decode_samples(&bytes, request)
    }
}
