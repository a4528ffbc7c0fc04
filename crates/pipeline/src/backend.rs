//! Analysis backends: turn an index field and its water mask into a
//! [`ClassificationSummary`].
//!
//! [`FormulaBackend`] is the self-contained threshold classifier.
//! [`ToolboxBackend`] hands the same inputs to an external program and falls
//! back to the formula backend whenever that program cannot deliver.

use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use aquasat_algorithms::imagery::{classify, ClassificationSummary, QualityThresholds, WaterMask};
use aquasat_core::Raster;

/// Everything a backend needs for one classification.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisInputs<'a> {
    /// Primary water index
    pub index: &'a Raster<f64>,
    pub mask: &'a WaterMask,
    /// Water-gated secondary (algal) index, when it was fetched
    pub secondary: Option<&'a Raster<f64>>,
    pub thresholds: &'a QualityThresholds,
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("classification failed: {0}")]
    Core(#[from] aquasat_core::Error),
}

/// Strategy used to classify an analysis.
pub trait AnalysisBackend: Send + Sync {
    /// Short name reported in result metadata
    fn name(&self) -> &str;

    fn analyze(&self, inputs: &AnalysisInputs<'_>) -> Result<ClassificationSummary, BackendError>;
}

// ---------------------------------------------------------------------------
// Formula backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct FormulaBackend;

impl AnalysisBackend for FormulaBackend {
    fn name(&self) -> &str {
        "formula"
    }

    fn analyze(&self, inputs: &AnalysisInputs<'_>) -> Result<ClassificationSummary, BackendError> {
        Ok(classify(
            inputs.index,
            inputs.mask,
            inputs.secondary,
            inputs.thresholds,
        )?)
    }
}

// ---------------------------------------------------------------------------
// Toolbox backend
// ---------------------------------------------------------------------------

fn default_toolbox_timeout() -> u64 {
    300
}

/// External analysis program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolboxConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_toolbox_timeout")]
    pub timeout_secs: u64,
}

impl ToolboxConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout_secs: default_toolbox_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    /// Use an external toolbox; `None` selects the formula backend
    pub toolbox: Option<ToolboxConfig>,
}

/// Why the toolbox could not produce a summary
#[derive(Error, Debug)]
pub enum ToolboxError {
    #[error("cannot start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("toolbox I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("toolbox did not finish within {0:?}")]
    Timeout(Duration),

    #[error("toolbox exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("toolbox output is not a summary: {0}")]
    Output(#[from] serde_json::Error),

    #[error("toolbox summary out of range: {0}")]
    Invalid(String),
}

/// JSON written to the toolbox's stdin
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolboxPayload<'a> {
    width: usize,
    height: usize,
    /// Row-major primary index; no-data serialises as `null`
    index: Vec<f64>,
    water: Vec<bool>,
    secondary: Option<Vec<f64>>,
    thresholds: &'a QualityThresholds,
}

impl<'a> ToolboxPayload<'a> {
    fn new(inputs: &AnalysisInputs<'a>) -> Self {
        let (height, width) = inputs.index.shape();
        Self {
            width,
            height,
            index: inputs.index.data().iter().copied().collect(),
            water: inputs.mask.as_array().iter().copied().collect(),
            secondary: inputs
                .secondary
                .map(|s| s.data().iter().copied().collect()),
            thresholds: inputs.thresholds,
        }
    }
}

/// Runs an external program; falls back to [`FormulaBackend`] on any failure.
pub struct ToolboxBackend {
    config: ToolboxConfig,
    fallback: FormulaBackend,
}

impl ToolboxBackend {
    pub fn new(config: ToolboxConfig) -> Self {
        Self {
            config,
            fallback: FormulaBackend,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Run the program once and parse its summary.
    pub fn run_toolbox(&self, inputs: &AnalysisInputs<'_>) -> Result<ClassificationSummary, ToolboxError> {
        let payload = serde_json::to_vec(&ToolboxPayload::new(inputs))?;
        let timeout = self.timeout();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let output = rt.block_on(async {
            let mut child = Command::new(&self.config.command)
                .args(&self.config.args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|source| ToolboxError::Spawn {
                    command: self.config.command.clone(),
                    source,
                })?;
            debug!(command = %self.config.command, bytes = payload.len(), "toolbox started");

            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| ToolboxError::Invalid("stdin not captured".into()))?;

            // stdin is fed while stdout and stderr drain
            let feed = async move {
                let written = stdin.write_all(&payload).await;
                drop(stdin);
                written
            };
            let run = async move {
                let (written, output) = tokio::join!(feed, child.wait_with_output());
                let output = output?;
                match written {
                    Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                    _ => Ok(output),
                }
            };

            let output = tokio::time::timeout(timeout, run)
                .await
                .map_err(|_| ToolboxError::Timeout(timeout))?;
            Ok::<_, ToolboxError>(output?)
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ToolboxError::Exit {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(500).collect(),
            });
        }

        let summary: ClassificationSummary = serde_json::from_slice(&output.stdout)?;
        check_summary(&summary)?;
        Ok(summary)
    }
}

const PARTITION_TOLERANCE: f64 = 1e-6;

fn check_summary(summary: &ClassificationSummary) -> Result<(), ToolboxError> {
    let fields = [
        ("waterCoverage", summary.water_coverage),
        ("clearWater", summary.clear_water),
        ("moderateQuality", summary.moderate_quality),
        ("degradedQuality", summary.degraded_quality),
        ("algalPresence", summary.algal_presence),
    ];
    for (name, value) in fields {
        if !(0.0..=100.0).contains(&value) {
            return Err(ToolboxError::Invalid(format!("{} = {}", name, value)));
        }
    }

    // Quality classes are shares of the water area
    let partition = summary.clear_water + summary.moderate_quality + summary.degraded_quality;
    if partition > 100.0 + PARTITION_TOLERANCE {
        return Err(ToolboxError::Invalid(format!(
            "quality classes sum to {}",
            partition
        )));
    }
    if summary.water_pixels > summary.valid_pixels {
        return Err(ToolboxError::Invalid(format!(
            "{} water pixels out of {} valid",
            summary.water_pixels, summary.valid_pixels
        )));
    }
    if summary.water_pixels == 0 && (summary.water_coverage > 0.0 || partition > 0.0) {
        return Err(ToolboxError::Invalid(
            "quality classes reported for an area without water".into(),
        ));
    }
    Ok(())
}

impl AnalysisBackend for ToolboxBackend {
    fn name(&self) -> &str {
        "toolbox"
    }

    fn analyze(&self, inputs: &AnalysisInputs<'_>) -> Result<ClassificationSummary, BackendError> {
        match self.run_toolbox(inputs) {
            Ok(summary) => {
                info!(command = %self.config.command, "toolbox analysis complete");
                Ok(summary)
            }
            Err(err) => {
                warn!(
                    command = %self.config.command,
                    error = %err,
                    "toolbox unavailable, using formula analysis"
                );
                self.fallback.analyze(inputs)
            }
        }
    }
}

/// Pick the backend once, at pipeline construction.
pub fn select_backend(config: &BackendConfig) -> Box<dyn AnalysisBackend> {
    match &config.toolbox {
        Some(toolbox) => Box::new(ToolboxBackend::new(toolbox.clone())),
        None => Box::new(FormulaBackend),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquasat_algorithms::imagery::AlgalSource;

    fn fixture() -> (Raster<f64>, WaterMask, QualityThresholds) {
        let index = Raster::from_vec(vec![0.2, 0.1, 0.01, -0.3], 2, 2).unwrap();
        let t = QualityThresholds::default();
        let mask = WaterMask::from_index(&index, t.water);
        (index, mask, t)
    }

    fn analyze_with(backend: &dyn AnalysisBackend) -> ClassificationSummary {
        let (index, mask, t) = fixture();
        let inputs = AnalysisInputs {
            index: &index,
            mask: &mask,
            secondary: None,
            thresholds: &t,
        };
        backend.analyze(&inputs).unwrap()
    }

    #[test]
    fn test_formula_backend() {
        let summary = analyze_with(&FormulaBackend);
        assert_eq!(summary.water_pixels, 2);
        assert_eq!(summary.water_coverage, 50.0);
        assert_eq!(summary.clear_water, 50.0);
        assert_eq!(summary.moderate_quality, 50.0);
        assert_eq!(summary.algal_source, AlgalSource::Proxy);
    }

    #[test]
    fn test_select_backend() {
        assert_eq!(select_backend(&BackendConfig::default()).name(), "formula");
        let config = BackendConfig {
            toolbox: Some(ToolboxConfig::new("analyzer")),
        };
        assert_eq!(select_backend(&config).name(), "toolbox");
    }

    #[test]
    fn test_missing_program_falls_back() {
        let backend = ToolboxBackend::new(ToolboxConfig::new("aquasat-no-such-toolbox"));
        let (index, mask, t) = fixture();
        let inputs = AnalysisInputs {
            index: &index,
            mask: &mask,
            secondary: None,
            thresholds: &t,
        };
        assert!(matches!(
            backend.run_toolbox(&inputs),
            Err(ToolboxError::Spawn { .. })
        ));
        assert_eq!(analyze_with(&backend), analyze_with(&FormulaBackend));
    }

    #[test]
    fn test_toolbox_config_defaults() {
        let config: ToolboxConfig = serde_json::from_str(r#"{"command": "snap"}"#).unwrap();
        assert_eq!(config.timeout_secs, 300);
        assert!(config.args.is_empty());
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout_secs: u64) -> ToolboxBackend {
        ToolboxBackend::new(ToolboxConfig {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            timeout_secs,
        })
    }

    #[cfg(unix)]
    #[test]
    fn test_toolbox_summary_is_used() {
        let backend = sh(
            r#"cat > /dev/null; echo '{"waterCoverage": 12.5, "clearWater": 100.0, "moderateQuality": 0.0, "degradedQuality": 0.0, "algalPresence": 3.0, "algalSource": "measured", "validPixels": 8, "waterPixels": 1, "meanIndex": 0.4, "stdIndex": 0.0}'"#,
            10,
        );
        let summary = analyze_with(&backend);
        assert_eq!(summary.water_coverage, 12.5);
        assert_eq!(summary.algal_source, AlgalSource::Measured);
    }

    #[cfg(unix)]
    #[test]
    fn test_bad_output_and_exit_fall_back() {
        let formula = analyze_with(&FormulaBackend);
        assert_eq!(analyze_with(&sh("cat > /dev/null; echo not-json", 10)), formula);
        assert_eq!(analyze_with(&sh("cat > /dev/null; exit 3", 10)), formula);
    }

    #[cfg(unix)]
    #[test]
    fn test_out_of_range_summary_rejected() {
        let backend = sh(
            r#"cat > /dev/null; echo '{"waterCoverage": 250.0, "clearWater": 0.0, "moderateQuality": 0.0, "degradedQuality": 0.0, "algalPresence": 0.0, "algalSource": "proxy", "validPixels": 1, "waterPixels": 1, "meanIndex": null, "stdIndex": null}'"#,
            10,
        );
        let (index, mask, t) = fixture();
        let inputs = AnalysisInputs {
            index: &index,
            mask: &mask,
            secondary: None,
            thresholds: &t,
        };
        assert!(matches!(backend.run_toolbox(&inputs), Err(ToolboxError::Invalid(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_overfull_partition_rejected() {
        let backend = sh(
            r#"cat > /dev/null; echo '{"waterCoverage": 50.0, "clearWater": 90.0, "moderateQuality": 90.0, "degradedQuality": 90.0, "algalPresence": 0.0, "algalSource": "proxy", "validPixels": 4, "waterPixels": 2, "meanIndex": 0.1, "stdIndex": 0.0}'"#,
            10,
        );
        let (index, mask, t) = fixture();
        let inputs = AnalysisInputs {
            index: &index,
            mask: &mask,
            secondary: None,
            thresholds: &t,
        };
        match backend.run_toolbox(&inputs) {
            Err(ToolboxError::Invalid(msg)) => assert!(msg.contains("sum to 270"), "{}", msg),
            other => panic!("expected an invalid summary, got {:?}", other),
        }
        assert_eq!(analyze_with(&backend), analyze_with(&FormulaBackend));
    }

    #[cfg(unix)]
    #[test]
    fn test_chatty_toolbox_does_not_block() {
        // 200 KiB of progress on stderr before stdin is read
        let backend = sh(
            r#"yes progress | head -c 204800 >&2; cat > /dev/null; echo '{"waterCoverage": 50.0, "clearWater": 50.0, "moderateQuality": 50.0, "degradedQuality": 0.0, "algalPresence": 7.5, "algalSource": "proxy", "validPixels": 4, "waterPixels": 2, "meanIndex": 0.15, "stdIndex": 0.05}'"#,
            20,
        );
        let t = QualityThresholds::default();
        let big = Raster::filled(400, 400, 0.2);
        let big_mask = WaterMask::from_index(&big, t.water);
        let inputs = AnalysisInputs {
            index: &big,
            mask: &big_mask,
            secondary: None,
            thresholds: &t,
        };
        let started = std::time::Instant::now();
        let summary = backend.run_toolbox(&inputs).unwrap();
        assert_eq!(summary.algal_presence, 7.5);
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_falls_back() {
        let backend = sh("sleep 30", 1);
        let (index, mask, t) = fixture();
        let inputs = AnalysisInputs {
            index: &index,
            mask: &mask,
            secondary: None,
            thresholds: &t,
        };
        let started = std::time::Instant::now();
        assert!(matches!(backend.run_toolbox(&inputs), Err(ToolboxError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(analyze_with(&backend), analyze_with(&FormulaBackend));
    }
}
