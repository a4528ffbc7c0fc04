//! AquaSat CLI - water-quality analysis from multispectral imagery

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use aquasat_core::{BoundingBox, TimeRange};
use aquasat_pipeline::{
    validate, AnalysisConfig, AnalysisFailure, AnalysisOutcome, AnalysisResult, Pipeline,
    SensorRegistry,
};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "aquasat")]
#[command(author, version, about = "Water-quality analysis from multispectral imagery", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Request fields shared by `analyze` and `validate`.
#[derive(clap::Args)]
struct RequestArgs {
    /// Analysis config JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Bounding box as west,south,east,north (overrides the config)
    #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
    bbox: Option<BoundingBox>,
    /// Sensor id, see `aquasat sensors`
    #[arg(short, long)]
    sensor: Option<String>,
    /// First acquisition date (YYYY-MM-DD)
    #[arg(long, requires = "end")]
    start: Option<String>,
    /// Last acquisition date (YYYY-MM-DD)
    #[arg(long, requires = "start")]
    end: Option<String>,
    /// Output resolution in metres
    #[arg(short, long)]
    resolution: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a water-quality analysis
    Analyze {
        #[command(flatten)]
        request: RequestArgs,
        /// Write the result JSON here instead of stdout
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Imagery provider base URL (overrides the config)
        #[arg(long)]
        provider_url: Option<String>,
        /// Pretty-print the result JSON
        #[arg(long)]
        pretty: bool,
    },
    /// Check a request and show the pixel grid it resolves to
    Validate {
        #[command(flatten)]
        request: RequestArgs,
    },
    /// List the supported sensors
    Sensors {
        /// Print full profiles as JSON
        #[arg(long)]
        json: bool,
    },
}

// ─── Helpers ────────────────────────────────────────────────────────────

/// Valid `RUST_LOG` directives win over `--verbose`
fn log_filter(verbose: bool, directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

fn setup_logging(verbose: bool) -> Result<()> {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(verbose, directives.as_deref()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")
}

fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn parse_bbox(s: &str) -> std::result::Result<BoundingBox, String> {
    let coords: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid bbox '{}': {}", s, e))?;
    match coords.as_slice() {
        [w, s, e, n] => Ok(BoundingBox::new(*w, *s, *e, *n)),
        _ => Err(format!(
            "bbox needs 4 values (west,south,east,north), got {}",
            coords.len()
        )),
    }
}

/// Config file (if any) with command-line overrides applied
fn build_config(args: &RequestArgs) -> Result<AnalysisConfig> {
    let mut config = match (&args.config, args.bbox) {
        (Some(path), _) => AnalysisConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        (None, Some(bbox)) => AnalysisConfig::new(bbox),
        (None, None) => bail!("either --config or --bbox is required"),
    };

    if let Some(bbox) = args.bbox {
        config.bbox = bbox;
    }
    if let Some(sensor) = &args.sensor {
        config.sensor = sensor.clone();
    }
    if let (Some(start), Some(end)) = (&args.start, &args.end) {
        let range = TimeRange::parse(start, end).context("Invalid time range")?;
        config.time_range = Some(range);
    }
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
    }
    Ok(config)
}

fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisOutcome> {
    let request = config.to_request().context("Invalid analysis request")?;
    let pipeline = Pipeline::from_config(config).context("Failed to set up imagery provider")?;

    info!(
        "Analyzing {} from {} to {} with {}",
        config.sensor,
        request.time_range.start(),
        request.time_range.end(),
        pipeline.backend_name()
    );

    let pb = spinner("Fetching imagery and analyzing...");
    let outcome = pipeline.run(&request);
    pb.finish_and_clear();
    Ok(outcome)
}

fn write_outcome(outcome: &AnalysisOutcome, data: Option<&Path>, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(outcome)?
    } else {
        serde_json::to_string(outcome)?
    };
    match data {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}

fn print_summary(result: &AnalysisResult) {
    let meta = &result.metadata;
    eprintln!("Sensor: {} ({})", result.data_source, meta.collection);
    eprintln!(
        "Grid: {} x {} at {:.1} m, {:.1}% valid",
        meta.width,
        meta.height,
        meta.resolution_m,
        meta.data_quality * 100.0
    );
    eprintln!("  Water coverage:   {:.1}%", result.water_coverage);
    eprintln!("  Clear water:      {:.1}%", result.clear_water);
    eprintln!("  Moderate quality: {:.1}%", result.moderate_quality);
    eprintln!("  Degraded quality: {:.1}%", result.degraded_quality);
    eprintln!(
        "  Algal presence:   {:.1}% ({:?})",
        result.algal_presence, meta.algal_source
    );
    if let Some(cyano) = &meta.cyanobacteria {
        eprintln!(
            "  Cyanobacteria:    {:.0} cells/mL, {:?} ({:.0}% confidence)",
            cyano.density_cells_per_ml, cyano.severity, cyano.confidence
        );
    }
    for (name, mean) in &meta.extra_indices {
        eprintln!("  {}: {:.3}", name, mean);
    }
    for note in &meta.notes {
        eprintln!("  note: {}", note);
    }
}

fn done(name: &str, path: Option<&Path>, elapsed: std::time::Duration) {
    if let Some(path) = path {
        eprintln!("{} saved to: {}", name, path.display());
    }
    eprintln!("  Processing time: {:.2?}", elapsed);
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Analyze ──────────────────────────────────────────────────
        Commands::Analyze {
            request,
            data,
            provider_url,
            pretty,
        } => {
            let start = Instant::now();
            let outcome = build_config(&request)
                .map(|mut config| {
                    if let Some(url) = provider_url {
                        config.provider.base_url = url;
                    }
                    config
                })
                .and_then(|config| run_analysis(&config))
                .unwrap_or_else(|err| {
                    AnalysisOutcome::Failure(AnalysisFailure::new(format!("{:#}", err)))
                });

            write_outcome(&outcome, data.as_deref(), pretty)?;

            match &outcome {
                AnalysisOutcome::Success(result) => {
                    print_summary(result);
                    done("Analysis", data.as_deref(), start.elapsed());
                }
                AnalysisOutcome::Failure(failure) => {
                    eprintln!("Error in water quality analysis: {}", failure.error);
                    std::process::exit(1);
                }
            }
        }

        // ── Validate ─────────────────────────────────────────────────
        Commands::Validate { request } => {
            let config = build_config(&request)?;
            let registry = SensorRegistry::builtin();
            let profile = registry.profile_for(&config.sensor);
            let grid = validate(&config.bbox, config.resolution, profile, &config.limits)
                .context("Request rejected")?;

            println!("Sensor: {} ({})", profile.id, profile.display_name);
            println!(
                "BBox: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                config.bbox.west, config.bbox.south, config.bbox.east, config.bbox.north
            );
            println!("Resolution: {:.2} m", grid.resolution_m);
            println!(
                "Grid: {} x {} ({} cells)",
                grid.width,
                grid.height,
                grid.pixel_count()
            );
            for note in &grid.notes {
                println!("  note: {}", note);
            }
        }

        // ── Sensors ──────────────────────────────────────────────────
        Commands::Sensors { json } => {
            let registry = SensorRegistry::builtin();
            if json {
                println!("{}", serde_json::to_string_pretty(registry.profiles())?);
            } else {
                for profile in registry.profiles() {
                    let marker = if profile.id == registry.default_profile().id {
                        " (default)"
                    } else {
                        ""
                    };
                    println!(
                        "{:<14} {:<28} {:>6} m  {:<12} {}{}",
                        profile.id,
                        profile.display_name,
                        profile.native_resolution_m,
                        profile.compositing.to_string(),
                        profile.collection,
                        marker
                    );
                }
            }
        }
    }

    Ok(())
}
