//! bodyvol-bench: CLI tool for measurement parameter experimentation and diagnostics.
//!
//! Runs the measurement pipeline on a detection batch read from a JSON
//! file, printing the measurement and detailed per-stage diagnostics.
//! Useful for:
//!
//! - Tuning cross-section and resample counts
//! - Comparing fallback polynomial degrees on single-segment bodies
//! - Measuring per-stage durations to identify bottlenecks
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin bodyvol-bench -- [OPTIONS] <DETECTIONS_PATH>
//! ```
//!
//! Set `RUST_LOG=bodyvol_pipeline=debug` for per-stage logging.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use bodyvol_pipeline::diagnostics::{Clock, PipelineDiagnostics};
use bodyvol_pipeline::{
    Calibration, DetectionBatch, MeasureConfig, Measurement, OverflowPolicy, Segment,
    SegmentOrder,
};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Body length and volume from instance segmentation.
///
/// Runs the measurement pipeline on a detection batch with configurable
/// parameters and prints the measurement with per-stage timing
/// diagnostics.
#[derive(Parser)]
#[command(name = "bodyvol-bench", version)]
struct Cli {
    /// Path to the detection batch (JSON `DetectionBatch`).
    detections_path: PathBuf,

    /// Head-to-tail segment order as `id:name` pairs.
    #[arg(long, default_value = "0:head,1:thorax,2:abdomen", value_parser = parse_segments)]
    segments: SegmentOrder,

    /// Calibration in millimeters per pixel.
    ///
    /// The default of 1.0 treats pixels as millimeters, so lengths and
    /// volumes come out in pixel units.
    #[arg(long, default_value_t = 1.0)]
    mm_per_pixel: f64,

    /// Number of cross-sections to cast.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_CROSS_SECTIONS, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    cross_sections: usize,

    /// What to do when more cross-sections are requested than centerline points exist.
    #[arg(long, value_enum, default_value_t = Overflow::Clamp)]
    overflow: Overflow,

    /// Points in the resampled centerline.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_RESAMPLE_COUNT, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(2..))]
    resample_count: usize,

    /// Polynomial degree for the orthogonal regression fallback.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_FALLBACK_DEGREE, value_parser = clap::builder::RangedU64ValueParser::<u32>::new().range(1..))]
    fallback_degree: u32,

    /// Minimum detector confidence for a detection to be used.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_MIN_CONFIDENCE)]
    min_confidence: f32,

    /// Decimal places for lengths.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_PRECISION)]
    length_precision: u8,

    /// Decimal places for volumes.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_PRECISION)]
    volume_precision: u8,

    /// Decimal places for areas.
    #[arg(long, default_value_t = MeasureConfig::DEFAULT_PRECISION)]
    area_precision: u8,

    /// Write the full measurement as JSON to file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full measurement config as a JSON string.
    ///
    /// When provided, all other config flags are ignored.
    /// The JSON must be a valid `MeasureConfig` serialization.
    #[arg(long)]
    config_json: Option<String>,
}

/// Cross-section overflow policy selection.
#[derive(Clone, Copy, ValueEnum)]
enum Overflow {
    /// Use every centerline point once.
    Clamp,
    /// Fail the run.
    Error,
}

/// Parse `0:head,1:thorax,2:abdomen` into a [`SegmentOrder`].
fn parse_segments(s: &str) -> Result<SegmentOrder, String> {
    let segments = s
        .split(',')
        .map(|pair| {
            let (id, name) = pair
                .split_once(':')
                .ok_or_else(|| format!("expected id:name, got {pair:?}"))?;
            let id: u32 = id
                .trim()
                .parse()
                .map_err(|e| format!("invalid segment id {id:?}: {e}"))?;
            Ok(Segment::new(id, name.trim()))
        })
        .collect::<Result<Vec<_>, String>>()?;
    SegmentOrder::new(segments).map_err(|e| e.to_string())
}

/// Build a [`MeasureConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.  Otherwise, a config is
/// assembled from the individual flags.
fn config_from_cli(cli: &Cli) -> Result<MeasureConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    let calibration = Calibration::mm_per_pixel(cli.mm_per_pixel)
        .map_err(|e| format!("Error in --mm-per-pixel: {e}"))?;
    Ok(MeasureConfig {
        cross_sections: cli.cross_sections,
        overflow: match cli.overflow {
            Overflow::Clamp => OverflowPolicy::Clamp,
            Overflow::Error => OverflowPolicy::Error,
        },
        resample_count: cli.resample_count,
        fallback_degree: cli.fallback_degree,
        min_confidence: cli.min_confidence,
        length_precision: cli.length_precision,
        volume_precision: cli.volume_precision,
        area_precision: cli.area_precision,
        ..MeasureConfig::new(cli.segments.clone(), calibration)
    })
}

/// Read and parse the detection batch.
fn read_batch(path: &Path) -> Result<DetectionBatch, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("Error parsing {}: {e}", path.display()))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let batch = match read_batch(&cli.detections_path) {
        Ok(batch) => batch,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Detections: {} ({} instances, {}x{})",
        cli.detections_path.display(),
        batch.detections.len(),
        batch.dimensions.width,
        batch.dimensions.height,
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        match bodyvol_pipeline::diagnostics::process_with_diagnostics(&batch, &config, &StdClock)
        {
            Ok((measurement, diagnostics)) => {
                if cli.json {
                    match serde_json::to_string_pretty(&diagnostics) {
                        Ok(json) => println!("{json}"),
                        Err(e) => {
                            eprintln!("Error serializing diagnostics: {e}");
                            return ExitCode::FAILURE;
                        }
                    }
                } else {
                    println!("{}", diagnostics.report());
                    println!();
                    println!("{}", measurement_report(&measurement, &config.segments));
                }

                // Write the measurement on the first run only.
                if run == 0
                    && let Some(ref path) = cli.output
                {
                    match serde_json::to_string_pretty(&measurement) {
                        Ok(json) => match std::fs::write(path, &json) {
                            Ok(()) => {
                                eprintln!(
                                    "Measurement written to {} ({} bytes)",
                                    path.display(),
                                    json.len(),
                                );
                            }
                            Err(e) => {
                                eprintln!("Error writing measurement to {}: {e}", path.display());
                            }
                        },
                        Err(e) => eprintln!("Error serializing measurement: {e}"),
                    }
                }

                all_diagnostics.push(diagnostics);
            }
            Err(e) => {
                eprintln!("Pipeline error: {e}");
                return ExitCode::FAILURE;
            }
        }

        if cli.runs > 1 {
            eprintln!();
        }
    }

    // Print summary when multiple runs.
    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
    }

    ExitCode::SUCCESS
}

/// Format per-segment and junction results with segment names.
fn measurement_report(m: &Measurement, order: &SegmentOrder) -> String {
    let mut lines = vec![format!("Measurement\n{}", "=".repeat(60))];
    lines.push(format!(
        "Total length: {} mm  |  Total volume: {} mm³  |  Fit: {}",
        m.total_length, m.total_volume, m.fit_method,
    ));
    lines.push(String::new());
    lines.push(format!(
        "{:<16} {:>12} {:>14} {:>12}",
        "Segment", "Length (mm)", "Volume (mm³)", "Area (mm²)"
    ));
    lines.push("-".repeat(60));
    for segment in order.segments() {
        let id = segment.id;
        let cell = |v: Option<&f64>| v.map_or_else(|| "-".to_string(), f64::to_string);
        lines.push(format!(
            "{:<16} {:>12} {:>14} {:>12}",
            segment.name,
            cell(m.segment_lengths.get(&id)),
            cell(m.segment_volumes.get(&id)),
            cell(m.areas.get(&id).map(|a| &a.area)),
        ));
    }
    for j in &m.junctions {
        let name = |id| order.name(id).unwrap_or("?");
        lines.push(format!(
            "{:<16} {:>12} {:>14}",
            format!("{}_{}", name(j.junction.anterior), name(j.junction.posterior)),
            j.length,
            j.volume,
        ));
    }
    if !m.skipped.is_empty() {
        lines.push(String::new());
        lines.push(format!("Skipped: {}", m.skipped.len()));
        for s in &m.skipped {
            lines.push(format!("  {:?} class {}: {:?}", s.index, s.class_id, s.reason));
        }
    }
    lines.join("\n")
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Duration;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    // Per-stage means.
    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Rasterize", |d| d.rasterize.duration),
        ("Combine", |d| d.combine.duration),
        ("Centroids", |d| d.centroids.duration),
        ("Fit", |d| d.fit.duration),
        ("Refine", |d| d.refine.duration),
        ("Slice", |d| d.slice.duration),
        ("Estimate", |d| d.estimate.duration),
    ];

    for (name, extractor) in stage_extractors {
        let stage_mean = all_diagnostics
            .iter()
            .map(|d| extractor(d).as_secs_f64() * 1000.0)
            .sum::<f64>()
            / all_diagnostics.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn segments_parse_in_order() {
        let order = parse_segments("2:abdomen, 0:head,1:thorax").unwrap();
        let names: Vec<&str> = order.segments().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["abdomen", "head", "thorax"]);
    }

    #[test]
    fn malformed_segments_are_rejected() {
        assert!(parse_segments("head").is_err());
        assert!(parse_segments("x:head").is_err());
        assert!(parse_segments("0:head,0:tail").is_err());
    }

    #[test]
    fn flags_build_a_config() {
        let cli = Cli::parse_from([
            "bodyvol-bench",
            "batch.json",
            "--mm-per-pixel",
            "0.02",
            "--cross-sections",
            "40",
            "--overflow",
            "error",
            "--area-precision",
            "4",
        ]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.cross_sections, 40);
        assert_eq!(config.area_precision, 4);
        assert_eq!(config.length_precision, MeasureConfig::DEFAULT_PRECISION);
        assert_eq!(config.overflow, OverflowPolicy::Error);
        assert!((config.calibration.factor() - 0.02).abs() < f64::EPSILON);
        assert_eq!(config.segments.segments().len(), 3);
    }

    #[test]
    fn default_calibration_is_pixels_as_millimeters() {
        let cli = Cli::parse_from(["bodyvol-bench", "batch.json"]);
        let config = config_from_cli(&cli).unwrap();
        assert_eq!(config.calibration, Calibration::PIXELS_AS_MILLIMETERS);
    }

    #[test]
    fn non_positive_calibration_is_an_error() {
        let cli = Cli::parse_from(["bodyvol-bench", "batch.json", "--mm-per-pixel", "0"]);
        assert!(config_from_cli(&cli).is_err());
    }
}
