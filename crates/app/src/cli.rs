use std::{path::PathBuf, time::SystemTime};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;

use crate::service::{
    self, ServiceConfig, Storage,
    backend::build_estimator,
    config::{
        DEFAULT_JPEG_QUALITY, EstimatorArgs, EstimatorSettings, PipelineOptions, RetentionArgs,
        RetentionPolicy, ServeArgs, StorageArgs, TelemetryOptions,
    },
    encoding::{self, OutputFormat},
    pipeline, retention, telemetry,
};

/// Pose estimation upload server.
#[derive(Debug, Parser)]
#[command(name = "pose-server", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
    /// Flags for `serve` when no subcommand is given.
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service (default).
    Serve(ServeArgs),
    /// Annotate a single image file and print the analysis as JSON.
    Annotate(AnnotateArgs),
    /// Run one retention pass over the storage directories and exit.
    Sweep(SweepArgs),
}

#[derive(Debug, Clone, Args)]
pub struct AnnotateArgs {
    /// Image to annotate.
    pub input: PathBuf,
    /// Destination; the extension picks the output format.
    pub output: PathBuf,
    /// Downscale so neither side exceeds this many pixels.
    #[arg(long = "max-dimension", value_name = "PX")]
    pub max_dimension: Option<u32>,
    #[arg(long = "jpeg-quality", value_name = "QUALITY", default_value_t = DEFAULT_JPEG_QUALITY)]
    pub jpeg_quality: u8,
    #[command(flatten)]
    pub estimator: EstimatorArgs,
}

#[derive(Debug, Clone, Args)]
pub struct SweepArgs {
    #[command(flatten)]
    pub storage: StorageArgs,
    #[command(flatten)]
    pub retention: RetentionArgs,
}

/// Parse the process arguments and run the selected command.
pub fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Some(Command::Serve(args)) => serve(args),
        None => serve(cli.serve),
        Some(Command::Annotate(args)) => {
            let _telemetry = telemetry::install(&TelemetryOptions::default())?;
            annotate(args)
        }
        Some(Command::Sweep(args)) => {
            let _telemetry = telemetry::install(&TelemetryOptions::default())?;
            sweep(args)
        }
    }
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = ServiceConfig::try_from(args)?;
    let _telemetry = telemetry::install(&config.telemetry)?;
    service::run(config)
}

fn annotate(args: AnnotateArgs) -> Result<()> {
    if args.max_dimension == Some(0) {
        bail!("--max-dimension must be a positive integer");
    }
    if !(1..=100).contains(&args.jpeg_quality) {
        bail!("--jpeg-quality must be an integer between 1 and 100");
    }
    let settings = EstimatorSettings::try_from(args.estimator)?;
    let opts = PipelineOptions {
        max_dimension: args.max_dimension,
        jpeg_quality: args.jpeg_quality,
    };

    let reader = image::ImageReader::open(&args.input)
        .and_then(|reader| reader.with_guessed_format())
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let decoded = pipeline::decode_upright(reader)
        .with_context(|| format!("failed to decode {}", args.input.display()))?;
    let mut estimator = build_estimator(&settings)?;
    info!("annotating {} with {}", args.input.display(), estimator.describe());

    let frame = pipeline::annotate_frame(estimator.as_mut(), decoded, &opts)?;
    let format = args
        .output
        .to_str()
        .and_then(OutputFormat::from_filename)
        .unwrap_or(OutputFormat::Jpeg);
    let encoded = encoding::encode(&frame.image, format, opts.jpeg_quality)?;
    std::fs::write(&args.output, encoded)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    let report = json!({
        "output": args.output.display().to_string(),
        "width": frame.image.width(),
        "height": frame.image.height(),
        "landmarks_detected": frame.landmarks.is_some(),
        "analysis": frame.analysis,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn sweep(args: SweepArgs) -> Result<()> {
    let policy = RetentionPolicy::try_from(args.retention)?;
    let storage = Storage::init(args.storage.uploads_dir, args.storage.processed_dir)?;
    let report = retention::sweep(&storage, &policy, SystemTime::now())?;
    info!(
        expired = report.expired,
        evicted = report.evicted,
        orphans = report.orphans,
        "retention sweep finished"
    );
    Ok(())
}
