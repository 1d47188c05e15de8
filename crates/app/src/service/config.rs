//! Configuration parsing for the pose service.
//!
//! CLI flags (and the `PORT` environment variable) are translated into a
//! validated `ServiceConfig` once at startup; downstream stages never re-read
//! arguments.

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, anyhow, bail};
use clap::{Args, ValueEnum};
use pose_core::EstimatorConfig;

pub const DEFAULT_PORT: u16 = 5000;
/// Listen address; the service always binds every interface.
pub const BIND_HOST: &str = "0.0.0.0";
/// Pre-resize ceiling applied in `api` mode unless overridden.
pub const API_MAX_DIMENSION: u32 = 1024;
/// Request body ceiling applied in `api` mode unless overridden.
pub const API_MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_JPEG_QUALITY: u8 = 95;
pub const DEFAULT_ESTIMATOR_URL: &str = "http://127.0.0.1:8501/v1/pose";
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
/// Shape of the response to an upload.
pub enum ResponseMode {
    /// Rendered HTML page embedding the processed image.
    Page,
    /// JSON object referencing the processed image URL.
    Api,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Out-of-process pose inference service over HTTP.
    Remote,
    /// TorchScript landmark model loaded in-process.
    Torch,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BackendConfig {
    Remote {
        endpoint: String,
    },
    #[cfg(feature = "with-tch")]
    Torch {
        model_path: PathBuf,
        input_size: u32,
        use_cpu: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
/// Everything needed to build one estimator instance.
pub struct EstimatorSettings {
    pub backend: BackendConfig,
    pub thresholds: EstimatorConfig,
}

#[derive(Clone, Debug, PartialEq)]
/// Eviction rules for the processed directory.
pub struct RetentionPolicy {
    /// Delete processed images older than this.
    pub max_age: Option<Duration>,
    /// Keep at most this many processed images, newest first.
    pub max_files: Option<usize>,
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: None,
            max_files: None,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
/// Optional telemetry knobs for tracing and runtime inspection.
pub struct TelemetryOptions {
    /// Write a Chrome trace JSON file capturing request spans.
    pub chrome_trace_path: Option<PathBuf>,
    /// Enable the Tokio console subscriber for live task inspection.
    pub enable_tokio_console: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// Per-request image handling knobs.
pub struct PipelineOptions {
    /// Largest allowed width or height after the pre-resize; `None` keeps the
    /// decoded size.
    pub max_dimension: Option<u32>,
    pub jpeg_quality: u8,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_dimension: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the service.
pub struct ServiceConfig {
    pub port: u16,
    pub mode: ResponseMode,
    pub uploads_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub max_upload_bytes: Option<usize>,
    pub pipeline: PipelineOptions,
    /// Number of estimator instances, one per worker thread.
    pub workers: usize,
    /// Pending uploads allowed before new ones are turned away.
    pub queue_capacity: usize,
    pub estimator: EstimatorSettings,
    pub retention: RetentionPolicy,
    pub telemetry: TelemetryOptions,
}

/// Directory flags shared by `serve` and `sweep`.
#[derive(Debug, Clone, Args)]
pub struct StorageArgs {
    /// Staging directory for raw uploads.
    #[arg(long = "uploads-dir", value_name = "DIR", default_value = "uploads")]
    pub uploads_dir: PathBuf,
    /// Directory holding annotated results.
    #[arg(long = "processed-dir", value_name = "DIR", default_value = "processed")]
    pub processed_dir: PathBuf,
}

/// Pose model flags shared by `serve` and `annotate`.
#[derive(Debug, Clone, Args)]
pub struct EstimatorArgs {
    /// Pose model backend.
    #[arg(long = "backend", value_enum, default_value_t = BackendKind::Remote)]
    pub backend: BackendKind,
    /// Endpoint of the remote pose inference service.
    #[arg(
        long = "estimator-url",
        env = "POSE_ESTIMATOR_URL",
        value_name = "URL",
        default_value = DEFAULT_ESTIMATOR_URL
    )]
    pub estimator_url: String,
    /// TorchScript landmark model (torch backend).
    #[arg(long = "model", value_name = "PATH")]
    pub model_path: Option<PathBuf>,
    /// Square model input edge in pixels (torch backend).
    #[arg(long = "model-input-size", value_name = "PX", default_value_t = 256)]
    pub model_input_size: u32,
    /// Force CPU inference (torch backend).
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Minimum score for a fresh detection.
    #[arg(long = "min-detection-confidence", value_name = "SCORE", default_value_t = 0.5)]
    pub min_detection_confidence: f32,
    /// Minimum score to keep tracking a body found on the previous image.
    #[arg(long = "min-tracking-confidence", value_name = "SCORE", default_value_t = 0.5)]
    pub min_tracking_confidence: f32,
    /// Treat every upload as unrelated to the previous one.
    #[arg(long = "static-image-mode", action = clap::ArgAction::SetTrue)]
    pub static_image_mode: bool,
}

/// Eviction flags shared by `serve` and `sweep`.
#[derive(Debug, Clone, Args)]
pub struct RetentionArgs {
    /// Delete processed images older than this many seconds.
    #[arg(long = "retention-secs", value_name = "SECS")]
    pub retention_secs: Option<u64>,
    /// Keep at most this many processed images.
    #[arg(long = "retention-max-files", value_name = "N")]
    pub retention_max_files: Option<usize>,
    /// Seconds between retention sweeps.
    #[arg(
        long = "sweep-interval-secs",
        value_name = "SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS
    )]
    pub sweep_interval_secs: u64,
}

/// CLI arguments accepted by the `serve` subcommand.
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Listening port.
    #[arg(long = "port", env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Respond with an HTML page or a JSON payload.
    #[arg(long = "mode", value_enum, default_value_t = ResponseMode::Page)]
    pub mode: ResponseMode,
    #[command(flatten)]
    pub storage: StorageArgs,
    /// Downscale uploads so neither side exceeds this many pixels.
    #[arg(long = "max-dimension", value_name = "PX", conflicts_with = "no_resize")]
    pub max_dimension: Option<u32>,
    /// Never downscale uploads, even in api mode.
    #[arg(long = "no-resize", action = clap::ArgAction::SetTrue)]
    pub no_resize: bool,
    /// Reject request bodies larger than this many bytes.
    #[arg(long = "max-upload-bytes", value_name = "BYTES")]
    pub max_upload_bytes: Option<usize>,
    /// JPEG quality used when writing results (1-100).
    #[arg(long = "jpeg-quality", value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,
    /// Number of estimator workers.
    #[arg(long = "workers", value_name = "N")]
    pub workers: Option<usize>,
    /// Pending uploads allowed per worker before answering 503.
    #[arg(long = "queue-per-worker", value_name = "N", default_value_t = 8)]
    pub queue_per_worker: usize,
    #[command(flatten)]
    pub estimator: EstimatorArgs,
    #[command(flatten)]
    pub retention: RetentionArgs,
    /// Emit Chrome trace JSON for post-mortem analysis.
    #[arg(long = "chrome-trace", value_name = "PATH")]
    pub chrome_trace: Option<PathBuf>,
    /// Enable the Tokio console instrumentation server.
    #[arg(long = "tokio-console", action = clap::ArgAction::SetTrue)]
    pub tokio_console: bool,
}

impl TryFrom<EstimatorArgs> for EstimatorSettings {
    type Error = anyhow::Error;

    fn try_from(args: EstimatorArgs) -> Result<Self> {
        let thresholds = EstimatorConfig {
            min_detection_confidence: args.min_detection_confidence,
            min_tracking_confidence: args.min_tracking_confidence,
            static_image_mode: args.static_image_mode,
        };
        thresholds.validate()?;

        let backend = match args.backend {
            BackendKind::Remote => {
                if args.estimator_url.trim().is_empty() {
                    bail!("--estimator-url must not be empty");
                }
                BackendConfig::Remote {
                    endpoint: args.estimator_url,
                }
            }
            BackendKind::Torch => torch_backend(args.model_path, args.model_input_size, args.use_cpu)?,
        };

        Ok(Self {
            backend,
            thresholds,
        })
    }
}

#[cfg(feature = "with-tch")]
fn torch_backend(model_path: Option<PathBuf>, input_size: u32, use_cpu: bool) -> Result<BackendConfig> {
    let model_path = model_path
        .ok_or_else(|| anyhow!("Missing model path. Provide --model <path> with --backend torch."))?;
    if input_size == 0 {
        bail!("--model-input-size must be a positive integer");
    }
    Ok(BackendConfig::Torch {
        model_path,
        input_size,
        use_cpu,
    })
}

#[cfg(not(feature = "with-tch"))]
fn torch_backend(_model_path: Option<PathBuf>, _input_size: u32, _use_cpu: bool) -> Result<BackendConfig> {
    Err(anyhow!(
        "--backend torch requires a build with the `with-tch` feature"
    ))
}

impl TryFrom<RetentionArgs> for RetentionPolicy {
    type Error = anyhow::Error;

    fn try_from(args: RetentionArgs) -> Result<Self> {
        if args.sweep_interval_secs == 0 {
            bail!("--sweep-interval-secs must be at least 1");
        }
        if args.retention_secs == Some(0) {
            bail!("--retention-secs must be at least 1");
        }
        if args.retention_max_files == Some(0) {
            bail!("--retention-max-files must be at least 1");
        }
        Ok(Self {
            max_age: args.retention_secs.map(Duration::from_secs),
            max_files: args.retention_max_files,
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
        })
    }
}

impl TryFrom<ServeArgs> for ServiceConfig {
    type Error = anyhow::Error;

    fn try_from(args: ServeArgs) -> Result<Self> {
        if args.port == 0 {
            bail!("--port must be between 1 and 65535");
        }

        let max_dimension = match (args.no_resize, args.max_dimension) {
            (true, _) => None,
            (false, Some(0)) => bail!("--max-dimension must be a positive integer"),
            (false, Some(px)) => Some(px),
            (false, None) => Self::default_max_dimension(args.mode),
        };

        let max_upload_bytes = match args.max_upload_bytes {
            Some(0) => bail!("--max-upload-bytes must be a positive integer"),
            Some(limit) => Some(limit),
            None => Self::default_upload_limit(args.mode),
        };

        let jpeg_quality = args.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        let workers = args.workers.unwrap_or(1);
        if workers == 0 {
            bail!("--workers must be at least 1");
        }
        if args.queue_per_worker == 0 {
            bail!("--queue-per-worker must be at least 1");
        }

        if args.storage.uploads_dir == args.storage.processed_dir {
            bail!("--uploads-dir and --processed-dir must be different directories");
        }

        let estimator = EstimatorSettings::try_from(args.estimator)?;
        let retention = RetentionPolicy::try_from(args.retention)?;

        Ok(Self {
            port: args.port,
            mode: args.mode,
            uploads_dir: args.storage.uploads_dir,
            processed_dir: args.storage.processed_dir,
            max_upload_bytes,
            pipeline: PipelineOptions {
                max_dimension,
                jpeg_quality,
            },
            workers,
            queue_capacity: workers.saturating_mul(args.queue_per_worker),
            estimator,
            retention,
            telemetry: TelemetryOptions {
                chrome_trace_path: args.chrome_trace,
                enable_tokio_console: args.tokio_console,
            },
        })
    }
}

impl ServiceConfig {
    fn default_max_dimension(mode: ResponseMode) -> Option<u32> {
        match mode {
            ResponseMode::Page => None,
            ResponseMode::Api => Some(API_MAX_DIMENSION),
        }
    }

    fn default_upload_limit(mode: ResponseMode) -> Option<usize> {
        match mode {
            ResponseMode::Page => None,
            ResponseMode::Api => Some(API_MAX_UPLOAD_BYTES),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Debug, Parser)]
    struct Harness {
        #[command(flatten)]
        serve: ServeArgs,
    }

    fn parse(args: &[&str]) -> Result<ServiceConfig> {
        let harness = Harness::try_parse_from(std::iter::once("pose-server").chain(args.iter().copied()))?;
        ServiceConfig::try_from(harness.serve)
    }

    #[test]
    fn page_mode_defaults_match_the_plain_upload_flow() {
        let config = parse(&["--port", "5000"]).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.mode, ResponseMode::Page);
        assert_eq!(config.pipeline.max_dimension, None);
        assert_eq!(config.max_upload_bytes, None);
        assert_eq!(config.pipeline.jpeg_quality, 95);
        assert_eq!(config.uploads_dir, PathBuf::from("uploads"));
        assert_eq!(config.processed_dir, PathBuf::from("processed"));
        assert_eq!(config.retention.max_age, None);
        assert_eq!(config.retention.max_files, None);
        assert_eq!(config.estimator.thresholds, EstimatorConfig::default());
    }

    #[test]
    fn api_mode_enables_resize_and_body_limit() {
        let config = parse(&["--port", "8000", "--mode", "api"]).unwrap();
        assert_eq!(config.pipeline.max_dimension, Some(API_MAX_DIMENSION));
        assert_eq!(config.max_upload_bytes, Some(5 * 1024 * 1024));
    }

    #[test]
    fn no_resize_overrides_api_default() {
        let config = parse(&["--port", "8000", "--mode", "api", "--no-resize"]).unwrap();
        assert_eq!(config.pipeline.max_dimension, None);
    }

    #[test]
    fn max_dimension_conflicts_with_no_resize() {
        assert!(parse(&["--port", "8000", "--max-dimension", "640", "--no-resize"]).is_err());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse(&["--port", "8000", "--jpeg-quality", "0"]).is_err());
        assert!(parse(&["--port", "8000", "--workers", "0"]).is_err());
        assert!(parse(&["--port", "8000", "--max-dimension", "0"]).is_err());
        assert!(parse(&["--port", "8000", "--min-detection-confidence", "1.5"]).is_err());
        assert!(parse(&["--port", "8000", "--retention-max-files", "0"]).is_err());
        assert!(parse(&["--port", "8000", "--uploads-dir", "x", "--processed-dir", "x"]).is_err());
    }

    #[test]
    fn retention_flags_become_durations() {
        let config = parse(&[
            "--port",
            "8000",
            "--retention-secs",
            "3600",
            "--retention-max-files",
            "50",
            "--sweep-interval-secs",
            "30",
        ])
        .unwrap();
        assert_eq!(config.retention.max_age, Some(Duration::from_secs(3600)));
        assert_eq!(config.retention.max_files, Some(50));
        assert_eq!(config.retention.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn queue_capacity_scales_with_workers() {
        let config = parse(&["--port", "8000", "--workers", "3", "--queue-per-worker", "4"]).unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, 12);
    }

    #[cfg(not(feature = "with-tch"))]
    #[test]
    fn torch_backend_needs_the_feature() {
        let err = parse(&["--port", "8000", "--backend", "torch", "--model", "pose.pt"]).unwrap_err();
        assert!(err.to_string().contains("with-tch"));
    }
}
