//! Telemetry helpers for tracing spans, Prometheus metrics, and optional console tooling.

use std::{io, panic, path::Path, sync::OnceLock, thread, time::Duration};

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;
use tracing_subscriber::{
    filter::{EnvFilter, filter_fn},
    fmt,
    layer::SubscriberExt,
    prelude::*,
};

use crate::service::config::TelemetryOptions;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static PROM_UPKEEP_THREAD: OnceLock<thread::JoinHandle<()>> = OnceLock::new();

/// Keeps the Chrome trace writer alive; the file is flushed on drop.
pub struct TelemetryGuard {
    _chrome_guard: Option<tracing_chrome::FlushGuard>,
}

/// Install the global metrics recorder once and return the Prometheus handle.
///
/// Returns `None` if another recorder was installed first.
pub fn init_metrics_recorder() -> Option<&'static PrometheusHandle> {
    if let Some(handle) = PROM_HANDLE.get() {
        return Some(handle);
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    if let Err(err) = metrics::set_global_recorder(recorder) {
        warn!("metrics recorder already installed, /metrics disabled: {err}");
        return None;
    }
    let handle = PROM_HANDLE.get_or_init(|| handle);

    let upkeep_handle = handle.clone();
    match spawn_thread("prometheus-upkeep", move || {
        loop {
            thread::sleep(Duration::from_secs(5));
            upkeep_handle.run_upkeep();
        }
    }) {
        Ok(upkeep) => {
            let _ = PROM_UPKEEP_THREAD.set(upkeep);
        }
        Err(err) => warn!("failed to spawn prometheus upkeep thread: {err}"),
    }

    Some(handle)
}

/// Access the Prometheus handle when already initialised.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROM_HANDLE.get()
}

/// Install the process-wide tracing subscriber.
///
/// HTTP and worker threads are spawned by several runtimes, so the subscriber
/// is global rather than scoped to the calling thread.
pub fn install(opts: &TelemetryOptions) -> Result<TelemetryGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_requested = opts.enable_tokio_console;
    let console_layer = if console_requested && opts.chrome_trace_path.is_none() {
        match panic::catch_unwind(|| {
            console_subscriber::ConsoleLayer::builder()
                .with_default_env()
                .spawn()
        }) {
            Ok(layer) => Some(layer),
            Err(_) => {
                eprintln!(
                    "tokio-console requested but current build lacks `tokio_unstable`; skipping console layer"
                );
                None
            }
        }
    } else {
        None
    };

    let (chrome_layer, chrome_guard) = match opts.chrome_trace_path.as_ref() {
        Some(path) => match build_chrome_layer(path) {
            Ok((layer, guard)) => (Some(layer), Some(guard)),
            Err(err) => {
                eprintln!(
                    "failed to initialise chrome trace writer at {}: {err}",
                    path.display()
                );
                (None, None)
            }
        },
        None => (None, None),
    };

    let span_only_filter = filter_fn(|metadata| metadata.is_span());

    tracing_subscriber::registry()
        .with(chrome_layer.map(|layer| layer.with_filter(span_only_filter)))
        .with(console_layer)
        .with(
            fmt::layer()
                .with_target(false)
                .with_timer(fmt::time::uptime())
                .with_filter(env_filter),
        )
        .with(tracing_error::ErrorLayer::default())
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    if console_requested && chrome_guard.is_some() {
        warn!("Chrome trace and tokio-console enabled together; defaulting to chrome trace only");
    }

    Ok(TelemetryGuard {
        _chrome_guard: chrome_guard,
    })
}

/// Spawn a thread that inherits the current tracing dispatcher.
pub fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

fn build_chrome_layer(
    path: &Path,
) -> Result<
    (
        tracing_chrome::ChromeLayer<tracing_subscriber::Registry>,
        tracing_chrome::FlushGuard,
    ),
    std::io::Error,
> {
    let file = std::fs::File::create(path)?;
    let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .writer(file)
        .include_args(true)
        .trace_style(tracing_chrome::TraceStyle::Threaded)
        .build();
    Ok((layer, guard))
}
