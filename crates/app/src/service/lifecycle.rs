use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use anyhow::{Context, Result};
use tracing::info;

use crate::service::{
    backend::build_estimator,
    config::{BIND_HOST, ServiceConfig},
    data::AppState,
    retention::spawn_janitor,
    server,
    storage::Storage,
    telemetry::init_metrics_recorder,
    workers::EstimatorPool,
};

/// Bring the service up, block until the HTTP server stops, then tear down
/// the janitor and the estimator workers.
pub fn run(config: ServiceConfig) -> Result<()> {
    init_metrics_recorder();

    let storage = Arc::new(Storage::init(
        config.uploads_dir.clone(),
        config.processed_dir.clone(),
    )?);

    let settings = config.estimator.clone();
    let pool = EstimatorPool::start(
        move |_| build_estimator(&settings),
        config.workers,
        config.queue_capacity,
        storage.clone(),
        config.pipeline,
    )
    .context("failed to start pose workers")?;

    let janitor = spawn_janitor(storage.clone(), config.retention.clone())?;

    let state = web::Data::new(AppState::new(
        pool,
        storage,
        config.mode,
        config.max_upload_bytes,
    ));

    info!(
        port = config.port,
        mode = ?config.mode,
        workers = config.workers,
        max_dimension = ?config.pipeline.max_dimension,
        "pose server listening on {BIND_HOST}:{}",
        config.port
    );

    let server_state = state.clone();
    let port = config.port;
    let served = actix_web::rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(server_state.clone())
                .configure(server::configure)
        })
        .bind((BIND_HOST, port))?
        .run()
        .await
    });

    janitor.stop();
    state.pool().shutdown();
    info!("pose server stopped");

    served.with_context(|| format!("HTTP server on {BIND_HOST}:{port} failed"))
}
