//! Actix Web routes: the upload form, upload handling, processed image
//! retrieval, and the Prometheus endpoint.

use std::{io, time::Instant};

use actix_multipart::Multipart;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, http::header, web};
use futures::TryStreamExt;
use serde_json::json;
use tracing::{Instrument, debug, info, warn};

use crate::{
    html,
    service::{
        config::ResponseMode,
        data::{ApiResponse, AppState, ProcessedImage, Upload},
        error::ServiceError,
        storage::{StoredName, UploadKey},
        telemetry::prometheus_handle,
    },
};

/// Multipart field carrying the image.
pub const UPLOAD_FIELD: &str = "image";

/// Register every route on an Actix app.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index_route))
        .route("/", web::post().to(upload_route))
        .route("/processed/{filename}", web::get().to(processed_route))
        .route("/metrics", web::get().to(metrics_route));
}

/// Serve the upload form; page mode also shows the latest result.
async fn index_route(state: web::Data<AppState>) -> HttpResponse {
    let latest = match state.mode {
        ResponseMode::Page => state.latest.lock().ok().and_then(|guard| guard.clone()),
        ResponseMode::Api => None,
    };
    html_response(html::render_page(latest.as_ref()))
}

async fn upload_route(
    req: HttpRequest,
    payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServiceError> {
    let started = Instant::now();
    let outcome = handle_upload(&req, payload, &state).await;
    let label = match &outcome {
        Ok(Some(_)) => "processed",
        Ok(None) => "empty",
        Err(err) => err.label(),
    };
    metrics::counter!("pose_uploads_total", "outcome" => label).increment(1);
    metrics::histogram!("pose_request_latency_seconds").record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(Some(processed)) => Ok(processed_response(&state, processed)),
        Ok(None) => Ok(default_response(state.mode)),
        Err(err) => {
            warn!("upload rejected: {err}");
            Err(err)
        }
    }
}

/// Pull the upload out of the request and run it through a worker.
/// `Ok(None)` means the request carried no usable image file.
async fn handle_upload(
    req: &HttpRequest,
    payload: web::Payload,
    state: &AppState,
) -> Result<Option<ProcessedImage>, ServiceError> {
    let is_multipart = matches!(
        req.mime_type(),
        Ok(Some(mime)) if mime.essence_str() == "multipart/form-data"
    );
    if !is_multipart {
        debug!("POST / without a multipart body");
        return Ok(None);
    }

    let limit = state.max_upload_bytes;
    if let (Some(limit), Some(length)) = (limit, content_length(req)) {
        if length > limit {
            return Err(ServiceError::PayloadTooLarge { limit });
        }
    }

    let multipart = Multipart::new(req.headers(), payload);
    let Some((original_filename, bytes)) = read_upload_field(multipart, limit).await? else {
        return Ok(None);
    };

    let key = UploadKey::generate();
    let span = tracing::info_span!("upload", key = key.as_str(), bytes = bytes.len());
    async {
        let processed = state
            .pool
            .submit(Upload {
                key,
                original_filename,
                bytes,
            })
            .await?;
        info!(
            name = %processed.name,
            landmarks = processed.landmarks_detected,
            "upload processed"
        );
        Ok(Some(processed))
    }
    .instrument(span)
    .await
}

/// Stream every field, keeping the first `image` field that names a file.
/// `limit` bounds the total bytes read across all fields.
async fn read_upload_field(
    mut multipart: Multipart,
    limit: Option<usize>,
) -> Result<Option<(String, Vec<u8>)>, ServiceError> {
    let mut upload = None;
    let mut received = 0usize;

    while let Some(mut field) = multipart.try_next().await.map_err(multipart_error)? {
        let filename = field
            .content_disposition()
            .and_then(|disposition| disposition.get_filename())
            .unwrap_or_default()
            .to_string();
        let wanted = upload.is_none() && field.name() == Some(UPLOAD_FIELD) && !filename.is_empty();

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(multipart_error)? {
            received += chunk.len();
            if let Some(limit) = limit.filter(|limit| received > *limit) {
                return Err(ServiceError::PayloadTooLarge { limit });
            }
            if wanted {
                bytes.extend_from_slice(&chunk);
            }
        }

        if wanted {
            upload = Some((filename, bytes));
        }
    }

    Ok(upload)
}

fn multipart_error(err: actix_multipart::MultipartError) -> ServiceError {
    ServiceError::Multipart(err.to_string())
}

fn content_length(req: &HttpRequest) -> Option<usize> {
    req.headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn processed_response(state: &AppState, processed: ProcessedImage) -> HttpResponse {
    match state.mode {
        ResponseMode::Api => HttpResponse::Ok().json(ApiResponse::processed(&processed)),
        ResponseMode::Page => {
            let page = html::render_page(Some(&processed));
            if let Ok(mut latest) = state.latest.lock() {
                *latest = Some(processed);
            }
            html_response(page)
        }
    }
}

fn default_response(mode: ResponseMode) -> HttpResponse {
    match mode {
        ResponseMode::Api => HttpResponse::Ok().json(ApiResponse::empty()),
        ResponseMode::Page => html_response(html::render_page(None)),
    }
}

fn html_response(body: String) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body)
}

/// Serve a processed image by the name handed out at upload time.
async fn processed_route(
    filename: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ServiceError> {
    let Some(name) = StoredName::parse(&filename) else {
        debug!("rejected processed image name {:?}", filename.as_str());
        return Ok(not_found());
    };

    let storage = state.storage.clone();
    let lookup = name.clone();
    let bytes = web::block(move || storage.read_processed(&lookup))
        .await
        .map_err(|err| ServiceError::Storage(io::Error::other(err.to_string())))??;

    Ok(match bytes {
        Some(bytes) => HttpResponse::Ok()
            .content_type(name.format().mime_type())
            .body(bytes),
        None => not_found(),
    })
}

fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(json!({ "error": "processed image not found" }))
}

/// Prometheus text exposition of the service metrics.
async fn metrics_route(state: web::Data<AppState>) -> HttpResponse {
    metrics::gauge!("pose_queue_depth").set(state.pool.queue_depth() as f64);
    match prometheus_handle() {
        Some(handle) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(handle.render()),
        None => HttpResponse::NoContent().finish(),
    }
}
