use std::sync::{Arc, Mutex};

use pose_core::RowingAnalysis;
use serde::Serialize;

use crate::service::{
    config::ResponseMode,
    storage::{Storage, StoredName, UploadKey},
    workers::EstimatorPool,
};

/// An upload accepted from the client and waiting for a worker.
pub struct Upload {
    pub key: UploadKey,
    pub original_filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
/// Outcome of a processed upload.
pub struct ProcessedImage {
    #[serde(skip)]
    pub name: StoredName,
    pub original_filename: String,
    pub width: u32,
    pub height: u32,
    pub landmarks_detected: bool,
    pub analysis: Option<RowingAnalysis>,
}

impl ProcessedImage {
    /// Retrieval path for the stored result.
    pub fn url(&self) -> String {
        format!("/processed/{}", self.name)
    }
}

#[derive(Serialize)]
/// JSON body for API mode uploads.
pub struct ApiResponse<'a> {
    pub processed_image: Option<String>,
    #[serde(flatten)]
    pub details: Option<&'a ProcessedImage>,
}

impl<'a> ApiResponse<'a> {
    pub fn empty() -> Self {
        Self {
            processed_image: None,
            details: None,
        }
    }

    pub fn processed(image: &'a ProcessedImage) -> Self {
        Self {
            processed_image: Some(image.url()),
            details: Some(image),
        }
    }
}

/// Shared handler state.
pub struct AppState {
    pub(crate) pool: EstimatorPool,
    pub(crate) storage: Arc<Storage>,
    pub(crate) mode: ResponseMode,
    pub(crate) max_upload_bytes: Option<usize>,
    /// Last result, shown on the form in page mode.
    pub(crate) latest: Mutex<Option<ProcessedImage>>,
}

impl AppState {
    pub fn new(
        pool: EstimatorPool,
        storage: Arc<Storage>,
        mode: ResponseMode,
        max_upload_bytes: Option<usize>,
    ) -> Self {
        Self {
            pool,
            storage,
            mode,
            max_upload_bytes,
            latest: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &EstimatorPool {
        &self.pool
    }
}
