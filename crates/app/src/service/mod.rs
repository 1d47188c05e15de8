//! Pose estimation upload service.
//!
//! Uploads arrive on the Actix server, are queued to a pool of estimator
//! workers that each own a pose model, and come back as annotated images in
//! the processed directory. A janitor thread keeps both storage directories
//! bounded.

pub mod annotation;
pub mod backend;
pub mod config;
pub mod data;
pub mod encoding;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod retention;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod workers;

pub use config::ServiceConfig;
pub use data::{AppState, ProcessedImage, Upload};
pub use error::ServiceError;
pub use lifecycle::run;
pub use storage::Storage;
pub use workers::EstimatorPool;
