//! Pose estimation upload service: HTTP surface, estimator workers, storage,
//! and the command line entry points.

pub mod cli;
pub mod html;
pub mod service;
