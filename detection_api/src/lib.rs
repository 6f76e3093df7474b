mod bounding_box;
mod codec;
mod cv_utils;

pub mod app;
pub mod config;
pub mod labels;
pub mod model_service;
pub mod ort_service;
pub mod routes;
pub mod server;

pub use app::start_app;
pub use bounding_box::{BoundingBoxWithLabels, Detection};
