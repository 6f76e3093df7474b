use crate::bounding_box::Detection;
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelServiceError {
    #[error("Failed to prepare input tensor: {0}")]
    Preprocessing(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    Output(String),
}

/// The loaded detector. Implementations are shared read-only across requests.
pub trait ModelService: Send + Sync + Clone + 'static {
    fn predict(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelServiceError>;
}
