mod detect;

use crate::{model_service::ModelService, server::SharedState};
use axum::{routing::post, Router};

pub use detect::{detect_image, DetectError, DetectRequest, DetectResponse};

pub fn api_routes<M: ModelService>() -> Router<SharedState<M>> {
    Router::new().route("/api/detect", post(detect::detect::<M>))
}
