use crate::{
    codec,
    cv_utils::{CvImage, CvUtilsError},
    labels::ClassLabels,
    model_service::{ModelService, ModelServiceError},
    server::SharedState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub image: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DetectResponse {
    Result(String),
    Error(String),
}

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("failed to decode image: {0}")]
    DecodeFailure(String),
    #[error("inference failed: {0}")]
    InferenceFailure(#[from] ModelServiceError),
    #[error("failed to encode image: {0}")]
    EncodeFailure(#[from] CvUtilsError),
}

impl DetectError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DetectError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            DetectError::DecodeFailure(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DetectError::InferenceFailure(_) | DetectError::EncodeFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(DetectResponse::Error(self.to_string())),
        )
            .into_response()
    }
}

/// Runs a raw `/api/detect` body through decode, inference, rendering and
/// re-encoding, returning the annotated JPEG as base64.
pub fn detect_image<M: ModelService>(
    model_service: &M,
    class_labels: &ClassLabels,
    body: &[u8],
) -> Result<String, DetectError> {
    let request: DetectRequest = serde_json::from_slice(body)
        .map_err(|e| DetectError::InvalidPayload(e.to_string()))?;

    let payload = codec::split_data_url(&request.image).ok_or_else(|| {
        DetectError::InvalidPayload("expected `<prefix>,<base64 payload>`".to_string())
    })?;

    let image_data =
        codec::decode_base64(payload).map_err(|e| DetectError::DecodeFailure(e.to_string()))?;
    let mut image =
        CvImage::from_bytes(&image_data).map_err(|e| DetectError::DecodeFailure(e.to_string()))?;
    let rgb = image
        .to_rgb_image()
        .map_err(|e| DetectError::DecodeFailure(e.to_string()))?;

    let detections = model_service.predict(&rgb)?;
    tracing::info!(
        "Detected {} objects in {}x{} image",
        detections.len(),
        image.width(),
        image.height()
    );

    let annotated = image.annotate(&class_labels.attach(&detections))?.to_jpg()?;

    Ok(codec::encode_base64(&annotated))
}

#[instrument(skip(state, body), fields(body_len = body.len()))]
pub async fn detect<M: ModelService>(
    State(state): State<SharedState<M>>,
    body: Bytes,
) -> Response {
    let model_service = state.model_service.clone();
    let class_labels = state.class_labels.clone();

    let result = tokio::task::spawn_blocking(move || {
        detect_image(model_service.as_ref(), class_labels.as_ref(), &body)
    })
    .await
    .unwrap_or_else(|e| {
        Err(DetectError::InferenceFailure(ModelServiceError::Inference(
            format!("worker task failed: {}", e),
        )))
    });

    match result {
        Ok(encoded) => Json(DetectResponse::Result(encoded)).into_response(),
        Err(err) => {
            tracing::warn!("Detection request failed: {}", err);
            let mut response = err.into_response();
            if !state.strict_status_codes {
                *response.status_mut() = StatusCode::OK;
            }
            response
        }
    }
}
