use crate::{
    bounding_box::Detection,
    config::{ModelConfig, Validatable},
    labels::parse_names_metadata,
    model_service::{ModelService, ModelServiceError},
};
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array, ArrayView2, Axis, Ix3, Ix4};
use ort::{
    execution_providers::TensorRTExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, MutexGuard,
};
use tracing::instrument;

#[derive(Debug, Clone, Copy)]
pub struct PostprocessParams {
    pub input_size: u32,
    pub min_probability: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl From<&ModelConfig> for PostprocessParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            input_size: config.input_size,
            min_probability: config.min_probability,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
        }
    }
}

/// Resizes to the square model input and lays the pixels out as normalized NCHW.
pub fn transform_image(image: &RgbImage, input_size: u32) -> Array<f32, Ix4> {
    let size = input_size as usize;
    let img = image::imageops::resize(image, input_size, input_size, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, size, size));
    for (x, y, pixel) in img.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Decodes a `[4 + classes, anchors]` YOLO head into boxes on the original image.
///
/// Each column holds centre x, centre y, width and height in model input pixels
/// followed by one score per class. Boxes of the same class overlapping a more
/// confident one above `iou_threshold` are suppressed.
pub fn decode_output(
    output: ArrayView2<f32>,
    img_width: u32,
    img_height: u32,
    params: &PostprocessParams,
) -> Result<Vec<Detection>, ModelServiceError> {
    if output.nrows() <= 4 {
        return Err(ModelServiceError::Output(format!(
            "expected at least 5 rows, got {}",
            output.nrows()
        )));
    }

    let scale_x = img_width as f32 / params.input_size as f32;
    let scale_y = img_height as f32 / params.input_size as f32;

    let mut boxes = Vec::new();
    for column in output.axis_iter(Axis(1)) {
        let Some((class_id, prob)) = column
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })
        else {
            continue;
        };

        if prob < params.min_probability {
            continue;
        }

        let xc = column[0] * scale_x;
        let yc = column[1] * scale_y;
        let w = column[2] * scale_x;
        let h = column[3] * scale_y;

        boxes.push(Detection {
            class_id: class_id as u32,
            confidence: prob,
            x1: (xc - w / 2.).max(0.),
            y1: (yc - h / 2.).max(0.),
            x2: (xc + w / 2.).min(img_width as f32),
            y2: (yc + h / 2.).min(img_height as f32),
        });
    }

    Ok(non_max_suppression(
        boxes,
        params.iou_threshold,
        params.max_detections,
    ))
}

pub fn non_max_suppression(
    mut boxes: Vec<Detection>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

    let mut result: Vec<Detection> = Vec::new();
    for candidate in boxes {
        if result.len() >= max_detections {
            break;
        }
        let suppressed = result
            .iter()
            .any(|kept| kept.class_id == candidate.class_id && kept.iou(&candidate) > iou_threshold);
        if !suppressed {
            result.push(candidate);
        }
    }
    result
}

/// Locks a pooled session, taking it back if a previous holder panicked.
///
/// A session carries no state between runs, so a poisoned lock only means an
/// earlier request died mid-inference.
fn lock_session<T>(session: &Mutex<T>) -> MutexGuard<'_, T> {
    session.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovering session lock poisoned by a panicked request");
        session.clear_poison();
        poisoned.into_inner()
    })
}

/// Reads the `names` entry the exporter embeds in the model metadata.
fn model_class_names(session: &Session) -> Option<Vec<String>> {
    let raw = match session.metadata().and_then(|metadata| metadata.custom("names")) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Failed to read model metadata: {}", e);
            return None;
        }
    };
    let names = parse_names_metadata(&raw);
    if names.is_none() {
        tracing::warn!("Ignoring unparseable `names` metadata: {}", raw);
    }
    names
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    params: PostprocessParams,
    class_names: Option<Vec<String>>,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        if model_config.use_tensorrt {
            ort::init()
                .with_execution_providers([TensorRTExecutionProvider::default()
                    .with_engine_cache(true)
                    .build()])
                .commit()?;
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        let class_names = sessions
            .first()
            .and_then(|session| model_class_names(&lock_session(session)));

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            params: PostprocessParams::from(model_config),
            class_names,
        })
    }

    /// Class names embedded in the model by the exporter, in class id order.
    pub fn class_names(&self) -> Option<Vec<String>> {
        self.class_names.clone()
    }

    pub fn run_inference(
        &self,
        input: &Array<f32, Ix4>,
    ) -> Result<ndarray::ArrayD<f32>, ModelServiceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = lock_session(&self.sessions[index]);

        tracing::debug!("Handling request with session {}", index);
        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelServiceError::Preprocessing(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelServiceError::Inference(e.to_string()))?;

        let (shape, data) = outputs
            .get("output0")
            .ok_or_else(|| {
                ModelServiceError::Output("model has no `output0` tensor".to_string())
            })?
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelServiceError::Output(format!("failed to extract tensor: {}", e)))?;

        ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelServiceError::Output(format!("invalid tensor shape: {}", e)))
    }
}

impl ModelService for OrtModelService {
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    fn predict(&self, image: &RgbImage) -> Result<Vec<Detection>, ModelServiceError> {
        let input = transform_image(image, self.params.input_size);

        let outputs = self
            .run_inference(&input)?
            .into_dimensionality::<Ix3>()
            .map_err(|e| ModelServiceError::Output(format!("expected a 3D output: {}", e)))?;

        let detections = decode_output(
            outputs.slice(s![0, .., ..]),
            image.width(),
            image.height(),
            &self.params,
        )?;

        tracing::debug!("Returning {} detections", detections.len());
        for (i, detection) in detections.iter().enumerate() {
            tracing::debug!(
                "Detection {}: class_id={}, confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
                i,
                detection.class_id,
                detection.confidence,
                detection.x1,
                detection.y1,
                detection.x2,
                detection.y2
            );
        }

        Ok(detections)
    }
}
