use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Settings for a single training run.
///
/// Every field has a default so the driver runs without any configuration
/// file; `configuration/training.yaml` and `TRAIN_*` environment variables
/// override individual fields.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    /// Pre-trained checkpoint the run starts from.
    pub checkpoint: String,
    /// Dataset descriptor listing image/label locations and class names.
    pub dataset: PathBuf,
    pub epochs: u32,
    pub image_size: u32,
    /// Device passed through to the framework (`cpu`, `0`, `0,1`, ...).
    pub device: Option<String>,
    /// Output root owned by the framework; weights land in `project/name/weights`.
    pub project: PathBuf,
    pub name: String,
    pub export_format: String,
    /// Framework command-line executable.
    pub executable: String,
    pub log_level: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            checkpoint: "yolo11n.pt".to_string(),
            dataset: PathBuf::from("datasets/data.yaml"),
            epochs: 100,
            image_size: 640,
            device: None,
            project: PathBuf::from("runs/detect"),
            name: "train".to_string(),
            export_format: "onnx".to_string(),
            executable: "yolo".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl TrainingConfig {
    pub fn run_dir(&self) -> PathBuf {
        self.project.join(&self.name)
    }

    pub fn best_weights(&self) -> PathBuf {
        self.run_dir().join("weights").join("best.pt")
    }

    /// Where the framework writes the export of `weights`.
    ///
    /// Single-file formats sit next to the weights with their own extension;
    /// directory formats get a `<stem>_<format>_model` style folder.
    pub fn export_path(&self, weights: &Path) -> PathBuf {
        let stem = weights
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dir = weights.parent().unwrap_or_else(|| Path::new(""));

        match self.export_format.as_str() {
            "openvino" | "paddle" | "ncnn" | "mnn" => {
                dir.join(format!("{}_{}_model", stem, self.export_format))
            }
            "saved_model" | "pb" => dir.join(format!("{}_saved_model", stem)),
            "tflite" => dir
                .join(format!("{}_saved_model", stem))
                .join(format!("{}_float32.tflite", stem)),
            "edgetpu" => dir
                .join(format!("{}_saved_model", stem))
                .join(format!("{}_full_integer_quant_edgetpu.tflite", stem)),
            "tfjs" => dir.join(format!("{}_web_model", stem)),
            "coreml" => weights.with_extension("mlpackage"),
            format => weights.with_extension(format),
        }
    }
}

pub fn get_configuration() -> Result<TrainingConfig, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("no current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let config = config::Config::builder()
        .add_source(
            config::File::from(configuration_directory.join("training.yaml")).required(false),
        )
        .add_source(
            config::Environment::with_prefix("TRAIN")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    config.try_deserialize::<TrainingConfig>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainingConfig::default();

        assert_eq!(config.epochs, 100);
        assert_eq!(config.image_size, 640);
        assert_eq!(config.dataset, PathBuf::from("datasets/data.yaml"));
        assert_eq!(
            config.best_weights(),
            PathBuf::from("runs/detect/train/weights/best.pt")
        );
        assert_eq!(
            config.export_path(&config.best_weights()),
            PathBuf::from("runs/detect/train/weights/best.onnx")
        );
    }

    #[test]
    fn test_export_path_follows_format_layout() {
        let weights = PathBuf::from("runs/detect/train/weights/best.pt");
        let export_path = |format: &str| {
            TrainingConfig {
                export_format: format.to_string(),
                ..TrainingConfig::default()
            }
            .export_path(&weights)
        };

        assert_eq!(
            export_path("torchscript"),
            PathBuf::from("runs/detect/train/weights/best.torchscript")
        );
        assert_eq!(
            export_path("engine"),
            PathBuf::from("runs/detect/train/weights/best.engine")
        );
        assert_eq!(
            export_path("openvino"),
            PathBuf::from("runs/detect/train/weights/best_openvino_model")
        );
        assert_eq!(
            export_path("saved_model"),
            PathBuf::from("runs/detect/train/weights/best_saved_model")
        );
        assert_eq!(
            export_path("tflite"),
            PathBuf::from("runs/detect/train/weights/best_saved_model/best_float32.tflite")
        );
        assert_eq!(
            export_path("coreml"),
            PathBuf::from("runs/detect/train/weights/best.mlpackage")
        );
        assert_eq!(
            export_path("ncnn"),
            PathBuf::from("runs/detect/train/weights/best_ncnn_model")
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = "epochs: 5\ndevice: cpu\n";
        let config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize::<TrainingConfig>()
            .unwrap();

        assert_eq!(config.epochs, 5);
        assert_eq!(config.device.as_deref(), Some("cpu"));
        assert_eq!(config.image_size, 640);
        assert_eq!(config.checkpoint, "yolo11n.pt");
    }
}
