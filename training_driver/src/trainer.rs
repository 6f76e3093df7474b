use crate::config::TrainingConfig;
use std::{
    io,
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
    time::Instant,
};
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Train,
    Validate,
    Export,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Train => "train",
            Stage::Validate => "val",
            Stage::Export => "export",
        }
    }
}

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Failed to launch `{executable}` for {stage:?}: {source}")]
    Spawn {
        stage: Stage,
        executable: String,
        source: io::Error,
    },
    #[error("{stage:?} stage failed with {status}")]
    StageFailed { stage: Stage, status: ExitStatus },
    #[error("{stage:?} stage finished but {path:?} is missing")]
    MissingArtifact { stage: Stage, path: PathBuf },
}

/// The external detection framework. Each call blocks until the stage is done.
pub trait Trainer {
    /// Trains from the configured checkpoint and returns the best weights.
    fn train(&self, config: &TrainingConfig) -> Result<PathBuf, TrainingError>;
    /// Validates `weights` on the held-out split of the dataset.
    fn validate(&self, config: &TrainingConfig, weights: &Path) -> Result<(), TrainingError>;
    /// Exports `weights` to the interchange format and returns the exported
    /// file or model directory.
    fn export(&self, config: &TrainingConfig, weights: &Path) -> Result<PathBuf, TrainingError>;
}

/// Drives the Ultralytics `yolo` command-line tool.
#[derive(Debug, Default, Clone)]
pub struct YoloCli;

pub fn train_args(config: &TrainingConfig) -> Vec<String> {
    let mut args = vec![
        "detect".to_string(),
        Stage::Train.as_str().to_string(),
        format!("model={}", config.checkpoint),
        format!("data={}", config.dataset.display()),
        format!("epochs={}", config.epochs),
        format!("imgsz={}", config.image_size),
        format!("project={}", config.project.display()),
        format!("name={}", config.name),
        "exist_ok=True".to_string(),
    ];
    if let Some(device) = &config.device {
        args.push(format!("device={}", device));
    }
    args
}

pub fn val_args(config: &TrainingConfig, weights: &Path) -> Vec<String> {
    let mut args = vec![
        "detect".to_string(),
        Stage::Validate.as_str().to_string(),
        format!("model={}", weights.display()),
        format!("data={}", config.dataset.display()),
        format!("imgsz={}", config.image_size),
    ];
    if let Some(device) = &config.device {
        args.push(format!("device={}", device));
    }
    args
}

pub fn export_args(config: &TrainingConfig, weights: &Path) -> Vec<String> {
    vec![
        "detect".to_string(),
        Stage::Export.as_str().to_string(),
        format!("model={}", weights.display()),
        format!("format={}", config.export_format),
        format!("imgsz={}", config.image_size),
    ]
}

impl YoloCli {
    #[instrument(skip(self, config, args))]
    fn run(
        &self,
        config: &TrainingConfig,
        stage: Stage,
        args: Vec<String>,
    ) -> Result<(), TrainingError> {
        tracing::info!("Running `{} {}`", config.executable, args.join(" "));
        let started = Instant::now();

        let status = Command::new(&config.executable)
            .args(&args)
            .status()
            .map_err(|source| TrainingError::Spawn {
                stage,
                executable: config.executable.clone(),
                source,
            })?;

        if !status.success() {
            return Err(TrainingError::StageFailed { stage, status });
        }

        tracing::info!(
            "{:?} stage finished in {:.1}s",
            stage,
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

fn expect_artifact(stage: Stage, path: PathBuf) -> Result<PathBuf, TrainingError> {
    if path.exists() {
        Ok(path)
    } else {
        Err(TrainingError::MissingArtifact { stage, path })
    }
}

impl Trainer for YoloCli {
    fn train(&self, config: &TrainingConfig) -> Result<PathBuf, TrainingError> {
        self.run(config, Stage::Train, train_args(config))?;
        expect_artifact(Stage::Train, config.best_weights())
    }

    fn validate(&self, config: &TrainingConfig, weights: &Path) -> Result<(), TrainingError> {
        self.run(config, Stage::Validate, val_args(config, weights))
    }

    fn export(&self, config: &TrainingConfig, weights: &Path) -> Result<PathBuf, TrainingError> {
        self.run(config, Stage::Export, export_args(config, weights))?;
        expect_artifact(Stage::Export, config.export_path(weights))
    }
}
