use crate::{
    config::TrainingConfig,
    trainer::{Trainer, TrainingError},
};
use std::path::PathBuf;
use tracing::instrument;

/// Trains, validates and exports in that order, stopping at the first failure.
/// Returns the path of the exported model.
#[instrument(skip_all, fields(dataset = %config.dataset.display(), epochs = config.epochs))]
pub fn run_pipeline<T: Trainer>(
    trainer: &T,
    config: &TrainingConfig,
) -> Result<PathBuf, TrainingError> {
    tracing::info!(
        "Training {} on {:?} for {} epochs at {}px",
        config.checkpoint,
        config.dataset,
        config.epochs,
        config.image_size
    );
    let weights = trainer.train(config)?;
    tracing::info!("Best weights written to {:?}", weights);

    trainer.validate(config, &weights)?;

    let exported = trainer.export(config, &weights)?;
    tracing::info!("Exported {} model to {:?}", config.export_format, exported);

    Ok(exported)
}
