pub mod config;
pub mod pipeline;
pub mod trainer;

pub use pipeline::run_pipeline;
pub use trainer::{Trainer, TrainingError, YoloCli};
