use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use training_driver::{config, run_pipeline, YoloCli};

fn main() -> anyhow::Result<()> {
    let config = config::get_configuration().context("failed to load training configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_level(true))
        .init();

    let exported = run_pipeline(&YoloCli, &config).context("training run aborted")?;
    tracing::info!("Model ready at {:?}", exported);

    Ok(())
}
