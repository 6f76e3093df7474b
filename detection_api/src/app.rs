use crate::{
    config::Config,
    labels::ClassLabels,
    ort_service::OrtModelService,
    server::{HttpServer, SharedState},
};
use std::error::Error;
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to load detection model: {:?}", e);
            return Err(e);
        }
    };

    let model_names = model_service.class_names();
    let class_labels = match ClassLabels::from_config(config.labels.as_ref(), model_names) {
        Ok(labels) => labels,
        Err(e) => {
            tracing::error!("Failed to load class labels: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let state = SharedState::new(
        model_service,
        class_labels,
        config.server.strict_status_codes,
    );
    let server = HttpServer::new(state, &config.server).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server_handle = server.run(shutdown_rx);

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    server_handle.await??;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
