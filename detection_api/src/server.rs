use crate::{
    config::ServerConfig, labels::ClassLabels, model_service::ModelService, routes::api_routes,
};
use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct SharedState<M: ModelService> {
    pub model_service: Arc<M>,
    pub class_labels: Arc<ClassLabels>,
    pub strict_status_codes: bool,
}

impl<M: ModelService> SharedState<M> {
    pub fn new(model_service: M, class_labels: ClassLabels, strict_status_codes: bool) -> Self {
        Self {
            model_service: Arc::new(model_service),
            class_labels: Arc::new(class_labels),
            strict_status_codes,
        }
    }
}

pub fn build_router<M: ModelService>(state: SharedState<M>) -> Router {
    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new<M: ModelService>(
        state: SharedState<M>,
        config: &ServerConfig,
    ) -> std::io::Result<Self> {
        let router = build_router(state);
        let listener = TcpListener::bind(config.get_address()).await?;

        Ok(Self { router, listener })
    }

    pub fn run(self, mut shutdown_rx: Receiver<()>) -> JoinHandle<std::io::Result<()>> {
        match self.listener.local_addr() {
            Ok(addr) => tracing::info!("Starting app on {}", addr),
            Err(e) => tracing::warn!("Starting app on unknown address: {}", e),
        }

        let listener = self.listener;
        let router = self.router;
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await
        })
    }
}
