use crate::handlers::{self, ApiState};
use axum::{
    routing::{get, post},
    Router,
};
use predmarket_core::Repository;
use predmarket_supervisor::OrchestratorHandle;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct ApiServer {
    state: Arc<ApiState>,
}

impl ApiServer {
    #[must_use]
    pub fn new(orchestrator: OrchestratorHandle, repo: Arc<dyn Repository>) -> Self {
        Self {
            state: Arc::new(ApiState { orchestrator, repo }),
        }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::health))
            .route("/positions", get(handlers::positions))
            .route("/trades", get(handlers::trades))
            .route("/admin/clear-halt", post(handlers::clear_halt))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Starts the status server on the given address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind or serve.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("status API listening on {}", addr);

        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}
