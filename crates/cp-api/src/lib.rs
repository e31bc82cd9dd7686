pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Route table, mounted under `/api/v1/computing`.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/cp", get(handlers::handle_cp_resources))
        .route("/cp/ubi", post(handlers::handle_receive_task))
        .route("/cp/docker/receive/ubi", post(handlers::handle_proof_callback))
        .route("/cp/ubi/tasks", get(handlers::handle_list_tasks))
        .route("/cp/ubi/tasks/{id}", get(handlers::handle_get_task))
        .route("/cp/ubi/tasks/{id}/jobs", get(handlers::handle_task_jobs))
        .route("/cp/ubi/tasks/{id}/cancel", post(handlers::handle_cancel_task))
        .with_state(state);

    Router::new()
        .nest("/api/v1/computing", api_routes)
        .layer(cors)
}

pub async fn serve(state: ApiState, port: u16, shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "API listening on 0.0.0.0");
    serve_listener(listener, state, shutdown).await
}

/// Serve on an already-bound listener until shutdown is signalled.
pub async fn serve_listener(
    listener: TcpListener,
    state: ApiState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}
