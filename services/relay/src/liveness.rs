use crate::config::LivenessConfig;
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Body returned by the liveness probe
pub const ALIVE_BODY: &str = "I'm alive!";

/// Liveness probe
async fn alive() -> &'static str {
    ALIVE_BODY
}

/// Create the liveness router
pub fn create_router() -> Router {
    Router::new()
        .route("/", get(alive))
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address and serve the liveness endpoint until the task
/// is aborted
pub async fn start_liveness_server(config: &LivenessConfig) -> Result<()> {
    let addr = config.bind_address();

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind liveness endpoint to {addr}"))?;

    info!(address = %addr, "Starting liveness endpoint");

    serve(listener).await
}

/// Serve the liveness endpoint on an already bound listener
pub async fn serve(listener: TcpListener) -> Result<()> {
    axum::serve(listener, create_router())
        .await
        .context("Liveness server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn spawn_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener));
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_root_reports_alive() {
        let base = spawn_server().await;

        let response = reqwest::get(format!("{base}/")).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), ALIVE_BODY);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let base = spawn_server().await;

        let response = reqwest::get(format!("{base}/health")).await.unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let config = LivenessConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port,
        };

        let err = start_liveness_server(&config).await.unwrap_err();
        assert!(err.to_string().contains("Failed to bind"));
    }
}
