//! API router configuration.

use std::future::Future;

use axum::{
    Router,
    routing::{get, post},
};
use log::info;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    AppState, api_info, api_schema, connect, connection_history, device_info, disconnect, health,
    list_connections, running_config, send_command,
};

/// Create the API router over the given state.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/", get(api_info))
        .route("/schema", get(api_schema))
        .route("/connect/network", post(connect))
        .route("/send_command/{id}", post(send_command))
        .route("/disconnect/{id}", post(disconnect))
        .route("/device_info/{id}", get(device_info))
        .route("/running_config/{id}", get(running_config))
        .route("/connections", get(list_connections))
        .route("/connections/{id}/history", get(connection_history));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Where the HTTP server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// Serves the API until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.bind_address();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("netgate API listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:5000");
    }

    #[test]
    fn server_config_custom() {
        let config = ServerConfig::new("0.0.0.0", 8080);
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
    }
}
