use crate::config::CaptionConfig;
use crate::error::AppError;
use crate::handlers;
use crate::services::captioner::ImageCaptioner;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub config: CaptionConfig,
    pub captioner: Arc<dyn ImageCaptioner>,
}

pub struct Application {
    port: u16,
    server: Pin<Box<dyn Future<Output = std::io::Result<()>> + Send>>,
}

impl Application {
    pub async fn build(
        config: CaptionConfig,
        captioner: Arc<dyn ImageCaptioner>,
    ) -> Result<Self, AppError> {
        let max_content_length = config.upload.max_content_length;
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                AppError::ConfigError(anyhow::anyhow!("invalid bind address: {}", e))
            })?;

        let state = AppState { config, captioner };

        let app = Router::new()
            .route("/", get(handlers::index))
            .route("/health", get(handlers::health_check))
            .route("/upload", post(handlers::upload_image))
            .layer(DefaultBodyLimit::max(max_content_length))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::pin(server.into_future()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
