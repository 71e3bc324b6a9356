use caption_service::config::CaptionConfig;
use caption_service::observability::init_tracing;
use caption_service::services::blip::{BlipCaptioner, ModelLoadError};
use caption_service::services::captioner::{ImageCaptioner, UnavailableCaptioner};
use caption_service::services::hub::HubError;
use caption_service::startup::Application;
use std::sync::Arc;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = CaptionConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing("caption_service=info,tower_http=info", config.server.debug);

    let captioner = build_captioner(&config).await;

    let app = Application::build(config, captioner).await.map_err(|e| {
        tracing::error!("Failed to start application: {}", e);
        std::io::Error::other(format!("Startup error: {}", e))
    })?;

    app.run_until_stopped().await
}

/// Load the captioning model, or fall back to the degraded stand-in. A load
/// failure is logged with a coarse classification but never aborts startup.
async fn build_captioner(config: &CaptionConfig) -> Arc<dyn ImageCaptioner> {
    tracing::info!(model_id = %config.model.id, "loading captioning model");

    match BlipCaptioner::load(&config.model).await {
        Ok(captioner) => {
            tracing::info!(model_id = %config.model.id, "model loaded");
            Arc::new(captioner)
        }
        Err(ModelLoadError::Hub(HubError::Unauthorized)) => {
            tracing::error!(
                "model download was rejected as unauthorized; check the HF_TOKEN credential"
            );
            degraded()
        }
        Err(ModelLoadError::Hub(HubError::Gated)) => {
            tracing::error!(
                model_id = %config.model.id,
                "model is gated or private; the configured token does not grant access"
            );
            degraded()
        }
        Err(e) => {
            tracing::error!(
                model_id = %config.model.id,
                "failed to load model: {}; check the model id and network connectivity",
                e
            );
            degraded()
        }
    }
}

fn degraded() -> Arc<dyn ImageCaptioner> {
    tracing::warn!("continuing without a model; captions will report it as unavailable");
    Arc::new(UnavailableCaptioner)
}
