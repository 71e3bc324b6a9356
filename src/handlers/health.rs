use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "caption-service",
        "version": env!("CARGO_PKG_VERSION"),
        "model_loaded": state.captioner.is_loaded(),
    }))
}
