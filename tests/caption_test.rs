mod common;

use async_trait::async_trait;
use axum::http::StatusCode;
use caption_service::services::captioner::{
    CaptionError, FailingCaptioner, ImageCaptioner, UnavailableCaptioner,
    MODEL_NOT_LOADED_CAPTION,
};
use common::{png_bytes, TestApp};
use image::DynamicImage;
use reqwest::multipart;
use std::sync::Arc;

fn red_png_form() -> multipart::Form {
    multipart::Form::new().part(
        "image",
        multipart::Part::bytes(png_bytes(10, 10, [255, 0, 0])).file_name("red.png"),
    )
}

#[tokio::test]
async fn missing_model_yields_sentinel_caption_with_200() {
    let app = TestApp::spawn(Arc::new(UnavailableCaptioner)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/upload", app.address))
        .multipart(red_png_form())
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(StatusCode::OK.as_u16(), response.status().as_u16());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["success"], true);
    assert_eq!(body["caption"], MODEL_NOT_LOADED_CAPTION);
    assert!(body["image"]
        .as_str()
        .unwrap_or_default()
        .starts_with("data:image/jpeg;base64,"));
}

#[tokio::test]
async fn generation_failure_maps_to_500() {
    let app = TestApp::spawn(Arc::new(FailingCaptioner::new("tensor shape mismatch"))).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/upload", app.address))
        .multipart(red_png_form())
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(
        StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
        response.status().as_u16()
    );

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(
        body["error"],
        "Error generating caption: tensor shape mismatch"
    );
}

/// Captioner that never finishes within the test timeout.
struct SlowCaptioner;

#[async_trait]
impl ImageCaptioner for SlowCaptioner {
    async fn caption(&self, _image: &DynamicImage) -> Result<String, CaptionError> {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

#[tokio::test]
async fn slow_generation_times_out_with_504() {
    let app = TestApp::spawn_with(
        |config| config.model.caption_timeout_secs = 1,
        Arc::new(SlowCaptioner),
    )
    .await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{}/upload", app.address))
        .multipart(red_png_form())
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(
        StatusCode::GATEWAY_TIMEOUT.as_u16(),
        response.status().as_u16()
    );

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["error"], "Caption generation timed out");
}
