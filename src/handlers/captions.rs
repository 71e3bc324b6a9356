use crate::dtos::CaptionResponse;
use crate::error::AppError;
use crate::services::captioner::{CaptionError, MODEL_NOT_LOADED_CAPTION};
use crate::startup::AppState;
use anyhow::anyhow;
use axum::{
    extract::{Multipart, State},
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use std::time::Duration;

pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    // 1. Locate the multipart field carrying the image. A `Field` borrows the
    //    `Multipart`, so it cannot outlive its loop iteration; extract the owned
    //    filename and bytes in place instead of holding the field.
    let mut image_payload = None;
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(anyhow!("Failed to read multipart field: {}", e))
    })? {
        if field.name() == Some("image") {
            let filename = field.file_name().unwrap_or_default().to_string();
            if filename.is_empty() {
                return Err(AppError::BadRequest(anyhow!("No file selected")));
            }

            // 2. Validate the extension against the configured allow-set.
            let allowed = &state.config.upload.allowed_extensions;
            let extension = file_extension(&filename);
            if !allowed.contains(&extension) {
                return Err(AppError::BadRequest(anyhow!(
                    "Invalid file type. Please upload {} images.",
                    allowed_list(allowed)
                )));
            }

            // 3. Read the payload (the transport layer has already capped its size)
            //    and decode it, normalizing to three-channel RGB.
            let data = field.bytes().await.map_err(|e| {
                AppError::BadRequest(anyhow!("Failed to read file bytes: {}", e))
            })?;
            image_payload = Some((filename, data));
            break;
        }
    }
    let (filename, data) =
        image_payload.ok_or_else(|| AppError::BadRequest(anyhow!("No image file provided")))?;

    tracing::info!(filename = %filename, size = data.len(), "image upload received");

    let decoded = image::load_from_memory(&data)
        .map_err(|e| AppError::BadRequest(anyhow!("Could not decode image: {}", e)))?;
    let image = DynamicImage::ImageRgb8(decoded.to_rgb8());

    // 4. Re-encode as JPEG for the echoed preview.
    let mut jpeg = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .map_err(|e| AppError::InternalError(anyhow!("failed to encode preview: {}", e)))?;
    let data_uri = format!("data:image/jpeg;base64,{}", BASE64.encode(&jpeg));

    // 5. Generate the caption under the configured timeout.
    let timeout = Duration::from_secs(state.config.model.caption_timeout_secs);
    let caption = match tokio::time::timeout(timeout, state.captioner.caption(&image)).await {
        Ok(Ok(caption)) => caption,
        Ok(Err(CaptionError::Unavailable)) => MODEL_NOT_LOADED_CAPTION.to_string(),
        Ok(Err(CaptionError::Failed(reason))) => {
            tracing::error!(filename = %filename, reason = %reason, "caption generation failed");
            return Err(AppError::CaptionFailed(reason));
        }
        Err(_) => {
            tracing::error!(
                filename = %filename,
                timeout_secs = timeout.as_secs(),
                "caption generation timed out"
            );
            return Err(AppError::CaptionTimeout);
        }
    };

    tracing::info!(filename = %filename, caption = %caption, "caption generated");

    Ok(Json(CaptionResponse {
        success: true,
        image: data_uri,
        caption,
    }))
}

/// Substring after the last dot, lowercased; empty when the name has no dot.
fn file_extension(filename: &str) -> String {
    match filename.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    }
}

fn allowed_list(allowed: &[String]) -> String {
    allowed
        .iter()
        .map(|ext| ext.to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(", ")
}
