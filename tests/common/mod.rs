use caption_service::config::CaptionConfig;
use caption_service::services::captioner::ImageCaptioner;
use caption_service::startup::Application;
use std::sync::Arc;

pub struct TestApp {
    pub address: String,
    pub port: u16,
}

impl TestApp {
    pub async fn spawn(captioner: Arc<dyn ImageCaptioner>) -> Self {
        Self::spawn_with(|_| {}, captioner).await
    }

    pub async fn spawn_with<F>(tweak: F, captioner: Arc<dyn ImageCaptioner>) -> Self
    where
        F: FnOnce(&mut CaptionConfig),
    {
        let mut config = CaptionConfig::load().expect("Failed to load configuration");
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0; // Random port for testing
        tweak(&mut config);

        let app = Application::build(config, captioner)
            .await
            .expect("Failed to build test application");
        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("http://127.0.0.1:{}/health", port);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp { address, port }
    }
}

/// A solid-color PNG for upload tests.
pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .expect("Failed to encode test image");
    buf
}
