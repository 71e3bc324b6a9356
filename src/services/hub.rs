use std::path::PathBuf;
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::info;

const HUB_BASE_URL: &str = "https://huggingface.co";

#[derive(Debug, Error)]
pub enum HubError {
    #[error("the configured access token was rejected")]
    Unauthorized,

    #[error("the model is gated or private and the token does not grant access")]
    Gated,

    #[error("file not found on the hub: {0}")]
    NotFound(String),

    #[error("download failed with status {0}")]
    Status(reqwest::StatusCode),

    #[error(transparent)]
    Network(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Fetches model files from the Hugging Face Hub into a local cache
/// directory. Files already present are reused without any network traffic.
pub struct HubClient {
    base_url: String,
    cache_dir: PathBuf,
    token: Option<String>,
    client: reqwest::Client,
}

impl HubClient {
    pub fn new(cache_dir: impl Into<PathBuf>, token: Option<String>) -> Self {
        Self {
            base_url: HUB_BASE_URL.to_string(),
            cache_dir: cache_dir.into(),
            token,
            client: reqwest::Client::new(),
        }
    }

    #[cfg(test)]
    fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn cached_path(&self, repo: &str, filename: &str) -> PathBuf {
        self.cache_dir.join(repo).join(filename)
    }

    pub async fn fetch(&self, repo: &str, filename: &str) -> Result<PathBuf, HubError> {
        let target = self.cached_path(repo, filename);
        if target.exists() {
            info!("using cached {}", target.display());
            return Ok(target);
        }

        let url = format!("{}/{}/resolve/main/{}", self.base_url, repo, filename);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await?;
        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED => return Err(HubError::Unauthorized),
            reqwest::StatusCode::FORBIDDEN => return Err(HubError::Gated),
            reqwest::StatusCode::NOT_FOUND => {
                return Err(HubError::NotFound(format!("{}/{}", repo, filename)))
            }
            status if !status.is_success() => return Err(HubError::Status(status)),
            _ => {}
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Download to a temp path and rename so a partial download never
        // shows up at the target path.
        let temp_path = target.with_extension("download");
        let mut file = File::create(&temp_path).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        fs::rename(&temp_path, &target).await?;

        info!("fetched {} into {}", url, target.display());

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::HubClient;
    use std::path::Path;

    fn temp_cache() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("hub-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn cached_path_nests_repo_under_cache_dir() {
        let client = HubClient::new("/tmp/cache", None);
        assert_eq!(
            client.cached_path("Salesforce/blip-image-captioning-base", "tokenizer.json"),
            Path::new("/tmp/cache/Salesforce/blip-image-captioning-base/tokenizer.json")
        );
    }

    #[tokio::test]
    async fn cache_hit_skips_the_network() {
        let cache = temp_cache();
        let repo_dir = cache.join("acme/tiny-model");
        tokio::fs::create_dir_all(&repo_dir).await.unwrap();
        tokio::fs::write(repo_dir.join("weights.bin"), b"cached")
            .await
            .unwrap();

        // An unroutable base URL proves no request is made on a cache hit.
        let client =
            HubClient::new(&cache, None).with_base_url("http://invalid.localdomain:1");
        let path = client
            .fetch("acme/tiny-model", "weights.bin")
            .await
            .expect("cache hit should not touch the network");

        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"cached");

        let _ = tokio::fs::remove_dir_all(&cache).await;
    }
}
