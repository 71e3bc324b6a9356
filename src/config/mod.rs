use crate::error::AppError;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct CaptionConfig {
    pub server: ServerConfig,
    pub upload: UploadConfig,
    pub model: ModelConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Request body cap in bytes, enforced at the transport boundary.
    pub max_content_length: usize,
    /// Lowercased file extensions accepted for upload.
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Hub repository of the captioning model.
    pub id: String,
    pub cache_dir: PathBuf,
    /// Optional bearer credential for gated or private models.
    pub hf_token: Option<String>,
    pub caption_timeout_secs: u64,
}

impl CaptionConfig {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let allowed_extensions =
            parse_extensions(&get_env("ALLOWED_EXTENSIONS", Some("jpg,jpeg,png"))?);
        if allowed_extensions.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "ALLOWED_EXTENSIONS must name at least one extension"
            )));
        }

        Ok(CaptionConfig {
            server: ServerConfig {
                host: get_env("SERVER_HOST", Some("0.0.0.0"))?,
                port: parse_env("SERVER_PORT", "8001")?,
                debug: parse_env::<bool>("SERVER_DEBUG", "true")?,
            },
            upload: UploadConfig {
                max_content_length: parse_env("MAX_CONTENT_LENGTH", "209715200")?,
                allowed_extensions,
            },
            model: ModelConfig {
                id: get_env("MODEL_ID", Some("Salesforce/blip-image-captioning-base"))?,
                cache_dir: PathBuf::from(get_env("MODEL_CACHE_DIR", Some(".cache/huggingface"))?),
                hf_token: env::var("HF_TOKEN").ok().filter(|t| !t.is_empty()),
                caption_timeout_secs: parse_env("CAPTION_TIMEOUT_SECS", "120")?,
            },
        })
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

fn get_env(key: &str, default: Option<&str>) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => Ok(def.to_string()),
            None => Err(AppError::ConfigError(anyhow::anyhow!(format!(
                "{} is required but not set",
                key
            )))),
        },
    }
}

fn parse_env<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: Display,
{
    get_env(key, Some(default))?
        .to_ascii_lowercase()
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!(format!("invalid {}: {}", key, e))))
}
