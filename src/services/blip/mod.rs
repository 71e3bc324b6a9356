//! BLIP captioning engine on candle.
//!
//! The model and tokenizer are fetched from the hub once at startup and held
//! for the process lifetime. Generation is deterministic: beam search with a
//! fixed width, no sampling.

use crate::config::ModelConfig;
use crate::services::captioner::{CaptionError, ImageCaptioner};
use crate::services::hub::{HubClient, HubError};
use anyhow::anyhow;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::log_softmax;
use candle_nn::VarBuilder;
use candle_transformers::models::blip::VisionConfig;
use candle_transformers::models::{blip, blip_text};
use image::DynamicImage;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokenizers::Tokenizer;
use tracing::{debug, info};

const IMAGE_SIZE: usize = 384;

// Token ids of the BLIP text decoder vocabulary.
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

// Decoding policy: beam search, no sampling.
const BEAM_WIDTH: usize = 5;
const MAX_CAPTION_TOKENS: usize = 50;

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("failed to load tokenizer: {0}")]
    Tokenizer(String),

    #[error(transparent)]
    Model(#[from] candle_core::Error),
}

fn blip_base_config() -> blip::Config {
    let text_config = blip_text::Config {
        vocab_size: 30524,
        hidden_size: 768,
        encoder_hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 768,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        max_position_embeddings: 512,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-12,
        is_decoder: true,
    };
    let vision_config = VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: 384,
        patch_size: 16,
        hidden_act: candle_nn::Activation::Gelu,
        layer_norm_eps: 1e-5,
    };

    blip::Config {
        text_config,
        vision_config,
        projection_dim: 512,
        image_text_hidden_size: 256,
    }
}

fn config_for(model_id: &str) -> blip::Config {
    if model_id.ends_with("large") {
        blip::Config::image_captioning_large()
    } else {
        blip_base_config()
    }
}

struct BlipEngine {
    model: blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    device: Device,
}

#[derive(Clone)]
struct Beam {
    tokens: Vec<u32>,
    score: f32,
    finished: bool,
}

impl BlipEngine {
    fn generate(&mut self, image: &DynamicImage) -> anyhow::Result<String> {
        let pixels = self.preprocess(image)?.to_device(&self.device)?;
        let image_embeds = pixels.unsqueeze(0)?.apply(self.model.vision_model())?;

        let tokens = self.beam_search(&image_embeds)?;

        let caption = self
            .tokenizer
            .decode(&tokens, true)
            .map_err(|_| anyhow!("failed to decode generated tokens"))?;
        Ok(caption.trim().to_string())
    }

    /// Convert a decoded image into the normalized CHW tensor the vision
    /// encoder expects.
    fn preprocess(&self, image: &DynamicImage) -> candle_core::Result<Tensor> {
        let image = image.resize_to_fill(
            IMAGE_SIZE as u32,
            IMAGE_SIZE as u32,
            image::imageops::FilterType::Triangle,
        );
        let data = image.to_rgb8().into_raw();
        let data =
            Tensor::from_vec(data, (IMAGE_SIZE, IMAGE_SIZE, 3), &Device::Cpu)?.permute((2, 0, 1))?;
        let mean = Tensor::new(&[0.48145466f32, 0.4578275, 0.40821073], &Device::Cpu)?
            .reshape((3, 1, 1))?;
        let std = Tensor::new(&[0.26862954f32, 0.261_302_6, 0.275_777_1], &Device::Cpu)?
            .reshape((3, 1, 1))?;
        (data.to_dtype(DType::F32)? / 255.)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)
    }

    fn beam_search(&mut self, image_embeds: &Tensor) -> anyhow::Result<Vec<u32>> {
        let mut beams = vec![Beam {
            tokens: vec![BOS_TOKEN_ID],
            score: 0.0,
            finished: false,
        }];

        while beams.iter().any(|beam| !beam.finished) {
            let mut candidates = Vec::with_capacity(beams.len() * BEAM_WIDTH);

            for beam in &beams {
                if beam.finished {
                    candidates.push(beam.clone());
                    continue;
                }

                let log_probs = self.next_token_log_probs(&beam.tokens, image_embeds)?;
                for (token, log_prob) in top_candidates(&log_probs, BEAM_WIDTH) {
                    let mut tokens = beam.tokens.clone();
                    tokens.push(token);
                    let finished =
                        token == SEP_TOKEN_ID || tokens.len() >= MAX_CAPTION_TOKENS;
                    candidates.push(Beam {
                        tokens,
                        score: beam.score + log_prob,
                        finished,
                    });
                }
            }

            candidates.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            candidates.truncate(BEAM_WIDTH);
            beams = candidates;
        }

        let best = beams
            .into_iter()
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .ok_or_else(|| anyhow!("beam search produced no candidates"))?;

        debug!(score = best.score, tokens = best.tokens.len(), "beam search done");

        Ok(best.tokens)
    }

    /// Log-probabilities over the vocabulary for the next token after the
    /// given prefix. The decoder cache is shared state across beams, so each
    /// prefix gets a fresh full-context pass.
    fn next_token_log_probs(
        &mut self,
        tokens: &[u32],
        image_embeds: &Tensor,
    ) -> anyhow::Result<Vec<f32>> {
        self.model.reset_kv_cache();
        let input_ids = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = self.model.text_decoder().forward(&input_ids, image_embeds)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;
        let log_probs = log_softmax(&logits, D::Minus1)?;
        Ok(log_probs.to_vec1::<f32>()?)
    }
}

/// Top-k tokens by log-probability, highest first. Ties keep the lower token
/// id so decoding stays deterministic.
fn top_candidates(log_probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = log_probs
        .iter()
        .copied()
        .enumerate()
        .map(|(token, log_prob)| (token as u32, log_prob))
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed.truncate(k);
    indexed
}

/// The production captioner: a BLIP model held behind a mutex. Generation
/// needs exclusive access to the decoder cache, so concurrent requests
/// serialize on the model.
pub struct BlipCaptioner {
    engine: Arc<Mutex<BlipEngine>>,
}

impl BlipCaptioner {
    pub async fn load(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let hub = HubClient::new(&config.cache_dir, config.hf_token.clone());
        let model_file = hub.fetch(&config.id, "model.safetensors").await?;
        let tokenizer_file = hub.fetch(&config.id, "tokenizer.json").await?;

        let device = Device::cuda_if_available(0)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_file)
            .map_err(|e| ModelLoadError::Tokenizer(e.to_string()))?;

        let blip_config = config_for(&config.id);
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_file], DType::F32, &device)?
        };
        let model = blip::BlipForConditionalGeneration::new(&blip_config, vb)?;

        info!(model_id = %config.id, device = ?device, "captioning model materialized");

        Ok(Self {
            engine: Arc::new(Mutex::new(BlipEngine {
                model,
                tokenizer,
                device,
            })),
        })
    }
}

#[async_trait]
impl ImageCaptioner for BlipCaptioner {
    async fn caption(&self, image: &DynamicImage) -> Result<String, CaptionError> {
        let engine = Arc::clone(&self.engine);
        let image = image.clone();

        tokio::task::spawn_blocking(move || {
            let mut engine = engine
                .lock()
                .map_err(|_| CaptionError::Failed("engine mutex poisoned".to_string()))?;
            engine
                .generate(&image)
                .map_err(|e| CaptionError::Failed(e.to_string()))
        })
        .await
        .map_err(|e| CaptionError::Failed(format!("caption task aborted: {}", e)))?
    }

    fn is_loaded(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::{blip_base_config, config_for, top_candidates};

    #[test]
    fn top_candidates_orders_by_log_prob() {
        let log_probs = [-3.0f32, -0.5, -2.0, -1.0];
        let top = top_candidates(&log_probs, 2);
        assert_eq!(top, vec![(1, -0.5), (3, -1.0)]);
    }

    #[test]
    fn top_candidates_breaks_ties_by_token_id() {
        let log_probs = [-1.0f32, -1.0, -1.0];
        let top = top_candidates(&log_probs, 2);
        assert_eq!(top, vec![(0, -1.0), (1, -1.0)]);
    }

    #[test]
    fn base_config_matches_decoder_vocabulary() {
        let config = blip_base_config();
        assert_eq!(config.text_config.vocab_size, 30524);
        assert_eq!(config.vision_config.image_size, 384);
    }

    #[test]
    fn large_models_use_the_library_config() {
        let config = config_for("Salesforce/blip-image-captioning-large");
        assert_eq!(config.vision_config.num_hidden_layers, 24);
    }
}
