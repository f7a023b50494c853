use crate::{loader::LocalModelPaths, params::DecodeParams, traits::LocalModel};
use anyhow::anyhow;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_transformers::{
    generation::LogitsProcessor,
    models::{blip, blip_text, quantized_blip},
    utils::apply_repeat_penalty,
};
use tokenizers::Tokenizer;
use tracing::debug;

const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;
const IMAGE_SIZE: usize = 384;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlipSize {
    Base,
    Large,
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
    let vision_config = blip::VisionConfig {
        hidden_size: 768,
        intermediate_size: 3072,
        projection_dim: 512,
        num_hidden_layers: 12,
        num_attention_heads: 12,
        image_size: IMAGE_SIZE,
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

/// Quantized BLIP captioner. Beam search is not available here, so every decode
/// samples with the step's temperature instead.
pub struct BlipModel {
    tokenizer: Tokenizer,
    model: quantized_blip::BlipForConditionalGeneration,
    device: Device,
    seed: u64,
}

impl BlipModel {
    pub async fn new(paths: LocalModelPaths, size: BlipSize) -> anyhow::Result<Self> {
        let tokenizer = Tokenizer::from_file(&paths.tokenizer_path)
            .map_err(|e| anyhow!("failed to initialize tokenizer: {}", e))?;

        let config = match size {
            BlipSize::Base => blip_base_config(),
            BlipSize::Large => blip::Config::image_captioning_large(),
        };

        let device = Device::cuda_if_available(0)?;
        let vb = quantized_blip::VarBuilder::from_gguf(&paths.model_path, &device)?;
        let model = quantized_blip::BlipForConditionalGeneration::new(&config, vb)?;

        Ok(Self {
            tokenizer,
            model,
            device,
            seed: rand::random(),
        })
    }

    fn load_image(&self, bytes: &[u8]) -> anyhow::Result<Tensor> {
        let img = image::load_from_memory(bytes)?
            .resize_to_fill(
                IMAGE_SIZE as u32,
                IMAGE_SIZE as u32,
                image::imageops::FilterType::Triangle,
            )
            .to_rgb8();
        let data = Tensor::from_vec(img.into_raw(), (IMAGE_SIZE, IMAGE_SIZE, 3), &Device::Cpu)?
            .permute((2, 0, 1))?;
        let mean = Tensor::new(&[0.48145466f32, 0.4578275, 0.40821073], &Device::Cpu)?
            .reshape((3, 1, 1))?;
        let std = Tensor::new(&[0.26862954f32, 0.261_302_6, 0.275_777_1], &Device::Cpu)?
            .reshape((3, 1, 1))?;
        let image = (data.to_dtype(DType::F32)? / 255.)?
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?;
        Ok(image.to_device(&self.device)?)
    }
}

/// Tokens that would complete an n-gram already present in `tokens`.
fn banned_ngram_tokens(tokens: &[u32], n: usize) -> Vec<u32> {
    if n == 0 || tokens.len() < n {
        return vec![];
    }
    let prefix = &tokens[tokens.len() - (n - 1)..];
    tokens
        .windows(n)
        .filter(|window| &window[..n - 1] == prefix)
        .map(|window| window[n - 1])
        .collect()
}

fn mask_tokens(logits: &Tensor, banned: &[u32]) -> anyhow::Result<Tensor> {
    if banned.is_empty() {
        return Ok(logits.clone());
    }
    let mut values = logits.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    for &token in banned {
        if let Some(value) = values.get_mut(token as usize) {
            *value = f32::NEG_INFINITY;
        }
    }
    Ok(Tensor::new(values, logits.device())?)
}

#[async_trait]
impl LocalModel for BlipModel {
    async fn decode(&mut self, image: &[u8], params: &DecodeParams) -> anyhow::Result<String> {
        let image = self.load_image(image)?;
        let image_embeds = image.unsqueeze(0)?.apply(self.model.vision_model())?;

        self.seed = self.seed.wrapping_add(1);
        let mut logits_processor = LogitsProcessor::new(
            self.seed,
            params.do_sample.then_some(params.temperature),
            None,
        );

        let mut token_ids = vec![BOS_TOKEN_ID];

        // needed for repeated generation on the same model
        self.model.text_decoder().reset_kv_cache();

        for index in 0..params.max_length {
            let context_size = if index > 0 { 1 } else { token_ids.len() };
            let start_pos = token_ids.len().saturating_sub(context_size);
            let input_ids = Tensor::new(&token_ids[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self
                .model
                .text_decoder()
                .forward(&input_ids, &image_embeds)?;
            let logits = logits.squeeze(0)?;
            let logits = logits.get(logits.dim(0)? - 1)?;
            let logits = apply_repeat_penalty(&logits, params.repetition_penalty, &token_ids[1..])?;

            let mut banned = banned_ngram_tokens(&token_ids[1..], params.no_repeat_ngram_size);
            if token_ids.len() - 1 < params.min_length {
                banned.push(SEP_TOKEN_ID);
            }
            let logits = mask_tokens(&logits, &banned)?;

            let token = logits_processor.sample(&logits)?;
            if token == SEP_TOKEN_ID {
                break;
            }
            token_ids.push(token);
        }

        debug!("decoded {} tokens", token_ids.len() - 1);

        self.tokenizer
            .decode(&token_ids, true)
            .map_err(|e| anyhow!("failed to decode caption: {}", e))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_banned_ngram_tokens() {
        assert_eq!(banned_ngram_tokens(&[1, 2, 3, 1, 2], 3), vec![3]);
        assert_eq!(banned_ngram_tokens(&[1, 2, 3], 3), Vec::<u32>::new());
        assert_eq!(banned_ngram_tokens(&[5, 5], 3), Vec::<u32>::new());
    }
}
