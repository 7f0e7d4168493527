use std::path::Path;

use anyhow::{Context, Error as E, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tokenizers::Tokenizer;

use crate::{
    image_to_tensor, latent_mask_tensor, select_best_device, tensor_to_image, DeviceMap,
    GenerationRequest, Loader, ModelLike,
};

const SDXL_TOKENIZER2_REPO: &str = "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k";
const SDXL_FP16_VAE_REPO: &str = "madebyollin/sdxl-vae-fp16-fix";
const LATENT_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SdVersion {
    #[serde(rename = "v1-5")]
    V1_5,
    #[serde(rename = "v2-1")]
    V2_1,
    #[serde(rename = "xl")]
    Xl,
}

serde_plain::derive_fromstr_from_deserialize!(SdVersion);
serde_plain::derive_display_from_serialize!(SdVersion);

impl SdVersion {
    pub fn repo(&self) -> &'static str {
        match self {
            Self::V1_5 => "benjamin-paine/stable-diffusion-v1-5",
            Self::V2_1 => "stabilityai/stable-diffusion-2-1",
            Self::Xl => "stabilityai/stable-diffusion-xl-base-1.0",
        }
    }

    fn tokenizer_repo(&self) -> &'static str {
        match self {
            Self::V1_5 | Self::V2_1 => "openai/clip-vit-base-patch32",
            Self::Xl => "openai/clip-vit-large-patch14",
        }
    }

    fn config(&self, sliced_attention_size: Option<usize>) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(sliced_attention_size, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(sliced_attention_size, None, None),
            Self::Xl => StableDiffusionConfig::sdxl(sliced_attention_size, None, None),
        }
    }

    fn vae_scale(&self) -> f64 {
        match self {
            Self::V1_5 | Self::V2_1 => 0.18215,
            Self::Xl => 0.13025,
        }
    }

    fn weights_file(dir: &str, stem: &str, use_f16: bool) -> String {
        if use_f16 {
            format!("{dir}/{stem}.fp16.safetensors")
        } else {
            format!("{dir}/{stem}.safetensors")
        }
    }

    fn clip_file(use_f16: bool) -> String {
        Self::weights_file("text_encoder", "model", use_f16)
    }

    fn clip2_file(use_f16: bool) -> String {
        Self::weights_file("text_encoder_2", "model", use_f16)
    }

    fn unet_file(use_f16: bool) -> String {
        Self::weights_file("unet", "diffusion_pytorch_model", use_f16)
    }

    fn vae_file(use_f16: bool) -> String {
        Self::weights_file("vae", "diffusion_pytorch_model", use_f16)
    }
}

#[derive(Debug, Clone)]
pub struct SdLoadOptions {
    pub version: SdVersion,
    /// Hub repository to pull weights from; defaults to the version's repo.
    pub repo: Option<String>,
    pub use_f16: bool,
    pub use_flash_attn: bool,
    pub sliced_attention_size: Option<usize>,
}

impl Default for SdLoadOptions {
    fn default() -> Self {
        Self {
            version: SdVersion::Xl,
            repo: None,
            use_f16: false,
            use_flash_attn: false,
            sliced_attention_size: None,
        }
    }
}

/// First scheduler step to run for an image-guided request. Always leaves at
/// least one step.
pub(crate) fn start_step(n_steps: usize, strength: f64) -> usize {
    let skipped = n_steps.saturating_sub((n_steps as f64 * strength) as usize);
    skipped.min(n_steps.saturating_sub(1))
}

/// Seeds the device RNG. candle's CPU backend has no seedable RNG, so CPU
/// runs ignore the seed and stay nondeterministic.
pub(crate) fn seed_device(device: &Device, seed: u64) -> Result<()> {
    if device.is_cpu() {
        tracing::warn!(seed, "seeding is not supported on CPU, ignoring seed");
        return Ok(());
    }
    device.set_seed(seed).context("failed to seed device")
}

struct TextEncoder {
    tokenizer: Tokenizer,
    model: ClipTextTransformer,
    max_len: usize,
    pad_id: u32,
}

impl TextEncoder {
    fn load(
        tokenizer_file: impl AsRef<Path>,
        config: &stable_diffusion::clip::Config,
        weights: impl AsRef<Path>,
        device: &Device,
    ) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(E::msg)
            .context("failed to load tokenizer")?;
        let pad_token = config.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .with_context(|| format!("tokenizer has no `{pad_token}` token"))?;
        // text encoders always run in f32; embeddings are cast afterwards
        let model = stable_diffusion::build_clip_transformer(config, weights, device, DType::F32)
            .context("failed to build CLIP text encoder")?;
        Ok(Self {
            tokenizer,
            model,
            max_len: config.max_position_embeddings,
            pad_id,
        })
    }

    fn tokens(&self, text: &str, device: &Device) -> Result<Tensor> {
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(E::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > self.max_len {
            tracing::warn!(
                tokens = tokens.len(),
                max = self.max_len,
                "prompt too long, truncating"
            );
            tokens.truncate(self.max_len);
        }
        tokens.resize(self.max_len, self.pad_id);
        Ok(Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?)
    }

    /// Prompt embedding; with guidance, stacked as [unconditional, conditional].
    fn embed(&self, prompt: &str, guided: bool, device: &Device, dtype: DType) -> Result<Tensor> {
        let cond = self.model.forward(&self.tokens(prompt, device)?)?;
        let embeddings = if guided {
            let uncond = self.model.forward(&self.tokens("", device)?)?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };
        Ok(embeddings.to_dtype(dtype)?)
    }
}

pub struct StableDiffusionModel {
    version: SdVersion,
    sliced_attention_size: Option<usize>,
    device: Device,
    dtype: DType,
    text_encoders: Vec<TextEncoder>,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusionModel {
    fn encode_image(&self, image: &RgbImage, width: usize, height: usize) -> Result<Tensor> {
        let pixels = image_to_tensor(image, width, height, &self.device)?.to_dtype(self.dtype)?;
        let dist = self.vae.encode(&pixels)?;
        Ok((dist.sample()? * self.version.vae_scale())?)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(&self, request: &GenerationRequest) -> Result<RgbImage> {
        let (width, height) = (request.width, request.height);
        let (latent_width, latent_height) = (width / 8, height / 8);
        let guided = request.guidance_scale > 1.0;

        if let Some(seed) = request.seed {
            seed_device(&self.device, seed)?;
        }

        let embeddings = self
            .text_encoders
            .iter()
            .map(|enc| enc.embed(&request.prompt, guided, &self.device, self.dtype))
            .collect::<Result<Vec<_>>>()?;
        let text_embeddings = Tensor::cat(&embeddings, D::Minus1)?;

        let mut scheduler = self
            .version
            .config(self.sliced_attention_size)
            .build_scheduler(request.steps)?;
        let timesteps = scheduler.timesteps().to_vec();

        let init_latents = match request.mode.conditioning_image() {
            Some(image) => Some(
                self.encode_image(image, width, height)
                    .context("failed to encode conditioning image")?,
            ),
            None => None,
        };
        // (mask, 1 - mask): regenerate where mask is 1, keep the input image elsewhere
        let mask = match request.mode.mask() {
            Some(mask) => {
                let mask =
                    latent_mask_tensor(mask, latent_width, latent_height, &self.device, self.dtype)?;
                let keep = mask.affine(-1., 1.)?;
                Some((mask, keep))
            }
            None => None,
        };
        let t_start = match init_latents {
            Some(_) => start_step(timesteps.len(), request.effective_strength()),
            None => 0,
        };

        let noise = Tensor::randn(
            0f32,
            1f32,
            (1, LATENT_CHANNELS, latent_height, latent_width),
            &self.device,
        )?
        .to_dtype(self.dtype)?;
        let mut latents = match (&init_latents, timesteps.get(t_start)) {
            (Some(init), Some(&timestep)) => scheduler.add_noise(init, noise.clone(), timestep)?,
            (Some(init), None) => init.clone(),
            (None, _) => (noise.clone() * scheduler.init_noise_sigma())?,
        };

        for (index, &timestep) in timesteps.iter().enumerate().skip(t_start) {
            let model_input = if guided {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if guided {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, cond) = (&chunks[0], &chunks[1]);
                (uncond + ((cond - uncond)? * request.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;

            if let (Some((mask, keep)), Some(init)) = (&mask, &init_latents) {
                let known = match timesteps.get(index + 1) {
                    Some(&next) => scheduler.add_noise(init, noise.clone(), next)?,
                    None => init.clone(),
                };
                latents = (mask.broadcast_mul(&latents)? + keep.broadcast_mul(&known)?)?;
            }
            tracing::debug!(step = index + 1, total = timesteps.len(), "denoising");
        }

        let image = self.vae.decode(&(latents / self.version.vae_scale())?)?;
        let image = ((image / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let image = (image.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?.i(0)?;
        tensor_to_image(&image)
    }
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;
    type Options = SdLoadOptions;

    async fn load(options: SdLoadOptions, api: Api, device_map: DeviceMap) -> Result<Self::Model> {
        let device = select_best_device(device_map).context("failed to set up device")?;
        let dtype = if options.use_f16 { DType::F16 } else { DType::F32 };
        let version = options.version;
        let config = version.config(options.sliced_attention_size);
        let repo_name = options
            .repo
            .clone()
            .unwrap_or_else(|| version.repo().to_string());
        tracing::info!(repo = %repo_name, %version, ?device, ?dtype, "loading stable diffusion");
        let repo = api.model(repo_name);

        // --- Text encoders ---
        let tokenizer_file = api
            .model(version.tokenizer_repo().to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get tokenizer")?;
        let clip_file = repo
            .get(&SdVersion::clip_file(options.use_f16))
            .await
            .context("failed to get CLIP weights")?;
        let mut text_encoders = vec![TextEncoder::load(
            tokenizer_file,
            &config.clip,
            clip_file,
            &device,
        )?];
        if let Some(clip2) = &config.clip2 {
            let tokenizer2_file = api
                .model(SDXL_TOKENIZER2_REPO.to_string())
                .get("tokenizer.json")
                .await
                .context("failed to get second tokenizer")?;
            let clip2_file = repo
                .get(&SdVersion::clip2_file(options.use_f16))
                .await
                .context("failed to get second CLIP weights")?;
            text_encoders.push(TextEncoder::load(tokenizer2_file, clip2, clip2_file, &device)?);
        }
        tracing::info!(count = text_encoders.len(), "loaded text encoders");

        // --- VAE ---
        let vae_file = if version == SdVersion::Xl && options.use_f16 {
            api.model(SDXL_FP16_VAE_REPO.to_string())
                .get("diffusion_pytorch_model.safetensors")
                .await
        } else {
            repo.get(&SdVersion::vae_file(options.use_f16)).await
        }
        .context("failed to get VAE weights")?;
        let vae = config
            .build_vae(vae_file, &device, dtype)
            .context("failed to build VAE")?;
        tracing::info!("loaded VAE");

        // --- UNet ---
        let unet_file = repo
            .get(&SdVersion::unet_file(options.use_f16))
            .await
            .context("failed to get UNet weights")?;
        let unet = config
            .build_unet(
                unet_file,
                &device,
                LATENT_CHANNELS,
                options.use_flash_attn,
                dtype,
            )
            .context("failed to build UNet")?;
        tracing::info!("loaded UNet");

        Ok(StableDiffusionModel {
            version,
            sliced_attention_size: options.sliced_attention_size,
            device,
            dtype,
            text_encoders,
            unet,
            vae,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parses_from_cli_names() {
        assert_eq!("xl".parse::<SdVersion>().unwrap(), SdVersion::Xl);
        assert_eq!("v1-5".parse::<SdVersion>().unwrap(), SdVersion::V1_5);
        assert_eq!("v2-1".parse::<SdVersion>().unwrap(), SdVersion::V2_1);
        assert!("v3".parse::<SdVersion>().is_err());
        assert_eq!(SdVersion::Xl.to_string(), "xl");
    }

    #[test]
    fn weight_files_follow_diffusers_layout() {
        assert_eq!(
            SdVersion::unet_file(true),
            "unet/diffusion_pytorch_model.fp16.safetensors"
        );
        assert_eq!(SdVersion::clip2_file(false), "text_encoder_2/model.safetensors");
    }

    #[test]
    fn seeding_on_cpu_is_ignored() {
        assert!(seed_device(&Device::Cpu, 42).is_ok());
    }

    #[test]
    fn start_step_follows_strength() {
        assert_eq!(start_step(50, 1.0), 0);
        assert_eq!(start_step(50, 0.8), 10);
        assert_eq!(start_step(10, 0.5), 5);
        // tiny strength still runs one step
        assert_eq!(start_step(50, 0.001), 49);
        assert_eq!(start_step(1, 0.3), 0);
    }
}
