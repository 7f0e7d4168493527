use anyhow::{anyhow, Result};
use hf_hub::api::tokio::Api;

use crate::{DeviceMap, Loader, ModelLike, SdLoadOptions, SdVersion, StableDiffusionLoader};
use std::sync::Arc;

/// Enum of recognized model families
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelType {
    StableDiffusion,
}

impl ModelType {
    /// Detect model type from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if name_upper.contains("STABLE-DIFFUSION") || name_upper.contains("SDXL") {
            Some(ModelType::StableDiffusion)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ModelVariant {
    StableDiffusion(SdVersion),
}

impl ModelVariant {
    /// Detect model variant from model name
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if ModelType::from_name(model_name) != Some(ModelType::StableDiffusion) {
            return None;
        }
        let version = if name_upper.contains("XL") {
            SdVersion::Xl
        } else if name_upper.contains("2-1") || name_upper.contains("2.1") {
            SdVersion::V2_1
        } else if name_upper.contains("1-5") || name_upper.contains("1.5") {
            SdVersion::V1_5
        } else {
            SdVersion::Xl // Default to XL if no specific version is found
        };
        Some(ModelVariant::StableDiffusion(version))
    }
}

/// Load a model based on its name, automatically detecting the appropriate loader.
///
/// `options.version` is overwritten by the version detected from the name
/// unless `version_override` is set.
pub async fn load_model(
    model_name: &str,
    version_override: Option<SdVersion>,
    mut options: SdLoadOptions,
    api: Api,
    device_map: DeviceMap,
) -> Result<Arc<dyn ModelLike>> {
    let model_type = ModelType::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported model type: {}", model_name))?;

    match model_type {
        ModelType::StableDiffusion => {
            let ModelVariant::StableDiffusion(detected) = ModelVariant::from_name(model_name)
                .ok_or_else(|| anyhow!("Unsupported model variant: {}", model_name))?;
            options.version = version_override.unwrap_or(detected);
            options.repo = Some(model_name.to_string());
            tracing::info!(
                model = model_name,
                version = %options.version,
                "loading model"
            );
            let model = StableDiffusionLoader::load(options, api, device_map).await?;
            Ok(Arc::new(model))
        }
    }
}
