use image::RgbImage;

use crate::{Error, Result};

pub const DEFAULT_WIDTH: usize = 1024;
pub const DEFAULT_HEIGHT: usize = 1024;
pub const DEFAULT_STEPS: usize = 50;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;
pub const DEFAULT_IMG2IMG_STRENGTH: f64 = 0.8;
pub const DEFAULT_INPAINT_STRENGTH: f64 = 1.0;

pub const MAX_DIMENSION: usize = 2048;
pub const MAX_STEPS: usize = 1000;

/// Which kind of generation a request asks for, together with the images
/// that kind needs.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationMode {
    TextToImage,
    ImageToImage { image: RgbImage },
    Inpainting { image: RgbImage, mask: RgbImage },
}

impl GenerationMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TextToImage => "text-to-image",
            Self::ImageToImage { .. } => "image-to-image",
            Self::Inpainting { .. } => "inpainting",
        }
    }

    pub fn conditioning_image(&self) -> Option<&RgbImage> {
        match self {
            Self::TextToImage => None,
            Self::ImageToImage { image } | Self::Inpainting { image, .. } => Some(image),
        }
    }

    pub fn mask(&self) -> Option<&RgbImage> {
        match self {
            Self::Inpainting { mask, .. } => Some(mask),
            _ => None,
        }
    }
}

impl std::fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A normalized, translated generation request handed to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub mode: GenerationMode,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
    pub strength: Option<f64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, mode: GenerationMode) -> Self {
        Self {
            prompt: prompt.into(),
            mode,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            seed: None,
            strength: None,
        }
    }

    /// Strength to apply for image-guided modes, falling back to the
    /// per-mode default. Meaningless for text-to-image.
    pub fn effective_strength(&self) -> f64 {
        match (&self.mode, self.strength) {
            (_, Some(strength)) => strength,
            (GenerationMode::Inpainting { .. }, None) => DEFAULT_INPAINT_STRENGTH,
            _ => DEFAULT_IMG2IMG_STRENGTH,
        }
    }

    /// Checks the parameters against what the model can run with.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::invalid_parameter("prompt must not be empty"));
        }
        for (name, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 8 != 0 {
                return Err(Error::invalid_parameter(format!(
                    "{name} must be a positive multiple of 8, got {value}"
                )));
            }
            if value > MAX_DIMENSION {
                return Err(Error::invalid_parameter(format!(
                    "{name} must be at most {MAX_DIMENSION}, got {value}"
                )));
            }
        }
        if self.steps == 0 || self.steps > MAX_STEPS {
            return Err(Error::invalid_parameter(format!(
                "num_inference_steps must be between 1 and {MAX_STEPS}, got {}",
                self.steps
            )));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale < 0.0 {
            return Err(Error::invalid_parameter(format!(
                "guidance_scale must be a non-negative number, got {}",
                self.guidance_scale
            )));
        }
        if let Some(strength) = self.strength {
            if !strength.is_finite() || strength <= 0.0 || strength > 1.0 {
                return Err(Error::invalid_parameter(format!(
                    "strength must be in (0, 1], got {strength}"
                )));
            }
        }
        Ok(())
    }
}
