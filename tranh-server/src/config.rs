use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tranh_core::{SdLoadOptions, SdVersion, TranslatorConfig};

// Define command line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Tranh translated-prompt image generation server")]
pub struct Args {
    /// Use CPU instead of GPU
    #[arg(long, env = "TRANH_CPU")]
    pub cpu: bool,

    /// Hugging Face model repository to load
    #[arg(long, env = "TRANH_MODEL", default_value = "stabilityai/stable-diffusion-xl-base-1.0")]
    pub model: String,

    /// Stable Diffusion version (v1-5, v2-1, xl); detected from the model name when omitted
    #[arg(long, env = "TRANH_SD_VERSION")]
    pub sd_version: Option<SdVersion>,

    /// Load f16 weights
    #[arg(long, env = "TRANH_F16")]
    pub f16: bool,

    /// Use flash attention in the UNet (requires the `flash-attn` feature)
    #[arg(long, env = "TRANH_FLASH_ATTN")]
    pub flash_attn: bool,

    /// Attention slice size, trading speed for memory
    #[arg(long, env = "TRANH_SLICED_ATTENTION_SIZE")]
    pub sliced_attention_size: Option<usize>,

    /// Host address to bind the server to
    #[arg(long, env = "TRANH_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "TRANH_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Language prompts are written in
    #[arg(long, env = "TRANH_SOURCE_LANG", default_value = "vi")]
    pub source_lang: String,

    /// Language the model expects prompts in
    #[arg(long, env = "TRANH_TARGET_LANG", default_value = "en")]
    pub target_lang: String,

    /// Translation service endpoint (MyMemory API compatible)
    #[arg(long, env = "TRANH_TRANSLATE_URL", default_value = tranh_core::translate::MYMEMORY_ENDPOINT)]
    pub translate_url: String,

    /// Contact email sent to the translation service
    #[arg(long, env = "TRANH_TRANSLATE_EMAIL")]
    pub translate_email: Option<String>,

    /// Translation request timeout in seconds
    #[arg(long, env = "TRANH_TRANSLATE_TIMEOUT_SECS", default_value_t = 30)]
    pub translate_timeout_secs: u64,

    /// Directory generated images are written to and served from
    #[arg(long, env = "TRANH_OUTPUT_DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// File name of the generated image
    #[arg(long, env = "TRANH_OUTPUT_NAME", default_value = "output_image.png")]
    pub output_name: String,

    /// Give every generated image its own file instead of overwriting one
    #[arg(long, env = "TRANH_UNIQUE_OUTPUTS")]
    pub unique_outputs: bool,

    /// Upper bound on a single generation in seconds
    #[arg(long, env = "TRANH_GENERATION_TIMEOUT_SECS", default_value_t = 600)]
    pub generation_timeout_secs: u64,

    /// Largest accepted request body in bytes
    #[arg(long, env = "TRANH_MAX_UPLOAD_BYTES", default_value_t = 24 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// Browser origins allowed to call the API
    #[arg(
        long,
        env = "TRANH_CORS_ORIGINS",
        value_delimiter = ',',
        default_value = "http://localhost:3000"
    )]
    pub cors_origins: Vec<String>,
}

impl Args {
    pub fn translator_config(&self) -> TranslatorConfig {
        TranslatorConfig {
            endpoint: self.translate_url.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            email: self.translate_email.clone(),
            timeout: Duration::from_secs(self.translate_timeout_secs),
        }
    }

    pub fn load_options(&self) -> SdLoadOptions {
        SdLoadOptions {
            use_f16: self.f16,
            use_flash_attn: self.flash_attn,
            sliced_attention_size: self.sliced_attention_size,
            ..Default::default()
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_web_client_setup() {
        let args = Args::parse_from(["tranh-server"]);
        assert_eq!(args.bind_address(), "127.0.0.1:8000");
        assert_eq!(args.output_name, "output_image.png");
        assert!(!args.unique_outputs);
        assert_eq!(args.translator_config().source_lang, "vi");
        assert_eq!(args.translator_config().target_lang, "en");
        assert_eq!(args.generation_timeout(), Duration::from_secs(600));
        assert_eq!(args.cors_origins, vec!["http://localhost:3000".to_string()]);
        // two 10 MB uploads plus multipart framing
        assert!(args.max_upload_bytes > 2 * 10 * 1024 * 1024);
    }

    #[test]
    fn parses_version_and_origins() {
        let args = Args::parse_from([
            "tranh-server",
            "--sd-version",
            "v1-5",
            "--cors-origins",
            "http://a.test,http://b.test",
            "--unique-outputs",
        ]);
        assert_eq!(args.sd_version, Some(SdVersion::V1_5));
        assert_eq!(args.cors_origins.len(), 2);
        assert!(args.unique_outputs);
    }
}
