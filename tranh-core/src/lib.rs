pub mod device_map;
pub mod error;
pub mod loader;
mod loader_factory;
pub mod pipeline;
pub mod request;
mod sd;
pub mod translate;
mod util;

pub use device_map::*;
pub use error::{Error, Result};
use image::RgbImage;
pub use loader::*;
pub use loader_factory::*;
pub use pipeline::Pipeline;
pub use request::{GenerationMode, GenerationRequest};
pub use sd::{SdLoadOptions, SdVersion, StableDiffusionLoader, StableDiffusionModel};
pub use translate::{MyMemoryTranslator, Translator, TranslatorConfig};
pub use util::decode_image;
pub(crate) use util::*;

/// A loaded image model. Calls are blocking and may take minutes.
pub trait ModelLike: Send + Sync {
    fn run(&self, request: &GenerationRequest) -> anyhow::Result<RgbImage>;
}
