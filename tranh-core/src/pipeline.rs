use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbImage;

use crate::{Error, GenerationRequest, ModelLike, Result};

pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Shared handle to the loaded model.
///
/// Validates requests, runs the blocking model call on tokio's blocking
/// pool under a timeout, and checks the result before handing it back.
#[derive(Clone)]
pub struct Pipeline {
    model: Arc<dyn ModelLike>,
    timeout: Duration,
}

impl Pipeline {
    pub fn new(model: Arc<dyn ModelLike>) -> Self {
        Self {
            model,
            timeout: DEFAULT_GENERATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Generates exactly one image of the requested size.
    ///
    /// On timeout the caller stops waiting but the model call keeps running
    /// to completion on its blocking thread.
    pub async fn generate(&self, request: GenerationRequest) -> Result<RgbImage> {
        request.validate()?;

        let (width, height) = (request.width, request.height);
        let mode = request.mode.name();
        let model = Arc::clone(&self.model);
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || model.run(&request));

        let image = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => {
                return Err(Error::Generation(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Ok(Err(join_err)) => {
                return Err(Error::Generation(format!("model task aborted: {join_err}")))
            }
            Ok(Ok(result)) => result.map_err(Error::generation)?,
        };

        if image.dimensions() != (width as u32, height as u32) {
            return Err(Error::Generation(format!(
                "model returned a {}x{} image, expected {width}x{height}",
                image.width(),
                image.height()
            )));
        }

        tracing::info!(
            mode,
            width,
            height,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generated image"
        );
        Ok(image)
    }
}
