use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::{AppError, AppResult};

/// Where generated images land.
///
/// By default every request overwrites the same file, so concurrent requests
/// race on which result ends up there. Each write goes to a temporary file
/// that is renamed into place, so readers never see a partial PNG.
#[derive(Debug, Clone)]
pub struct OutputStore {
    dir: PathBuf,
    file_name: String,
    unique: bool,
}

impl OutputStore {
    pub fn new(dir: impl Into<PathBuf>, file_name: impl Into<String>, unique: bool) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name.into(),
            unique,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the file the next image goes to, relative to [`Self::dir`].
    fn next_name(&self) -> String {
        if !self.unique {
            return self.file_name.clone();
        }
        let path = Path::new(&self.file_name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output_image");
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("png");
        format!("{stem}-{}.{ext}", uuid::Uuid::new_v4().simple())
    }

    /// Whether `name` is a file this store writes. Anything else in the
    /// output directory is never served.
    pub fn is_own_file(&self, name: &str) -> bool {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return false;
        }
        if name == self.file_name {
            return true;
        }
        let path = Path::new(&self.file_name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("output_image");
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("png");
        self.unique
            && name.starts_with(&format!("{stem}-"))
            && name.ends_with(&format!(".{ext}"))
    }

    pub async fn read(&self, name: &str) -> AppResult<Vec<u8>> {
        if !self.is_own_file(name) {
            return Err(AppError::NotFound(name.to_string()));
        }
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(name.to_string()))
            }
            Err(e) => Err(AppError::Internal(format!("failed to read output image: {e}"))),
        }
    }

    /// Encodes `image` as PNG and writes it, returning the path relative to
    /// the output directory.
    pub async fn persist(&self, image: RgbImage) -> AppResult<String> {
        let bytes = tokio::task::spawn_blocking(move || {
            let mut bytes = Vec::new();
            image.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
            Ok::<_, image::ImageError>(bytes)
        })
        .await
        .map_err(|e| AppError::Internal(format!("PNG encoder task failed: {e}")))?
        .map_err(|e| AppError::Internal(format!("failed to encode PNG: {e}")))?;

        let name = self.next_name();
        let target = self.dir.join(&name);
        let staging = self
            .dir
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Internal(format!("failed to create output dir: {e}")))?;
        tokio::fs::write(&staging, &bytes)
            .await
            .map_err(|e| AppError::Internal(format!("failed to write output image: {e}")))?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(AppError::Internal(format!(
                "failed to move output image into place: {e}"
            )));
        }

        tracing::debug!(path = %target.display(), bytes = bytes.len(), "persisted image");
        Ok(name)
    }
}
