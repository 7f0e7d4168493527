/// Failure kinds surfaced by a generation request.
///
/// Each variant is produced where the failure originates and carries a
/// human-readable description; nothing here is retried or recovered.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Malformed or missing request input, including undecodable image bytes.
    #[error("{0}")]
    Validation(String),

    /// The upstream translation service failed.
    #[error("translation failed: {0}")]
    Translation(String),

    /// The model invocation failed (out of memory, timeout, bad output, ...).
    #[error("image generation failed: {0}")]
    Generation(String),

    /// A numeric parameter is outside what the model tolerates.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn translation(msg: impl std::fmt::Display) -> Self {
        Self::Translation(msg.to_string())
    }

    /// Wraps a model failure, keeping the whole `anyhow` context chain.
    pub fn generation(err: anyhow::Error) -> Self {
        Self::Generation(format!("{err:#}"))
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
