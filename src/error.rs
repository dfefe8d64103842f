use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load image {}: {source}", path.display())]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to decode image bytes: {0}")]
    ImageDecode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Recognizer error: {0}")]
    Recognizer(String),

    #[error("Debug output error: {0}")]
    DebugOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn recognizer(msg: impl Into<String>) -> Self {
        Self::Recognizer(msg.into())
    }

    pub fn debug_output(msg: impl Into<String>) -> Self {
        Self::DebugOutput(msg.into())
    }

    /// Whether this error must abort the page (decode failures only).
    pub fn is_fatal_input(&self) -> bool {
        matches!(self, Self::ImageLoad { .. } | Self::ImageDecode(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
