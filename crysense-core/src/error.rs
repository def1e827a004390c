use std::time::Duration;

use thiserror::Error;

/// All errors produced by crysense-core.
#[derive(Debug, Error)]
pub enum CryError {
    #[error("audio decode error: {0}")]
    Decode(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("model load error: {0}")]
    ModelLoad(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("prediction timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CryError {
    /// `true` for every failure that happens while loading the model or
    /// encoder artifacts.
    pub fn is_model_load(&self) -> bool {
        matches!(self, CryError::ModelNotFound { .. } | CryError::ModelLoad(_))
    }

    /// `true` when the audio could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(self, CryError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, CryError>;
