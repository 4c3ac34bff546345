use thiserror::Error;

use crate::auth::AuthError;
use crate::transcript::TranscriptError;

#[derive(Debug, Error)]
pub enum KiskaError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transcript error: {0}")]
    Transcript(#[from] TranscriptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KiskaError>;
