//! Error types and handling
//!
//! Common error types used across the crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The byte stream is not a concatenation of images. Fatal for the stream.
    #[error("Stream error at offset {offset}: {message}")]
    Stream { offset: usize, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Assembler error: {0}")]
    Assembler(String),

    #[error("Transcoder error: {0}")]
    Transcoder(String),

    #[error("Session error: {0}")]
    Session(String),
}

impl AppError {
    /// Short machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Stream { .. } => "STREAM_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Detector(_) => "DETECTOR_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Assembler(_) => "ASSEMBLER_ERROR",
            AppError::Transcoder(_) => "TRANSCODER_ERROR",
            AppError::Session(_) => "SESSION_ERROR",
        }
    }
}

/// Serializable error report, printed by the CLI in JSON mode
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
