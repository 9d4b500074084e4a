use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookoutError {
    #[error("Invalid discovery property {input:?}: {message}")]
    Property { input: String, message: String },

    #[error("Invalid identifier encoding {input:?}: {message}")]
    Decode { input: String, message: String },

    #[error("Failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Merge error at {key:?}: {message}")]
    Merge { key: String, message: String },

    #[error("Discovery error: {message}")]
    Discovery { message: String },

    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        operation: String,
        duration: std::time::Duration,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

pub type LookoutResult<T> = std::result::Result<T, LookoutError>;
