use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry file not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed registry document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unsupported registry schema version {found} (expected {expected})")]
    SchemaVersion { found: u32, expected: u32 },

    #[error("Duplicate descriptor id '{0}' in registry")]
    DuplicateId(String),
}
