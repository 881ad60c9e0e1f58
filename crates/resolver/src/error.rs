use thiserror::Error;

pub type Result<T> = std::result::Result<T, ResolveError>;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Unresolved placeholder '{{{{{placeholder}}}}}': no settings key '{key}' and no default")]
    UnresolvedPlaceholder { placeholder: String, key: String },

    #[error("Invalid launch template: {0}")]
    InvalidTemplate(String),
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings file not found: {0}")]
    NotFound(std::path::PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed settings document: {0}")]
    Malformed(String),
}
