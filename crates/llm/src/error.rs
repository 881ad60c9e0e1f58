use thiserror::Error;

pub type Result<T> = std::result::Result<T, LlmError>;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("Language-model service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}
