use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoutingError>;

#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Vector store error: {0}")]
    VectorStore(#[from] relay_vector_store::VectorStoreError),

    #[error("Language model error: {0}")]
    Llm(#[from] relay_llm::LlmError),

    #[error("Registry error: {0}")]
    Registry(#[from] relay_registry::RegistryError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}
