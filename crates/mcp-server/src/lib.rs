//! Relay MCP server: the stdio surface over the selection engine.

pub mod config;
pub mod tools;

pub use config::{EmbeddingMode, LlmMode, ServiceConfig};
pub use tools::RelayService;
