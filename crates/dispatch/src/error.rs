use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to launch tool server '{server_id}': {reason}")]
    LaunchFailure { server_id: String, reason: String },

    #[error("Invocation of '{tool_name}' on '{server_id}' failed: {reason}")]
    InvocationFailure {
        server_id: String,
        tool_name: String,
        reason: String,
    },

    #[error("Timed out talking to tool server '{server_id}'")]
    Timeout { server_id: String },
}
