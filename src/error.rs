//! Error types for voice-overlay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Token exchange error: {0}")]
    TokenExchange(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
