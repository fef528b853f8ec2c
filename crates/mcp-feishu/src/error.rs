use thiserror::Error;

/// Error type for the mcp-feishu binary, aggregating the library crates'
/// errors.
#[derive(Debug, Error)]
pub enum RootError {
    #[error("{0}")]
    Notify(#[from] feishu_notify::NotifyError),

    #[error("mcp error: {0}")]
    Mcp(#[from] feishu_mcp::McpError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for RootError {
    fn from(e: serde_json::Error) -> Self {
        RootError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for RootError {
    fn from(e: toml::de::Error) -> Self {
        RootError::Config(format!("TOML parse error: {}", e))
    }
}

pub type RootResult<T> = Result<T, RootError>;
