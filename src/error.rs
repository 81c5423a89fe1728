use thiserror::Error;

use llm::error::LLMError;

/// the one message a user ever sees when a turn fails.
pub const ERROR_MESSAGE: &str =
    "An error occurred while processing your request. Please try again.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("NVIDIA_API_KEY environment variable not found")]
    MissingApiKey,

    #[error("invalid value for {key}: '{value}'")]
    InvalidSetting { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config file error: {0}")]
    ConfigFile(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// anything raised while opening or consuming the completion stream.
    #[error("upstream stream failure: {0}")]
    Upstream(#[from] LLMError),
}
