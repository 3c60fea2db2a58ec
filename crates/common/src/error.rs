//! Error types for spec loading and configuration

use thiserror::Error;

/// Result type alias using the AutoQA common error
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Invalid test spec '{name}': {reason}")]
    InvalidSpec { name: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
