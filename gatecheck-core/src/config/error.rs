use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },

    #[error("cannot write {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// An environment override that does not parse
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("invalid configuration: {0}")]
    ValidationFailed(String),
}
