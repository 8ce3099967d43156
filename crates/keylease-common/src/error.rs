//! Error types for configuration and startup

/// Errors raised while loading configuration or initializing logging
#[derive(thiserror::Error, Debug)]
pub enum KeyleaseError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("logging error: {0}")]
    Logging(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
