use thiserror::Error;

/// Infrastructure level errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Logging subscriber could not be installed
    #[error("Logging error: {0}")]
    Logging(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
