//! Error types for poolgate

use thiserror::Error;

/// Result type for poolgate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for poolgate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid database URI: {0}")]
    UriError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),
}

/// Convert TOML deserialization errors to poolgate errors
impl From<toml::de::Error> for Error {
    fn from(error: toml::de::Error) -> Self {
        Error::ConfigError(error.to_string())
    }
}

/// Convert URL parse errors to poolgate errors
impl From<url::ParseError> for Error {
    fn from(error: url::ParseError) -> Self {
        Error::UriError(error.to_string())
    }
}
