use thiserror::Error;

pub type Result<T> = std::result::Result<T, VectorError>;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection conflict: {0}")]
    Conflict(String),

    #[error(
        "Dimension mismatch for collection '{collection}': expected {expected}, got {actual}"
    )]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    #[error("Search requires a {0} vector")]
    MissingVector(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Vector service error (code {code}): {message}")]
    Service { code: i64, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod connection;
pub mod health;
pub mod ingest;
pub mod milvus;
pub mod schema;
pub mod search;

#[cfg(test)]
pub(crate) mod test_support;
