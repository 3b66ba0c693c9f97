use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiftError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Unknown scanner: {0}")]
    UnknownScanner(String),

    #[error("Unsupported resource type: {0}")]
    UnsupportedResourceType(String),

    #[error("Invalid size type for {resource_type}: expected {expected}")]
    InvalidSizeType {
        resource_type: String,
        expected: String,
    },

    #[error("No price found for {0}")]
    PriceNotFound(String),

    #[error("Max retries exceeded for {api}")]
    MaxRetriesExceeded { api: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Authentication failed for account {account} in {region}: {message}")]
    Authentication {
        account: String,
        region: String,
        message: String,
    },

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SiftError>;
