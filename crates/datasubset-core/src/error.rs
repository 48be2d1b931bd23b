use thiserror::Error;

use crate::graph::CycleError;

/// Core error type shared across datasubset crates.
#[derive(Debug, Error)]
pub enum Error {
    /// Database error or adapter failure.
    #[error("database error: {0}")]
    Db(String),
    /// Configuration failed to load or validate.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Dependency graph contains a cycle where an acyclic order was required.
    #[error(transparent)]
    Cycle(#[from] CycleError),
    /// Source data contradicts the table model (for example a duplicated primary key).
    #[error("data integrity error: {0}")]
    DataIntegrity(String),
    /// A requested feature is not supported.
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience alias for results returned by datasubset crates.
pub type Result<T> = std::result::Result<T, Error>;
