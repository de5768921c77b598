use thiserror::Error;

/// Errors shared by the ingestor, the aggregator and the query service.
#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("message bus error: {0}")]
    Bus(#[from] lapin::Error),

    #[error("event stream error: {0}")]
    Stream(#[from] reqwest::Error),

    #[error("could not build option filter: {0}")]
    Filter(#[from] regex::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("poll already exists: {0}")]
    PollExists(String),

    // Stored data that could not be read back, or a store that refused the call
    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
