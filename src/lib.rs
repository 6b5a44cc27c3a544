use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error("Index build failed: {0}")]
    IndexBuild(String),

    #[error("Index load failed: {0}")]
    IndexLoad(String),

    #[error("{0} index is not available (never built or failed to load)")]
    IndexUnavailable(&'static str),

    #[error("Dimension mismatch: index expects {expected}, query vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod lexical;
pub mod merge;
pub mod retriever;
pub mod store;
pub mod vector;
