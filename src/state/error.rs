use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to load configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("Failed to open vector index: {0}")]
    Index(#[source] anyhow::Error),

    #[error("Failed to open correction memory: {0}")]
    Corrections(#[source] anyhow::Error),

    #[error("Failed to open feedback log: {0}")]
    Feedback(#[source] anyhow::Error),
}
