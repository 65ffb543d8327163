//! Answer engine seam.
//!
//! The session controller only sees these two traits; how an engine finds its
//! answer (retrieval, prompting, a remote model) is up to the implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Why an engine could not be built for a document.
#[derive(Debug, Clone, Error)]
pub enum ConstructionError {
    #[error("LLM not found: {0}")]
    ModelUnavailable(String),

    #[error("Embedding model not initialized: {0}")]
    EmbeddingUnavailable(String),

    #[error("Failed to load PDF document: {0}")]
    Extraction(String),

    #[error("No content extracted from PDF")]
    EmptyDocument,

    #[error("{0}")]
    Backend(String),
}

/// Failure while answering a single question.
#[derive(Debug, Clone, Error)]
pub enum AnswerError {
    #[error("{0}")]
    Backend(String),

    #[error("engine has been released")]
    Released,
}

#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn answer(&self, question: &str) -> Result<String, AnswerError>;

    /// Frees whatever the engine holds. Called once, after its last user is done.
    async fn release(&self) -> Result<(), AnswerError> {
        Ok(())
    }
}

#[async_trait]
pub trait AnswerEngineFactory: Send + Sync {
    /// Builds an engine over the artifact at `artifact`. Expensive.
    async fn construct(&self, artifact: &Path) -> Result<Arc<dyn AnswerEngine>, ConstructionError>;
}
