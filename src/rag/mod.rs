//! Answer engines.
//!
//! - `engine`: the `AnswerEngine` / `AnswerEngineFactory` seam used by sessions
//! - `cache`: one shared engine per document, leased by sessions
//! - `chat`, `chunker`, `index`, `llm`: the default retrieval-augmented engine

pub mod cache;
pub mod chat;
pub mod chunker;
pub mod engine;
pub mod index;
pub mod llm;

pub use cache::{EngineCache, EngineLease};
pub use chat::{DocumentChat, RagEngineFactory};
pub use engine::{AnswerEngine, AnswerEngineFactory, AnswerError, ConstructionError};
