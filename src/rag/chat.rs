//! Default answer engine: retrieval over the document's chunks, then a single
//! chat completion grounded on the retrieved context.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::chunker::split_text;
use super::engine::{AnswerEngine, AnswerEngineFactory, AnswerError, ConstructionError};
use super::index::VectorIndex;
use super::llm::{ChatMessage, OpenAiCompatClient};
use crate::core::config::{LlmConfig, RagConfig};
use crate::documents::TextExtractor;

const PROMPT_TEMPLATE: &str = "Answer the question based only on the provided context. \
If the answer cannot be found in the context, say \"I cannot answer this based on the provided context.\"

Context:
{context}

Question: {question}

Answer:";

pub fn render_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

pub struct DocumentChat {
    client: OpenAiCompatClient,
    llm: LlmConfig,
    top_k: usize,
    index: RwLock<Option<VectorIndex>>,
}

#[async_trait]
impl AnswerEngine for DocumentChat {
    async fn answer(&self, question: &str) -> Result<String, AnswerError> {
        let query = self
            .client
            .embed(&self.llm.embedding_model, &[question.to_string()])
            .await
            .map_err(|e| AnswerError::Backend(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| AnswerError::Backend("empty embedding response".to_string()))?;

        let context = {
            let guard = self.index.read().await;
            let index = guard.as_ref().ok_or(AnswerError::Released)?;
            index
                .search(&query, self.top_k)
                .into_iter()
                .map(|hit| hit.chunk.text)
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        let prompt = render_prompt(&context, question);
        let answer = self
            .client
            .chat(
                &self.llm.chat_model,
                &[ChatMessage::user(prompt)],
                self.llm.temperature,
                self.llm.max_tokens,
            )
            .await
            .map_err(|e| AnswerError::Backend(e.to_string()))?;

        Ok(answer.trim().to_string())
    }

    async fn release(&self) -> Result<(), AnswerError> {
        self.index.write().await.take();
        Ok(())
    }
}

/// Builds a [`DocumentChat`] per document: extract, chunk, embed, index.
pub struct RagEngineFactory {
    llm: LlmConfig,
    rag: RagConfig,
    extractor: Arc<dyn TextExtractor>,
}

impl RagEngineFactory {
    pub fn new(llm: LlmConfig, rag: RagConfig, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            llm,
            rag,
            extractor,
        }
    }

    async fn ensure_chat_model(&self, client: &OpenAiCompatClient) -> Result<(), ConstructionError> {
        if self.llm.chat_model.trim().is_empty() {
            return Err(ConstructionError::ModelUnavailable(
                "no chat model configured (llm.chat_model)".to_string(),
            ));
        }

        let models = client
            .list_models()
            .await
            .map_err(|e| ConstructionError::ModelUnavailable(e.to_string()))?;

        // Some servers list tagged names ("llama3:latest") for an untagged request.
        let wanted = self.llm.chat_model.as_str();
        let listed = models
            .iter()
            .any(|id| id == wanted || id.split(':').next() == Some(wanted));
        if !listed {
            return Err(ConstructionError::ModelUnavailable(format!(
                "model '{}' is not served by {}",
                wanted, self.llm.base_url
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AnswerEngineFactory for RagEngineFactory {
    async fn construct(&self, artifact: &Path) -> Result<Arc<dyn AnswerEngine>, ConstructionError> {
        let client = OpenAiCompatClient::new(&self.llm)
            .map_err(|e| ConstructionError::Backend(e.to_string()))?;

        self.ensure_chat_model(&client).await?;

        let text = self
            .extractor
            .extract(artifact)
            .await
            .map_err(|e| ConstructionError::Extraction(e.to_string()))?;

        let chunks = split_text(&text, self.rag.chunk_size, self.rag.chunk_overlap);
        if chunks.is_empty() {
            return Err(ConstructionError::EmptyDocument);
        }

        if self.llm.embedding_model.trim().is_empty() {
            return Err(ConstructionError::EmbeddingUnavailable(
                "no embedding model configured (llm.embedding_model)".to_string(),
            ));
        }

        let mut index = VectorIndex::new();
        for batch in chunks.chunks(self.rag.embed_batch_size.max(1)) {
            let inputs: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = client
                .embed(&self.llm.embedding_model, &inputs)
                .await
                .map_err(|e| ConstructionError::EmbeddingUnavailable(e.to_string()))?;
            for (chunk, vector) in batch.iter().cloned().zip(vectors) {
                index.insert(chunk, vector);
            }
        }

        tracing::info!(
            artifact = %artifact.display(),
            chunks = index.len(),
            "document indexed"
        );

        Ok(Arc::new(DocumentChat {
            client,
            llm: self.llm.clone(),
            top_k: self.rag.top_k,
            index: RwLock::new(Some(index)),
        }))
    }
}
