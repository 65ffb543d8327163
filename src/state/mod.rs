use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::core::config::{AppConfig, AppPaths, ConfigService};
use crate::documents::{
    DocumentResolver, DocumentStore, PdftotextExtractor, SqliteDocumentStore, TextExtractor,
};
use crate::rag::{AnswerEngineFactory, EngineCache, RagEngineFactory};
use crate::server::ws::SessionRegistry;

pub mod error;

use error::InitializationError;

/// Shared by every route and session task.
pub struct AppState {
    pub paths: Arc<AppPaths>,
    pub config: Arc<AppConfig>,
    pub documents: Arc<dyn DocumentStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub resolver: DocumentResolver,
    pub engines: Arc<EngineCache>,
    pub sessions: Arc<SessionRegistry>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Loads configuration, opens the metadata store, and wires the default
    /// retrieval-augmented answer engine.
    pub async fn initialize(paths: Arc<AppPaths>) -> Result<Arc<Self>, InitializationError> {
        let config = ConfigService::new(paths.clone()).load_config()?;

        let db_path = paths.resolve(&config.storage.database_file);
        let store = SqliteDocumentStore::with_path(db_path.clone())
            .await
            .map_err(|source| InitializationError::Store {
                path: db_path,
                source,
            })?;
        tracing::info!(path = %store.db_path().display(), "document store ready");
        let documents: Arc<dyn DocumentStore> = Arc::new(store);

        let extractor: Arc<dyn TextExtractor> = Arc::new(PdftotextExtractor::new(
            config.extraction.pdftotext_path.clone(),
        ));
        let factory: Arc<dyn AnswerEngineFactory> = Arc::new(RagEngineFactory::new(
            config.llm.clone(),
            config.rag.clone(),
            extractor.clone(),
        ));

        let state = Self::assemble(paths, config, documents, extractor, factory);
        tokio::fs::create_dir_all(state.resolver.upload_dir())
            .await
            .map_err(|source| InitializationError::UploadDir {
                path: state.resolver.upload_dir().to_path_buf(),
                source,
            })?;

        Ok(state)
    }

    /// Builds state from already-constructed collaborators.
    pub fn assemble(
        paths: Arc<AppPaths>,
        config: AppConfig,
        documents: Arc<dyn DocumentStore>,
        extractor: Arc<dyn TextExtractor>,
        factory: Arc<dyn AnswerEngineFactory>,
    ) -> Arc<Self> {
        let upload_dir = paths.resolve(&config.storage.upload_dir);
        let resolver = DocumentResolver::new(documents.clone(), upload_dir);

        Arc::new(Self {
            paths,
            config: Arc::new(config),
            documents,
            extractor,
            resolver,
            engines: Arc::new(EngineCache::new(factory)),
            sessions: Arc::new(SessionRegistry::new()),
            started_at: Utc::now(),
        })
    }
}
