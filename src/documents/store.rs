//! Document metadata store.
//!
//! One row per uploaded PDF. Rows are written once by the upload handler and
//! only read afterwards.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use super::id::DocumentId;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("document {0} already exists")]
    Duplicate(DocumentId),

    #[error("corrupt row for document {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentRecord {
    pub document_id: DocumentId,
    pub filename: String,
    pub content: String,
    pub upload_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub document_id: DocumentId,
    pub filename: String,
    pub content: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new record. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, document: NewDocument) -> Result<DocumentRecord, StoreError>;

    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

pub struct SqliteDocumentStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteDocumentStore {
    pub async fn with_path(db_path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self { pool, db_path };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pdf_id TEXT NOT NULL UNIQUE,
                filename TEXT NOT NULL,
                upload_date TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT ''
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_filename ON documents(filename)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentRecord, StoreError> {
        let raw_id: String = row.try_get("pdf_id")?;
        let document_id = DocumentId::parse(&raw_id).map_err(|e| StoreError::Corrupt {
            id: raw_id.clone(),
            reason: e.to_string(),
        })?;

        let raw_date: String = row.try_get("upload_date")?;
        let upload_time = DateTime::parse_from_rfc3339(&raw_date)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Corrupt {
                id: raw_id,
                reason: format!("bad upload_date: {}", e),
            })?;

        Ok(DocumentRecord {
            document_id,
            filename: row.try_get("filename")?,
            content: row.try_get("content")?,
            upload_time,
        })
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, document: NewDocument) -> Result<DocumentRecord, StoreError> {
        let upload_time = Utc::now();

        let result = sqlx::query(
            "INSERT INTO documents (pdf_id, filename, upload_date, content) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(document.document_id.as_str())
        .bind(&document.filename)
        .bind(upload_time.to_rfc3339())
        .bind(&document.content)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(DocumentRecord {
                document_id: document.document_id,
                filename: document.filename,
                content: document.content,
                upload_time,
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(StoreError::Duplicate(document.document_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn find_by_id(&self, id: &DocumentId) -> Result<Option<DocumentRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT pdf_id, filename, upload_date, content FROM documents WHERE pdf_id = ?1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
