//! Maps a client-supplied document id to its stored metadata and the
//! artifact file under the upload directory.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::id::DocumentId;
use super::store::{DocumentRecord, DocumentStore};

/// A document whose metadata row and artifact file both exist.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub id: DocumentId,
    pub record: DocumentRecord,
    pub artifact_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    InvalidId,
    RecordMissing,
    ArtifactMissing(PathBuf),
    StoreUnavailable(String),
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::InvalidId => f.write_str("identifier is not a valid document id"),
            NotFoundReason::RecordMissing => f.write_str("no metadata record"),
            NotFoundReason::ArtifactMissing(path) => {
                write!(f, "artifact missing at {}", path.display())
            }
            NotFoundReason::StoreUnavailable(err) => write!(f, "metadata lookup failed: {}", err),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Ready(ResolvedDocument),
    NotFound(NotFoundReason),
}

#[derive(Clone)]
pub struct DocumentResolver {
    store: Arc<dyn DocumentStore>,
    upload_dir: PathBuf,
}

impl DocumentResolver {
    pub fn new(store: Arc<dyn DocumentStore>, upload_dir: PathBuf) -> Self {
        Self { store, upload_dir }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Checks the metadata record first, then the artifact on disk. Never writes.
    pub async fn resolve(&self, raw_id: &str) -> Resolution {
        let id = match DocumentId::parse(raw_id) {
            Ok(id) => id,
            Err(_) => return Resolution::NotFound(NotFoundReason::InvalidId),
        };

        let record = match self.store.find_by_id(&id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Resolution::NotFound(NotFoundReason::RecordMissing),
            Err(err) => {
                return Resolution::NotFound(NotFoundReason::StoreUnavailable(err.to_string()))
            }
        };

        let artifact_path = id.artifact_path(&self.upload_dir);
        if !tokio::fs::try_exists(&artifact_path).await.unwrap_or(false) {
            return Resolution::NotFound(NotFoundReason::ArtifactMissing(artifact_path));
        }

        Resolution::Ready(ResolvedDocument {
            id,
            record,
            artifact_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::store::{NewDocument, SqliteDocumentStore};

    struct Fixture {
        _tmp: tempfile::TempDir,
        resolver: DocumentResolver,
        store: Arc<SqliteDocumentStore>,
        upload_dir: PathBuf,
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let upload_dir = tmp.path().join("upload");
        std::fs::create_dir_all(&upload_dir).unwrap();
        let store = Arc::new(
            SqliteDocumentStore::with_path(tmp.path().join("docs.db"))
                .await
                .unwrap(),
        );
        let resolver = DocumentResolver::new(store.clone(), upload_dir.clone());
        Fixture {
            _tmp: tmp,
            resolver,
            store,
            upload_dir,
        }
    }

    async fn insert(store: &SqliteDocumentStore) -> DocumentId {
        let id = DocumentId::generate();
        store
            .insert(NewDocument {
                document_id: id.clone(),
                filename: "paper.pdf".to_string(),
                content: "text".to_string(),
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn ready_when_record_and_artifact_exist() {
        let fx = fixture().await;
        let id = insert(&fx.store).await;
        std::fs::write(id.artifact_path(&fx.upload_dir), b"%PDF").unwrap();

        match fx.resolver.resolve(id.as_str()).await {
            Resolution::Ready(doc) => {
                assert_eq!(doc.id, id);
                assert_eq!(doc.record.filename, "paper.pdf");
                assert_eq!(doc.artifact_path, id.artifact_path(&fx.upload_dir));
            }
            other => panic!("expected Ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn record_missing() {
        let fx = fixture().await;
        let id = DocumentId::generate();
        std::fs::write(id.artifact_path(&fx.upload_dir), b"%PDF").unwrap();

        assert!(matches!(
            fx.resolver.resolve(id.as_str()).await,
            Resolution::NotFound(NotFoundReason::RecordMissing)
        ));
    }

    #[tokio::test]
    async fn artifact_missing() {
        let fx = fixture().await;
        let id = insert(&fx.store).await;

        assert!(matches!(
            fx.resolver.resolve(id.as_str()).await,
            Resolution::NotFound(NotFoundReason::ArtifactMissing(_))
        ));
    }

    #[tokio::test]
    async fn invalid_ids_never_touch_the_store() {
        let fx = fixture().await;
        for raw in ["does-not-exist", "../secrets", "abc123"] {
            assert!(matches!(
                fx.resolver.resolve(raw).await,
                Resolution::NotFound(NotFoundReason::InvalidId)
            ));
        }
    }

    #[tokio::test]
    async fn upload_dir_is_the_configured_directory() {
        let fx = fixture().await;
        let id = insert(&fx.store).await;

        assert_eq!(fx.resolver.upload_dir(), fx.upload_dir.as_path());
        assert_eq!(
            id.artifact_path(fx.resolver.upload_dir()),
            fx.upload_dir.join(format!("{}.pdf", id))
        );
    }
}
