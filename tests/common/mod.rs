#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use askify_backend::core::config::{AppConfig, AppPaths};
use askify_backend::documents::{
    DocumentId, DocumentStore, ExtractionError, NewDocument, SqliteDocumentStore, TextExtractor,
};
use askify_backend::rag::{AnswerEngine, AnswerEngineFactory, AnswerError, ConstructionError};
use askify_backend::server::router::router;
use askify_backend::server::ws::ServerMessage;
use askify_backend::state::AppState;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub const SLOW_ANSWER: Duration = Duration::from_millis(1500);

/// Reads the file back as text; empty files yield empty text.
pub struct FileTextExtractor;

#[async_trait]
impl TextExtractor for FileTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|_| ExtractionError::Missing(path.to_path_buf()))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Answers `echo: <question>`. Questions containing "fail" error out,
/// questions containing "panic" panic, and questions containing "slow" take
/// [`SLOW_ANSWER`] to answer.
pub struct ScriptedEngine {
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl AnswerEngine for ScriptedEngine {
    async fn answer(&self, question: &str) -> Result<String, AnswerError> {
        if question.contains("panic") {
            panic!("engine blew up");
        }
        if question.contains("fail") {
            return Err(AnswerError::Backend("model offline".to_string()));
        }
        if question.contains("slow") {
            tokio::time::sleep(SLOW_ANSWER).await;
        }
        Ok(format!("echo: {}", question))
    }

    async fn release(&self) -> Result<(), AnswerError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    pub builds: AtomicUsize,
    pub releases: Arc<AtomicUsize>,
    pub fail_with: Option<String>,
    pub panic_on_build: bool,
}

impl ScriptedFactory {
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic_on_build: true,
            ..Self::default()
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerEngineFactory for ScriptedFactory {
    async fn construct(&self, _artifact: &Path) -> Result<Arc<dyn AnswerEngine>, ConstructionError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_build {
            panic!("index build blew up");
        }
        if let Some(reason) = &self.fail_with {
            return Err(ConstructionError::ModelUnavailable(reason.clone()));
        }
        Ok(Arc::new(ScriptedEngine {
            releases: self.releases.clone(),
        }))
    }
}

pub struct TestServer {
    pub addr: std::net::SocketAddr,
    pub state: Arc<AppState>,
    pub factory: Arc<ScriptedFactory>,
    _dir: TempDir,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(AppConfig::default(), ScriptedFactory::default()).await
    }

    pub async fn start_with(config: AppConfig, factory: ScriptedFactory) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let paths = Arc::new(AppPaths::under(dir.path()));
        let store = SqliteDocumentStore::with_path(dir.path().join("pdf_data.db"))
            .await
            .unwrap();
        let factory = Arc::new(factory);

        let state = AppState::assemble(
            paths,
            config,
            Arc::new(store),
            Arc::new(FileTextExtractor),
            factory.clone(),
        );
        tokio::fs::create_dir_all(state.resolver.upload_dir())
            .await
            .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            factory,
            _dir: dir,
        }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stores a metadata record and writes its artifact.
    pub async fn seed_document(&self, filename: &str) -> DocumentId {
        let id = DocumentId::generate();
        self.state
            .documents
            .insert(NewDocument {
                document_id: id.clone(),
                filename: filename.to_string(),
                content: "seeded text".to_string(),
            })
            .await
            .unwrap();
        let artifact = id.artifact_path(self.state.resolver.upload_dir());
        tokio::fs::write(&artifact, b"%PDF-1.4 seeded").await.unwrap();
        id
    }

    pub async fn connect(&self, document_id: &str) -> Client {
        let url = format!("ws://{}/ws/question_answer/{}", self.addr, document_id);
        let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        client
    }

    pub async fn active_connections(&self) -> usize {
        let body: serde_json::Value = reqwest::get(self.http_url("/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["active_connections"].as_u64().unwrap() as usize
    }

    /// Polls `/health` until it reports `expected` sessions.
    pub async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..100 {
            if self.active_connections().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("active_connections never reached {}", expected);
    }

    /// Engine release runs after unregistration, so poll for it too.
    pub async fn wait_for_releases(&self, expected: usize) {
        for _ in 0..100 {
            if self.factory.releases() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("engine releases never reached {}", expected);
    }
}

/// Next JSON envelope from the server, skipping control frames.
pub async fn next_message(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(READ_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

/// Asserts that the server closes the socket without sending more text.
pub async fn expect_closed(client: &mut Client) {
    loop {
        let frame = tokio::time::timeout(READ_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {:?}", other),
        }
    }
}
