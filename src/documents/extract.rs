//! Text extraction from stored PDFs.
//!
//! Parsing is delegated to the poppler `pdftotext` tool; the trait lets tests
//! and alternative backends swap it out.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("file not found: {0}")]
    Missing(PathBuf),
}

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Returns the plain text of the document at `path`. May be empty.
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError>;
}

pub struct PdftotextExtractor {
    binary: String,
}

impl PdftotextExtractor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl TextExtractor for PdftotextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ExtractionError::Missing(path.to_path_buf()));
        }

        let output = Command::new(&self.binary)
            .arg("-layout")
            .arg("-enc")
            .arg("UTF-8")
            .arg(path)
            .arg("-")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExtractionError::Spawn {
                tool: self.binary.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExtractionError::Failed {
                tool: self.binary.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout)
            .replace('\u{000C}', "\n")
            .trim()
            .to_string();
        tracing::debug!(path = %path.display(), chars = text.len(), "extracted pdf text");
        Ok(text)
    }
}
