//! `POST /upload_pdf` and `GET /pdf/:pdf_id`.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::errors::ApiError;
use crate::documents::{
    DocumentId, DocumentRecord, ExtractionError, NewDocument, StoreError,
};
use crate::state::AppState;

pub const INVALID_FILE_TYPE: &str = "Invalid file type. Only PDF files are allowed.";
pub const UPLOAD_SUCCESS: &str = "PDF successfully uploaded and processed";
pub const PDF_NOT_FOUND: &str = "PDF not found";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfUploadResponse {
    pub filename: String,
    pub message: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfStatusResponse {
    pub filename: String,
    pub status: String,
    pub id: String,
}

#[derive(Debug, Error)]
enum IngestError {
    #[error("{0}")]
    Extraction(#[from] ExtractionError),
    #[error("No text could be extracted from the PDF")]
    EmptyText,
    #[error("{0}")]
    Store(#[from] StoreError),
}

pub fn is_pdf_filename(filename: &str) -> bool {
    FsPath::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

pub async fn upload_pdf(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<PdfUploadResponse>, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if !is_pdf_filename(&filename) {
            return Err(ApiError::BadRequest(INVALID_FILE_TYPE.to_string()));
        }
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, bytes));
        break;
    }

    let Some((filename, bytes)) = upload else {
        return Err(ApiError::BadRequest("Missing 'file' field".to_string()));
    };

    let document_id = DocumentId::generate();
    let upload_dir = state.resolver.upload_dir();
    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| ApiError::Internal(format!("Error saving PDF: {}", e)))?;

    let artifact = document_id.artifact_path(upload_dir);
    tokio::fs::write(&artifact, &bytes)
        .await
        .map_err(|e| ApiError::Internal(format!("Error saving PDF: {}", e)))?;

    match ingest(&state, &document_id, &filename, &artifact).await {
        Ok(record) => {
            tracing::info!(
                document_id = %record.document_id,
                filename = record.filename.as_str(),
                bytes = bytes.len(),
                "PDF uploaded"
            );
            Ok(Json(PdfUploadResponse {
                filename: record.filename,
                message: UPLOAD_SUCCESS.to_string(),
                id: record.document_id.to_string(),
            }))
        }
        Err(err) => {
            tracing::warn!(document_id = %document_id, "PDF ingestion failed: {}", err);
            if let Err(remove_err) = tokio::fs::remove_file(&artifact).await {
                tracing::warn!(
                    path = %artifact.display(),
                    "Failed to remove rejected upload: {}",
                    remove_err
                );
            }
            Err(ApiError::Internal(format!("Error processing PDF: {}", err)))
        }
    }
}

async fn ingest(
    state: &AppState,
    document_id: &DocumentId,
    filename: &str,
    artifact: &FsPath,
) -> Result<DocumentRecord, IngestError> {
    let content = state.extractor.extract(artifact).await?;
    if content.trim().is_empty() {
        return Err(IngestError::EmptyText);
    }

    let record = state
        .documents
        .insert(NewDocument {
            document_id: document_id.clone(),
            filename: filename.to_string(),
            content,
        })
        .await?;
    Ok(record)
}

pub async fn get_pdf_status(
    State(state): State<Arc<AppState>>,
    Path(pdf_id): Path<String>,
) -> Result<Json<PdfStatusResponse>, ApiError> {
    let Ok(document_id) = DocumentId::parse(&pdf_id) else {
        return Err(ApiError::NotFound(PDF_NOT_FOUND.to_string()));
    };

    let record = state
        .documents
        .find_by_id(&document_id)
        .await
        .map_err(ApiError::internal)?
        .ok_or_else(|| ApiError::NotFound(PDF_NOT_FOUND.to_string()))?;

    Ok(Json(PdfStatusResponse {
        filename: record.filename,
        status: "processed".to_string(),
        id: record.document_id.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_extension_check_is_case_insensitive() {
        assert!(is_pdf_filename("report.pdf"));
        assert!(is_pdf_filename("REPORT.PDF"));
        assert!(is_pdf_filename("archive.tar.pdf"));
        assert!(!is_pdf_filename("notes.txt"));
        assert!(!is_pdf_filename("pdf"));
        assert!(!is_pdf_filename(""));
    }
}
