//! Outbound frame format for the question-answer socket.
//!
//! Every frame is a JSON envelope `{"kind": "...", "text": "..."}` so clients
//! branch on `kind` instead of matching on the text.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::documents::DocumentId;

pub const INVALID_QUESTION: &str = "Please provide a valid question.";
pub const INTERNAL_ERROR: &str = "Error: Internal server error.";
pub const SHUTTING_DOWN: &str = "Server is shutting down.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Answer,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub kind: MessageKind,
    pub text: String,
}

impl ServerMessage {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Answer,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Info,
            text: text.into(),
        }
    }

    /// Echoes the identifier exactly as the client sent it.
    pub fn document_not_found(raw_id: &str) -> Self {
        Self::error(format!(
            "Error: Document with ID {} not found in database.",
            raw_id
        ))
    }

    pub fn initialization_failed(reason: &impl Display) -> Self {
        Self::error(format!("Error: Failed to initialize chat service: {}", reason))
    }

    pub fn connected(document_id: &DocumentId) -> Self {
        Self::info(format!(
            "Connected to document {}. Ask a question about it.",
            document_id
        ))
    }

    pub fn invalid_question() -> Self {
        Self::error(INVALID_QUESTION)
    }

    pub fn answer_failed(reason: &impl Display) -> Self {
        Self::error(format!("Error processing your question: {}", reason))
    }

    pub fn timed_out(idle_secs: u64) -> Self {
        Self::info(format!(
            "Session timed out after {} seconds of inactivity.",
            idle_secs
        ))
    }

    pub fn internal_error() -> Self {
        Self::error(INTERNAL_ERROR)
    }

    pub fn shutting_down() -> Self {
        Self::info(SHUTTING_DOWN)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
