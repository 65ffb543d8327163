use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub active_connections: usize,
    pub timestamp: String,
}

impl HealthResponse {
    pub fn healthy(active_connections: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            active_connections,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.sessions.active_connections()))
}
