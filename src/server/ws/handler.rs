use std::sync::Arc;

use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;

use super::session::run_qa_session;
use crate::state::AppState;

/// `GET /ws/question_answer/:document_id`. The identifier is resolved after the
/// upgrade so that an unknown document is reported over the socket.
pub async fn question_answer_ws(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(document_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        let sessions = state.sessions.clone();
        sessions.track(run_qa_session(socket, state, document_id))
    })
}
