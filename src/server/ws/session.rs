//! One question-answer session: resolve the document, acquire its engine,
//! then answer questions until the peer leaves, goes idle, a question fails,
//! or the server shuts down.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::protocol::ServerMessage;
use super::registry::{ClientHandle, SessionRegistry};
use crate::documents::{DocumentId, Resolution};
use crate::rag::AnswerEngine;
use crate::state::AppState;

/// Upper bound on how long a closing session waits for queued frames to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

static CLIENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// `{document_id}_{unix_micros}_{seq}`; the sequence keeps ids distinct for
/// connections opened within the same microsecond.
pub fn client_id_for(document_id: &DocumentId) -> String {
    format!(
        "{}_{}_{}",
        document_id,
        Utc::now().timestamp_micros(),
        CLIENT_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionExit {
    PeerClosed,
    TimedOut,
    AnswerFailed,
    ShuttingDown,
    Panicked,
}

pub async fn run_qa_session(socket: WebSocket, state: Arc<AppState>, raw_document_id: String) {
    let (sender, receiver) = socket.split();
    let (handle, outbound) = spawn_outbound(sender, state.config.session.send_buffer);

    let document = match state.resolver.resolve(&raw_document_id).await {
        Resolution::Ready(document) => document,
        Resolution::NotFound(reason) => {
            warn!(document_id = %raw_document_id, %reason, "document not found");
            handle.send(ServerMessage::document_not_found(&raw_document_id));
            finish(handle, outbound).await;
            return;
        }
    };

    let lease = match state
        .engines
        .acquire(&document.id, &document.artifact_path)
        .await
    {
        Ok(lease) => lease,
        Err(err) => {
            error!(document_id = %document.id, "Failed to initialize answer engine: {}", err);
            handle.send(ServerMessage::initialization_failed(&err));
            finish(handle, outbound).await;
            return;
        }
    };

    if state.sessions.is_shutting_down() {
        handle.send(ServerMessage::shutting_down());
        state.engines.release(lease).await;
        finish(handle, outbound).await;
        return;
    }

    let client_id = client_id_for(&document.id);
    let registration = state.sessions.register_scoped(&client_id, handle.clone());
    info!(
        client_id = client_id.as_str(),
        document_id = %document.id,
        filename = document.record.filename.as_str(),
        active = state.sessions.active_connections(),
        "session started"
    );
    handle.send(ServerMessage::connected(&document.id));

    let idle_timeout = state.config.session.idle_timeout();
    let exit = AssertUnwindSafe(receive_loop(
        receiver,
        &state.sessions,
        &client_id,
        &handle,
        lease.engine().as_ref(),
        idle_timeout,
        state.sessions.shutdown_token(),
    ))
    .catch_unwind()
    .await
    .unwrap_or_else(|_| {
        error!(client_id = client_id.as_str(), "session task panicked");
        SessionExit::Panicked
    });

    match exit {
        SessionExit::Panicked => {
            handle.send(ServerMessage::internal_error());
        }
        // Registered after the shutdown broadcast drained the registry.
        SessionExit::ShuttingDown if state.sessions.contains(&client_id) => {
            handle.send(ServerMessage::shutting_down());
        }
        _ => {}
    }

    drop(registration);
    state.engines.release(lease).await;
    info!(
        client_id = client_id.as_str(),
        ?exit,
        active = state.sessions.active_connections(),
        "session closed"
    );

    finish(handle, outbound).await;
}

async fn receive_loop(
    mut receiver: SplitStream<WebSocket>,
    sessions: &SessionRegistry,
    client_id: &str,
    handle: &ClientHandle,
    engine: &dyn AnswerEngine,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> SessionExit {
    let mut deadline = Instant::now() + idle_timeout;

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(client_id, "closing session for shutdown");
                return SessionExit::ShuttingDown;
            }
            read = tokio::time::timeout_at(deadline, receiver.next()) => read,
        };

        let frame = match read {
            Err(_) => {
                info!(client_id, "session idle for {:?}", idle_timeout);
                handle.send(ServerMessage::timed_out(idle_timeout.as_secs()));
                return SessionExit::TimedOut;
            }
            Ok(None) => return SessionExit::PeerClosed,
            Ok(Some(Err(err))) => {
                debug!(client_id, "socket read failed: {}", err);
                return SessionExit::PeerClosed;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let question = match frame {
            Message::Text(text) => text,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    debug!(client_id, "ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Close(_) => return SessionExit::PeerClosed,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        deadline = Instant::now() + idle_timeout;

        if question.trim().is_empty() {
            sessions.send(client_id, ServerMessage::invalid_question());
            continue;
        }

        match engine.answer(&question).await {
            Ok(answer) => {
                sessions.send(client_id, ServerMessage::answer(answer));
                // Time spent answering is not client idleness.
                deadline = Instant::now() + idle_timeout;
            }
            Err(err) => {
                warn!(client_id, "answer failed: {}", err);
                handle.send(ServerMessage::answer_failed(&err));
                return SessionExit::AnswerFailed;
            }
        }
    }
}

fn spawn_outbound(
    sender: SplitSink<WebSocket, Message>,
    buffer: usize,
) -> (ClientHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let handle = ClientHandle::new(tx);
    let task = tokio::spawn(forward_outbound(sender, rx));
    (handle, task)
}

/// Writes queued frames in order, then closes the socket once every sender is gone.
async fn forward_outbound(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                error!("failed to encode outbound frame: {}", err);
                continue;
            }
        };
        if let Err(err) = sender.send(Message::Text(payload)).await {
            debug!("peer went away while sending: {}", err);
            return;
        }
    }

    let _ = sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        })))
        .await;
    let _ = sender.close().await;
}

async fn finish(handle: ClientHandle, outbound: JoinHandle<()>) {
    drop(handle);
    let abort = outbound.abort_handle();
    if tokio::time::timeout(FLUSH_TIMEOUT, outbound).await.is_err() {
        debug!("outbound flush timed out; dropping socket");
        abort.abort();
    }
}
