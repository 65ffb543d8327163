use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use askify_backend::core::config::AppPaths;
use askify_backend::core::logging;
use askify_backend::server;
use askify_backend::server::ws::ServerMessage;
use askify_backend::state::AppState;

const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let state = AppState::initialize(paths).await?;

    let bind_addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    println!("ASKIFY_PORT={}", addr.port());
    tracing::info!(
        "Listening on {} (idle timeout {}s)",
        addr,
        state.config.session.idle_timeout_secs
    );

    let app: Router = server::router::router(state.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    let notified = state.sessions.shutdown(ServerMessage::shutting_down());
    tracing::info!(sessions = notified, "Closing open sessions");
    if !state.sessions.wait_for_sessions(SESSION_DRAIN_TIMEOUT).await {
        tracing::warn!(
            "Sessions still open after {:?}; exiting anyway",
            SESSION_DRAIN_TIMEOUT
        );
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
