//! Live question-answer sessions indexed by client id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;

use super::protocol::ServerMessage;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Sending side of one socket's outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    connection_id: u64,
    tx: mpsc::Sender<ServerMessage>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Queues a frame without waiting. Returns `false` if the queue is full or
    /// the socket writer has gone away.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.tx.try_send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Also owns the shutdown signal every session listens on and tracks the
/// session tasks so shutdown can wait for them to flush.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ClientHandle>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ClientHandle>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ClientHandle>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or replaces the handle for `client_id`; returns the replaced one.
    pub fn register(&self, client_id: &str, handle: ClientHandle) -> Option<ClientHandle> {
        let replaced = self.write().insert(client_id.to_string(), handle);
        if replaced.is_some() {
            tracing::debug!(client_id, "replaced existing registration");
        }
        replaced
    }

    /// Registers `handle` and returns a guard that removes the entry when
    /// dropped, unless a newer connection has taken the id over.
    pub fn register_scoped(&self, client_id: &str, handle: ClientHandle) -> Registration<'_> {
        let connection_id = handle.connection_id();
        self.register(client_id, handle);
        Registration {
            registry: self,
            client_id: client_id.to_string(),
            connection_id,
        }
    }

    /// Removes `client_id` if present. Calling it again is a no-op.
    pub fn unregister(&self, client_id: &str) -> bool {
        self.write().remove(client_id).is_some()
    }

    /// Removes `client_id` only while it still maps to `connection_id`, so a
    /// closing connection cannot evict a newer registration of the same id.
    pub fn unregister_if_current(&self, client_id: &str, connection_id: u64) -> bool {
        let mut sessions = self.write();
        match sessions.get(client_id) {
            Some(handle) if handle.connection_id == connection_id => {
                sessions.remove(client_id);
                true
            }
            _ => false,
        }
    }

    /// Best-effort delivery; unknown ids and full queues drop the message.
    pub fn send(&self, client_id: &str, message: ServerMessage) -> bool {
        let sessions = self.read();
        let Some(handle) = sessions.get(client_id) else {
            tracing::debug!(client_id, "dropping message for unknown client");
            return false;
        };
        let delivered = handle.send(message);
        if !delivered {
            tracing::debug!(client_id, "outbound queue full or closed; message dropped");
        }
        delivered
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.read().contains_key(client_id)
    }

    pub fn active_connections(&self) -> usize {
        self.read().len()
    }

    /// Runs `session` as a tracked session task.
    pub fn track<F>(&self, session: F) -> TrackedFuture<F>
    where
        F: Future<Output = ()>,
    {
        self.tasks.track_future(session)
    }

    /// Cancelled once [`SessionRegistry::shutdown`] runs.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Sends `message` to every session, empties the registry and tells the
    /// session loops to close.
    pub fn shutdown(&self, message: ServerMessage) -> usize {
        let drained: Vec<(String, ClientHandle)> = {
            let mut sessions = self.write();
            self.shutdown.cancel();
            self.tasks.close();
            sessions.drain().collect()
        };
        for (client_id, handle) in &drained {
            if !handle.send(message.clone()) {
                tracing::debug!(client_id = client_id.as_str(), "could not notify client of shutdown");
            }
        }
        drained.len()
    }

    /// Waits until every tracked session task has finished, up to `limit`.
    /// Only meaningful after [`SessionRegistry::shutdown`].
    pub async fn wait_for_sessions(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.tasks.wait()).await.is_ok()
    }
}

#[must_use = "the registry entry is removed as soon as the guard is dropped"]
pub struct Registration<'a> {
    registry: &'a SessionRegistry,
    client_id: String,
    connection_id: u64,
}

impl Registration<'_> {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry
            .unregister_if_current(&self.client_id, self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn handle(buffer: usize) -> (ClientHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(buffer);
        (ClientHandle::new(tx), rx)
    }

    #[test]
    fn register_and_count() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = handle(4);
        let (b, _rx_b) = handle(4);

        registry.register("a", a);
        registry.register("b", b);
        assert_eq!(registry.active_connections(), 2);
        assert!(registry.contains("a"));
    }

    #[test]
    fn unregister_twice_is_a_no_op() {
        let registry = SessionRegistry::new();
        let (a, _rx) = handle(4);
        registry.register("a", a);

        assert!(registry.unregister("a"));
        assert!(!registry.unregister("a"));
        assert_eq!(registry.active_connections(), 0);
    }

    #[test]
    fn send_to_unknown_client_is_dropped() {
        let registry = SessionRegistry::new();
        assert!(!registry.send("ghost", ServerMessage::info("hello")));
    }

    #[tokio::test]
    async fn send_reaches_the_registered_handle() {
        let registry = SessionRegistry::new();
        let (a, mut rx) = handle(4);
        registry.register("a", a);

        assert!(registry.send("a", ServerMessage::answer("yes")));
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::answer("yes"));
    }

    #[tokio::test]
    async fn overwrite_routes_to_newest_handle_only() {
        let registry = SessionRegistry::new();
        let (old, mut old_rx) = handle(4);
        let (new, mut new_rx) = handle(4);
        let old_id = old.connection_id();

        registry.register("a", old);
        let replaced = registry.register("a", new).unwrap();
        assert_eq!(replaced.connection_id(), old_id);
        drop(replaced);

        registry.send("a", ServerMessage::info("to new"));
        assert_eq!(new_rx.recv().await.unwrap().text, "to new");
        assert!(old_rx.recv().await.is_none());
    }

    #[test]
    fn stale_connection_cannot_unregister_newer_one() {
        let registry = SessionRegistry::new();
        let (old, _old_rx) = handle(4);
        let (new, _new_rx) = handle(4);
        let old_id = old.connection_id();
        let new_id = new.connection_id();

        registry.register("a", old);
        registry.register("a", new);

        assert!(!registry.unregister_if_current("a", old_id));
        assert!(registry.contains("a"));
        assert!(registry.unregister_if_current("a", new_id));
        assert!(!registry.unregister_if_current("a", new_id));
    }

    #[test]
    fn scoped_registration_cleans_up_on_drop() {
        let registry = SessionRegistry::new();
        let (a, _rx) = handle(4);

        {
            let guard = registry.register_scoped("a", a);
            assert_eq!(guard.client_id(), "a");
            assert!(registry.contains("a"));
        }
        assert!(!registry.contains("a"));
    }

    #[test]
    fn scoped_registration_leaves_newer_owner_alone() {
        let registry = SessionRegistry::new();
        let (old, _old_rx) = handle(4);
        let (new, _new_rx) = handle(4);

        let guard = registry.register_scoped("a", old);
        registry.register("a", new);
        drop(guard);
        assert!(registry.contains("a"));
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let registry = SessionRegistry::new();
        let (a, _rx) = handle(1);
        registry.register("a", a);

        assert!(registry.send("a", ServerMessage::info("1")));
        assert!(!registry.send("a", ServerMessage::info("2")));
    }

    #[tokio::test]
    async fn concurrent_register_and_unregister() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();

        for i in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::channel(1);
                let h = ClientHandle::new(tx);
                let id = format!("client-{}", i);
                registry.register(&id, h.clone());
                tokio::task::yield_now().await;
                if i % 2 == 0 {
                    assert!(registry.unregister_if_current(&id, h.connection_id()));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.active_connections(), 32);
    }

    #[tokio::test]
    async fn shutdown_cancels_token_and_waits_for_tracked_sessions() {
        let registry = Arc::new(SessionRegistry::new());
        let token = registry.shutdown_token();
        let (finished_tx, finished_rx) = tokio::sync::oneshot::channel();

        let session = registry.track(async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = finished_tx.send(());
        });
        tokio::spawn(session);

        assert!(!registry.is_shutting_down());
        registry.shutdown(ServerMessage::shutting_down());
        assert!(registry.is_shutting_down());

        assert!(registry.wait_for_sessions(Duration::from_secs(5)).await);
        assert!(finished_rx.await.is_ok());
    }

    #[tokio::test]
    async fn wait_for_sessions_gives_up_after_limit() {
        let registry = SessionRegistry::new();
        tokio::spawn(registry.track(std::future::pending::<()>()));
        registry.shutdown(ServerMessage::shutting_down());

        assert!(!registry.wait_for_sessions(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn shutdown_notifies_and_drains() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = handle(4);
        let (b, mut rx_b) = handle(4);
        registry.register("a", a);
        registry.register("b", b);

        assert_eq!(registry.shutdown(ServerMessage::shutting_down()), 2);
        assert_eq!(registry.active_connections(), 0);
        assert_eq!(rx_a.recv().await.unwrap(), ServerMessage::shutting_down());
        assert_eq!(rx_b.recv().await.unwrap(), ServerMessage::shutting_down());
    }
}
