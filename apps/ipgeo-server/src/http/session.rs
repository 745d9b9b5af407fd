use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use ipgeo_mcp::{JsonRpcMessage, JsonRpcResponse, McpConnection, McpHandler, McpServerConfig};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;
use uuid::Uuid;

/// The session was closed (deleted, reaped or shut down) before the message reached it.
#[derive(Debug, Error)]
#[error("session {0} is closed")]
pub struct SessionClosed(pub String);

/// One Streamable HTTP client: an initialized MCP connection plus its bookkeeping.
pub struct Session {
    id: String,
    conn: Mutex<McpConnection>,
    last_activity: std::sync::Mutex<Instant>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    stream_open: AtomicBool,
}

impl Session {
    fn new(id: String, conn: McpConnection) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            conn: Mutex::new(conn),
            last_activity: std::sync::Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            closed_tx,
            stream_open: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Record activity now. Never moves the timestamp backwards.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut last = self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if now > *last {
            *last = now;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Deliver one message. Messages on the same session run one at a time, in lock order.
    pub async fn handle(&self, msg: JsonRpcMessage) -> Result<Option<JsonRpcResponse>, SessionClosed> {
        if self.is_closed() {
            return Err(SessionClosed(self.id.clone()));
        }
        let mut conn = self.conn.lock().await;
        // Closed while queued behind another request.
        if self.is_closed() {
            return Err(SessionClosed(self.id.clone()));
        }
        Ok(conn.handle_message(msg).await)
    }

    /// Mark the session closed and end its server-push stream. Closing twice is an error.
    pub fn close(&self) -> Result<(), SessionClosed> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SessionClosed(self.id.clone()));
        }
        self.closed_tx.send_replace(true);
        Ok(())
    }

    /// Resolves once the session is closed (or dropped).
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Claim the single standalone GET stream slot.
    pub fn open_stream(self: &Arc<Self>) -> Option<StreamGuard> {
        self.stream_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| StreamGuard {
                session: self.clone(),
            })
    }
}

/// Releases the GET stream slot when the stream is dropped.
pub struct StreamGuard {
    session: Arc<Session>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.session.stream_open.store(false, Ordering::Release);
    }
}

/// Live sessions by id. The only place sessions are inserted or removed.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<String, Arc<Session>>>>,
}

impl SessionStore {
    pub async fn register(&self, session: Arc<Session>) -> anyhow::Result<()> {
        let mut map = self.inner.lock().await;
        if map.contains_key(session.id()) {
            anyhow::bail!("duplicate session id {}", session.id());
        }
        map.insert(session.id().to_string(), session);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().await.get(id).cloned()
    }

    /// Idempotent: removing an absent id is a no-op.
    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().await.remove(id)
    }

    pub async fn all(&self) -> Vec<Arc<Session>> {
        self.inner.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// A connection that has not been published yet. Nothing outside the request that created
/// it can see it, so dropping it on failure leaves no trace in the store.
pub struct PendingSession {
    conn: McpConnection,
}

impl PendingSession {
    pub fn new(cfg: Arc<McpServerConfig>, handler: Arc<dyn McpHandler>) -> Self {
        Self {
            conn: McpConnection::new(cfg, handler),
        }
    }

    pub async fn handshake(&mut self, msg: JsonRpcMessage) -> Option<JsonRpcResponse> {
        self.conn.handle_message(msg).await
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.conn.protocol_version()
    }

    /// Assign an id and insert into `store`. Fails unless the handshake succeeded.
    pub async fn publish(self, store: &SessionStore) -> anyhow::Result<Arc<Session>> {
        if !self.conn.is_initialized() {
            anyhow::bail!("initialize handshake did not complete");
        }
        let session = Arc::new(Session::new(Uuid::new_v4().to_string(), self.conn));
        store.register(session.clone()).await?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{published, test_config, test_handler};
    use ipgeo_mcp::{JsonRpcId, JsonRpcRequest};
    use std::time::Duration;

    #[tokio::test]
    async fn failed_handshake_publishes_nothing() {
        let store = SessionStore::default();
        let mut pending = PendingSession::new(test_config(), test_handler());
        let bad = JsonRpcMessage::Request(JsonRpcRequest::new(
            JsonRpcId::Number(1),
            "initialize",
            Some(serde_json::json!({ "protocolVersion": 3 })),
        ));
        let resp = pending.handshake(bad).await.expect("response");
        assert!(resp.is_error());
        assert!(pending.publish(&store).await.is_err());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn store_register_get_remove() {
        let store = SessionStore::default();
        let s = published(&store).await;
        assert_eq!(store.len().await, 1);
        assert!(Arc::ptr_eq(&store.get(s.id()).await.expect("found"), &s));

        assert!(store.register(s.clone()).await.is_err());
        assert_eq!(store.len().await, 1);

        assert!(store.remove(s.id()).await.is_some());
        assert!(store.remove(s.id()).await.is_none());
        assert!(store.get(s.id()).await.is_none());
    }

    #[tokio::test]
    async fn close_is_once_and_rejects_later_messages() {
        let store = SessionStore::default();
        let s = published(&store).await;
        let mut signal = s.closed_signal();

        s.close().expect("first close");
        assert!(s.close().is_err());
        assert!(signal.wait_for(|c| *c).await.is_ok());

        let ping = JsonRpcMessage::Request(JsonRpcRequest::new(JsonRpcId::Number(9), "ping", None));
        assert!(s.handle(ping).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_is_monotonic() {
        let store = SessionStore::default();
        let s = published(&store).await;
        let before = s.last_activity();
        tokio::time::advance(Duration::from_secs(60)).await;
        s.touch();
        assert_eq!(s.last_activity() - before, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn single_stream_slot() {
        let store = SessionStore::default();
        let s = published(&store).await;
        let guard = s.open_stream().expect("first");
        assert!(s.open_stream().is_none());
        drop(guard);
        assert!(s.open_stream().is_some());
    }
}
