use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::protocol::{write_frame, FrameError};
use crate::style::Style;

/// Write half of a session's channel.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One connected peer on the server.
///
/// A session starts active and unnamed. It becomes inactive on logout, kick,
/// shutdown or the first failed write, and never becomes active again.
pub struct Session {
    id: u64,
    peer: Option<SocketAddr>,
    name: RwLock<String>,
    active: AtomicBool,
    /// Set when a write to the peer failed, as opposed to a deliberate close.
    failed: AtomicBool,
    style: Style,
    /// `None` once the channel has been closed.
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    /// Fires when the session is closed so its reader stops waiting on the
    /// socket.
    pub cancelled: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("name", &*self.name.read())
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(writer: BoxedWriter, peer: Option<SocketAddr>, style: Style) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            name: RwLock::new(String::new()),
            active: AtomicBool::new(true),
            failed: AtomicBool::new(false),
            style,
            writer: tokio::sync::Mutex::new(Some(writer)),
            cancelled: CancellationToken::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Peer address for log lines, or `-` when unknown.
    pub fn peer(&self) -> String {
        self.peer.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
    }

    /// Current display name; empty until the first `##name` frame.
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Set the display name, returning the previous one.
    pub fn set_name(&self, name: &str) -> String {
        std::mem::replace(&mut *self.name.write(), name.to_string())
    }

    pub fn is_named(&self) -> bool {
        !self.name.read().is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Whether the session ended because a send to the peer failed.
    pub fn send_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Send one line to the peer, optionally prefixed with a timestamp.
    ///
    /// No-op once the session is inactive. A write failure marks the session
    /// inactive and cancels its reader; an oversized line is dropped without
    /// affecting the session.
    pub async fn send(&self, text: &str, timestamped: bool) {
        if !self.is_active() {
            return;
        }
        let mut guard = self.writer.lock().await;
        // Re-check under the lock: close() may have won the race.
        if !self.is_active() {
            return;
        }
        let Some(writer) = guard.as_mut() else {
            return;
        };

        let line = format!("{}{}", self.style.stamp(timestamped), text);
        match write_frame(writer, &line).await {
            Ok(()) => {}
            Err(FrameError::PayloadTooLarge { len }) => {
                tracing::warn!(peer = %self.peer(), name = %self.name(), len, "dropping oversized message");
            }
            Err(e) => {
                tracing::debug!(peer = %self.peer(), name = %self.name(), ?e, "send failed, marking session inactive");
                self.failed.store(true, Ordering::Release);
                self.active.store(false, Ordering::Release);
                self.cancelled.cancel();
                guard.take();
            }
        }
    }

    /// Mark the session inactive, wake its reader and shut down the channel.
    ///
    /// Idempotent. Any `send` that starts after this returns immediately.
    pub async fn close(&self) {
        self.finish(None).await;
    }

    /// Send a final timestamped line and close, as one step: when several
    /// tasks race to close the same session only the first one's line is sent.
    pub async fn close_with_notice(&self, text: &str) {
        self.finish(Some(text)).await;
    }

    async fn finish(&self, farewell: Option<&str>) {
        let mut guard = self.writer.lock().await;
        let was_active = self.active.swap(false, Ordering::AcqRel);
        self.cancelled.cancel();
        let Some(mut writer) = guard.take() else {
            return;
        };

        if let (true, Some(text)) = (was_active, farewell) {
            let line = format!("{}{}", self.style.stamp(true), text);
            if let Err(e) = write_frame(&mut writer, &line).await {
                tracing::debug!(peer = %self.peer(), ?e, "failed to send closing notice");
            }
        }
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(peer = %self.peer(), ?e, "error shutting down session channel");
        }
    }
}

/// The set of sessions known to the server.
///
/// Membership may briefly include sessions that are already inactive; they
/// are skipped by every send and removed by [`SessionRegistry::prune`].
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<Vec<Arc<Session>>>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<Session>) {
        self.inner.write().push(session);
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Snapshot of all currently active sessions. The lock is released
    /// before the caller awaits on any of them.
    pub fn active(&self) -> Vec<Arc<Session>> {
        self.inner
            .read()
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect()
    }

    /// Remove sessions that are no longer active. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|s| s.is_active());
        before - inner.len()
    }

    /// Send `text` to every active session except `sender`.
    pub async fn broadcast_except(&self, sender: &Session, text: &str, timestamped: bool) {
        for session in self.active() {
            if session.id() != sender.id() {
                session.send(text, timestamped).await;
            }
        }
    }

    /// Send `text` to every active session.
    pub async fn broadcast(&self, text: &str, timestamped: bool) {
        for session in self.active() {
            session.send(text, timestamped).await;
        }
    }

    /// Active sessions currently named `name`. More than one session may
    /// share a name.
    pub fn named(&self, name: &str) -> Vec<Arc<Session>> {
        self.active()
            .into_iter()
            .filter(|s| s.name() == name)
            .collect()
    }

    /// Send `text` to every active session named `name`, returning the
    /// number of sessions it was delivered to.
    pub async fn send_to_named(&self, name: &str, text: &str, timestamped: bool) -> usize {
        let targets = self.named(name);
        for session in &targets {
            session.send(text, timestamped).await;
        }
        targets.len()
    }

    /// Names of all active sessions in registration order. A session that
    /// has not announced a name yet contributes an empty string.
    pub fn list_active_names(&self) -> Vec<String> {
        self.active().iter().map(|s| s.name()).collect()
    }
}
