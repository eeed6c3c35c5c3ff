//! Viewer session registry.
//!
//! One session per attached viewer. A session tracks:
//!
//! - A unique session ID (16-digit hex string).
//! - The UDP address packets are forwarded to.
//! - Its state: `Connected` while the forwarder runs, `Closed` after the
//!   viewer is removed or a send fails.
//! - How many packets have been delivered.
//!
//! ```text
//! add_viewer     -> Connected
//! send failure   -> Closed
//! remove_viewer  -> Closed (removed)
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Packets are being forwarded.
    Connected,
    /// Delivery ended; the session no longer receives packets.
    Closed,
}

/// A single viewer.
#[derive(Debug)]
pub struct ViewerSession {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    /// Where RTP is sent.
    pub addr: SocketAddr,
    state: RwLock<SessionState>,
    packets_sent: AtomicU64,
}

impl ViewerSession {
    pub fn new(addr: SocketAddr) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        Self {
            id: format!("{:016X}", id),
            addr,
            state: RwLock::new(SessionState::Connected),
            packets_sent: AtomicU64::new(0),
        }
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn record_sent(&self) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }
}

/// Thread-safe registry of viewer sessions.
#[derive(Clone, Default)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<ViewerSession>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a session for a viewer address.
    pub fn create_session(&self, addr: SocketAddr) -> Arc<ViewerSession> {
        let session = Arc::new(ViewerSession::new(addr));
        let total = {
            let mut sessions = self.sessions.write();
            sessions.insert(session.id.clone(), session.clone());
            sessions.len()
        };
        tracing::debug!(session_id = %session.id, %addr, total_sessions = total, "session created");
        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<ViewerSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Remove a session and mark it closed.
    pub fn remove_session(&self, id: &str) -> Option<Arc<ViewerSession>> {
        let removed = self.sessions.write().remove(id);
        if let Some(session) = &removed {
            session.set_state(SessionState::Closed);
            let total = self.sessions.read().len();
            tracing::debug!(session_id = %id, total_sessions = total, "session removed");
        }
        removed
    }

    /// Sessions still forwarding packets.
    pub fn connected_sessions(&self) -> Vec<Arc<ViewerSession>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_connected())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn ids_are_unique_hex() {
        let a = ViewerSession::new(addr(6000));
        let b = ViewerSession::new(addr(6000));
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 16);
        assert!(a.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn create_get_remove() {
        let manager = SessionManager::new();
        let session = manager.create_session(addr(6000));
        assert_eq!(manager.len(), 1);
        assert!(manager.get_session(&session.id).is_some());

        let removed = manager.remove_session(&session.id).unwrap();
        assert_eq!(removed.state(), SessionState::Closed);
        assert!(manager.is_empty());
        assert!(manager.remove_session(&session.id).is_none());
    }

    #[test]
    fn closed_sessions_not_connected() {
        let manager = SessionManager::new();
        let a = manager.create_session(addr(6000));
        let _b = manager.create_session(addr(6002));
        a.set_state(SessionState::Closed);
        assert_eq!(manager.connected_sessions().len(), 1);
    }

    #[test]
    fn counts_packets() {
        let session = ViewerSession::new(addr(6000));
        session.record_sent();
        session.record_sent();
        assert_eq!(session.packets_sent(), 2);
    }
}
