use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::{RelayError, Result};
use crate::session::{SessionManager, SessionState, ViewerSession};
use crate::track::SharedTrack;
use crate::transport::UdpTransport;

/// Egress orchestrator.
///
/// Owns the shared track, the outbound UDP socket, and the viewer session
/// registry. Each viewer gets a forwarder task that reads from its own
/// [`TrackReader`](crate::track::TrackReader) and sends every packet to
/// the viewer's address.
pub struct Server {
    track: SharedTrack,
    udp: UdpTransport,
    session_manager: SessionManager,
    forwarders: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Server {
    /// Create a server with a freshly bound ephemeral send socket.
    pub async fn bind(track: SharedTrack) -> Result<Self> {
        Ok(Self::with_transport(track, UdpTransport::bind().await?))
    }

    pub fn with_transport(track: SharedTrack, udp: UdpTransport) -> Self {
        Self {
            track,
            udp,
            session_manager: SessionManager::new(),
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a viewer and start forwarding to `addr`.
    ///
    /// The first viewer starts playout. A send failure closes this viewer
    /// only.
    pub fn add_viewer(&self, addr: SocketAddr) -> Result<Arc<ViewerSession>> {
        let mut reader = self.track.attach()?;
        let session = self.session_manager.create_session(addr);
        let udp = self.udp.clone();
        let viewer = session.clone();

        let handle = tokio::spawn(async move {
            while let Some(packet) = reader.recv().await {
                if let Err(e) = udp.send_to(&packet.marshal(), viewer.addr).await {
                    tracing::warn!(session_id = %viewer.id, addr = %viewer.addr, error = %e, "viewer send failed");
                    break;
                }
                viewer.record_sent();
            }
            viewer.set_state(SessionState::Closed);
            tracing::debug!(session_id = %viewer.id, packets = viewer.packets_sent(), "forwarder finished");
        });
        self.forwarders.lock().insert(session.id.clone(), handle);

        tracing::info!(session_id = %session.id, %addr, "viewer added");
        Ok(session)
    }

    /// Stop forwarding to a viewer and forget it.
    pub fn remove_viewer(&self, id: &str) -> Result<()> {
        let session = self
            .session_manager
            .remove_session(id)
            .ok_or_else(|| RelayError::ViewerNotFound(id.to_string()))?;
        if let Some(handle) = self.forwarders.lock().remove(id) {
            handle.abort();
        }
        tracing::info!(session_id = %id, packets = session.packets_sent(), "viewer removed");
        Ok(())
    }

    /// Viewers still receiving packets.
    pub fn viewers(&self) -> Vec<Viewer> {
        self.session_manager
            .connected_sessions()
            .iter()
            .map(|session| Viewer {
                session_id: session.id.clone(),
                addr: session.addr,
                packets_sent: session.packets_sent(),
            })
            .collect()
    }

    pub fn track(&self) -> &SharedTrack {
        &self.track
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Stop playout and let every forwarder drain.
    pub async fn shutdown(&self) {
        self.track.stop();
        self.track.join().await;
        let handles: Vec<_> = self.forwarders.lock().drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("server stopped");
    }
}

/// A viewer currently receiving the track.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub addr: SocketAddr,
    pub packets_sent: u64,
}
