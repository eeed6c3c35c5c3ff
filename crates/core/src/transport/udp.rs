use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{ToSocketAddrs, UdpSocket};

use crate::error::Result;
use crate::ingest::PacketSource;
use crate::media::RtpPacket;

const MAX_DATAGRAM: usize = 65_536;

/// UDP transport for outbound RTP packet delivery.
///
/// Binds a single ephemeral socket and sends RTP packets to viewer
/// addresses resolved by the [`Server`](crate::Server).
///
/// Address-only: it does not know about sessions or tracks. Cloning
/// shares the socket.
#[derive(Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind an ephemeral UDP socket for outbound RTP.
    pub async fn bind() -> Result<Self> {
        Self::bind_to("0.0.0.0:0").await
    }

    pub async fn bind_to(addr: impl ToSocketAddrs) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::debug!(local_addr = %socket.local_addr()?, "RTP send socket bound");
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Send raw bytes to a specific socket address.
    pub async fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr).await?)
    }
}

/// Inbound RTP over UDP.
///
/// Yields packets of one payload type. Datagrams that do not parse as RTP,
/// or that carry another payload type (RTCP, a second stream), are skipped.
/// After `idle_timeout` without a matching packet the source reports end
/// of stream.
pub struct UdpPacketSource {
    socket: UdpSocket,
    payload_type: u8,
    idle_timeout: Duration,
    buf: Vec<u8>,
    skipped: u64,
}

impl UdpPacketSource {
    pub async fn bind(addr: impl ToSocketAddrs, payload_type: u8, idle_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(local_addr = %socket.local_addr()?, payload_type, "listening for RTP");
        Ok(Self::from_socket(socket, payload_type, idle_timeout))
    }

    pub fn from_socket(socket: UdpSocket, payload_type: u8, idle_timeout: Duration) -> Self {
        Self {
            socket,
            payload_type,
            idle_timeout,
            buf: vec![0u8; MAX_DATAGRAM],
            skipped: 0,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Datagrams dropped so far (unparseable or foreign payload type).
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}

impl PacketSource for UdpPacketSource {
    async fn read_rtp(&mut self) -> Result<Option<RtpPacket>> {
        loop {
            let received = tokio::time::timeout(self.idle_timeout, self.socket.recv_from(&mut self.buf)).await;
            let (len, from) = match received {
                Err(_) => {
                    tracing::info!(timeout = ?self.idle_timeout, "RTP source idle, ending stream");
                    return Ok(None);
                }
                Ok(result) => result?,
            };

            match RtpPacket::unmarshal(&self.buf[..len]) {
                Ok(packet) if packet.header.payload_type == self.payload_type => {
                    tracing::trace!(
                        %from,
                        seq = packet.header.sequence_number,
                        ts = packet.header.timestamp,
                        len,
                        "RTP packet received"
                    );
                    return Ok(Some(packet));
                }
                Ok(packet) => {
                    self.skipped += 1;
                    tracing::trace!(%from, payload_type = packet.header.payload_type, "foreign payload type skipped");
                }
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(%from, len, error = %e, "datagram skipped");
                }
            }
        }
    }
}
