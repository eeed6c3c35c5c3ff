//! Network transport for RTP.
//!
//! Plain RTP over UDP in both directions:
//!
//! - **Ingest** ([`udp::UdpPacketSource`]): one bound socket per inbound
//!   stream, read through the [`PacketSource`](crate::ingest::PacketSource)
//!   trait.
//! - **Egress** ([`udp::UdpTransport`]): a single ephemeral socket shared
//!   by every viewer's forwarder.
//!
//! Send-only on egress: viewer RTCP is not read.

pub mod udp;

pub use udp::{UdpPacketSource, UdpTransport};
