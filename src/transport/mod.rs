//! Typed channels multiplexed over one reliable and one unreliable socket.
//!
//! Both transports share the same idea: a small integer channel id selects
//! which typed stream a payload belongs to. The reliable side
//! ([`tcp::TcpConnection`]) frames messages over an ordered byte stream and
//! is used for session control traffic; the unreliable side
//! ([`udp::UdpConnection`]) maps each datagram to a channel keyed by id and
//! sender host and carries the per-frame gamepad snapshots, where losing or
//! reordering a packet only means a slightly stale frame.
//!
//! Transport problems never tear down unrelated peers: errors are logged
//! and surfaced to the owner, undecodable payloads are dropped.

pub mod tcp;
pub mod udp;

pub use tcp::{TcpConnection, TcpReadChannel, TcpWriteChannel};
pub use udp::{UdpConnection, UdpReadChannel, UdpWriteChannel};

/// Errors surfaced by the socket transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed")]
    Closed,
}
