//! Unreliable per-frame transport.
//!
//! One bound `UdpSocket` carries every unreliable channel. A datagram is
//! `channel_id:u16 || payload` (little-endian id); incoming datagrams are
//! routed by `(channel id, sender host)`, so each remote peer gets its own
//! typed stream off the shared socket. Delivery is at-most-once and
//! unordered by nature, which the gamepad protocol tolerates because every
//! payload is a full snapshot.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::TransportError;
use crate::wire::Wire;

const MAX_DATAGRAM_LEN: usize = 64 * 1024;

type Routes = Arc<Mutex<HashMap<(u16, IpAddr), mpsc::UnboundedSender<Vec<u8>>>>>;

pub struct UdpConnection {
    local_port: u16,
    routes: Routes,
    datagrams: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    closed: CancellationToken,
}

impl UdpConnection {
    /// Binds the shared socket; port 0 picks an ephemeral one.
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", port)).await?);
        let local_port = socket.local_addr()?.port();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let (datagrams_tx, datagrams_rx) = mpsc::unbounded_channel();

        tokio::spawn(read_loop(socket.clone(), routes.clone(), closed.clone()));
        tokio::spawn(write_loop(socket, datagrams_rx, closed.clone()));

        debug!("udp socket bound on port {local_port}");
        Ok(Self {
            local_port,
            routes,
            datagrams: datagrams_tx,
            closed,
        })
    }

    /// Port to advertise in the service TXT record.
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Registers the typed read channel for `channel_id` and datagrams
    /// originating from `host`, replacing any previous registration.
    pub fn register_read_channel<T: Wire>(&self, channel_id: u16, host: IpAddr) -> UdpReadChannel<T> {
        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert((channel_id, host), payload_tx);
        }
        UdpReadChannel {
            channel_id,
            payloads: payload_rx,
            _marker: PhantomData,
        }
    }

    /// Drops the routing entry; the matching channel's reads run dry.
    pub fn deregister_read_channel(&self, channel_id: u16, host: IpAddr) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.remove(&(channel_id, host));
        }
    }

    pub fn register_write_channel<T: Wire>(
        &self,
        channel_id: u16,
        target: SocketAddr,
    ) -> UdpWriteChannel<T> {
        UdpWriteChannel {
            channel_id,
            target,
            datagrams: self.datagrams.clone(),
            _marker: PhantomData,
        }
    }
}

impl Drop for UdpConnection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn read_loop(socket: Arc<UdpSocket>, routes: Routes, closed: CancellationToken) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let received = tokio::select! {
            _ = closed.cancelled() => break,
            received = socket.recv_from(&mut buffer) => received,
        };
        match received {
            Ok((len, from)) => {
                if len < 2 {
                    trace!("dropping runt datagram from {from}");
                    continue;
                }
                let channel_id = u16::from_le_bytes([buffer[0], buffer[1]]);
                let route = routes
                    .lock()
                    .ok()
                    .and_then(|routes| routes.get(&(channel_id, from.ip())).cloned());
                match route {
                    Some(sender) => {
                        let _ = sender.send(buffer[2..len].to_vec());
                    }
                    None => trace!(
                        "dropping datagram for unregistered channel {channel_id} from {from}"
                    ),
                }
            }
            Err(error) => {
                // Transient receive errors (e.g. ICMP-induced) must not
                // kill the socket for every registered peer.
                warn!("udp receive failed: {error}");
            }
        }
    }
    if let Ok(mut routes) = routes.lock() {
        routes.clear();
    }
}

async fn write_loop(
    socket: Arc<UdpSocket>,
    mut datagrams: mpsc::UnboundedReceiver<(SocketAddr, Vec<u8>)>,
    closed: CancellationToken,
) {
    loop {
        let datagram = tokio::select! {
            _ = closed.cancelled() => break,
            datagram = datagrams.recv() => datagram,
        };
        let Some((target, datagram)) = datagram else {
            break;
        };
        if let Err(error) = socket.send_to(&datagram, target).await {
            warn!("udp send to {target} failed: {error}");
        }
    }
}

/// Receiving end of one typed unreliable channel, scoped to a sender host.
pub struct UdpReadChannel<T> {
    channel_id: u16,
    payloads: mpsc::UnboundedReceiver<Vec<u8>>,
    _marker: PhantomData<T>,
}

impl<T: Wire> UdpReadChannel<T> {
    /// Receives the next decodable datagram payload, or `None` once the
    /// channel is deregistered.
    pub async fn recv(&mut self) -> Option<T> {
        while let Some(payload) = self.payloads.recv().await {
            match T::decode_bytes(&payload) {
                Some(message) => return Some(message),
                None => warn!(
                    "dropping undecodable datagram on channel {} ({} bytes)",
                    self.channel_id,
                    payload.len()
                ),
            }
        }
        None
    }
}

/// Sending end of one typed unreliable channel, addressed to a fixed target.
pub struct UdpWriteChannel<T> {
    channel_id: u16,
    target: SocketAddr,
    datagrams: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
    _marker: PhantomData<T>,
}

impl<T: Wire> UdpWriteChannel<T> {
    pub fn send(&self, message: &T) -> Result<(), TransportError> {
        let payload = message.encode();
        let mut datagram = Vec::with_capacity(payload.len() + 2);
        datagram.extend_from_slice(&self.channel_id.to_le_bytes());
        datagram.extend_from_slice(&payload);
        self.datagrams
            .send((self.target, datagram))
            .map_err(|_| TransportError::Closed)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}
