//! Reliable control-channel transport.
//!
//! A [`TcpConnection`] splits one `TcpStream` into a writer task draining a
//! frame queue and a reader task routing incoming frames to registered
//! channels. Frame layout: `channel_id:u16 || payload_len:u32 || payload`,
//! all little-endian. Registration is by channel id; frames for unknown ids
//! are logged and dropped so peers can speak newer channel sets without
//! breaking older receivers.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::TransportError;
use crate::wire::Wire;

const FRAME_HEADER_LEN: usize = 6;

/// Hard cap on a single frame's payload; anything larger is treated as a
/// corrupt stream and closes the connection.
const MAX_FRAME_LEN: usize = 1 << 20;

type Routes = Arc<Mutex<HashMap<u16, mpsc::UnboundedSender<Vec<u8>>>>>;

pub struct TcpConnection {
    peer_addr: SocketAddr,
    frames: mpsc::UnboundedSender<(u16, Vec<u8>)>,
    routes: Routes,
    closed: CancellationToken,
}

impl TcpConnection {
    /// Connects to a remote listener and starts the reader/writer tasks.
    pub async fn connect(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        Self::from_stream(stream)
    }

    /// Wraps an already-established stream (e.g. from `TcpListener::accept`).
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let closed = CancellationToken::new();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(write_half, frames_rx, closed.clone()));
        tokio::spawn(read_loop(read_half, routes.clone(), closed.clone()));

        debug!("tcp connection established with {peer_addr}");
        Ok(Self {
            peer_addr,
            frames: frames_tx,
            routes,
            closed,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Registers the typed read channel for `channel_id`, replacing any
    /// previous registration for that id.
    pub fn register_read_channel<T: Wire>(&self, channel_id: u16) -> TcpReadChannel<T> {
        let (payload_tx, payload_rx) = mpsc::unbounded_channel();
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(channel_id, payload_tx);
        }
        TcpReadChannel {
            channel_id,
            payloads: payload_rx,
            closed: self.closed.clone(),
            _marker: PhantomData,
        }
    }

    pub fn register_write_channel<T: Wire>(&self, channel_id: u16) -> TcpWriteChannel<T> {
        TcpWriteChannel {
            channel_id,
            frames: self.frames.clone(),
            _marker: PhantomData,
        }
    }

    /// Token cancelled once the connection is gone, whichever side closed it.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Initiates a deliberate shutdown of both halves.
    pub fn disconnect(&self) {
        self.closed.cancel();
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn write_loop(
    mut half: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<(u16, Vec<u8>)>,
    closed: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some((channel_id, payload)) = frame else {
            break;
        };

        let mut header = [0u8; FRAME_HEADER_LEN];
        header[..2].copy_from_slice(&channel_id.to_le_bytes());
        header[2..].copy_from_slice(&(payload.len() as u32).to_le_bytes());

        if let Err(error) = half.write_all(&header).await {
            warn!("tcp write failed: {error}");
            break;
        }
        if let Err(error) = half.write_all(&payload).await {
            warn!("tcp write failed: {error}");
            break;
        }
        trace!("wrote frame on channel {channel_id} ({} bytes)", payload.len());
    }
    closed.cancel();
}

async fn read_loop(mut half: OwnedReadHalf, routes: Routes, closed: CancellationToken) {
    loop {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let read = tokio::select! {
            _ = closed.cancelled() => break,
            read = half.read_exact(&mut header) => read,
        };
        if let Err(error) = read {
            debug!("tcp connection closed: {error}");
            break;
        }

        let channel_id = u16::from_le_bytes([header[0], header[1]]);
        let payload_len =
            u32::from_le_bytes([header[2], header[3], header[4], header[5]]) as usize;
        if payload_len > MAX_FRAME_LEN {
            warn!("oversized frame ({payload_len} bytes) on channel {channel_id}, closing");
            break;
        }

        let mut payload = vec![0u8; payload_len];
        let read = tokio::select! {
            _ = closed.cancelled() => break,
            read = half.read_exact(&mut payload) => read,
        };
        if let Err(error) = read {
            debug!("tcp connection closed mid-frame: {error}");
            break;
        }

        let route = routes
            .lock()
            .ok()
            .and_then(|routes| routes.get(&channel_id).cloned());
        match route {
            Some(sender) => {
                // A closed receiver just means the channel owner went away.
                let _ = sender.send(payload);
            }
            None => trace!("dropping frame for unregistered channel {channel_id}"),
        }
    }
    // Dropping the route senders lets pending channel reads run dry.
    if let Ok(mut routes) = routes.lock() {
        routes.clear();
    }
    closed.cancel();
}

/// Receiving end of one typed reliable channel.
pub struct TcpReadChannel<T> {
    channel_id: u16,
    payloads: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: CancellationToken,
    _marker: PhantomData<T>,
}

impl<T: Wire> TcpReadChannel<T> {
    /// Receives the next decodable message, or `None` once the connection
    /// is closed. Undecodable payloads are dropped with a warning.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let payload = tokio::select! {
                // Drain buffered payloads before honoring the close.
                biased;
                payload = self.payloads.recv() => payload?,
                _ = self.closed.cancelled() => return None,
            };
            match T::decode_bytes(&payload) {
                Some(message) => return Some(message),
                None => warn!(
                    "dropping undecodable payload on channel {} ({} bytes)",
                    self.channel_id,
                    payload.len()
                ),
            }
        }
    }
}

/// Sending end of one typed reliable channel.
pub struct TcpWriteChannel<T> {
    channel_id: u16,
    frames: mpsc::UnboundedSender<(u16, Vec<u8>)>,
    _marker: PhantomData<T>,
}

impl<T: Wire> TcpWriteChannel<T> {
    pub fn send(&self, message: &T) -> Result<(), TransportError> {
        self.frames
            .send((self.channel_id, message.encode()))
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gamepad::ButtonType;
    use crate::wire::messages::{ButtonMessage, ControllerDisconnectedMessage};
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpConnection, TcpConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, accepted) =
            tokio::join!(TcpConnection::connect(addr), listener.accept());
        let (stream, _) = accepted.unwrap();
        (client.unwrap(), TcpConnection::from_stream(stream).unwrap())
    }

    #[tokio::test]
    async fn frames_route_by_channel_id() {
        let (client, server) = connected_pair().await;

        let mut buttons = server.register_read_channel::<ButtonMessage>(1);
        let mut disconnects = server.register_read_channel::<ControllerDisconnectedMessage>(2);

        let button_tx = client.register_write_channel::<ButtonMessage>(1);
        let disconnect_tx = client.register_write_channel::<ControllerDisconnectedMessage>(2);

        disconnect_tx
            .send(&ControllerDisconnectedMessage { index: 3 })
            .unwrap();
        button_tx
            .send(&ButtonMessage {
                button: ButtonType::A,
                value: 1.0,
            })
            .unwrap();

        assert_eq!(
            buttons.recv().await,
            Some(ButtonMessage {
                button: ButtonType::A,
                value: 1.0
            })
        );
        assert_eq!(
            disconnects.recv().await,
            Some(ControllerDisconnectedMessage { index: 3 })
        );
    }

    #[tokio::test]
    async fn undecodable_payloads_are_skipped() {
        let (client, server) = connected_pair().await;

        let mut buttons = server.register_read_channel::<ButtonMessage>(1);
        let raw = client.register_write_channel::<ControllerDisconnectedMessage>(1);

        // Two bytes decode as an unknown button ordinal with no value.
        raw.send(&ControllerDisconnectedMessage { index: 999 })
            .unwrap();
        client
            .register_write_channel::<ButtonMessage>(1)
            .send(&ButtonMessage {
                button: ButtonType::X,
                value: 0.5,
            })
            .unwrap();

        let received = buttons.recv().await.unwrap();
        assert_eq!(received.button, ButtonType::X);
    }

    #[tokio::test]
    async fn disconnect_cancels_the_closed_token_on_both_sides() {
        let (client, server) = connected_pair().await;
        let server_closed = server.closed();

        client.disconnect();
        server_closed.cancelled().await;

        let mut channel = server.register_read_channel::<ButtonMessage>(1);
        assert_eq!(channel.recv().await, None);
    }
}
