//! Controller aggregation endpoint.
//!
//! The browser listens for publisher connections and folds every announced
//! controller, plus any locally added ones, into one roster with dense
//! indices. All bookkeeping (peer map, roster, grace timers) lives on a
//! single session task; transport pumps and timers feed it through a
//! command queue, so arrival order is preserved and nothing is mutated
//! concurrently.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    SessionError, CHANNEL_CONTROLLER_CONNECTED, CHANNEL_CONTROLLER_DISCONNECTED,
    CHANNEL_CONTROLLER_NAME, CHANNEL_GAMEPAD_STATE,
};
use crate::config::SessionConfig;
use crate::controller::{ConnectionStatus, Controller};
use crate::gamepad::InputMessage;
use crate::transport::{TcpConnection, TransportError, UdpConnection};
use crate::wire::messages::{
    ControllerConnectedMessage, ControllerDisconnectedMessage, ControllerNameMessage,
    GamepadMessage, NetworkMessage, TxtRecord,
};

/// Roster change notifications delivered to the host application.
#[derive(Debug)]
pub enum BrowserEvent {
    ControllerConnected(Controller),
    ControllerDisconnected(Controller),
    Error(SessionError),
}

/// Control-channel traffic decoded off one peer's connection.
enum ControlMessage {
    Connected(ControllerConnectedMessage),
    Disconnected(ControllerDisconnectedMessage),
    Name(NetworkMessage<ControllerNameMessage>),
    Gamepad(NetworkMessage<GamepadMessage>),
}

enum BrowserCommand {
    Accepted(TcpConnection),
    Control(IpAddr, ControlMessage),
    PeerLinkClosed(IpAddr, u64),
    PeerExpired(IpAddr, u64),
    AddLocal(Controller),
    RemoveLocal(u64),
    Controllers(oneshot::Sender<Vec<Controller>>),
    AcceptFailed(TransportError),
}

/// One remote publisher, keyed by address.
///
/// The generation counter distinguishes the current link from earlier ones
/// to the same address; closed-link and timer notifications carrying a
/// stale generation are ignored.
struct Peer {
    controllers: HashMap<u16, Controller>,
    connection: TcpConnection,
    generation: u64,
    grace: Option<CancellationToken>,
    connected_at: DateTime<Local>,
}

/// Handle to a running browser session. Dropping it shuts the session down.
pub struct ControllerBrowser {
    commands: mpsc::UnboundedSender<BrowserCommand>,
    shutdown: CancellationToken,
    tcp_port: u16,
    udp_port: u16,
}

impl ControllerBrowser {
    /// Binds the control listener and input socket and starts the session
    /// task. Returned events must be consumed; the session applies
    /// backpressure once the event buffer fills up.
    pub async fn bind(
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<BrowserEvent>), SessionError> {
        let listener = TcpListener::bind(("0.0.0.0", config.tcp_port))
            .await
            .map_err(TransportError::from)?;
        let tcp_port = listener
            .local_addr()
            .map_err(TransportError::from)?
            .port();
        let udp = UdpConnection::bind(config.udp_port).await?;
        let udp_port = udp.local_port();

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            commands_tx.clone(),
            shutdown.clone(),
        ));

        let task = BrowserTask {
            grace_period: config.grace_period(),
            peers: HashMap::new(),
            roster: Vec::new(),
            udp,
            events: events_tx,
            commands: commands_tx.clone(),
            next_generation: 0,
        };
        tokio::spawn(task.run(commands_rx, shutdown.clone()));

        info!("browser '{}' listening on tcp {tcp_port}, udp {udp_port}", config.service_name);
        Ok((
            Self {
                commands: commands_tx,
                shutdown,
                tcp_port,
                udp_port,
            },
            events_rx,
        ))
    }

    pub fn tcp_port(&self) -> u16 {
        self.tcp_port
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    /// Record to hand to the service-advertisement collaborator; it tells
    /// publishers where to aim their input datagrams.
    pub fn txt_record(&self) -> TxtRecord {
        TxtRecord::new(self.udp_port)
    }

    /// Adds a locally owned controller (e.g. a physical gamepad) to the
    /// roster alongside remote ones.
    pub fn add_controller(&self, controller: Controller) {
        let _ = self.commands.send(BrowserCommand::AddLocal(controller));
    }

    /// Removes a locally added controller. Remote controllers are managed
    /// by their publisher and cannot be removed here.
    pub fn remove_controller(&self, controller: &Controller) {
        let _ = self
            .commands
            .send(BrowserCommand::RemoveLocal(controller.id()));
    }

    /// Snapshot of the current roster, in index order.
    pub async fn controllers(&self) -> Vec<Controller> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .commands
            .send(BrowserCommand::Controllers(reply_tx))
            .is_err()
        {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ControllerBrowser {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    commands: mpsc::UnboundedSender<BrowserCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let command = match accepted.map_err(TransportError::from) {
            Ok((stream, _)) => match TcpConnection::from_stream(stream) {
                Ok(connection) => BrowserCommand::Accepted(connection),
                Err(error) => BrowserCommand::AcceptFailed(error),
            },
            Err(error) => {
                // Accept failures are usually transient (fd exhaustion);
                // back off instead of spinning on a broken listener.
                let failed = commands.send(BrowserCommand::AcceptFailed(error)).is_err();
                if failed {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }
        };
        if commands.send(command).is_err() {
            break;
        }
    }
}

struct BrowserTask {
    grace_period: Duration,
    peers: HashMap<IpAddr, Peer>,
    roster: Vec<Controller>,
    udp: UdpConnection,
    events: mpsc::Sender<BrowserEvent>,
    commands: mpsc::UnboundedSender<BrowserCommand>,
    next_generation: u64,
}

impl BrowserTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<BrowserCommand>,
        shutdown: CancellationToken,
    ) {
        loop {
            let command = tokio::select! {
                _ = shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            match command {
                BrowserCommand::Accepted(connection) => self.handle_accepted(connection),
                BrowserCommand::Control(host, message) => {
                    self.handle_control(host, message).await
                }
                BrowserCommand::PeerLinkClosed(host, generation) => {
                    self.handle_link_closed(host, generation)
                }
                BrowserCommand::PeerExpired(host, generation) => {
                    self.handle_peer_expired(host, generation).await
                }
                BrowserCommand::AddLocal(controller) => {
                    self.roster.push(controller.clone());
                    controller.set_index(self.roster.len() as u16 - 1);
                    info!("local controller {} joined at index {}", controller.id(), controller.index());
                    self.emit(BrowserEvent::ControllerConnected(controller)).await;
                }
                BrowserCommand::RemoveLocal(id) => self.handle_remove_local(id).await,
                BrowserCommand::Controllers(reply) => {
                    let _ = reply.send(self.roster.clone());
                }
                BrowserCommand::AcceptFailed(error) => {
                    warn!("failed to accept a publisher connection: {error}");
                    self.emit(BrowserEvent::Error(error.into())).await;
                }
            }
        }
        debug!("browser session task stopped");
    }

    async fn emit(&self, event: BrowserEvent) {
        let _ = self.events.send(event).await;
    }

    /// Re-assigns dense indices after a roster removal.
    fn renumber(&self) {
        for (position, controller) in self.roster.iter().enumerate() {
            controller.set_index(position as u16);
        }
    }

    fn remove_from_roster(&mut self, id: u64) {
        if let Some(position) = self.roster.iter().position(|c| c.id() == id) {
            self.roster.remove(position);
            self.renumber();
        }
    }

    fn handle_accepted(&mut self, connection: TcpConnection) {
        let host = connection.peer_addr().ip();
        let generation = self.next_generation;
        self.next_generation += 1;
        self.spawn_pumps(&connection, host, generation);

        match self.peers.entry(host) {
            Entry::Occupied(mut occupied) => {
                // Same address again. If a grace timer is pending this is
                // the reconnect path; either way the fresh link supersedes
                // the old one.
                let peer = occupied.get_mut();
                if let Some(grace) = peer.grace.take() {
                    grace.cancel();
                }
                for controller in peer.controllers.values() {
                    controller.set_status(ConnectionStatus::Connected);
                }
                peer.connection = connection;
                peer.generation = generation;
                info!("peer {host} reconnected");
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Peer {
                    controllers: HashMap::new(),
                    connection,
                    generation,
                    grace: None,
                    connected_at: Local::now(),
                });
                info!("peer {host} connected");
            }
        }
    }

    /// Registers the per-peer read channels and forwards their traffic
    /// into the command queue. The pumps run dry once the connection
    /// closes or a registration is replaced.
    fn spawn_pumps(&self, connection: &TcpConnection, host: IpAddr, generation: u64) {
        let mut connects =
            connection.register_read_channel::<ControllerConnectedMessage>(CHANNEL_CONTROLLER_CONNECTED);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(message) = connects.recv().await {
                let command = BrowserCommand::Control(host, ControlMessage::Connected(message));
                if commands.send(command).is_err() {
                    break;
                }
            }
        });

        let mut disconnects = connection
            .register_read_channel::<ControllerDisconnectedMessage>(CHANNEL_CONTROLLER_DISCONNECTED);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(message) = disconnects.recv().await {
                let command = BrowserCommand::Control(host, ControlMessage::Disconnected(message));
                if commands.send(command).is_err() {
                    break;
                }
            }
        });

        let mut names = connection
            .register_read_channel::<NetworkMessage<ControllerNameMessage>>(CHANNEL_CONTROLLER_NAME);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(message) = names.recv().await {
                let command = BrowserCommand::Control(host, ControlMessage::Name(message));
                if commands.send(command).is_err() {
                    break;
                }
            }
        });

        let mut gamepads = self
            .udp
            .register_read_channel::<NetworkMessage<GamepadMessage>>(CHANNEL_GAMEPAD_STATE, host);
        let commands = self.commands.clone();
        tokio::spawn(async move {
            while let Some(message) = gamepads.recv().await {
                let command = BrowserCommand::Control(host, ControlMessage::Gamepad(message));
                if commands.send(command).is_err() {
                    break;
                }
            }
        });

        let closed = connection.closed();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            closed.cancelled().await;
            let _ = commands.send(BrowserCommand::PeerLinkClosed(host, generation));
        });
    }

    async fn handle_control(&mut self, host: IpAddr, message: ControlMessage) {
        match message {
            ControlMessage::Connected(message) => {
                let Some(peer) = self.peers.get_mut(&host) else {
                    return;
                };
                if let Some(controller) = peer.controllers.get(&message.index) {
                    // Re-announcement after a reconnect.
                    controller.set_status(ConnectionStatus::Connected);
                    controller.set_name(message.name);
                    return;
                }
                let controller = Controller::new(message.layout);
                controller.set_name(message.name);
                peer.controllers.insert(message.index, controller.clone());
                self.roster.push(controller.clone());
                controller.set_index(self.roster.len() as u16 - 1);
                info!(
                    "peer {host} announced controller {} (v{}) at index {}",
                    controller.id(),
                    message.version,
                    controller.index()
                );
                self.emit(BrowserEvent::ControllerConnected(controller)).await;
            }
            ControlMessage::Disconnected(message) => {
                // An explicit disconnect removes the controller right away;
                // the grace period only covers the whole link going dark.
                // Unknown indices are a harmless no-op.
                let removed = self
                    .peers
                    .get_mut(&host)
                    .and_then(|peer| peer.controllers.remove(&message.index));
                if let Some(controller) = removed {
                    controller.set_status(ConnectionStatus::Disconnected);
                    self.remove_from_roster(controller.id());
                    info!("peer {host} withdrew controller {}", controller.id());
                    self.emit(BrowserEvent::ControllerDisconnected(controller)).await;
                }
            }
            ControlMessage::Name(message) => {
                let controller = self
                    .peers
                    .get(&host)
                    .and_then(|peer| peer.controllers.get(&message.controller_index));
                if let Some(controller) = controller {
                    controller.set_name(message.message.name);
                }
            }
            ControlMessage::Gamepad(message) => {
                let controller = self
                    .peers
                    .get(&host)
                    .and_then(|peer| peer.controllers.get(&message.controller_index));
                match controller {
                    Some(controller) => {
                        controller.input().send(InputMessage::Gamepad(message.message));
                    }
                    None => trace!("gamepad state for unknown index {}", message.controller_index),
                }
            }
        }
    }

    fn handle_link_closed(&mut self, host: IpAddr, generation: u64) {
        let Some(peer) = self.peers.get_mut(&host) else {
            return;
        };
        if peer.generation != generation || peer.grace.is_some() {
            return;
        }

        for controller in peer.controllers.values() {
            controller.set_status(ConnectionStatus::Disconnected);
        }

        // The timer and its cancellation race through one select, so at
        // most one of them wins.
        let grace = CancellationToken::new();
        peer.grace = Some(grace.clone());
        let commands = self.commands.clone();
        let grace_period = self.grace_period;
        tokio::spawn(async move {
            tokio::select! {
                _ = grace.cancelled() => {}
                _ = tokio::time::sleep(grace_period) => {
                    let _ = commands.send(BrowserCommand::PeerExpired(host, generation));
                }
            }
        });
        debug!("peer {host} link lost, grace period running");
    }

    async fn handle_peer_expired(&mut self, host: IpAddr, generation: u64) {
        let peer = match self.peers.entry(host) {
            Entry::Occupied(occupied)
                if occupied.get().generation == generation && occupied.get().grace.is_some() =>
            {
                occupied.remove()
            }
            _ => return,
        };

        self.udp.deregister_read_channel(CHANNEL_GAMEPAD_STATE, host);
        info!(
            "peer {host} expired after {}s online",
            Local::now()
                .signed_duration_since(peer.connected_at)
                .num_seconds()
        );
        for controller in peer.controllers.into_values() {
            self.remove_from_roster(controller.id());
            self.emit(BrowserEvent::ControllerDisconnected(controller)).await;
        }
        peer.connection.disconnect();
    }

    async fn handle_remove_local(&mut self, id: u64) {
        // Remote controllers belong to their peer's bookkeeping.
        let remote = self
            .peers
            .values()
            .any(|peer| peer.controllers.values().any(|c| c.id() == id));
        if remote {
            warn!("refusing to remove remotely owned controller {id}");
            return;
        }
        if let Some(position) = self.roster.iter().position(|c| c.id() == id) {
            let controller = self.roster.remove(position);
            self.renumber();
            controller.set_status(ConnectionStatus::Disconnected);
            self.emit(BrowserEvent::ControllerDisconnected(controller)).await;
        }
    }
}
