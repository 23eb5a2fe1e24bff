//! Controller publishing endpoint.
//!
//! A publisher exposes its local controllers to one remote browser. Each
//! added controller gets a stable wire index; connect/disconnect/rename
//! traffic goes out on the reliable channel, while an observer on the
//! controller's state actor streams every reduced snapshot out on the
//! unreliable channel. All bookkeeping lives on one task fed by a command
//! queue, so observer callbacks never touch shared mutable state.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    SessionError, CHANNEL_CONTROLLER_CONNECTED, CHANNEL_CONTROLLER_DISCONNECTED,
    CHANNEL_CONTROLLER_NAME, CHANNEL_GAMEPAD_STATE,
};
use crate::actor::Subscription;
use crate::config::SessionConfig;
use crate::controller::Controller;
use crate::gamepad::GamepadState;
use crate::transport::{
    TcpConnection, TcpWriteChannel, UdpConnection, UdpWriteChannel,
};
use crate::wire::messages::{
    ControllerConnectedMessage, ControllerDisconnectedMessage, ControllerNameMessage,
    GamepadMessage, NetworkMessage, TxtRecord,
};

/// Link lifecycle notifications delivered to the host application.
#[derive(Debug)]
pub enum PublisherEvent {
    Connected(SocketAddr),
    Disconnected,
}

/// Write channels of one established browser link.
struct Link {
    remote: SocketAddr,
    connects: TcpWriteChannel<ControllerConnectedMessage>,
    disconnects: TcpWriteChannel<ControllerDisconnectedMessage>,
    names: TcpWriteChannel<NetworkMessage<ControllerNameMessage>>,
    gamepads: UdpWriteChannel<NetworkMessage<GamepadMessage>>,
    tcp: TcpConnection,
    // Keeps the outgoing datagram socket alive for the link's duration.
    _udp: UdpConnection,
}

enum PublisherCommand {
    LinkEstablished(Box<Link>),
    LinkClosed(u64),
    Disconnect,
    Add(Controller),
    Remove(u64),
    NameChanged(u64, Option<String>),
    StateChanged(u64, GamepadState),
}

/// Handle to a running publisher. Dropping it shuts the publisher down.
pub struct ControllerPublisher {
    commands: mpsc::UnboundedSender<PublisherCommand>,
    shutdown: CancellationToken,
}

impl ControllerPublisher {
    /// Starts the publisher task. Must be called from within a tokio
    /// runtime.
    pub fn new(config: SessionConfig) -> (Self, mpsc::Receiver<PublisherEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer);
        let shutdown = CancellationToken::new();

        let task = PublisherTask {
            service_name: config.service_name,
            entries: BTreeMap::new(),
            link: None,
            link_generation: 0,
            events: events_tx,
            commands: commands_tx.clone(),
        };
        tokio::spawn(task.run(commands_rx, shutdown.clone()));

        (
            Self {
                commands: commands_tx,
                shutdown,
            },
            events_rx,
        )
    }

    /// Connects to a browser resolved by the discovery collaborator. The
    /// TXT record bytes come from its service advertisement and carry the
    /// browser's input port. An existing link is replaced.
    pub async fn connect(&self, addr: SocketAddr, txt_record: &[u8]) -> Result<(), SessionError> {
        let record = TxtRecord::decode(txt_record).ok_or(SessionError::InvalidTxtRecord)?;
        let tcp = TcpConnection::connect(addr).await?;
        let udp = UdpConnection::bind(0).await?;
        let gamepads = udp.register_write_channel(
            CHANNEL_GAMEPAD_STATE,
            SocketAddr::new(addr.ip(), record.input_port),
        );

        let link = Link {
            remote: addr,
            connects: tcp.register_write_channel(CHANNEL_CONTROLLER_CONNECTED),
            disconnects: tcp.register_write_channel(CHANNEL_CONTROLLER_DISCONNECTED),
            names: tcp.register_write_channel(CHANNEL_CONTROLLER_NAME),
            gamepads,
            tcp,
            _udp: udp,
        };
        self.commands
            .send(PublisherCommand::LinkEstablished(Box::new(link)))
            .map_err(|_| SessionError::Stopped)
    }

    /// Tears down the current link, if any. Controllers stay registered
    /// and are re-announced on the next connect.
    pub fn disconnect(&self) {
        let _ = self.commands.send(PublisherCommand::Disconnect);
    }

    /// Registers a controller. It is announced immediately when a link is
    /// up, and on every subsequent connect.
    pub fn add_controller(&self, controller: Controller) {
        let _ = self.commands.send(PublisherCommand::Add(controller));
    }

    /// Withdraws a controller, telling the remote end to drop it.
    pub fn remove_controller(&self, controller: &Controller) {
        let _ = self
            .commands
            .send(PublisherCommand::Remove(controller.id()));
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ControllerPublisher {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct PublishedEntry {
    controller: Controller,
    subscription: Subscription,
}

struct PublisherTask {
    service_name: String,
    /// Published controllers keyed by wire index. Indices stay stable for
    /// a controller's lifetime; freed ones are reused for later adds.
    entries: BTreeMap<u16, PublishedEntry>,
    link: Option<Link>,
    link_generation: u64,
    events: mpsc::Sender<PublisherEvent>,
    commands: mpsc::UnboundedSender<PublisherCommand>,
}

impl PublisherTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PublisherCommand>,
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
                PublisherCommand::LinkEstablished(link) => self.handle_link(*link).await,
                PublisherCommand::LinkClosed(generation) => {
                    if generation == self.link_generation && self.link.is_some() {
                        self.link = None;
                        info!("browser link lost");
                        let _ = self.events.send(PublisherEvent::Disconnected).await;
                    }
                }
                PublisherCommand::Disconnect => {
                    if let Some(link) = self.link.take() {
                        link.tcp.disconnect();
                        info!("disconnected from {}", link.remote);
                        let _ = self.events.send(PublisherEvent::Disconnected).await;
                    }
                }
                PublisherCommand::Add(controller) => self.handle_add(controller),
                PublisherCommand::Remove(id) => self.handle_remove(id),
                PublisherCommand::NameChanged(id, _) => {
                    // The wire name is derived, so only the change matters.
                    if let Some((index, entry)) = self.entry_by_id(id) {
                        let name = self.published_name(index, &entry.controller);
                        if let Some(link) = &self.link {
                            let message = NetworkMessage::new(
                                index,
                                ControllerNameMessage { name },
                            );
                            if link.names.send(&message).is_err() {
                                debug!("dropping rename, link is closing");
                            }
                        }
                    }
                }
                PublisherCommand::StateChanged(id, state) => {
                    if let (Some((index, _)), Some(link)) = (self.entry_by_id(id), &self.link) {
                        let message = NetworkMessage::new(index, GamepadMessage { state });
                        if link.gamepads.send(&message).is_err() {
                            trace!("dropping state frame, link is closing");
                        }
                    }
                }
            }
        }
        debug!("publisher task stopped");
    }

    fn entry_by_id(&self, id: u64) -> Option<(u16, &PublishedEntry)> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.controller.id() == id)
            .map(|(index, entry)| (*index, entry))
    }

    /// Wire-facing display name: the publisher's own name joined with the
    /// controller's name, or its index when unnamed.
    fn published_name(&self, index: u16, controller: &Controller) -> Option<String> {
        Some(match controller.name() {
            Some(name) => format!("{}_{name}", self.service_name),
            None => format!("{}_{index}", self.service_name),
        })
    }

    async fn handle_link(&mut self, link: Link) {
        if let Some(previous) = self.link.take() {
            previous.tcp.disconnect();
        }
        self.link_generation += 1;
        let generation = self.link_generation;

        let closed = link.tcp.closed();
        let commands = self.commands.clone();
        tokio::spawn(async move {
            closed.cancelled().await;
            let _ = commands.send(PublisherCommand::LinkClosed(generation));
        });

        // Announce everything registered so far, in index order.
        for (index, entry) in &self.entries {
            let message = ControllerConnectedMessage::new(
                *index,
                entry.controller.layout(),
                self.published_name(*index, &entry.controller),
            );
            if link.connects.send(&message).is_err() {
                warn!("link to {} closed during announcement", link.remote);
            }
        }

        info!("connected to browser at {}", link.remote);
        let remote = link.remote;
        self.link = Some(link);
        let _ = self.events.send(PublisherEvent::Connected(remote)).await;
    }

    fn handle_add(&mut self, controller: Controller) {
        if self
            .entries
            .values()
            .any(|entry| entry.controller.id() == controller.id())
        {
            return;
        }
        let Some(index) = (0..u16::MAX).find(|index| !self.entries.contains_key(index)) else {
            warn!("controller roster full, ignoring add");
            return;
        };
        controller.set_index(index);

        let id = controller.id();
        let commands = self.commands.clone();
        let subscription = controller.observe(move |state| {
            let _ = commands.send(PublisherCommand::StateChanged(id, *state));
        });

        let commands = self.commands.clone();
        let mut names = controller.watch_name();
        tokio::spawn(async move {
            while names.changed().await.is_ok() {
                let name = names.borrow_and_update().clone();
                if commands.send(PublisherCommand::NameChanged(id, name)).is_err() {
                    break;
                }
            }
        });

        if let Some(link) = &self.link {
            let message = ControllerConnectedMessage::new(
                index,
                controller.layout(),
                self.published_name(index, &controller),
            );
            if link.connects.send(&message).is_err() {
                debug!("dropping announcement, link is closing");
            }
        }

        debug!("publishing controller {id} at index {index}");
        self.entries.insert(
            index,
            PublishedEntry {
                controller,
                subscription,
            },
        );
    }

    fn handle_remove(&mut self, id: u64) {
        let Some((index, _)) = self.entry_by_id(id) else {
            return;
        };
        if let Some(entry) = self.entries.remove(&index) {
            entry.subscription.unsubscribe();
            if let Some(link) = &self.link {
                let message = ControllerDisconnectedMessage { index };
                if link.disconnects.send(&message).is_err() {
                    debug!("dropping withdrawal, link is closing");
                }
            }
            debug!("withdrew controller {id} from index {index}");
        }
    }
}
