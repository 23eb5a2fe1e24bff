//! Share game controllers over a local network.
//!
//! `padlink` lets one process publish its controllers (physical pads or
//! purely virtual ones) so another process can aggregate controllers from
//! many peers into one session and receive their live input state at low
//! latency. It is built from three pieces:
//!
//! - [`wire`]: a compact, versioned little-endian binary format for
//!   control and state messages, plus the framing used on each socket.
//! - [`session`]: the peer lifecycle protocol: a reliable channel for
//!   connect/disconnect/rename control traffic, an unreliable channel for
//!   per-frame gamepad snapshots, and a reconnect grace period that masks
//!   short network drops.
//! - [`actor`]: a message-reduction core that serializes all mutation of a
//!   controller's [`gamepad::GamepadState`] and notifies observers in send
//!   order.
//!
//! Service discovery and advertisement are deliberately left to the host
//! application: a [`session::ControllerBrowser`] exposes the ports and TXT
//! record to advertise, and a [`session::ControllerPublisher`] connects to
//! whatever address discovery resolved.
//!
//! # Example
//!
//! ```no_run
//! use padlink::config::SessionConfig;
//! use padlink::controller::Controller;
//! use padlink::gamepad::GamepadLayout;
//! use padlink::session::{BrowserEvent, ControllerBrowser, ControllerPublisher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::load_or_default();
//! let (browser, mut events) = ControllerBrowser::bind(config.clone()).await?;
//!
//! // Elsewhere, usually on another machine:
//! let (publisher, _link_events) = ControllerPublisher::new(config);
//! publisher.add_controller(Controller::new(GamepadLayout::Extended));
//! publisher
//!     .connect("192.168.1.20:4567".parse()?, &browser.txt_record().encode())
//!     .await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let BrowserEvent::ControllerConnected(controller) = event {
//!         println!("controller {} joined", controller.index());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod actor;
pub mod config;
pub mod controller;
pub mod gamepad;
pub mod input;
pub mod session;
pub mod transport;
pub mod wire;

pub use actor::{Actor, Subscription};
pub use config::SessionConfig;
pub use controller::{ConnectionStatus, Controller};
pub use gamepad::{GamepadLayout, GamepadState, InputMessage};
pub use session::{
    BrowserEvent, ControllerBrowser, ControllerPublisher, PublisherEvent, SessionError,
};
