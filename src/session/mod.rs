//! Peer lifecycle protocol.
//!
//! A [`ControllerPublisher`] pushes its local controllers to a remote
//! [`ControllerBrowser`], which aggregates controllers from any number of
//! publishers (plus locally added ones) into a single dense roster.
//! Control traffic (connect, disconnect, rename) runs over the reliable
//! transport; per-frame gamepad state runs over the unreliable one. A
//! publisher whose link drops gets a grace period to reconnect before its
//! controllers are declared gone.

use thiserror::Error;

use crate::transport::TransportError;

pub mod browser;
pub mod publisher;

pub use browser::{BrowserEvent, ControllerBrowser};
pub use publisher::{ControllerPublisher, PublisherEvent};

// Reliable channel ids.
pub(crate) const CHANNEL_CONTROLLER_CONNECTED: u16 = 1;
pub(crate) const CHANNEL_CONTROLLER_DISCONNECTED: u16 = 2;
pub(crate) const CHANNEL_CONTROLLER_NAME: u16 = 3;

// Unreliable channel ids.
pub(crate) const CHANNEL_GAMEPAD_STATE: u16 = 1;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("TXT record carries no usable input port")]
    InvalidTxtRecord,

    #[error("Session task stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::controller::{ConnectionStatus, Controller};
    use crate::gamepad::{ButtonType, GamepadLayout, InputMessage};
    use crate::transport::TcpConnection;
    use crate::wire::messages::{ButtonMessage, ControllerDisconnectedMessage};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    fn test_config(grace_period_ms: u64) -> SessionConfig {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
        SessionConfig {
            service_name: "pub".to_string(),
            grace_period_ms,
            ..SessionConfig::default()
        }
    }

    fn browser_addr(browser: &ControllerBrowser) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), browser.tcp_port())
    }

    async fn next_connected(events: &mut mpsc::Receiver<BrowserEvent>) -> Controller {
        loop {
            match timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(BrowserEvent::ControllerConnected(controller))) => return controller,
                Ok(Some(_)) => continue,
                other => panic!("expected a controller connected event, got {other:?}"),
            }
        }
    }

    async fn next_disconnected(events: &mut mpsc::Receiver<BrowserEvent>) -> Controller {
        loop {
            match timeout(Duration::from_secs(5), events.recv()).await {
                Ok(Some(BrowserEvent::ControllerDisconnected(controller))) => return controller,
                Ok(Some(_)) => continue,
                other => panic!("expected a controller disconnected event, got {other:?}"),
            }
        }
    }

    async fn await_status(controller: &Controller, status: ConnectionStatus) {
        let mut watch = controller.watch_status();
        timeout(Duration::from_secs(5), async {
            while *watch.borrow_and_update() != status {
                watch.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("controller never reached {status:?}"));
    }

    #[tokio::test]
    async fn published_controllers_surface_on_the_browser() {
        let (browser, mut events) = ControllerBrowser::bind(test_config(12_000)).await.unwrap();
        let (publisher, _publisher_events) = ControllerPublisher::new(test_config(12_000));

        let local = Controller::new(GamepadLayout::Extended);
        publisher.add_controller(local.clone());
        publisher
            .connect(browser_addr(&browser), &browser.txt_record().encode())
            .await
            .unwrap();

        let remote = next_connected(&mut events).await;
        assert_eq!(remote.index(), 0);
        assert_eq!(remote.layout(), GamepadLayout::Extended);
        // Unnamed controllers are announced under the publisher's name
        // plus their index.
        assert_eq!(remote.name().as_deref(), Some("pub_0"));

        // Input state flows over the unreliable channel. Datagrams are
        // fire-and-forget, so keep pressing until the state arrives.
        let mut state = remote.watch_state();
        timeout(Duration::from_secs(5), async {
            loop {
                local.input().send(InputMessage::Button(ButtonMessage {
                    button: ButtonType::A,
                    value: 1.0,
                }));
                if state.borrow_and_update().button_a == 1.0 {
                    break;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("gamepad state never reached the browser");
    }

    #[tokio::test]
    async fn renames_propagate_over_the_reliable_channel() {
        let (browser, mut events) = ControllerBrowser::bind(test_config(12_000)).await.unwrap();
        let (publisher, _publisher_events) = ControllerPublisher::new(test_config(12_000));

        let local = Controller::new(GamepadLayout::Regular);
        publisher.add_controller(local.clone());
        publisher
            .connect(browser_addr(&browser), &browser.txt_record().encode())
            .await
            .unwrap();

        let remote = next_connected(&mut events).await;
        let mut name = remote.watch_name();

        local.set_name(Some("p1".to_string()));
        timeout(Duration::from_secs(5), async {
            while name.borrow_and_update().as_deref() != Some("pub_p1") {
                name.changed().await.unwrap();
            }
        })
        .await
        .expect("rename never reached the browser");
    }

    #[tokio::test]
    async fn reconnect_within_the_grace_window_is_masked() {
        let (browser, mut events) = ControllerBrowser::bind(test_config(2_000)).await.unwrap();
        let (publisher, _publisher_events) = ControllerPublisher::new(test_config(2_000));

        publisher.add_controller(Controller::new(GamepadLayout::Micro));
        let addr = browser_addr(&browser);
        let txt = browser.txt_record().encode();
        publisher.connect(addr, &txt).await.unwrap();
        let remote = next_connected(&mut events).await;

        publisher.disconnect();
        await_status(&remote, ConnectionStatus::Disconnected).await;

        publisher.connect(addr, &txt).await.unwrap();
        await_status(&remote, ConnectionStatus::Connected).await;

        // The blip was masked: no disconnect event fires, even after the
        // original grace deadline has long passed.
        match timeout(Duration::from_millis(2_500), events.recv()).await {
            Err(_) => {}
            Ok(event) => panic!("unexpected event after masked reconnect: {event:?}"),
        }
    }

    #[tokio::test]
    async fn grace_expiry_removes_the_peer() {
        let (browser, mut events) = ControllerBrowser::bind(test_config(200)).await.unwrap();
        let (publisher, _publisher_events) = ControllerPublisher::new(test_config(200));

        publisher.add_controller(Controller::new(GamepadLayout::Regular));
        publisher
            .connect(browser_addr(&browser), &browser.txt_record().encode())
            .await
            .unwrap();
        let remote = next_connected(&mut events).await;

        publisher.disconnect();
        let gone = next_disconnected(&mut events).await;
        assert_eq!(gone.id(), remote.id());
        assert_eq!(gone.status(), ConnectionStatus::Disconnected);
        assert!(browser.controllers().await.is_empty());
    }

    #[tokio::test]
    async fn explicit_removal_renumbers_the_roster() {
        let (browser, mut events) = ControllerBrowser::bind(test_config(12_000)).await.unwrap();
        let (publisher, _publisher_events) = ControllerPublisher::new(test_config(12_000));

        let first = Controller::new(GamepadLayout::Regular);
        let second = Controller::new(GamepadLayout::Regular);
        publisher.add_controller(first.clone());
        publisher.add_controller(second.clone());
        publisher
            .connect(browser_addr(&browser), &browser.txt_record().encode())
            .await
            .unwrap();

        let remote_first = next_connected(&mut events).await;
        let remote_second = next_connected(&mut events).await;
        assert_eq!(remote_first.index(), 0);
        assert_eq!(remote_second.index(), 1);

        // Removing the first controller closes the gap in the roster.
        publisher.remove_controller(&first);
        let gone = next_disconnected(&mut events).await;
        assert_eq!(gone.id(), remote_first.id());
        assert_eq!(remote_second.index(), 0);
        assert_eq!(browser.controllers().await.len(), 1);
    }

    #[tokio::test]
    async fn disconnect_for_an_unknown_index_is_ignored() {
        let (browser, mut events) = ControllerBrowser::bind(test_config(12_000)).await.unwrap();

        let connection = TcpConnection::connect(browser_addr(&browser)).await.unwrap();
        let disconnects = connection
            .register_write_channel::<ControllerDisconnectedMessage>(CHANNEL_CONTROLLER_DISCONNECTED);
        disconnects
            .send(&ControllerDisconnectedMessage { index: 7 })
            .unwrap();

        // The bogus message is dropped without producing an event.
        match timeout(Duration::from_millis(300), events.recv()).await {
            Err(_) => {}
            Ok(event) => panic!("unexpected event: {event:?}"),
        }
        assert!(browser.controllers().await.is_empty());
    }

    #[tokio::test]
    async fn local_controllers_share_the_roster() {
        let (browser, mut events) = ControllerBrowser::bind(test_config(12_000)).await.unwrap();

        let first = Controller::new(GamepadLayout::Regular);
        let second = Controller::new(GamepadLayout::Extended);
        let third = Controller::new(GamepadLayout::Micro);
        browser.add_controller(first.clone());
        browser.add_controller(second.clone());
        browser.add_controller(third.clone());

        assert_eq!(next_connected(&mut events).await.id(), first.id());
        assert_eq!(next_connected(&mut events).await.id(), second.id());
        assert_eq!(next_connected(&mut events).await.id(), third.id());
        assert_eq!(
            (first.index(), second.index(), third.index()),
            (0, 1, 2)
        );

        // Dropping the middle entry closes the gap, preserving order.
        browser.remove_controller(&second);
        assert_eq!(next_disconnected(&mut events).await.id(), second.id());
        assert_eq!((first.index(), third.index()), (0, 1));
    }
}
