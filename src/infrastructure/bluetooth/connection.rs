//! BLE Connection Module
//!
//! Owns the single GATT session: connect/disconnect lifecycle, discovery of
//! the write/notify characteristic pair, notification subscription, command
//! transmission and inbound data.

use crate::domain::error::BleError;
use crate::domain::models::{ConnectionEvent, ConnectionState, DeviceAddress};
use crate::infrastructure::bluetooth::backend::{
    AdapterState, CharacteristicHandle, CharacteristicInfo, GattBackend, GattEvent, LinkState,
    ServiceInfo, SessionEvent, SessionId,
};
use crate::infrastructure::bluetooth::protocol::{
    self, WireCommand, CCCD_UUID, ENABLE_NOTIFICATION_VALUE,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// GATT session state machine
///
/// `Disconnected -> Connecting -> Connected -> ServicesReady`, with a direct
/// return to `Disconnected` from any state. All transitions happen inside
/// [`ConnectionManager::handle_event`] or the request methods, so the manager
/// needs `&mut self` and no locking.
pub struct ConnectionManager {
    backend: Box<dyn GattBackend>,
    state: ConnectionState,
    /// Bumped on every backend connect; older callbacks are dropped
    session: SessionId,
    address: Option<DeviceAddress>,
    write_channel: Option<CharacteristicHandle>,
    notify_channel: Option<CharacteristicHandle>,
    listeners: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl ConnectionManager {
    /// Fails with `AdapterUnavailable` if the host has no Bluetooth adapter
    pub fn new(backend: Box<dyn GattBackend>) -> Result<Self, BleError> {
        if backend.adapter_state() == AdapterState::Unavailable {
            error!("Bluetooth adapter not available on this device");
            return Err(BleError::AdapterUnavailable);
        }

        Ok(Self {
            backend,
            state: ConnectionState::Disconnected,
            session: 0,
            address: None,
            write_channel: None,
            notify_channel: None,
            listeners: Vec::new(),
        })
    }

    /// Register a listener for connection events
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn address(&self) -> Option<DeviceAddress> {
        self.address
    }

    pub fn write_channel(&self) -> Option<&CharacteristicHandle> {
        self.write_channel.as_ref()
    }

    pub fn notify_channel(&self) -> Option<&CharacteristicHandle> {
        self.notify_channel.as_ref()
    }

    /// True only when commands can actually be written
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::ServicesReady && self.write_channel.is_some()
    }

    /// Start connecting to `address`
    ///
    /// Only a missing adapter is returned as an error. Every other failure is
    /// published as [`ConnectionEvent::ConnectionFailed`].
    pub fn connect(&mut self, address: &str) -> Result<(), BleError> {
        match self.backend.adapter_state() {
            AdapterState::Unavailable => return Err(BleError::AdapterUnavailable),
            AdapterState::Disabled => {
                warn!("Cannot connect to {}: Bluetooth is disabled", address);
                self.publish(ConnectionEvent::ConnectionFailed(BleError::AdapterDisabled));
                return Ok(());
            }
            AdapterState::Ready => {}
        }

        let address: DeviceAddress = match address.parse() {
            Ok(address) => address,
            Err(e) => {
                error!("{}", e);
                self.publish(ConnectionEvent::ConnectionFailed(e));
                return Ok(());
            }
        };

        // Single session: drop whatever link we had before
        if self.state != ConnectionState::Disconnected {
            info!("Releasing previous session before connecting to {}", address);
            self.disconnect();
        }

        self.session += 1;
        info!("Connecting to device: {} (session {})", address, self.session);
        match self.backend.connect(address, self.session) {
            Ok(()) => {
                self.address = Some(address);
                self.state = ConnectionState::Connecting;
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", address, e);
                self.backend.close();
                let reason = match e {
                    BleError::ConnectionFailed(_) => e,
                    other => BleError::ConnectionFailed(other.to_string()),
                };
                self.publish(ConnectionEvent::ConnectionFailed(reason));
            }
        }
        Ok(())
    }

    /// Feed one platform callback into the state machine
    ///
    /// Callbacks tagged with an earlier session belong to a link that was
    /// already released and are dropped.
    pub fn handle_event(&mut self, event: SessionEvent) {
        if event.session != self.session {
            debug!(
                "Dropping callback of stale session {} (current {})",
                event.session, self.session
            );
            return;
        }

        match event.event {
            GattEvent::ConnectionStateChanged { status, state } => {
                self.on_connection_state_change(status, state)
            }
            GattEvent::ServicesDiscovered(services) => self.on_services_discovered(&services),
            GattEvent::ServiceDiscoveryFailed { status } => {
                if self.state == ConnectionState::Connected {
                    error!("Service discovery failed with status: {}", status);
                    self.publish(ConnectionEvent::ServicesDiscovered {
                        has_both_channels: false,
                    });
                }
            }
            GattEvent::CharacteristicChanged {
                characteristic,
                value,
            } => {
                if self.state == ConnectionState::Disconnected || value.is_empty() {
                    return;
                }
                debug!(
                    "RX [{}]: {}",
                    characteristic.uuid,
                    protocol::bytes_to_hex(&value)
                );
                self.publish(ConnectionEvent::DataReceived(value));
            }
        }
    }

    fn on_connection_state_change(&mut self, status: i32, state: LinkState) {
        match state {
            LinkState::Connected => {
                if self.state != ConnectionState::Connecting {
                    debug!("Ignoring link-up in state {:?}", self.state);
                    return;
                }
                info!("Connected to GATT server");
                self.state = ConnectionState::Connected;
                self.publish(ConnectionEvent::Connected);

                if let Err(e) = self.backend.discover_services() {
                    error!("Could not start service discovery: {}", e);
                    self.publish(ConnectionEvent::ServicesDiscovered {
                        has_both_channels: false,
                    });
                }
            }
            LinkState::Disconnected => {
                let previous = self.state;
                if previous == ConnectionState::Disconnected {
                    return;
                }
                info!("Disconnected from GATT server (status {})", status);
                self.release();

                if previous == ConnectionState::Connecting {
                    self.publish(ConnectionEvent::ConnectionFailed(
                        BleError::ConnectionFailed(format!(
                            "link dropped while connecting (status {})",
                            status
                        )),
                    ));
                } else {
                    self.publish(ConnectionEvent::Disconnected);
                }
            }
        }
    }

    fn on_services_discovered(&mut self, services: &[ServiceInfo]) {
        if self.state != ConnectionState::Connected {
            debug!("Ignoring service discovery result in state {:?}", self.state);
            return;
        }

        let (write, notify) = find_write_and_notify(services);
        self.write_channel = write.map(|c| c.handle.clone());
        self.notify_channel = notify.map(|c| c.handle.clone());

        if let Some(notify) = notify {
            self.enable_notifications(notify);
        }

        if self.write_channel.is_some() {
            self.state = ConnectionState::ServicesReady;
        }

        let has_both_channels = write.is_some() && notify.is_some();
        if has_both_channels {
            info!("UART-like characteristics found and configured");
        } else {
            warn!("{}", BleError::ServicesIncompatible);
        }
        self.publish(ConnectionEvent::ServicesDiscovered { has_both_channels });
    }

    fn enable_notifications(&mut self, characteristic: &CharacteristicInfo) {
        let handle = &characteristic.handle;
        if let Err(e) = self.backend.set_characteristic_notification(handle, true) {
            error!("Error enabling notifications: {}", e);
            return;
        }

        let has_cccd = characteristic
            .descriptors
            .iter()
            .any(|d| d.eq_ignore_ascii_case(CCCD_UUID));
        if !has_cccd {
            warn!("CCCD descriptor not found for characteristic {}", handle.uuid);
            return;
        }

        match self
            .backend
            .write_descriptor(handle, CCCD_UUID, &ENABLE_NOTIFICATION_VALUE)
        {
            Ok(()) => debug!("Notifications enabled for characteristic {}", handle.uuid),
            Err(e) => error!("Error enabling notifications: {}", e),
        }
    }

    /// Write a hex command. Returns whether it was accepted for sending.
    pub fn send_command(&mut self, hex: &str) -> bool {
        let Some(characteristic) = self.write_channel.clone() else {
            error!("Cannot send command: not connected or no write characteristic");
            return false;
        };

        let bytes = match protocol::hex_to_bytes(hex) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("{}", e);
                return false;
            }
        };

        match self.backend.write_characteristic(&characteristic, &bytes) {
            Ok(()) => {
                debug!("TX: {}", protocol::bytes_to_hex(&bytes));
                true
            }
            Err(e) => {
                error!("Failed to write characteristic: {}", e);
                false
            }
        }
    }

    pub fn send(&mut self, command: &WireCommand) -> bool {
        self.send_command(command.as_hex())
    }

    /// Release the link and both channels. Safe to call in any state.
    pub fn disconnect(&mut self) {
        let was_active = self.state != ConnectionState::Disconnected;
        if was_active {
            self.backend.disconnect();
        }
        self.release();

        if was_active {
            info!("Disconnected from device");
            self.publish(ConnectionEvent::Disconnected);
        }
    }

    /// Disconnect and detach every listener
    pub fn cleanup(&mut self) {
        self.disconnect();
        self.listeners.clear();
    }

    fn release(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.backend.close();
        }
        self.state = ConnectionState::Disconnected;
        self.write_channel = None;
        self.notify_channel = None;
    }

    fn publish(&mut self, event: ConnectionEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// First write-capable and first notify-capable characteristic, in discovery order
fn find_write_and_notify(
    services: &[ServiceInfo],
) -> (Option<&CharacteristicInfo>, Option<&CharacteristicInfo>) {
    let mut write = None;
    let mut notify = None;

    for characteristic in services.iter().flat_map(|s| s.characteristics.iter()) {
        if write.is_none() && characteristic.properties.can_write() {
            write = Some(characteristic);
        }
        if notify.is_none() && characteristic.properties.notify {
            notify = Some(characteristic);
        }
        if write.is_some() && notify.is_some() {
            break;
        }
    }

    (write, notify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        characteristic, uart_service, MockBackend, MockHandle, Request, NOTIFY, READ_ONLY,
        WRITE, WRITE_NO_RESPONSE,
    };
    use pretty_assertions::assert_eq;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn manager() -> (
        ConnectionManager,
        MockHandle,
        mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let (backend, handle) = MockBackend::new();
        let mut manager = ConnectionManager::new(Box::new(backend)).unwrap();
        let rx = manager.subscribe();
        (manager, handle, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ConnectionEvent>) -> Vec<ConnectionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Deliver a callback for the manager's current session
    fn feed(manager: &mut ConnectionManager, event: GattEvent) {
        let session = manager.session();
        manager.handle_event(SessionEvent::new(session, event));
    }

    fn link(state: LinkState) -> GattEvent {
        GattEvent::ConnectionStateChanged { status: 0, state }
    }

    fn ready_manager() -> (
        ConnectionManager,
        MockHandle,
        mpsc::UnboundedReceiver<ConnectionEvent>,
    ) {
        let (mut manager, handle, mut rx) = manager();
        manager.connect(ADDR).unwrap();
        feed(&mut manager, link(LinkState::Connected));
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![uart_service()]));
        drain(&mut rx);
        handle.clear();
        (manager, handle, rx)
    }

    #[test]
    fn test_new_fails_without_adapter() {
        let (backend, _) = MockBackend::with_adapter(AdapterState::Unavailable);
        assert_eq!(
            ConnectionManager::new(Box::new(backend)).err(),
            Some(BleError::AdapterUnavailable)
        );
    }

    #[test]
    fn test_full_connect_sequence() {
        let (mut manager, handle, mut rx) = manager();

        manager.connect("aa:bb:cc:dd:ee:ff").unwrap();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(!manager.is_connected());

        feed(&mut manager, link(LinkState::Connected));
        assert_eq!(manager.state(), ConnectionState::Connected);

        let service = uart_service();
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![service.clone()]));
        assert_eq!(manager.state(), ConnectionState::ServicesReady);
        assert!(manager.is_connected());

        let notify = service.characteristics[0].handle.clone();
        let write = service.characteristics[1].handle.clone();
        assert_eq!(manager.notify_channel(), Some(&notify));
        assert_eq!(manager.write_channel(), Some(&write));

        assert_eq!(
            handle.requests(),
            vec![
                Request::Connect(ADDR.to_string()),
                Request::DiscoverServices,
                Request::SetNotification(notify.clone(), true),
                Request::WriteDescriptor(notify, CCCD_UUID.to_string(), vec![0x01, 0x00]),
            ]
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                ConnectionEvent::Connected,
                ConnectionEvent::ServicesDiscovered {
                    has_both_channels: true
                },
            ]
        );
    }

    #[test]
    fn test_channels_may_come_from_different_services() {
        let (mut manager, _handle, mut rx) = manager();
        manager.connect(ADDR).unwrap();
        feed(&mut manager, link(LinkState::Connected));

        let first = ServiceInfo {
            uuid: "svc-a".into(),
            characteristics: vec![
                characteristic("svc-a", "read", 1, READ_ONLY, false),
                characteristic("svc-a", "write-a", 2, WRITE_NO_RESPONSE, false),
            ],
        };
        let second = ServiceInfo {
            uuid: "svc-b".into(),
            characteristics: vec![
                characteristic("svc-b", "write-b", 3, WRITE, false),
                characteristic("svc-b", "notify-b", 4, NOTIFY, true),
                characteristic("svc-b", "notify-c", 5, NOTIFY, true),
            ],
        };
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![first, second]));

        assert_eq!(manager.write_channel().unwrap().uuid, "write-a");
        assert_eq!(manager.notify_channel().unwrap().uuid, "notify-b");
        assert!(drain(&mut rx).contains(&ConnectionEvent::ServicesDiscovered {
            has_both_channels: true
        }));
    }

    #[test]
    fn test_missing_cccd_is_not_fatal() {
        let (mut manager, handle, _rx) = manager();
        manager.connect(ADDR).unwrap();
        feed(&mut manager, link(LinkState::Connected));

        let svc = ServiceInfo {
            uuid: "svc".into(),
            characteristics: vec![
                characteristic("svc", "notify", 1, NOTIFY, false),
                characteristic("svc", "write", 2, WRITE, false),
            ],
        };
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![svc]));

        assert!(manager.is_connected());
        assert!(!handle
            .requests()
            .iter()
            .any(|r| matches!(r, Request::WriteDescriptor(..))));
    }

    #[test]
    fn test_write_only_device_is_usable_but_incomplete() {
        let (mut manager, _handle, mut rx) = manager();
        manager.connect(ADDR).unwrap();
        feed(&mut manager, link(LinkState::Connected));
        drain(&mut rx);

        let svc = ServiceInfo {
            uuid: "svc".into(),
            characteristics: vec![characteristic("svc", "write", 1, WRITE, false)],
        };
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![svc]));

        assert!(manager.is_connected());
        assert!(manager.notify_channel().is_none());
        assert_eq!(
            drain(&mut rx),
            vec![ConnectionEvent::ServicesDiscovered {
                has_both_channels: false
            }]
        );
    }

    #[test]
    fn test_notify_only_device_is_not_connected() {
        let (mut manager, _handle, _rx) = manager();
        manager.connect(ADDR).unwrap();
        feed(&mut manager, link(LinkState::Connected));

        let svc = ServiceInfo {
            uuid: "svc".into(),
            characteristics: vec![characteristic("svc", "notify", 1, NOTIFY, true)],
        };
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![svc]));

        assert_eq!(manager.state(), ConnectionState::Connected);
        assert!(!manager.is_connected());
        assert!(!manager.send_command("AA"));
    }

    #[test]
    fn test_discovery_failure_reports_incomplete() {
        let (mut manager, _handle, mut rx) = manager();
        manager.connect(ADDR).unwrap();
        feed(&mut manager, link(LinkState::Connected));
        drain(&mut rx);

        feed(&mut manager, GattEvent::ServiceDiscoveryFailed { status: 129 });
        assert_eq!(
            drain(&mut rx),
            vec![ConnectionEvent::ServicesDiscovered {
                has_both_channels: false
            }]
        );
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_send_command_without_write_channel_returns_false() {
        let (mut manager, handle, _rx) = manager();
        assert!(!manager.send_command("AA"));
        assert!(handle.requests().is_empty());
    }

    #[test]
    fn test_send_command_writes_bytes() {
        let (mut manager, handle, _rx) = ready_manager();
        let write = manager.write_channel().cloned().unwrap();

        assert!(manager.send_command("d7 07 a0 00 01 01 a9"));
        assert!(manager.send(&protocol::lock_command(
            crate::domain::models::LockState::Unlocked
        )));
        assert_eq!(
            handle.requests(),
            vec![
                Request::Write(write.clone(), vec![0xD7, 0x07, 0xA0, 0x00, 0x01, 0x01, 0xA9]),
                Request::Write(write, vec![0xD7, 0x07, 0xA0, 0x00, 0x03, 0x01, 0xAB]),
            ]
        );
    }

    #[test]
    fn test_send_command_rejects_malformed_hex() {
        let (mut manager, handle, _rx) = ready_manager();
        assert!(!manager.send_command("ABC"));
        assert!(!manager.send_command("GG"));
        assert!(handle.requests().is_empty());
    }

    #[test]
    fn test_send_command_reports_rejected_transmit() {
        let (mut manager, handle, _rx) = ready_manager();
        handle.reject_writes(true);
        assert!(!manager.send_command("AA"));
        handle.reject_writes(false);
        assert!(manager.send_command("AA"));
    }

    #[test]
    fn test_data_received_is_published() {
        let (mut manager, _handle, mut rx) = ready_manager();
        let notify = manager.notify_channel().cloned().unwrap();

        feed(&mut manager, GattEvent::CharacteristicChanged {
            characteristic: notify.clone(),
            value: vec![],
        });
        feed(&mut manager, GattEvent::CharacteristicChanged {
            characteristic: notify,
            value: vec![0x0D, 0x0A],
        });
        assert_eq!(
            drain(&mut rx),
            vec![ConnectionEvent::DataReceived(vec![0x0D, 0x0A])]
        );
    }

    #[test]
    fn test_link_loss_clears_channels() {
        let (mut manager, handle, mut rx) = ready_manager();

        feed(&mut manager, GattEvent::ConnectionStateChanged {
            status: 8,
            state: LinkState::Disconnected,
        });
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.write_channel().is_none());
        assert!(manager.notify_channel().is_none());
        assert_eq!(handle.requests(), vec![Request::Close]);
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Disconnected]);

        // Duplicate callback is ignored
        feed(&mut manager, link(LinkState::Disconnected));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_link_loss_while_connecting_is_a_failure() {
        let (mut manager, _handle, mut rx) = manager();
        manager.connect(ADDR).unwrap();
        feed(&mut manager, GattEvent::ConnectionStateChanged {
            status: 133,
            state: LinkState::Disconnected,
        });
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ConnectionEvent::ConnectionFailed(BleError::ConnectionFailed(_))]
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let (mut manager, handle, mut rx) = ready_manager();

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_connected());
        assert_eq!(handle.requests(), vec![Request::Disconnect, Request::Close]);
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Disconnected]);
    }

    #[test]
    fn test_disconnect_before_connect_is_safe() {
        let (mut manager, handle, mut rx) = manager();
        manager.disconnect();
        assert!(handle.requests().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_invalid_address_is_reported() {
        let (mut manager, handle, mut rx) = manager();
        manager.connect("not-an-address").unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(handle.requests().is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![ConnectionEvent::ConnectionFailed(BleError::InvalidAddress(
                "not-an-address".into()
            ))]
        );
    }

    #[test]
    fn test_disabled_adapter_is_reported() {
        let (mut manager, handle, mut rx) = manager();
        handle.set_adapter(AdapterState::Disabled);
        manager.connect(ADDR).unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![ConnectionEvent::ConnectionFailed(BleError::AdapterDisabled)]
        );
    }

    #[test]
    fn test_vanished_adapter_fails_fast() {
        let (mut manager, handle, _rx) = manager();
        handle.set_adapter(AdapterState::Unavailable);
        assert_eq!(manager.connect(ADDR), Err(BleError::AdapterUnavailable));
    }

    #[test]
    fn test_backend_refusal_is_reported() {
        let (mut manager, handle, mut rx) = manager();
        handle.reject_connect(true);
        manager.connect(ADDR).unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ConnectionEvent::ConnectionFailed(BleError::ConnectionFailed(_))]
        ));
    }

    #[test]
    fn test_reconnect_releases_previous_session() {
        let (mut manager, handle, mut rx) = ready_manager();
        manager.connect("11:22:33:44:55:66").unwrap();

        assert_eq!(
            handle.requests(),
            vec![
                Request::Disconnect,
                Request::Close,
                Request::Connect("11:22:33:44:55:66".into())
            ]
        );
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Disconnected]);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_cleanup_detaches_listeners() {
        let (mut manager, _handle, mut rx) = ready_manager();
        manager.cleanup();
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Disconnected]);

        manager.connect(ADDR).unwrap();
        feed(&mut manager, link(LinkState::Connected));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_stale_discovery_result_is_ignored() {
        let (mut manager, _handle, _rx) = manager();
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![uart_service()]));
        assert!(manager.write_channel().is_none());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_failure_of_superseded_connect_is_dropped() {
        let (mut manager, _handle, mut rx) = manager();
        manager.connect(ADDR).unwrap();
        let first = manager.session();
        manager.connect("11:22:33:44:55:66").unwrap();
        let second = manager.session();
        assert_ne!(first, second);
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Disconnected]);

        // The first device's open fails only after the switch
        manager.handle_event(SessionEvent::new(
            first,
            GattEvent::ConnectionStateChanged {
                status: -1,
                state: LinkState::Disconnected,
            },
        ));
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert!(drain(&mut rx).is_empty());

        manager.handle_event(SessionEvent::new(second, link(LinkState::Connected)));
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(drain(&mut rx), vec![ConnectionEvent::Connected]);
    }

    #[test]
    fn test_notifications_of_previous_session_are_dropped() {
        let (mut manager, _handle, mut rx) = ready_manager();
        let old_session = manager.session();
        let old_notify = manager.notify_channel().cloned().unwrap();

        manager.connect("11:22:33:44:55:66").unwrap();
        feed(&mut manager, link(LinkState::Connected));
        feed(&mut manager, GattEvent::ServicesDiscovered(vec![uart_service()]));
        drain(&mut rx);

        manager.handle_event(SessionEvent::new(
            old_session,
            GattEvent::CharacteristicChanged {
                characteristic: old_notify,
                value: vec![0x01],
            },
        ));
        assert!(drain(&mut rx).is_empty());
        assert!(manager.is_connected());
    }
}
