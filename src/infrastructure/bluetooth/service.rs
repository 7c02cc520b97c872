//! Bluetooth Service Module
//!
//! Coordinator loop that owns the connection manager and the scan session,
//! takes [`BluetoothCommand`]s from the application and forwards everything
//! that happens as [`AppEvent`]s.

use crate::domain::error::BleError;
use crate::domain::models::{
    AppEvent, ConnectionEvent, ConnectionState, MessageSeverity, ScanUpdate, StatusMessage,
};
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::backend::{
    GattBackend, ScanBackend, ScanEvent, SessionEvent, UnsupportedBackend,
};
use crate::infrastructure::bluetooth::connection::ConnectionManager;
use crate::infrastructure::bluetooth::protocol::WireCommand;
use crate::infrastructure::bluetooth::scanner::ScanSession;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Requests accepted by the service loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BluetoothCommand {
    StartScan {
        duration_ms: u64,
        include_unnamed: bool,
    },
    StopScan,
    /// `remember` stores the address as the last device once usable
    Connect { address: String, remember: bool },
    Disconnect,
    Send(WireCommand),
    SendHex(String),
    Status,
    Shutdown,
}

/// Platform backends plus the channels their callbacks arrive on
pub struct Backends {
    pub gatt: Box<dyn GattBackend>,
    pub gatt_events: mpsc::UnboundedReceiver<SessionEvent>,
    pub scan: Box<dyn ScanBackend>,
    pub scan_sender: mpsc::UnboundedSender<ScanEvent>,
    pub scan_events: mpsc::UnboundedReceiver<ScanEvent>,
}

impl Backends {
    /// Backends that report the adapter as unavailable
    pub fn unsupported() -> Self {
        let (_gatt_tx, gatt_events) = mpsc::unbounded_channel();
        let (scan_sender, scan_events) = mpsc::unbounded_channel();
        Self {
            gatt: Box::new(UnsupportedBackend),
            gatt_events,
            scan: Box::new(UnsupportedBackend),
            scan_sender,
            scan_events,
        }
    }

    /// WinRT backends, served by a dedicated worker thread
    #[cfg(windows)]
    pub async fn platform() -> anyhow::Result<Self> {
        let (gatt_tx, gatt_events) = mpsc::unbounded_channel();
        let (scan_sender, scan_events) = mpsc::unbounded_channel();
        let (gatt, scan) =
            crate::infrastructure::bluetooth::winrt::start(gatt_tx, scan_sender.clone()).await?;
        Ok(Self {
            gatt: Box::new(gatt),
            gatt_events,
            scan: Box::new(scan),
            scan_sender,
            scan_events,
        })
    }

    #[cfg(not(windows))]
    pub async fn platform() -> anyhow::Result<Self> {
        warn!("No BLE backend for this platform");
        Ok(Self::unsupported())
    }
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    connection: ConnectionManager,
    scanner: ScanSession,
    gatt_events: mpsc::UnboundedReceiver<SessionEvent>,
    scan_events: mpsc::UnboundedReceiver<ScanEvent>,
    connection_updates: mpsc::UnboundedReceiver<ConnectionEvent>,
    scan_updates: mpsc::UnboundedReceiver<ScanUpdate>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    settings: Arc<Mutex<SettingsService>>,
    remember_address: Option<String>,
}

impl BluetoothService {
    /// Fails with `AdapterUnavailable` when the host has no Bluetooth adapter
    pub fn new(
        backends: Backends,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Result<Self, BleError> {
        let mut connection = ConnectionManager::new(backends.gatt)?;
        let mut scanner = ScanSession::new(backends.scan, backends.scan_sender);
        let connection_updates = connection.subscribe();
        let scan_updates = scanner.subscribe();

        Ok(Self {
            connection,
            scanner,
            gatt_events: backends.gatt_events,
            scan_events: backends.scan_events,
            connection_updates,
            scan_updates,
            event_sender,
            settings,
            remember_address: None,
        })
    }

    /// Run until `Shutdown` or until the command channel closes
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        info!("Bluetooth service started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(BluetoothCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.gatt_events.recv() => self.connection.handle_event(event),
                Some(event) = self.scan_events.recv() => self.scanner.handle_event(event),
                Some(update) = self.connection_updates.recv() => self.on_connection_event(update),
                Some(update) = self.scan_updates.recv() => {
                    let _ = self.event_sender.send(AppEvent::Scan(update));
                }
            }
        }

        self.scanner.stop();
        self.connection.disconnect();
        // Flush the final Disconnected/Stopped updates before detaching
        self.flush_connection_updates();
        while let Ok(update) = self.scan_updates.try_recv() {
            let _ = self.event_sender.send(AppEvent::Scan(update));
        }
        self.connection.cleanup();
        info!("Bluetooth service stopped");
    }

    fn handle_command(&mut self, command: BluetoothCommand) {
        match command {
            BluetoothCommand::StartScan {
                duration_ms,
                include_unnamed,
            } => {
                if let Err(e) = self.scanner.start(duration_ms, include_unnamed) {
                    error!("Failed to start scan: {}", e);
                    self.send_log(format!("Failed to start scan: {}", e), MessageSeverity::Error);
                } else {
                    self.send_log("Scanning for devices...", MessageSeverity::Info);
                }
            }
            BluetoothCommand::StopScan => self.scanner.stop(),
            BluetoothCommand::Connect { address, remember } => {
                // Connecting while scanning slows down the link setup
                self.scanner.stop();
                self.remember_address = None;
                self.send_log(format!("Connecting to {}...", address), MessageSeverity::Info);
                let result = self.connection.connect(&address);
                // Events of the released session must not touch the new one
                self.flush_connection_updates();
                match result {
                    Ok(()) if remember && self.connection.state() == ConnectionState::Connecting => {
                        self.remember_address = Some(address);
                    }
                    Ok(()) => {}
                    Err(e) => {
                        error!("Connection failed: {}", e);
                        self.send_log(format!("Connection failed: {}", e), MessageSeverity::Error);
                    }
                }
            }
            BluetoothCommand::Disconnect => {
                self.remember_address = None;
                self.connection.disconnect();
            }
            BluetoothCommand::Send(command) => self.send(command.as_hex()),
            BluetoothCommand::SendHex(hex) => self.send(&hex),
            BluetoothCommand::Status => {
                let message = match self.connection.address() {
                    Some(address) => format!(
                        "{:?} to {} (usable: {})",
                        self.connection.state(),
                        address,
                        self.connection.is_connected()
                    ),
                    None => format!("{:?}", self.connection.state()),
                };
                self.send_log(message, MessageSeverity::Info);
            }
            BluetoothCommand::Shutdown => {}
        }
    }

    fn send(&mut self, hex: &str) {
        if !self.connection.is_connected() {
            self.send_log("Not connected / no write characteristic", MessageSeverity::Warning);
            return;
        }
        if !self.connection.send_command(hex) {
            self.send_log(format!("Failed to send {}", hex), MessageSeverity::Error);
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        match &event {
            ConnectionEvent::ServicesDiscovered { .. } if self.connection.is_connected() => {
                if let Some(address) = self.remember_address.take() {
                    self.store_last_device(&address);
                }
            }
            ConnectionEvent::ConnectionFailed(_) | ConnectionEvent::Disconnected => {
                self.remember_address = None;
            }
            _ => {}
        }
        let _ = self.event_sender.send(AppEvent::Connection(event));
    }

    fn flush_connection_updates(&mut self) {
        while let Ok(update) = self.connection_updates.try_recv() {
            self.on_connection_event(update);
        }
    }

    fn store_last_device(&self, address: &str) {
        let normalised = self
            .connection
            .address()
            .map(|a| a.to_string())
            .unwrap_or_else(|| address.to_string());

        match self.settings.lock() {
            Ok(mut settings) => {
                if let Err(e) = settings.set_last_device_address(&normalised) {
                    warn!("Could not save last device address: {}", e);
                    return;
                }
                info!("Saved {} as last device", normalised);
                self.send_log(
                    format!("{} will be reconnected at startup", normalised),
                    MessageSeverity::Success,
                );
            }
            Err(_) => warn!("Settings lock poisoned, last device not saved"),
        }
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}
