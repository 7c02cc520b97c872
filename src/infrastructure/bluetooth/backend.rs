//! Platform seam
//!
//! The connection manager and scan session never touch a radio API directly.
//! They issue requests through [`GattBackend`] / [`ScanBackend`] and receive
//! the platform's asynchronous callbacks as [`SessionEvent`] / [`ScanEvent`]
//! values over a channel.

use crate::domain::error::BleError;
use crate::domain::models::{DeviceAddress, Peripheral};

/// Availability of the local Bluetooth adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unavailable,
    Disabled,
    Ready,
}

/// GATT characteristic property flags we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CharacteristicProperties {
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

impl CharacteristicProperties {
    pub fn can_write(&self) -> bool {
        self.write || self.write_without_response
    }
}

/// Identifies one characteristic within the connected device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub service_uuid: String,
    pub uuid: String,
    /// ATT handle, disambiguates characteristics sharing a UUID
    pub handle: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub handle: CharacteristicHandle,
    pub properties: CharacteristicProperties,
    /// Descriptor UUIDs, lowercase
    pub descriptors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub uuid: String,
    pub characteristics: Vec<CharacteristicInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// Asynchronous GATT callbacks, in the order the platform produced them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    ConnectionStateChanged { status: i32, state: LinkState },
    ServicesDiscovered(Vec<ServiceInfo>),
    ServiceDiscoveryFailed { status: i32 },
    CharacteristicChanged {
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
    },
}

/// Identifies one `connect` call; callbacks of released sessions are stale
pub type SessionId = u64;

/// A [`GattEvent`] tagged with the session it was produced for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: SessionId,
    pub event: GattEvent,
}

impl SessionEvent {
    pub fn new(session: SessionId, event: GattEvent) -> Self {
        Self { session, event }
    }
}

/// Request side of a GATT client
///
/// Every method issues a request and returns immediately; completion arrives
/// later as a [`SessionEvent`] carrying the session passed to `connect`.
pub trait GattBackend: Send {
    fn adapter_state(&self) -> AdapterState;

    fn connect(&mut self, address: DeviceAddress, session: SessionId) -> Result<(), BleError>;

    fn discover_services(&mut self) -> Result<(), BleError>;

    /// Route value changes of `characteristic` to the event channel
    fn set_characteristic_notification(
        &mut self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), BleError>;

    fn write_descriptor(
        &mut self,
        characteristic: &CharacteristicHandle,
        descriptor_uuid: &str,
        value: &[u8],
    ) -> Result<(), BleError>;

    /// Queue a characteristic write. Ok means accepted for sending.
    fn write_characteristic(
        &mut self,
        characteristic: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), BleError>;

    fn disconnect(&mut self);

    /// Release every platform resource held for the session
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSettings {
    pub scan_mode: ScanMode,
    /// Zero reports every advertisement immediately
    pub report_delay_ms: u64,
}

impl ScanSettings {
    /// Maximise discovery rate and report each result as soon as seen
    pub fn low_latency() -> Self {
        Self {
            scan_mode: ScanMode::LowLatency,
            report_delay_ms: 0,
        }
    }
}

/// Callbacks delivered to a scan session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Result(Peripheral),
    BatchResults(Vec<Peripheral>),
    Failed(i32),
    /// Posted by the session's own auto-stop timer
    AutoStop { generation: u64 },
}

pub trait ScanBackend: Send {
    fn adapter_state(&self) -> AdapterState;

    fn start_scan(&mut self, settings: ScanSettings) -> Result<(), BleError>;

    fn stop_scan(&mut self) -> Result<(), BleError>;
}

/// Backend for platforms without a supported BLE stack
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl GattBackend for UnsupportedBackend {
    fn adapter_state(&self) -> AdapterState {
        AdapterState::Unavailable
    }

    fn connect(&mut self, _address: DeviceAddress, _session: SessionId) -> Result<(), BleError> {
        Err(BleError::AdapterUnavailable)
    }

    fn discover_services(&mut self) -> Result<(), BleError> {
        Err(BleError::AdapterUnavailable)
    }

    fn set_characteristic_notification(
        &mut self,
        _characteristic: &CharacteristicHandle,
        _enabled: bool,
    ) -> Result<(), BleError> {
        Err(BleError::AdapterUnavailable)
    }

    fn write_descriptor(
        &mut self,
        _characteristic: &CharacteristicHandle,
        _descriptor_uuid: &str,
        _value: &[u8],
    ) -> Result<(), BleError> {
        Err(BleError::AdapterUnavailable)
    }

    fn write_characteristic(
        &mut self,
        _characteristic: &CharacteristicHandle,
        _value: &[u8],
    ) -> Result<(), BleError> {
        Err(BleError::AdapterUnavailable)
    }

    fn disconnect(&mut self) {}

    fn close(&mut self) {}
}

impl ScanBackend for UnsupportedBackend {
    fn adapter_state(&self) -> AdapterState {
        AdapterState::Unavailable
    }

    fn start_scan(&mut self, _settings: ScanSettings) -> Result<(), BleError> {
        Err(BleError::AdapterUnavailable)
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        Ok(())
    }
}
