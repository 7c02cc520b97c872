use crate::domain::error::BleError;
use std::fmt;
use std::str::FromStr;

/// A radio device seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    /// Hardware address, unique key within a catalog
    pub address: String,
    /// Advertised name (may be absent or blank)
    pub name: Option<String>,
}

impl Peripheral {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }

    /// True if the device advertised a non-blank name
    pub fn has_name(&self) -> bool {
        self.name
            .as_deref()
            .map(|n| !n.trim().is_empty())
            .unwrap_or(false)
    }

    /// Name suitable for a device list
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => "Unknown Device",
        }
    }
}

/// A parsed BLE hardware address (`AA:BB:CC:DD:EE:FF`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// 48-bit integer form, most significant octet first
    pub fn as_u64(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
    }

    pub fn from_u64(raw: u64) -> Self {
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = (raw >> (8 * (5 - i))) as u8;
        }
        Self(octets)
    }
}

impl FromStr for DeviceAddress {
    type Err = BleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BleError::InvalidAddress(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// Lifecycle of the single GATT session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// A write channel is bound and commands can be sent
    ServicesReady,
}

/// Driving modes exposed by the scooter firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivingMode {
    Eco,
    Normal,
    Sport,
    Developer,
}

impl DrivingMode {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Eco => "ECO Mode - Maximum efficiency",
            Self::Normal => "Normal Mode - Balanced performance",
            Self::Sport => "Sport Mode - Maximum performance",
            Self::Developer => "Developer Mode - Advanced settings",
        }
    }
}

impl FromStr for DrivingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eco" => Ok(Self::Eco),
            "normal" => Ok(Self::Normal),
            "sport" => Ok(Self::Sport),
            "developer" | "dev" => Ok(Self::Developer),
            other => Err(format!("unknown driving mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Locked,
    Unlocked,
}

/// Events published by the connection manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    ConnectionFailed(BleError),
    ServicesDiscovered { has_both_channels: bool },
    DataReceived(Vec<u8>),
}

/// Events published by the scan session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUpdate {
    /// Filtered catalog contents after a change
    Devices(Vec<Peripheral>),
    Stopped,
    Failed(i32),
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    Connection(ConnectionEvent),
    Scan(ScanUpdate),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
