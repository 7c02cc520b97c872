//! Error types for the scooter BLE core

use thiserror::Error;

/// Errors raised while encoding scooter commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed hex string: {0}")]
    MalformedHex(String),

    #[error("Mode {0} is outside 0..=254")]
    InvalidMode(i32),

    #[error("Speed {0} km/h is outside 8..=30")]
    InvalidSpeed(i32),
}

/// Errors surfaced by the connection manager and scan session
///
/// Everything except `AdapterUnavailable` is recoverable and normally reaches
/// callers as an event payload rather than an `Err`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("Bluetooth adapter not available")]
    AdapterUnavailable,

    #[error("Bluetooth is not enabled")]
    AdapterDisabled,

    #[error("Invalid device address: {0}")]
    InvalidAddress(String),

    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),

    #[error("Device does not expose a write/notify characteristic pair")]
    ServicesIncompatible,

    #[error("Malformed hex string: {0}")]
    MalformedHex(String),

    #[error("Transmit rejected: {0}")]
    TransmitRejected(String),

    #[error("Scan failed (error: {0})")]
    ScanFailed(i32),
}

impl From<CodecError> for BleError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::MalformedHex(hex) => BleError::MalformedHex(hex),
            other => BleError::TransmitRejected(other.to_string()),
        }
    }
}
