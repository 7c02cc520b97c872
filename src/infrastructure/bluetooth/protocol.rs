//! Scooter Command Protocol
//!
//! The scooter accepts ASCII-hex framed commands written to its UART-like
//! write characteristic. Frame families:
//!
//! ```text
//! D706A3 + mode (u16 BE) + checksum + 0D0A   mode select
//! D707A9 + payload                           speed limit
//! D707A0 + payload                           lock / unlock
//! D707A4 + payload                           ECO
//! ```
//!
//! Only the mode-select checksum is known: `(0xA9 + mode) mod 256`. The other
//! families are literal captures from real hardware and must stay literal.

use crate::domain::error::CodecError;
use crate::domain::models::{DrivingMode, LockState};
use std::fmt;

/// Client Characteristic Configuration Descriptor UUID
pub const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

/// Value written to the CCCD to enable notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

pub const MIN_SPEED_KMH: i32 = 8;
pub const MAX_SPEED_KMH: i32 = 30;
pub const MAX_ADVANCED_MODE: i32 = 254;

const ADVANCED_MODE_PREFIX: &str = "D706A3";
const ADVANCED_MODE_SUFFIX: &str = "0D0A";
const ADVANCED_MODE_CHECKSUM_BASE: i32 = 0xA9;

/// Speed limit frames by km/h, 8..=30
const SPEED_LIMIT_COMMANDS: [(i32, &str); 23] = [
    (8, "D707A900005000"),
    (9, "D707A900005A0A"),
    (10, "D707A900006414"),
    (11, "D707A900006E1E"),
    (12, "D707A900007828"),
    (13, "D707A900008232"),
    (14, "D707A900008C3C"),
    (15, "D707A900009646"),
    (16, "D707A90000A050"),
    (17, "D707A90000AA5A"),
    (18, "D707A90000B464"),
    (19, "D707A90000BE6E"),
    (20, "D707A90000C878"),
    (21, "D707A90000D282"),
    (22, "D707A90000DC8C"),
    (23, "D707A90000E696"),
    (24, "D707A90000F0A0"),
    (25, "D707A90000FAAA"),
    (26, "D707A9000104B5"),
    (27, "D707A900010EBF"),
    (28, "D707A9000118C9"),
    (29, "D707A9000122D3"),
    (30, "D707A900012CDD"),
];

/// One outbound protocol message as hex text
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WireCommand(String);

impl WireCommand {
    /// Parse user supplied hex. Whitespace is dropped and the result uppercased.
    pub fn from_hex(hex: &str) -> Result<Self, CodecError> {
        let bytes = hex_to_bytes(hex)?;
        Ok(Self(bytes_to_hex(&bytes)))
    }

    fn literal(hex: &'static str) -> Self {
        Self(hex.to_string())
    }

    pub fn as_hex(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        hex_to_bytes(&self.0)
    }
}

impl fmt::Display for WireCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for WireCommand {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

pub fn driving_mode_command(mode: DrivingMode) -> WireCommand {
    WireCommand::literal(match mode {
        DrivingMode::Eco => "D707A45A00005",
        DrivingMode::Normal => "D706A30001AA",
        DrivingMode::Sport => "D706A30002AB",
        DrivingMode::Developer => "D706A30003AC",
    })
}

pub fn lock_command(state: LockState) -> WireCommand {
    WireCommand::literal(match state {
        LockState::Locked => "D707A0000101A9",
        LockState::Unlocked => "D707A0000301AB",
    })
}

/// Speed limit frame. Out of range values fall back to 8 km/h.
pub fn speed_limit_command(speed_kmh: i32) -> WireCommand {
    let hex = SPEED_LIMIT_COMMANDS
        .iter()
        .find(|(speed, _)| *speed == speed_kmh)
        .map(|(_, hex)| *hex)
        .unwrap_or(SPEED_LIMIT_COMMANDS[0].1);
    WireCommand::literal(hex)
}

pub fn is_valid_speed(speed_kmh: i32) -> bool {
    (MIN_SPEED_KMH..=MAX_SPEED_KMH).contains(&speed_kmh)
}

/// Mode select frame for modes 0..=254, `None` otherwise
pub fn advanced_mode_command(mode: i32) -> Option<WireCommand> {
    if !is_valid_mode(mode) {
        return None;
    }
    Some(WireCommand(format!(
        "{}{:04X}{:02X}{}",
        ADVANCED_MODE_PREFIX,
        mode,
        advanced_mode_checksum(mode),
        ADVANCED_MODE_SUFFIX
    )))
}

fn advanced_mode_checksum(mode: i32) -> u8 {
    ((ADVANCED_MODE_CHECKSUM_BASE + mode) & 0xFF) as u8
}

pub fn is_valid_mode(mode: i32) -> bool {
    (0..=MAX_ADVANCED_MODE).contains(&mode)
}

/// Decode hex text, ignoring any whitespace
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, CodecError> {
    let cleaned: Vec<u8> = hex
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| {
            if c.is_ascii_hexdigit() {
                Ok(c as u8)
            } else {
                Err(CodecError::MalformedHex(hex.to_string()))
            }
        })
        .collect::<Result<_, _>>()?;

    if cleaned.len() % 2 != 0 {
        return Err(CodecError::MalformedHex(hex.to_string()));
    }

    Ok(cleaned
        .chunks_exact(2)
        .map(|pair| (nibble(pair[0]) << 4) | nibble(pair[1]))
        .collect())
}

fn nibble(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Uppercase hex, two digits per byte, no separators
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{:02X}", b);
        out
    })
}

/// A semantic command as chosen by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScooterCommand {
    DrivingMode(DrivingMode),
    Lock(LockState),
    SpeedLimit(i32),
    AdvancedMode(i32),
    Raw(String),
}

impl ScooterCommand {
    /// Encode, rejecting invalid selections instead of falling back to defaults
    pub fn encode(&self) -> Result<WireCommand, CodecError> {
        match self {
            Self::DrivingMode(mode) => Ok(driving_mode_command(*mode)),
            Self::Lock(state) => Ok(lock_command(*state)),
            Self::SpeedLimit(speed) if is_valid_speed(*speed) => Ok(speed_limit_command(*speed)),
            Self::SpeedLimit(speed) => Err(CodecError::InvalidSpeed(*speed)),
            Self::AdvancedMode(mode) => {
                advanced_mode_command(*mode).ok_or(CodecError::InvalidMode(*mode))
            }
            Self::Raw(hex) => WireCommand::from_hex(hex),
        }
    }
}
