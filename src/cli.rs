//! Command-line arguments and the interactive console grammar

use crate::domain::error::CodecError;
use crate::domain::models::{DrivingMode, LockState};
use crate::infrastructure::bluetooth::protocol::ScooterCommand;
use crate::infrastructure::bluetooth::BluetoothCommand;
use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "scooter_ble_controller")]
#[command(author, version, about = "Scan for and control BLE scooter controllers", long_about = None)]
pub struct Args {
    /// Settings file path (defaults to the per-user config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Connect to this address at startup and remember it
    #[arg(short, long)]
    pub address: Option<String>,

    /// Do not reconnect to the last device at startup
    #[arg(long)]
    pub no_reconnect: bool,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,
}

const COMMANDS: &str = "\
Commands:
  scan [ms] [all]        scan for devices (all = include unnamed)
  stop                   stop scanning
  connect <address>      connect to AA:BB:CC:DD:EE:FF
  disconnect             drop the current connection
  mode <eco|normal|sport|developer>
  lock | unlock
  speed <8-30>           set the speed limit in km/h
  advanced <0-254>       select an advanced mode
  hex <HEX>              send raw hex bytes
  status                 show the connection state
  help                   show this text
  quit                   exit";

/// Console help, including what each driving mode does
pub fn help_text() -> String {
    let mut text = String::from(COMMANDS);
    text.push_str("\n\nDriving modes:");
    for mode in [
        DrivingMode::Eco,
        DrivingMode::Normal,
        DrivingMode::Sport,
        DrivingMode::Developer,
    ] {
        text.push_str("\n  ");
        text.push_str(mode.description());
    }
    text
}

/// Scan parameters used when `scan` has no arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanDefaults {
    pub duration_ms: u64,
    pub include_unnamed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Bluetooth(BluetoothCommand),
    Help,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}', type 'help' for a list")]
    Unknown(String),
    #[error("missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("invalid {name}: '{value}'")]
    InvalidArgument { name: &'static str, value: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_line(
    line: &str,
    defaults: ScanDefaults,
) -> Result<Option<ConsoleCommand>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(keyword) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match keyword.to_lowercase().as_str() {
        "scan" => scan_command(&rest, defaults)?,
        "stop" => BluetoothCommand::StopScan,
        "connect" => BluetoothCommand::Connect {
            address: rest
                .first()
                .ok_or(CommandError::MissingArgument("address"))?
                .to_string(),
            remember: true,
        },
        "disconnect" => BluetoothCommand::Disconnect,
        "mode" => {
            let name = rest.first().ok_or(CommandError::MissingArgument("mode"))?;
            let mode: DrivingMode = name.parse().map_err(|_| CommandError::InvalidArgument {
                name: "mode",
                value: name.to_string(),
            })?;
            encoded(ScooterCommand::DrivingMode(mode))?
        }
        "lock" => encoded(ScooterCommand::Lock(LockState::Locked))?,
        "unlock" => encoded(ScooterCommand::Lock(LockState::Unlocked))?,
        "speed" => {
            let speed = number(&rest, "speed")?;
            encoded(ScooterCommand::SpeedLimit(speed))?
        }
        "advanced" => {
            let mode = number(&rest, "mode")?;
            encoded(ScooterCommand::AdvancedMode(mode))?
        }
        "hex" => {
            if rest.is_empty() {
                return Err(CommandError::MissingArgument("hex"));
            }
            BluetoothCommand::SendHex(rest.concat())
        }
        "status" => BluetoothCommand::Status,
        "help" | "?" => return Ok(Some(ConsoleCommand::Help)),
        "quit" | "exit" => return Ok(Some(ConsoleCommand::Quit)),
        other => return Err(CommandError::Unknown(other.to_string())),
    };

    Ok(Some(ConsoleCommand::Bluetooth(command)))
}

fn scan_command(args: &[&str], defaults: ScanDefaults) -> Result<BluetoothCommand, CommandError> {
    let mut duration_ms = defaults.duration_ms;
    let mut include_unnamed = defaults.include_unnamed;

    for arg in args {
        if arg.eq_ignore_ascii_case("all") {
            include_unnamed = true;
        } else {
            duration_ms = arg.parse().map_err(|_| CommandError::InvalidArgument {
                name: "duration",
                value: arg.to_string(),
            })?;
        }
    }

    Ok(BluetoothCommand::StartScan {
        duration_ms,
        include_unnamed,
    })
}

fn number(args: &[&str], name: &'static str) -> Result<i32, CommandError> {
    let value = args.first().ok_or(CommandError::MissingArgument(name))?;
    value.parse().map_err(|_| CommandError::InvalidArgument {
        name,
        value: value.to_string(),
    })
}

fn encoded(command: ScooterCommand) -> Result<BluetoothCommand, CommandError> {
    Ok(BluetoothCommand::Send(command.encode()?))
}
