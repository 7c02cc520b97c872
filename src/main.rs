use anyhow::Context;
use clap::Parser;
use scooter_ble::cli::{help_text, parse_line, Args, ConsoleCommand, ScanDefaults};
use scooter_ble::domain::models::{AppEvent, ConnectionEvent, MessageSeverity, ScanUpdate};
use scooter_ble::domain::settings::SettingsService;
use scooter_ble::infrastructure::bluetooth::protocol::bytes_to_hex;
use scooter_ble::infrastructure::bluetooth::{Backends, BluetoothCommand, BluetoothService};
use scooter_ble::infrastructure::logging::init_logger;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings_service = match &args.config {
        Some(path) => SettingsService::with_path(path)?,
        None => SettingsService::new()?,
    };
    if let Some(level) = &args.log_level {
        settings_service.get_mut().log_settings.level = level.clone();
    }

    let _log_guard = init_logger(&settings_service.get().log_settings)?;
    info!("Starting Scooter BLE Controller");
    info!("Settings file: {}", settings_service.path().display());

    let settings = settings_service.get().clone();
    let settings_service = Arc::new(Mutex::new(settings_service));

    let backends = Backends::platform()
        .await
        .context("Failed to start the Bluetooth backend")?;
    let (event_sender, mut events) = mpsc::unbounded_channel();
    let service = match BluetoothService::new(backends, event_sender, settings_service) {
        Ok(service) => service,
        Err(e) => {
            error!("Bluetooth unavailable: {}", e);
            anyhow::bail!("Bluetooth is not available on this device");
        }
    };

    let (commands, command_rx) = mpsc::unbounded_channel();
    let service_task = tokio::spawn(service.run(command_rx));

    if let Some(address) = args.address {
        let _ = commands.send(BluetoothCommand::Connect {
            address,
            remember: true,
        });
    } else if settings.auto_reconnect && !args.no_reconnect {
        if let Some(address) = settings.last_device_address.clone() {
            info!("Reconnecting to last device {}", address);
            let _ = commands.send(BluetoothCommand::Connect {
                address,
                remember: false,
            });
        }
    }

    let defaults = ScanDefaults {
        duration_ms: settings.scan_duration_ms,
        include_unnamed: settings.scan_include_unnamed,
    };
    println!("Type 'help' for a list of commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line, defaults) {
                    Ok(Some(ConsoleCommand::Bluetooth(command))) => {
                        if commands.send(command).is_err() {
                            break;
                        }
                    }
                    Ok(Some(ConsoleCommand::Help)) => println!("{}", help_text()),
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(None) => {}
                    Err(e) => eprintln!("{}", e),
                }
            }
            Some(event) = events.recv() => print_event(&event),
        }
    }

    let _ = commands.send(BluetoothCommand::Shutdown);
    service_task.await?;
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    info!("Scooter BLE Controller stopped");
    Ok(())
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::Connection(ConnectionEvent::Connected) => {
            println!("Connected, discovering services...")
        }
        AppEvent::Connection(ConnectionEvent::Disconnected) => println!("Disconnected"),
        AppEvent::Connection(ConnectionEvent::ConnectionFailed(e)) => {
            println!("Connection failed: {}", e)
        }
        AppEvent::Connection(ConnectionEvent::ServicesDiscovered { has_both_channels }) => {
            if *has_both_channels {
                println!("Ready");
            } else {
                println!("Services discovered, write/notify pair incomplete");
            }
        }
        AppEvent::Connection(ConnectionEvent::DataReceived(bytes)) => {
            println!("RX {}", bytes_to_hex(bytes))
        }
        AppEvent::Scan(ScanUpdate::Devices(devices)) => {
            println!("{} device(s):", devices.len());
            for device in devices {
                println!("  {:<17}  {}", device.address, device.display_name());
            }
        }
        AppEvent::Scan(ScanUpdate::Stopped) => println!("Scan stopped"),
        AppEvent::Scan(ScanUpdate::Failed(code)) => println!("Scan failed (code {})", code),
        AppEvent::LogMessage(message) => {
            let tag = match message.severity {
                MessageSeverity::Info => "info",
                MessageSeverity::Success => "ok",
                MessageSeverity::Warning => "warn",
                MessageSeverity::Error => "error",
            };
            println!("[{}] {}", tag, message.message);
        }
    }
}
