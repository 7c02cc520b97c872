//! BLE Scanner Module
//!
//! Timed discovery scan feeding the device catalog.

use crate::domain::catalog::DeviceCatalog;
use crate::domain::error::BleError;
use crate::domain::models::{Peripheral, ScanUpdate};
use crate::infrastructure::bluetooth::backend::{
    AdapterState, ScanBackend, ScanEvent, ScanSettings,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// One discovery scan at a time, with an optional auto-stop timer
pub struct ScanSession {
    backend: Box<dyn ScanBackend>,
    catalog: DeviceCatalog,
    /// Loop-back sender for the auto-stop timer
    events: mpsc::UnboundedSender<ScanEvent>,
    listeners: Vec<mpsc::UnboundedSender<ScanUpdate>>,
    running: bool,
    include_unnamed: bool,
    generation: u64,
    auto_stop: Option<JoinHandle<()>>,
}

impl ScanSession {
    /// `events` must feed back into [`ScanSession::handle_event`]
    pub fn new(backend: Box<dyn ScanBackend>, events: mpsc::UnboundedSender<ScanEvent>) -> Self {
        Self {
            backend,
            catalog: DeviceCatalog::new(),
            events,
            listeners: Vec::new(),
            running: false,
            include_unnamed: false,
            generation: 0,
            auto_stop: None,
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ScanUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Start scanning. A `duration_ms` of zero runs until [`ScanSession::stop`].
    ///
    /// Does nothing if a scan is already running. Fails without touching the
    /// catalog when the adapter is missing or switched off. The auto-stop
    /// timer is a tokio task, so a non-zero duration needs a runtime.
    pub fn start(&mut self, duration_ms: u64, include_unnamed: bool) -> Result<(), BleError> {
        if self.running {
            debug!("Scan already running, ignoring start request");
            return Ok(());
        }

        match self.backend.adapter_state() {
            AdapterState::Unavailable => {
                error!("Bluetooth adapter not available");
                return Err(BleError::AdapterUnavailable);
            }
            AdapterState::Disabled => {
                warn!("Bluetooth is disabled");
                return Err(BleError::AdapterDisabled);
            }
            AdapterState::Ready => {}
        }

        self.catalog.reset();
        self.include_unnamed = include_unnamed;

        info!("Starting BLE scan");
        self.backend.start_scan(ScanSettings::low_latency())?;
        self.running = true;
        self.generation += 1;

        if duration_ms > 0 {
            let events = self.events.clone();
            let generation = self.generation;
            self.auto_stop = Some(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(duration_ms)).await;
                let _ = events.send(ScanEvent::AutoStop { generation });
            }));
        }
        Ok(())
    }

    /// Stop scanning. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(timer) = self.auto_stop.take() {
            timer.abort();
        }
        if !self.running {
            return;
        }

        self.running = false;
        if let Err(e) = self.backend.stop_scan() {
            error!("Error stopping scan: {}", e);
        }
        info!("Scan stopped");
        self.publish(ScanUpdate::Stopped);
    }

    pub fn handle_event(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::Result(peripheral) => {
                if self.running && self.record(peripheral) {
                    self.publish_devices();
                }
            }
            ScanEvent::BatchResults(peripherals) => {
                if !self.running {
                    return;
                }
                debug!("Batch scan results: {} devices", peripherals.len());
                let mut changed = false;
                for peripheral in peripherals {
                    changed |= self.record(peripheral);
                }
                if changed {
                    self.publish_devices();
                }
            }
            ScanEvent::Failed(code) => {
                error!("Scan failed with error code: {}", code);
                self.stop();
                self.publish(ScanUpdate::Failed(code));
            }
            ScanEvent::AutoStop { generation } => {
                if generation == self.generation && self.running {
                    info!("Scan period elapsed");
                    self.auto_stop = None;
                    self.stop();
                }
            }
        }
    }

    fn record(&mut self, peripheral: Peripheral) -> bool {
        debug!(
            "Device found: name={:?}, address={}",
            peripheral.name, peripheral.address
        );
        self.catalog.upsert(peripheral)
    }

    fn publish_devices(&mut self) {
        let devices: Vec<Peripheral> = self
            .catalog
            .filtered_view(self.include_unnamed)
            .cloned()
            .collect();
        self.publish(ScanUpdate::Devices(devices));
    }

    fn publish(&mut self, update: ScanUpdate) {
        self.listeners.retain(|tx| tx.send(update.clone()).is_ok());
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        if self.running {
            warn!("Scan session dropped while running");
        }
        self.stop();
    }
}
