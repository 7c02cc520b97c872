//! WinRT BLE Backend
//!
//! WinRT objects live on one dedicated thread running a current-thread tokio
//! runtime. The backends handed to the core only post [`WinrtRequest`]s to
//! that thread, so every trait call returns immediately and results come back
//! as [`SessionEvent`]s / [`ScanEvent`]s.

use crate::domain::error::BleError;
use crate::domain::models::{DeviceAddress, Peripheral};
use crate::infrastructure::bluetooth::backend::{
    AdapterState, CharacteristicHandle, CharacteristicInfo, CharacteristicProperties,
    GattBackend, GattEvent, LinkState, ScanBackend, ScanEvent, ScanMode, ScanSettings,
    ServiceInfo, SessionEvent, SessionId,
};
use crate::infrastructure::bluetooth::protocol::{self, CCCD_UUID};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEAdvertisementWatcherStoppedEventArgs, BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{
    BluetoothAdapter, BluetoothConnectionStatus, BluetoothError, BluetoothLEDevice,
};
use windows::Devices::Radios::{Radio, RadioState};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// Status reported when a WinRT call fails without a GATT status
const STATUS_FAILURE: i32 = -1;

#[derive(Debug)]
enum WinrtRequest {
    Connect(u64, SessionId),
    DiscoverServices,
    SetNotification(CharacteristicHandle, bool),
    WriteCccd(CharacteristicHandle, GattClientCharacteristicConfigurationDescriptorValue),
    Write(CharacteristicHandle, Vec<u8>),
    Disconnect,
    Close,
    StartScan(ScanSettings),
    StopScan,
}

/// Start the WinRT worker thread and probe the adapter
pub async fn start(
    gatt_events: mpsc::UnboundedSender<SessionEvent>,
    scan_events: mpsc::UnboundedSender<ScanEvent>,
) -> Result<(WinrtGattBackend, WinrtScanBackend)> {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel();
    let adapter = Arc::new(Mutex::new(AdapterState::Unavailable));
    let (ready_tx, ready_rx) = oneshot::channel();
    let worker_adapter = adapter.clone();

    std::thread::Builder::new()
        .name("winrt-ble".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("Failed to create tokio runtime for Bluetooth: {}", e);
                    return;
                }
            };

            rt.block_on(async move {
                let mut worker = Worker::new(gatt_events, scan_events, worker_adapter);
                worker.probe_adapter().await;
                let _ = ready_tx.send(());

                while let Some(request) = request_rx.recv().await {
                    worker.handle(request).await;
                }

                worker.stop_scan();
                worker.close();
            });
        })?;

    ready_rx
        .await
        .map_err(|_| anyhow::anyhow!("Bluetooth worker exited during startup"))?;

    Ok((
        WinrtGattBackend {
            requests: request_tx.clone(),
            adapter: adapter.clone(),
        },
        WinrtScanBackend {
            requests: request_tx,
            adapter,
        },
    ))
}

fn current_state(adapter: &Arc<Mutex<AdapterState>>) -> AdapterState {
    adapter
        .lock()
        .map(|state| *state)
        .unwrap_or(AdapterState::Unavailable)
}

fn post(
    requests: &mpsc::UnboundedSender<WinrtRequest>,
    request: WinrtRequest,
) -> Result<(), BleError> {
    requests
        .send(request)
        .map_err(|_| BleError::AdapterUnavailable)
}

pub struct WinrtGattBackend {
    requests: mpsc::UnboundedSender<WinrtRequest>,
    adapter: Arc<Mutex<AdapterState>>,
}

impl GattBackend for WinrtGattBackend {
    fn adapter_state(&self) -> AdapterState {
        current_state(&self.adapter)
    }

    fn connect(&mut self, address: DeviceAddress, session: SessionId) -> Result<(), BleError> {
        post(&self.requests, WinrtRequest::Connect(address.as_u64(), session))
            .map_err(|e| BleError::ConnectionFailed(e.to_string()))
    }

    fn discover_services(&mut self) -> Result<(), BleError> {
        post(&self.requests, WinrtRequest::DiscoverServices)
    }

    fn set_characteristic_notification(
        &mut self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), BleError> {
        post(
            &self.requests,
            WinrtRequest::SetNotification(characteristic.clone(), enabled),
        )
    }

    fn write_descriptor(
        &mut self,
        characteristic: &CharacteristicHandle,
        descriptor_uuid: &str,
        value: &[u8],
    ) -> Result<(), BleError> {
        if !descriptor_uuid.eq_ignore_ascii_case(CCCD_UUID) {
            return Err(BleError::TransmitRejected(format!(
                "descriptor {} is not writable through WinRT",
                descriptor_uuid
            )));
        }

        let cccd = match value.first().copied().unwrap_or(0) {
            0x01 => GattClientCharacteristicConfigurationDescriptorValue::Notify,
            0x02 => GattClientCharacteristicConfigurationDescriptorValue::Indicate,
            _ => GattClientCharacteristicConfigurationDescriptorValue::None,
        };
        post(
            &self.requests,
            WinrtRequest::WriteCccd(characteristic.clone(), cccd),
        )
    }

    fn write_characteristic(
        &mut self,
        characteristic: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), BleError> {
        post(
            &self.requests,
            WinrtRequest::Write(characteristic.clone(), value.to_vec()),
        )
        .map_err(|e| BleError::TransmitRejected(e.to_string()))
    }

    fn disconnect(&mut self) {
        let _ = post(&self.requests, WinrtRequest::Disconnect);
    }

    fn close(&mut self) {
        let _ = post(&self.requests, WinrtRequest::Close);
    }
}

pub struct WinrtScanBackend {
    requests: mpsc::UnboundedSender<WinrtRequest>,
    adapter: Arc<Mutex<AdapterState>>,
}

impl ScanBackend for WinrtScanBackend {
    fn adapter_state(&self) -> AdapterState {
        current_state(&self.adapter)
    }

    fn start_scan(&mut self, settings: ScanSettings) -> Result<(), BleError> {
        post(&self.requests, WinrtRequest::StartScan(settings))
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        post(&self.requests, WinrtRequest::StopScan)
    }
}

/// Owns every WinRT object; only ever touched from the worker thread
struct Worker {
    gatt_events: mpsc::UnboundedSender<SessionEvent>,
    scan_events: mpsc::UnboundedSender<ScanEvent>,
    adapter: Arc<Mutex<AdapterState>>,
    /// Session of the most recent connect; tags every GATT callback
    session: SessionId,
    radio: Option<Radio>,
    device: Option<BluetoothLEDevice>,
    gatt_session: Option<GattSession>,
    characteristics: HashMap<u16, GattCharacteristic>,
    watcher: Option<BluetoothLEAdvertisementWatcher>,
}

impl Worker {
    fn new(
        gatt_events: mpsc::UnboundedSender<SessionEvent>,
        scan_events: mpsc::UnboundedSender<ScanEvent>,
        adapter: Arc<Mutex<AdapterState>>,
    ) -> Self {
        Self {
            gatt_events,
            scan_events,
            adapter,
            session: 0,
            radio: None,
            device: None,
            gatt_session: None,
            characteristics: HashMap::new(),
            watcher: None,
        }
    }

    async fn handle(&mut self, request: WinrtRequest) {
        match request {
            WinrtRequest::Connect(address, session) => {
                self.session = session;
                self.connect(address).await
            }
            WinrtRequest::DiscoverServices => match self.read_services().await {
                Ok(services) => self.emit(GattEvent::ServicesDiscovered(services)),
                Err(e) => {
                    error!("Failed to get GATT services: {}", e);
                    self.emit(GattEvent::ServiceDiscoveryFailed {
                        status: STATUS_FAILURE,
                    });
                }
            },
            WinrtRequest::SetNotification(handle, enabled) => {
                if let Err(e) = self.set_notification(&handle, enabled) {
                    error!("Error enabling notifications: {}", e);
                }
            }
            WinrtRequest::WriteCccd(handle, value) => {
                if let Err(e) = self.write_cccd(&handle, value).await {
                    warn!("Notification subscription failed: {}", e);
                }
            }
            WinrtRequest::Write(handle, bytes) => {
                if let Err(e) = self.write(&handle, &bytes) {
                    error!("Failed to write characteristic: {}", e);
                }
            }
            WinrtRequest::Disconnect | WinrtRequest::Close => self.close(),
            WinrtRequest::StartScan(settings) => {
                if let Err(e) = self.start_scan(settings) {
                    error!("Failed to start scan: {}", e);
                    let _ = self.scan_events.send(ScanEvent::Failed(STATUS_FAILURE));
                }
            }
            WinrtRequest::StopScan => self.stop_scan(),
        }
    }

    fn emit(&self, event: GattEvent) {
        let _ = self.gatt_events.send(SessionEvent::new(self.session, event));
    }

    async fn probe_adapter(&mut self) {
        let state = match self.open_radio().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Bluetooth adapter not available: {}", e);
                AdapterState::Unavailable
            }
        };
        info!("Bluetooth adapter state: {:?}", state);
        if let Ok(mut shared) = self.adapter.lock() {
            *shared = state;
        }
    }

    async fn open_radio(&mut self) -> Result<AdapterState> {
        let adapter = BluetoothAdapter::GetDefaultAsync()?.await?;
        if !adapter.IsLowEnergySupported()? {
            return Ok(AdapterState::Unavailable);
        }

        let radio = adapter.GetRadioAsync()?.await?;
        let state = radio_state(&radio);

        // Keep the shared state in sync when the user toggles Bluetooth
        let shared = self.adapter.clone();
        let handler = TypedEventHandler::new(move |radio: windows::core::Ref<Radio>, _| {
            if let Some(radio) = radio.as_ref() {
                let state = radio_state(radio);
                debug!("Radio state changed: {:?}", state);
                if let Ok(mut current) = shared.lock() {
                    *current = state;
                }
            }
            Ok(())
        });
        radio.StateChanged(&handler)?;
        self.radio = Some(radio);

        Ok(state)
    }

    async fn connect(&mut self, address: u64) {
        self.close();
        info!("Connecting to Bluetooth device: {:#X}", address);

        match self.open_device(address).await {
            Ok(()) => self.emit(GattEvent::ConnectionStateChanged {
                status: 0,
                state: LinkState::Connected,
            }),
            Err(e) => {
                error!("Connection failed: {}", e);
                self.close();
                self.emit(GattEvent::ConnectionStateChanged {
                    status: STATUS_FAILURE,
                    state: LinkState::Disconnected,
                });
            }
        }
    }

    async fn open_device(&mut self, address: u64) -> Result<()> {
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
        info!("Device connected: {:?}", device.Name()?);

        // A GattSession with MaintainConnection keeps Windows from dropping the link
        match Self::create_gatt_session(&device).await {
            Ok(session) => self.gatt_session = Some(session),
            Err(e) => warn!("Failed to create GattSession, continuing anyway: {}", e),
        }

        let sender = self.gatt_events.clone();
        let session = self.session;
        let status_handler =
            TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
                if let Some(dev) = dev.as_ref() {
                    if let Ok(status) = dev.ConnectionStatus() {
                        let state = if status == BluetoothConnectionStatus::Connected {
                            LinkState::Connected
                        } else {
                            LinkState::Disconnected
                        };
                        let _ = sender.send(SessionEvent::new(
                            session,
                            GattEvent::ConnectionStateChanged { status: 0, state },
                        ));
                    }
                }
                Ok(())
            });
        device.ConnectionStatusChanged(&status_handler)?;

        self.device = Some(device);
        Ok(())
    }

    async fn create_gatt_session(device: &BluetoothLEDevice) -> Result<GattSession> {
        let device_id = device.BluetoothDeviceId()?;
        let session = GattSession::FromDeviceIdAsync(&device_id)?.await?;
        session.SetMaintainConnection(true)?;
        Ok(session)
    }

    async fn read_services(&mut self) -> Result<Vec<ServiceInfo>> {
        let device = self
            .device
            .clone()
            .ok_or_else(|| anyhow::anyhow!("No device connected"))?;

        let services_result = device.GetGattServicesAsync()?.await?;
        if services_result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!("GATT status {:?}", services_result.Status()?);
        }

        self.characteristics.clear();
        let services = services_result.Services()?;
        let mut infos = Vec::new();

        for i in 0..services.Size()? {
            let service = services.GetAt(i)?;
            let service_uuid = guid_to_string(&service.Uuid()?);

            let chars_result = service.GetCharacteristicsAsync()?.await?;
            if chars_result.Status()? != GattCommunicationStatus::Success {
                warn!("Could not read characteristics of service {}", service_uuid);
                continue;
            }

            let characteristics = chars_result.Characteristics()?;
            let mut chars = Vec::new();
            for j in 0..characteristics.Size()? {
                let c = characteristics.GetAt(j)?;
                let handle = CharacteristicHandle {
                    service_uuid: service_uuid.clone(),
                    uuid: guid_to_string(&c.Uuid()?),
                    handle: c.AttributeHandle()?,
                };
                let properties = map_properties(c.CharacteristicProperties()?);
                let descriptors = Self::descriptor_uuids(&c).await.unwrap_or_else(|e| {
                    debug!("No descriptors for {}: {}", handle.uuid, e);
                    Vec::new()
                });

                self.characteristics.insert(handle.handle, c);
                chars.push(CharacteristicInfo {
                    handle,
                    properties,
                    descriptors,
                });
            }

            info!(
                "Found service {} with {} characteristics",
                service_uuid,
                chars.len()
            );
            infos.push(ServiceInfo {
                uuid: service_uuid,
                characteristics: chars,
            });
        }

        Ok(infos)
    }

    async fn descriptor_uuids(characteristic: &GattCharacteristic) -> Result<Vec<String>> {
        let result = characteristic.GetDescriptorsAsync()?.await?;
        if result.Status()? != GattCommunicationStatus::Success {
            anyhow::bail!("GATT status {:?}", result.Status()?);
        }

        let descriptors = result.Descriptors()?;
        let mut uuids = Vec::new();
        for i in 0..descriptors.Size()? {
            uuids.push(guid_to_string(&descriptors.GetAt(i)?.Uuid()?));
        }
        Ok(uuids)
    }

    fn characteristic(&self, handle: &CharacteristicHandle) -> Result<&GattCharacteristic> {
        self.characteristics
            .get(&handle.handle)
            .ok_or_else(|| anyhow::anyhow!("Unknown characteristic {}", handle.uuid))
    }

    fn set_notification(&self, handle: &CharacteristicHandle, enabled: bool) -> Result<()> {
        if !enabled {
            return Ok(());
        }

        let characteristic = self.characteristic(handle)?;
        let sender = self.gatt_events.clone();
        let session = self.session;
        let source = handle.clone();
        let data_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    if let Ok(value) = args.CharacteristicValue() {
                        if let Ok(bytes) = read_buffer(&value) {
                            let _ = sender.send(SessionEvent::new(
                                session,
                                GattEvent::CharacteristicChanged {
                                    characteristic: source.clone(),
                                    value: bytes,
                                },
                            ));
                        }
                    }
                }
                Ok(())
            },
        );
        characteristic.ValueChanged(&data_handler)?;
        Ok(())
    }

    async fn write_cccd(
        &self,
        handle: &CharacteristicHandle,
        value: GattClientCharacteristicConfigurationDescriptorValue,
    ) -> Result<()> {
        let characteristic = self.characteristic(handle)?.clone();
        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(value)?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("CCCD write returned status {:?}", status);
        }
        debug!("Notifications enabled for characteristic {}", handle.uuid);
        Ok(())
    }

    fn write(&self, handle: &CharacteristicHandle, bytes: &[u8]) -> Result<()> {
        let characteristic = self.characteristic(handle)?;
        let writer = DataWriter::new()?;
        writer.WriteBytes(bytes)?;
        let buffer = writer.DetachBuffer()?;

        // Fire-and-forget write
        let _ = characteristic.WriteValueAsync(&buffer)?;
        debug!("Queued write of {}", protocol::bytes_to_hex(bytes));
        Ok(())
    }

    fn close(&mut self) {
        self.characteristics.clear();
        if let Some(session) = self.gatt_session.take() {
            let _ = session.Close();
        }
        if let Some(device) = self.device.take() {
            let _ = device.Close();
            info!("Closed Bluetooth device");
        }
    }

    fn start_scan(&mut self, settings: ScanSettings) -> Result<()> {
        self.stop_scan();

        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        let mode = match settings.scan_mode {
            ScanMode::LowPower => BluetoothLEScanningMode::Passive,
            ScanMode::Balanced | ScanMode::LowLatency => BluetoothLEScanningMode::Active,
        };
        watcher.SetScanningMode(mode)?;

        let sender = self.scan_events.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let name = adv.LocalName()?.to_string();
                    let address = DeviceAddress::from_u64(args.BluetoothAddress()?);
                    let peripheral = Peripheral::new(
                        address.to_string(),
                        if name.is_empty() { None } else { Some(name) },
                    );
                    let _ = sender.send(ScanEvent::Result(peripheral));
                }
                Ok(())
            },
        );
        watcher.Received(&handler)?;

        let sender = self.scan_events.clone();
        let stopped_handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementWatcherStoppedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let error = args.Error()?;
                    if error != BluetoothError::Success {
                        let _ = sender.send(ScanEvent::Failed(error.0));
                    }
                }
                Ok(())
            },
        );
        watcher.Stopped(&stopped_handler)?;

        watcher.Start()?;
        self.watcher = Some(watcher);
        info!("Advertisement watcher started ({:?})", settings.scan_mode);
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            if let Err(e) = watcher.Stop() {
                error!("Error stopping scan: {}", e);
            }
        }
    }
}

fn radio_state(radio: &Radio) -> AdapterState {
    match radio.State() {
        Ok(RadioState::On) => AdapterState::Ready,
        Ok(_) => AdapterState::Disabled,
        Err(_) => AdapterState::Unavailable,
    }
}

fn map_properties(props: GattCharacteristicProperties) -> CharacteristicProperties {
    let has = |flag: GattCharacteristicProperties| props.0 & flag.0 != 0;
    CharacteristicProperties {
        write: has(GattCharacteristicProperties::Write),
        write_without_response: has(GattCharacteristicProperties::WriteWithoutResponse),
        notify: has(GattCharacteristicProperties::Notify),
    }
}

fn read_buffer(buffer: &IBuffer) -> Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

/// Lowercase 8-4-4-4-12 form, matching the UUID constants in `protocol`
fn guid_to_string(guid: &GUID) -> String {
    format!(
        "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        guid.data1,
        guid.data2,
        guid.data3,
        guid.data4[0],
        guid.data4[1],
        guid.data4[2],
        guid.data4[3],
        guid.data4[4],
        guid.data4[5],
        guid.data4[6],
        guid.data4[7]
    )
}
