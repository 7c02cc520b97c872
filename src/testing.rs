//! Scripted in-memory backends for unit tests

use crate::domain::error::BleError;
use crate::domain::models::DeviceAddress;
use crate::infrastructure::bluetooth::backend::{
    AdapterState, CharacteristicHandle, CharacteristicInfo, CharacteristicProperties,
    GattBackend, ScanBackend, ScanSettings, ServiceInfo, SessionId,
};
use std::sync::{Arc, Mutex};

/// A request issued to a mock backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Connect(String),
    DiscoverServices,
    SetNotification(CharacteristicHandle, bool),
    WriteDescriptor(CharacteristicHandle, String, Vec<u8>),
    Write(CharacteristicHandle, Vec<u8>),
    Disconnect,
    Close,
    StartScan(ScanSettings),
    StopScan,
}

#[derive(Debug)]
struct MockState {
    adapter: AdapterState,
    reject_connect: bool,
    reject_writes: bool,
    reject_scan: bool,
    requests: Vec<Request>,
}

/// Shared handle used by tests to script and inspect a mock backend
#[derive(Debug, Clone)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn requests(&self) -> Vec<Request> {
        self.0.lock().unwrap().requests.clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().requests.clear();
    }

    pub fn set_adapter(&self, adapter: AdapterState) {
        self.0.lock().unwrap().adapter = adapter;
    }

    pub fn reject_connect(&self, reject: bool) {
        self.0.lock().unwrap().reject_connect = reject;
    }

    pub fn reject_writes(&self, reject: bool) {
        self.0.lock().unwrap().reject_writes = reject;
    }

    pub fn reject_scan(&self, reject: bool) {
        self.0.lock().unwrap().reject_scan = reject;
    }

    fn record(&self, request: Request) {
        self.0.lock().unwrap().requests.push(request);
    }
}

pub struct MockBackend {
    handle: MockHandle,
}

impl MockBackend {
    pub fn new() -> (Self, MockHandle) {
        Self::with_adapter(AdapterState::Ready)
    }

    pub fn with_adapter(adapter: AdapterState) -> (Self, MockHandle) {
        let handle = MockHandle(Arc::new(Mutex::new(MockState {
            adapter,
            reject_connect: false,
            reject_writes: false,
            reject_scan: false,
            requests: Vec::new(),
        })));
        (
            Self {
                handle: handle.clone(),
            },
            handle,
        )
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.handle.0.lock().unwrap()
    }
}

impl GattBackend for MockBackend {
    fn adapter_state(&self) -> AdapterState {
        self.state().adapter
    }

    fn connect(&mut self, address: DeviceAddress, _session: SessionId) -> Result<(), BleError> {
        self.handle.record(Request::Connect(address.to_string()));
        if self.state().reject_connect {
            return Err(BleError::ConnectionFailed("refused by mock".into()));
        }
        Ok(())
    }

    fn discover_services(&mut self) -> Result<(), BleError> {
        self.handle.record(Request::DiscoverServices);
        Ok(())
    }

    fn set_characteristic_notification(
        &mut self,
        characteristic: &CharacteristicHandle,
        enabled: bool,
    ) -> Result<(), BleError> {
        self.handle
            .record(Request::SetNotification(characteristic.clone(), enabled));
        Ok(())
    }

    fn write_descriptor(
        &mut self,
        characteristic: &CharacteristicHandle,
        descriptor_uuid: &str,
        value: &[u8],
    ) -> Result<(), BleError> {
        self.handle.record(Request::WriteDescriptor(
            characteristic.clone(),
            descriptor_uuid.to_string(),
            value.to_vec(),
        ));
        Ok(())
    }

    fn write_characteristic(
        &mut self,
        characteristic: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), BleError> {
        if self.state().reject_writes {
            return Err(BleError::TransmitRejected("busy".into()));
        }
        self.handle
            .record(Request::Write(characteristic.clone(), value.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.handle.record(Request::Disconnect);
    }

    fn close(&mut self) {
        self.handle.record(Request::Close);
    }
}

impl ScanBackend for MockBackend {
    fn adapter_state(&self) -> AdapterState {
        self.state().adapter
    }

    fn start_scan(&mut self, settings: ScanSettings) -> Result<(), BleError> {
        self.handle.record(Request::StartScan(settings));
        if self.state().reject_scan {
            return Err(BleError::ScanFailed(1));
        }
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), BleError> {
        self.handle.record(Request::StopScan);
        Ok(())
    }
}

pub fn characteristic(
    service: &str,
    uuid: &str,
    handle: u16,
    properties: CharacteristicProperties,
    with_cccd: bool,
) -> CharacteristicInfo {
    CharacteristicInfo {
        handle: CharacteristicHandle {
            service_uuid: service.to_string(),
            uuid: uuid.to_string(),
            handle,
        },
        properties,
        descriptors: if with_cccd {
            vec![crate::infrastructure::bluetooth::protocol::CCCD_UUID.to_string()]
        } else {
            Vec::new()
        },
    }
}

pub const WRITE: CharacteristicProperties = CharacteristicProperties {
    write: true,
    write_without_response: false,
    notify: false,
};

pub const WRITE_NO_RESPONSE: CharacteristicProperties = CharacteristicProperties {
    write: false,
    write_without_response: true,
    notify: false,
};

pub const NOTIFY: CharacteristicProperties = CharacteristicProperties {
    write: false,
    write_without_response: false,
    notify: true,
};

pub const READ_ONLY: CharacteristicProperties = CharacteristicProperties {
    write: false,
    write_without_response: false,
    notify: false,
};

/// Typical UART-like service: one write and one notify characteristic
pub fn uart_service() -> ServiceInfo {
    let svc = "0000ffe0-0000-1000-8000-00805f9b34fb";
    ServiceInfo {
        uuid: svc.to_string(),
        characteristics: vec![
            characteristic(svc, "0000ffe1-0000-1000-8000-00805f9b34fb", 0x10, NOTIFY, true),
            characteristic(svc, "0000ffe2-0000-1000-8000-00805f9b34fb", 0x13, WRITE, false),
        ],
    }
}
