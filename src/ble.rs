//! btleplug-backed [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{DeviceInfo, EventSink, MtuOutcome, ServiceInfo, Transport, TransportEvent};

/// BLE link to a badge through the first local adapter.
pub struct BleTransport {
    adapter: Adapter,
    peripheral: Mutex<Option<Peripheral>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
}

impl BleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Unavailable("no Bluetooth adapter found".into()))?;
        Ok(Self::with_adapter(adapter))
    }

    pub fn with_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            peripheral: Mutex::new(None),
            scan_task: Mutex::new(None),
            watch_task: Mutex::new(None),
        }
    }

    /// Scans for `duration` and lists every peripheral the adapter knows about.
    pub async fn scan_for(&self, duration: Duration) -> Result<Vec<DeviceInfo>, TransportError> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;
        let peripherals = self.adapter.peripherals().await?;
        if let Err(error) = self.adapter.stop_scan().await {
            tracing::debug!(%error, "stop scan failed");
        }
        let mut devices = Vec::with_capacity(peripherals.len());
        for p in &peripherals {
            devices.push(device_info(p).await);
        }
        Ok(devices)
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral, TransportError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| device_id(p).eq_ignore_ascii_case(address))
            .ok_or_else(|| TransportError::DeviceNotFound(address.to_string()))
    }

    async fn current(&self) -> Result<Peripheral, TransportError> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or(TransportError::NotConnected)
    }
}

fn device_id(p: &Peripheral) -> String {
    p.address().to_string()
}

async fn device_info(p: &Peripheral) -> DeviceInfo {
    let props = p.properties().await.ok().flatten();
    DeviceInfo {
        id: device_id(p),
        name: props.as_ref().and_then(|props| props.local_name.clone()),
        rssi: props.as_ref().and_then(|props| props.rssi),
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn start_scan(&self, sink: EventSink) -> Result<(), TransportError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if sink.is_closed() {
                    break;
                }
                if let CentralEvent::DeviceDiscovered(id) = event {
                    if let Ok(p) = adapter.peripheral(&id).await {
                        sink.emit(TransportEvent::ScanHit(device_info(&p).await));
                    }
                }
            }
        });
        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), TransportError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn connect(&self, address: &str, sink: EventSink) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral(address).await?;
        let mut events = self.adapter.events().await?;
        peripheral.connect().await?;

        let id = peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if matches!(&event, CentralEvent::DeviceDisconnected(gone) if *gone == id) {
                    sink.emit(TransportEvent::Disconnected);
                    break;
                }
            }
        });
        *self.peripheral.lock().await = Some(peripheral);
        if let Some(previous) = self.watch_task.lock().await.replace(watcher) {
            previous.abort();
        }
        tracing::info!(address, "connected");
        Ok(())
    }

    async fn request_mtu(&self, mtu: u16) -> MtuOutcome {
        // btleplug negotiates (or not) on its own and does not report the result
        tracing::debug!(mtu, "mtu request not supported by backend");
        MtuOutcome::Unsupported
    }

    async fn discover_services(&self) -> Result<Vec<ServiceInfo>, TransportError> {
        let peripheral = self.current().await?;
        peripheral.discover_services().await?;
        Ok(peripheral
            .services()
            .into_iter()
            .map(|service| ServiceInfo {
                uuid: service.uuid,
                characteristics: service.characteristics.into_iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn write_with_response(&self, characteristic: Uuid, data: &[u8]) -> Result<(), TransportError> {
        let peripheral = self.current().await?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::CharacteristicNotFound(characteristic))?;
        peripheral.write(&target, data, WriteType::WithResponse).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // a link we drop ourselves is not reported as a drop
        if let Some(task) = self.watch_task.lock().await.take() {
            task.abort();
        }
        let Some(peripheral) = self.peripheral.lock().await.take() else {
            return Ok(());
        };
        peripheral.disconnect().await?;
        Ok(())
    }
}

/// Scans with the first adapter for `duration` and returns what was seen.
pub async fn scan(duration: Duration) -> Result<Vec<DeviceInfo>, TransportError> {
    BleTransport::new().await?.scan_for(duration).await
}
