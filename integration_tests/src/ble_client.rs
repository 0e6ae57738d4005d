//! BLE client for the temperature/humidity peripheral.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Custom service holding both characteristics
pub const SERVICE_UUID: u16 = 0x2000;
/// Health Thermometer service, carried in the advertising payload
pub const ADVERTISED_SERVICE_UUID: u16 = 0x1809;
/// Temperature, sint16 LE in 0.01 degC
pub const TEMPERATURE_UUID: u16 = 0x2A6E;
/// Relative humidity, uint16 LE in 0.01 %RH
pub const HUMIDITY_UUID: u16 = 0x2A6F;

/// Decode a temperature characteristic value to degrees Celsius.
pub fn decode_temperature(value: &[u8]) -> Result<f32> {
    let bytes: [u8; 2] = value
        .try_into()
        .map_err(|_| anyhow!("temperature value is {} bytes, expected 2", value.len()))?;
    Ok(i16::from_le_bytes(bytes) as f32 / 100.0)
}

/// Decode a humidity characteristic value to percent relative humidity.
pub fn decode_humidity(value: &[u8]) -> Result<f32> {
    let bytes: [u8; 2] = value
        .try_into()
        .map_err(|_| anyhow!("humidity value is {} bytes, expected 2", value.len()))?;
    Ok(u16::from_le_bytes(bytes) as f32 / 100.0)
}

/// A single characteristic notification.
#[derive(Debug, Clone)]
pub struct Update {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

/// Connected client with both characteristics subscribed.
pub struct SensorClient {
    peripheral: Peripheral,
    /// Service UUIDs seen in the advertising payload
    advertised: Vec<Uuid>,
    temperature: Characteristic,
    humidity: Characteristic,
    updates: Arc<Mutex<Vec<Update>>>,
}

impl SensorClient {
    /// Scan for a device by name, connect and subscribe.
    pub async fn connect_by_name(name: &str, scan_timeout: Duration) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapters found"))?;

        adapter.start_scan(ScanFilter::default()).await?;
        let (peripheral, advertised) = Self::find_device_by_name(&adapter, name, scan_timeout).await?;
        adapter.stop_scan().await?;

        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: u16| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid_from_u16(uuid))
                .cloned()
                .ok_or_else(|| anyhow!("characteristic {:#06x} not found", uuid))
        };
        let temperature = find(TEMPERATURE_UUID)?;
        let humidity = find(HUMIDITY_UUID)?;

        peripheral.subscribe(&temperature).await?;
        peripheral.subscribe(&humidity).await?;

        let updates = Arc::new(Mutex::new(Vec::new()));

        let updates_clone = updates.clone();
        let peripheral_clone = peripheral.clone();
        tokio::spawn(async move {
            let mut stream = match peripheral_clone.notifications().await {
                Ok(s) => s,
                Err(_) => return,
            };

            while let Some(data) = stream.next().await {
                updates_clone.lock().await.push(Update {
                    uuid: data.uuid,
                    value: data.value,
                });
            }
        });

        Ok(Self {
            peripheral,
            advertised,
            temperature,
            humidity,
            updates,
        })
    }

    /// Find a device by name within the scan timeout.
    async fn find_device_by_name(
        adapter: &Adapter,
        name: &str,
        scan_timeout: Duration,
    ) -> Result<(Peripheral, Vec<Uuid>)> {
        let start = std::time::Instant::now();

        while start.elapsed() < scan_timeout {
            for peripheral in adapter.peripherals().await? {
                if let Some(props) = peripheral.properties().await? {
                    if props.local_name.as_deref() == Some(name) {
                        return Ok((peripheral, props.services));
                    }
                }
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Err(anyhow!("Device '{}' not found within timeout", name))
    }

    /// Whether the advertising payload listed this 16-bit service.
    pub fn advertises(&self, uuid: u16) -> bool {
        self.advertised.contains(&uuid_from_u16(uuid))
    }

    /// Characteristics discovered under the custom service.
    pub fn service_characteristics(&self) -> Vec<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .filter(|c| c.service_uuid == uuid_from_u16(SERVICE_UUID))
            .collect()
    }

    /// Whether a characteristic supports both read and notify.
    pub fn is_readable_and_notifying(characteristic: &Characteristic) -> bool {
        characteristic
            .properties
            .contains(CharPropFlags::READ | CharPropFlags::NOTIFY)
    }

    /// Read the current temperature value.
    pub async fn read_temperature(&self) -> Result<f32> {
        decode_temperature(&self.peripheral.read(&self.temperature).await?)
    }

    /// Read the current humidity value.
    pub async fn read_humidity(&self) -> Result<f32> {
        decode_humidity(&self.peripheral.read(&self.humidity).await?)
    }

    /// Drop all collected notifications.
    pub async fn clear_updates(&self) {
        self.updates.lock().await.clear();
    }

    /// Collect notifications for `window`, returning everything received.
    pub async fn collect(&self, window: Duration) -> Vec<Update> {
        self.clear_updates().await;
        tokio::time::sleep(window).await;
        self.updates.lock().await.drain(..).collect()
    }

    /// Unsubscribe and disconnect.
    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.unsubscribe(&self.temperature).await?;
        self.peripheral.unsubscribe(&self.humidity).await?;
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
