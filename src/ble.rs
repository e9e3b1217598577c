//! BLE transport over the Nordic UART Service, built on `btleplug`.
//!
//! The dongle advertises NUS and accepts protocol lines as writes to the RX
//! characteristic; responses arrive as notifications on the TX characteristic.
//! This module adapts that to the [`Transport`] contract the link session
//! consumes: connect/disconnect/notification events are forwarded through one
//! unbounded channel, in delivery order.

use btleplug::{
    api::{
        BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
        WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{DongleError, Result},
    transport::{ServiceProfile, Transport, TransportEvent, WriteMode},
    types::DeviceInfo,
    NUS_RX_CHAR_UUID, NUS_SERVICE_UUID, NUS_TX_CHAR_UUID,
};
use async_trait::async_trait;

fn nus_uuid(text: &str) -> Result<Uuid> {
    Uuid::parse_str(text).map_err(|e| DongleError::Protocol(format!("Invalid UUID: {e}")))
}

/// Whether a peripheral's advertised identity matches a connect target.
///
/// The target may be an advertised name (matched case-insensitively) or a
/// MAC address string.
fn identity_matches(local_name: Option<&str>, address: &str, id: &str) -> bool {
    if address.eq_ignore_ascii_case(id) {
        return true;
    }
    local_name.is_some_and(|name| name.eq_ignore_ascii_case(id))
}

struct ActiveLink {
    peripheral: Peripheral,
    rx_char: Option<Characteristic>,
    tx_char: Option<Characteristic>,
    notify_task: Option<tokio::task::JoinHandle<()>>,
    monitor_task: Option<tokio::task::JoinHandle<()>>,
}

impl ActiveLink {
    fn abort_tasks(&mut self) {
        if let Some(task) = self.notify_task.take() {
            task.abort();
        }
        if let Some(task) = self.monitor_task.take() {
            task.abort();
        }
    }
}

/// [`Transport`] implementation over a system Bluetooth adapter
pub struct BleTransport {
    central: Adapter,
    peripherals: Arc<Mutex<HashMap<BDAddr, Peripheral>>>,
    active: Arc<Mutex<Option<ActiveLink>>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl BleTransport {
    /// Create a transport on the first available Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`DongleError::Ble`] if the Bluetooth stack cannot be
    /// initialized, or [`DongleError::DeviceNotFound`] if no adapter exists.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        let central = adapters.into_iter().next().ok_or(DongleError::DeviceNotFound)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            central,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            active: Arc::new(Mutex::new(None)),
            events_tx,
            events_rx: std::sync::Mutex::new(Some(events_rx)),
        })
    }

    async fn is_dongle(peripheral: &Peripheral, service_uuid: Uuid) -> bool {
        if let Ok(Some(properties)) = peripheral.properties().await {
            if let Some(name) = &properties.local_name {
                if name.to_lowercase().contains("pwdongle") {
                    return true;
                }
            }
            if properties.services.contains(&service_uuid) {
                return true;
            }
        }
        false
    }

    async fn extract_device_info(peripheral: &Peripheral) -> DeviceInfo {
        if let Ok(Some(properties)) = peripheral.properties().await {
            let name = properties
                .local_name
                .clone()
                .unwrap_or_else(|| "Unknown dongle".to_string());
            DeviceInfo {
                name,
                mac_address: Some(properties.address.to_string()),
                rssi: properties.rssi.unwrap_or(0),
            }
        } else {
            DeviceInfo::new("Unknown dongle".to_string(), 0)
        }
    }

    async fn find_peripheral(&self, id: &str) -> Result<Peripheral> {
        let peripherals = self.peripherals.lock().await;
        for peripheral in peripherals.values() {
            if let Ok(Some(properties)) = peripheral.properties().await {
                if identity_matches(
                    properties.local_name.as_deref(),
                    &properties.address.to_string(),
                    id,
                ) {
                    return Ok(peripheral.clone());
                }
            }
        }
        Err(DongleError::DeviceNotFound)
    }

    /// Watch the central event stream and surface the disconnect of one
    /// peripheral as a transport event.
    async fn spawn_disconnect_monitor(
        &self,
        peripheral: &Peripheral,
    ) -> Result<tokio::task::JoinHandle<()>> {
        let mut events = self.central.events().await?;
        let watched = peripheral.id();
        let sender = self.events_tx.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == watched {
                        let _ = sender.send(TransportEvent::Disconnected {
                            reason: "Connection lost".to_string(),
                        });
                        break;
                    }
                }
            }
        }))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn scan(&self, timeout: Duration) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for dongles...");

        let service_uuid = nus_uuid(NUS_SERVICE_UUID)?;
        // Filter on the UART service, then confirm by name or service list:
        // some platforms ignore the filter entirely.
        self.central
            .start_scan(ScanFilter {
                services: vec![service_uuid],
            })
            .await?;
        tokio::time::sleep(timeout).await;
        self.central.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in self.central.peripherals().await? {
            if Self::is_dongle(&peripheral, service_uuid).await {
                let info = Self::extract_device_info(&peripheral).await;
                info!("Found dongle: {}", info.name);
                devices.push(info);
                self.peripherals
                    .lock()
                    .await
                    .insert(peripheral.address(), peripheral);
            }
        }

        info!("Scan completed. Found {} dongle(s)", devices.len());
        Ok(devices)
    }

    async fn connect(&self, id: &str) -> Result<()> {
        let peripheral = match self.find_peripheral(id).await {
            Ok(p) => p,
            Err(DongleError::DeviceNotFound) => {
                // The target may not have been scanned yet by this transport.
                debug!("{id} not in scan results, running a short discovery scan");
                self.scan(Duration::from_secs(3)).await?;
                self.find_peripheral(id).await?
            }
            Err(e) => return Err(e),
        };

        peripheral
            .connect()
            .await
            .map_err(|e| DongleError::ConnectionFailed(e.to_string()))?;

        let monitor = self.spawn_disconnect_monitor(&peripheral).await?;
        {
            let mut active = self.active.lock().await;
            if let Some(mut previous) = active.take() {
                previous.abort_tasks();
            }
            *active = Some(ActiveLink {
                peripheral,
                rx_char: None,
                tx_char: None,
                notify_task: None,
                monitor_task: Some(monitor),
            });
        }

        let _ = self.events_tx.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(mut link) = active.take() {
            link.abort_tasks();
            link.peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn discover_services(&self) -> Result<ServiceProfile> {
        let mut active = self.active.lock().await;
        let link = active.as_mut().ok_or(DongleError::Disconnected)?;

        link.peripheral.discover_services().await?;

        let service_uuid = nus_uuid(NUS_SERVICE_UUID)?;
        let rx_uuid = nus_uuid(NUS_RX_CHAR_UUID)?;
        let tx_uuid = nus_uuid(NUS_TX_CHAR_UUID)?;

        let services = link.peripheral.services();
        let Some(service) = services.iter().find(|s| s.uuid == service_uuid) else {
            warn!("peer does not expose the UART service");
            return Ok(ServiceProfile { has_uart: false });
        };

        let rx_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == rx_uuid)
            .ok_or(DongleError::ServiceMissing)?
            .clone();
        let tx_char = service
            .characteristics
            .iter()
            .find(|c| c.uuid == tx_uuid)
            .ok_or(DongleError::ServiceMissing)?
            .clone();

        link.rx_char = Some(rx_char);
        link.tx_char = Some(tx_char);
        Ok(ServiceProfile { has_uart: true })
    }

    async fn negotiate_frame_size(&self, requested: usize) -> Result<usize> {
        // The underlying stack negotiates MTU on its own and exposes no
        // request API; the session falls back to the conservative default.
        debug!("frame size negotiation unavailable (requested {requested})");
        Err(DongleError::Protocol(
            "frame size negotiation is not exposed by this adapter".to_string(),
        ))
    }

    async fn subscribe_notifications(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        let link = active.as_mut().ok_or(DongleError::Disconnected)?;
        let tx_char = link.tx_char.clone().ok_or(DongleError::ServiceMissing)?;

        link.peripheral.subscribe(&tx_char).await?;

        let mut notifications = link.peripheral.notifications().await?;
        let sender = self.events_tx.clone();
        let tx_uuid = tx_char.uuid;
        if let Some(task) = link.notify_task.take() {
            task.abort();
        }
        link.notify_task = Some(tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                if data.uuid == tx_uuid
                    && sender.send(TransportEvent::Notification(data.value)).is_err()
                {
                    break;
                }
            }
        }));
        Ok(())
    }

    async fn write(&self, bytes: &[u8], mode: WriteMode) -> Result<()> {
        let active = self.active.lock().await;
        let link = active.as_ref().ok_or(DongleError::Disconnected)?;
        let rx_char = link.rx_char.as_ref().ok_or(DongleError::ServiceMissing)?;

        let write_type = match mode {
            WriteMode::Acknowledged => WriteType::WithResponse,
            WriteMode::Unacknowledged => WriteType::WithoutResponse,
        };
        debug!("writing {} bytes ({mode:?})", bytes.len());
        link.peripheral.write(rx_char, bytes, write_type).await?;
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }
}
