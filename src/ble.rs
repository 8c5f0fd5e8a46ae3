use async_trait::async_trait;
use btleplug::{
    api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType},
    platform::{Manager, Peripheral},
};
use futures::stream::StreamExt;
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    controller::TreadmillController,
    dispatcher::Transport,
    error::{KspadError, Result},
    translator,
    types::{ConnectionParams, DeviceInfo},
    COMMAND_CHAR_UUID, STATS_CHAR_UUID,
};

/// BLE manager for treadmill discovery and connection
pub struct BleManager {
    manager: Manager,
    peripherals: Arc<Mutex<HashMap<BDAddr, Peripheral>>>,
}

impl BleManager {
    /// Create a new BLE manager
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::Ble`] if the Bluetooth adapter cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;

        Ok(Self {
            manager,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Scan for treadmills
    ///
    /// A peripheral matches when its advertised name equals
    /// `params.model_name`, or, when that is unset, any model with a
    /// registered speed translator.
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::DeviceNotFound`] if no Bluetooth adapters are available,
    /// or [`KspadError::Ble`] for other Bluetooth-related errors.
    pub async fn scan_for_devices(&self, params: &ConnectionParams) -> Result<Vec<DeviceInfo>> {
        info!("Starting scan for treadmills...");

        let adapters = self.manager.adapters().await?;
        let central = adapters.first().ok_or(KspadError::DeviceNotFound)?;

        central.start_scan(ScanFilter::default()).await?;

        tokio::time::sleep(Duration::from_millis(params.scan_timeout_ms)).await;

        central.stop_scan().await?;

        let mut devices = Vec::new();
        for peripheral in central.peripherals().await? {
            let Ok(Some(properties)) = peripheral.properties().await else {
                continue;
            };
            let Some(name) = properties.local_name else {
                continue;
            };
            if !Self::matches_model(&name, params) {
                continue;
            }

            let device_info = DeviceInfo::new(
                name,
                Some(properties.address.to_string()),
                properties.rssi.unwrap_or(0),
            );
            info!("Found treadmill: {}", device_info.name);

            self.peripherals
                .lock()
                .await
                .insert(peripheral.address(), peripheral);
            devices.push(device_info);
        }

        info!("Scan completed. Found {} treadmill(s)", devices.len());
        Ok(devices)
    }

    fn matches_model(name: &str, params: &ConnectionParams) -> bool {
        params.model_name.as_ref().map_or_else(
            || translator::known_models().any(|model| model == name),
            |wanted| wanted == name,
        )
    }

    /// Connect to a device found by [`Self::scan_for_devices`]
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::DeviceNotFound`] if the device was not seen in a scan,
    /// [`KspadError::Timeout`] if connection times out,
    /// [`KspadError::ConnectionFailed`] if connection fails,
    /// or [`KspadError::Protocol`] if the stats or command characteristic is missing.
    pub async fn connect_to_device(
        &self,
        device_info: &DeviceInfo,
        params: &ConnectionParams,
    ) -> Result<BleTransport> {
        info!("Connecting to device: {}", device_info.name);

        let peripheral = {
            let peripherals = self.peripherals.lock().await;
            let address = device_info
                .mac_address
                .as_deref()
                .and_then(|mac| mac.parse::<BDAddr>().ok());

            match address.and_then(|addr| peripherals.get(&addr)) {
                Some(peripheral) => peripheral.clone(),
                None => {
                    let mut found = None;
                    for peripheral in peripherals.values() {
                        if let Ok(Some(properties)) = peripheral.properties().await {
                            if properties.local_name.as_ref() == Some(&device_info.name) {
                                found = Some(peripheral.clone());
                                break;
                            }
                        }
                    }
                    found.ok_or(KspadError::DeviceNotFound)?
                }
            }
        };

        timeout(
            Duration::from_millis(params.connect_timeout_ms),
            peripheral.connect(),
        )
        .await
        .map_err(|_| KspadError::Timeout {
            timeout_ms: params.connect_timeout_ms,
        })?
        .map_err(|e| KspadError::ConnectionFailed(e.to_string()))?;

        peripheral.discover_services().await?;

        let stats_uuid = Uuid::parse_str(STATS_CHAR_UUID)
            .map_err(|e| KspadError::Protocol(format!("Invalid stats characteristic UUID: {e}")))?;
        let command_uuid = Uuid::parse_str(COMMAND_CHAR_UUID).map_err(|e| {
            KspadError::Protocol(format!("Invalid command characteristic UUID: {e}"))
        })?;

        let characteristics = peripheral.characteristics();
        for characteristic in &characteristics {
            debug!("characteristic {}", characteristic.uuid);
        }

        let stats_char = characteristics
            .iter()
            .find(|c| c.uuid == stats_uuid)
            .ok_or_else(|| KspadError::Protocol("Stats characteristic not found".to_string()))?
            .clone();

        let command_char = characteristics
            .iter()
            .find(|c| c.uuid == command_uuid)
            .ok_or_else(|| KspadError::Protocol("Command characteristic not found".to_string()))?
            .clone();

        peripheral.subscribe(&stats_char).await?;

        info!("Successfully connected to {}", device_info.name);

        Ok(BleTransport {
            peripheral,
            model_name: device_info.name.clone(),
            stats_char,
            command_char,
        })
    }
}

/// Active GATT link to a treadmill
pub struct BleTransport {
    peripheral: Peripheral,
    model_name: String,
    stats_char: Characteristic,
    command_char: Characteristic,
}

impl BleTransport {
    /// Advertised model name of the connected peripheral
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Get device address
    #[must_use]
    pub fn address(&self) -> BDAddr {
        self.peripheral.address()
    }

    /// Feed stats notifications into `controller` until the link closes
    ///
    /// The task holds only a weak reference, so it ends on its own once the
    /// controller is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::Ble`] if the notification stream cannot be opened.
    pub async fn forward_notifications(
        &self,
        controller: Weak<TreadmillController>,
    ) -> Result<JoinHandle<()>> {
        let mut notifications = self.peripheral.notifications().await?;
        let stats_uuid = self.stats_char.uuid;

        Ok(tokio::spawn(async move {
            while let Some(data) = notifications.next().await {
                if data.uuid != stats_uuid {
                    continue;
                }
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                // Decode failures are already reported as events.
                let _ = controller.on_telemetry(&data.value);
            }
            debug!("Notification stream closed");
        }))
    }

    /// Check if the device is still connected
    pub async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    /// Disconnect from the device
    ///
    /// # Errors
    ///
    /// Returns [`KspadError::Ble`] if disconnection fails.
    pub async fn disconnect(&self) -> Result<()> {
        if let Err(e) = self.peripheral.unsubscribe(&self.stats_char).await {
            warn!("Failed to unsubscribe from stats: {}", e);
        }
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn is_ready(&self) -> bool {
        self.is_connected().await
    }

    async fn send_bytes(&self, frame: &[u8]) -> Result<()> {
        if let Err(e) = self
            .peripheral
            .write(&self.command_char, frame, WriteType::WithoutResponse)
            .await
        {
            if !self.is_connected().await {
                return Err(KspadError::Disconnected);
            }
            return Err(KspadError::Protocol(format!("Failed to send command: {e}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{translator::REFERENCE_MODEL, SERVICE_UUID};

    #[test]
    fn test_uuid_parsing() {
        let service = Uuid::parse_str(SERVICE_UUID).unwrap();
        let stats = Uuid::parse_str(STATS_CHAR_UUID).unwrap();
        let command = Uuid::parse_str(COMMAND_CHAR_UUID).unwrap();

        assert_eq!(service, btleplug::api::bleuuid::uuid_from_u16(0xFE00));
        assert_eq!(stats, btleplug::api::bleuuid::uuid_from_u16(0xFE01));
        assert_eq!(command, btleplug::api::bleuuid::uuid_from_u16(0xFE02));
    }

    #[test]
    fn test_model_matching() {
        let any_known = ConnectionParams::default();
        assert!(BleManager::matches_model(REFERENCE_MODEL, &any_known));
        assert!(!BleManager::matches_model("Other Treadmill", &any_known));

        let explicit = ConnectionParams {
            model_name: Some("KS-XX".to_string()),
            ..Default::default()
        };
        assert!(BleManager::matches_model("KS-XX", &explicit));
        assert!(!BleManager::matches_model(REFERENCE_MODEL, &explicit));
    }
}
