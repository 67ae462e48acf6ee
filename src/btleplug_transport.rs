//! btleplug-backed implementation of the transport capability.
//!
//! All btleplug- and platform-specific behavior lives here: CoreBluetooth
//! power-up waits on macOS, BlueZ GATT settle pauses on Linux, hard timeouts
//! around calls that can hang, and the fan-out from btleplug's single
//! per-peripheral notification stream to per-characteristic handlers.
//! The lifecycle layer sees none of it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::transport::{BleAdapter, BlePeripheral, BleTransport, NotificationHandler, ServiceSpec};

/// How often the discovery task re-reads the adapter's peripheral cache.
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Block until CoreBluetooth reports the central as powered on.
///
/// CBCentralManager comes up in an indeterminate state right after launch
/// and silently ignores scan requests until it reaches PoweredOn. A scan
/// started too early finds no Explore devices and gives no error, so wait
/// for the state transition (bounded at 3 s) before asking for one.
#[cfg(target_os = "macos")]
async fn wait_for_powered_on(adapter: &Adapter) {
    use btleplug::api::CentralState;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        match adapter.adapter_state().await {
            Ok(CentralState::PoweredOn) => {
                debug!("CoreBluetooth central is powered on");
                break;
            }
            Ok(state) if tokio::time::Instant::now() >= deadline => {
                warn!("CoreBluetooth central stuck in {state:?}; scanning anyway");
                break;
            }
            Ok(state) => debug!("CoreBluetooth central in {state:?}, waiting"),
            Err(e) => {
                warn!("could not query CoreBluetooth central state: {e}");
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    // Let the delegate settle before the first scan request lands.
    tokio::time::sleep(Duration::from_millis(300)).await;
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Entry point over the host BLE stack.
pub struct BtleplugTransport;

impl BtleplugTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BtleplugTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn adapters(&self) -> Result<Vec<Arc<dyn BleAdapter>>> {
        let manager = Manager::new().await?;
        let adapters = manager.adapters().await?;
        Ok(adapters
            .into_iter()
            .map(|adapter| Arc::new(BtleplugAdapter { adapter }) as Arc<dyn BleAdapter>)
            .collect())
    }
}

// ── Adapter ───────────────────────────────────────────────────────────────────

pub struct BtleplugAdapter {
    adapter: Adapter,
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    async fn start_scan(&self) -> Result<()> {
        #[cfg(target_os = "macos")]
        wait_for_powered_on(&self.adapter).await;

        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn discoveries(&self) -> Result<mpsc::Receiver<Arc<dyn BlePeripheral>>> {
        let (tx, rx) = mpsc::channel(16);
        let adapter = self.adapter.clone();
        // Poll the adapter's peripheral cache rather than its CentralEvent
        // stream: cached peripherals from a previous scan never re-fire
        // DeviceDiscovered, but they do show up in peripherals().
        tokio::spawn(async move {
            let mut seen: HashSet<PeripheralId> = HashSet::new();
            loop {
                let peripherals = match adapter.peripherals().await {
                    Ok(peripherals) => peripherals,
                    Err(e) => {
                        warn!("could not read adapter peripheral cache: {e}");
                        Vec::new()
                    }
                };
                for p in peripherals {
                    if !seen.insert(p.id()) {
                        continue;
                    }
                    let props = match p.properties().await {
                        Ok(Some(props)) => props,
                        _ => continue,
                    };
                    let address = p.id().to_string();
                    debug!("discovered {address} ({:?})", props.local_name);
                    let discovered = Arc::new(BtleplugPeripheral {
                        peripheral: p,
                        address,
                        name: props.local_name,
                        dispatch_tasks: Mutex::new(HashMap::new()),
                    });
                    if tx.send(discovered as Arc<dyn BlePeripheral>).await.is_err() {
                        return; // receiver gone, discovery over
                    }
                }
                tokio::time::sleep(DISCOVERY_POLL_INTERVAL).await;
            }
        });
        Ok(rx)
    }
}

// ── Peripheral ────────────────────────────────────────────────────────────────

pub struct BtleplugPeripheral {
    peripheral: Peripheral,
    /// Platform identifier captured at discovery time: a MAC address on
    /// Linux/Windows, a UUID on macOS.
    address: String,
    /// Advertised local name captured at discovery time.
    name: Option<String>,
    /// One notification fan-out task per subscribed characteristic.
    dispatch_tasks: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl BtleplugPeripheral {
    fn find_characteristic(&self, service: Uuid, characteristic: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| anyhow!("characteristic {characteristic} not found in {service}"))
    }
}

#[async_trait]
impl BlePeripheral for BtleplugPeripheral {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn local_name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect(&self) -> Result<()> {
        // Hard timeout on connect(): BlueZ's org.bluez.Device1.Connect can
        // block forever when the device is out of range or the stack is in a
        // bad state. Ten seconds is generous for a BLE connection that
        // typically takes <2 s.
        tokio::time::timeout(Duration::from_secs(10), self.peripheral.connect())
            .await
            .map_err(|_| anyhow!("BLE connect() timed out after 10 s"))??;

        // On Linux (bluez-async / D-Bus) the BLE stack signals connection
        // completion before the remote GATT service cache is populated.
        // Enumerating services too quickly can return an empty set. A short
        // pause lets the kernel / BlueZ finish GATT discovery first.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Stop fan-out first so no handler fires across the disconnect.
        for (_, task) in self.dispatch_tasks.lock().unwrap().drain() {
            task.abort();
        }
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn list_services(&self) -> Result<Vec<ServiceSpec>> {
        tokio::time::timeout(Duration::from_secs(15), self.peripheral.discover_services())
            .await
            .map_err(|_| anyhow!("discover_services() timed out after 15 s"))??;
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|s| ServiceSpec {
                uuid: s.uuid,
                characteristics: s.characteristics.iter().map(|c| c.uuid).collect(),
            })
            .collect())
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
        mut handler: NotificationHandler,
    ) -> Result<()> {
        let gatt_char = self.find_characteristic(service, characteristic)?;
        self.peripheral.subscribe(&gatt_char).await?;

        // btleplug exposes a single notifications() stream per peripheral;
        // fan out to the per-characteristic handler by uuid.
        let mut notifications = self.peripheral.notifications().await?;
        let task = tokio::spawn(async move {
            let mut count: u64 = 0;
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                count += 1;
                if count <= 3 || count % 500 == 0 {
                    debug!(
                        "notification #{count} from {characteristic} len={}",
                        notification.value.len()
                    );
                }
                handler(&notification.value);
            }
            info!("notification stream for {characteristic} ended");
        });
        self.dispatch_tasks
            .lock()
            .unwrap()
            .insert(characteristic, task);
        Ok(())
    }

    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> Result<()> {
        let gatt_char = self.find_characteristic(service, characteristic)?;
        self.peripheral.unsubscribe(&gatt_char).await?;
        if let Some(task) = self.dispatch_tasks.lock().unwrap().remove(&characteristic) {
            task.abort();
        }
        Ok(())
    }

    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &[u8]) -> Result<()> {
        let gatt_char = self.find_characteristic(service, characteristic)?;
        self.peripheral
            .write(&gatt_char, payload, WriteType::WithoutResponse)
            .await?;
        Ok(())
    }
}
