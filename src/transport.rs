//! Abstract BLE transport capability consumed by the lifecycle manager.
//!
//! The driver never talks to a BLE stack directly; it drives these traits.
//! [`crate::btleplug_transport`] provides the production implementation, and
//! the `mock` module in this file provides a scripted one for the lifecycle
//! tests. Transport methods return `anyhow::Result` — the session layer maps
//! failures into the typed [`crate::error::ExploreError`] taxonomy.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Callback receiving raw notification fragments from a subscribed
/// characteristic. Invoked on a transport task; must not block.
pub type NotificationHandler = Box<dyn FnMut(&[u8]) + Send>;

/// One GATT service and the characteristics it exposes.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

/// Entry point: enumerates the host's BLE adapters.
#[async_trait]
pub trait BleTransport: Send + Sync {
    async fn adapters(&self) -> Result<Vec<Arc<dyn BleAdapter>>>;
}

/// One BLE adapter in the central role.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    async fn start_scan(&self) -> Result<()>;
    async fn stop_scan(&self) -> Result<()>;

    /// Stream of peripherals discovered while scanning.
    ///
    /// Call before [`start_scan`](Self::start_scan) so no discovery is lost.
    /// Dropping a received peripheral releases it.
    async fn discoveries(&self) -> Result<mpsc::Receiver<Arc<dyn BlePeripheral>>>;
}

/// A discovered peripheral. Identity accessors are synchronous — the
/// implementation captures advertisement data at discovery time.
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Platform address string (a MAC address on Linux/Windows, a UUID on
    /// macOS).
    fn address(&self) -> String;

    /// Advertised local name, when one was broadcast.
    fn local_name(&self) -> Option<String>;

    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
    async fn is_connected(&self) -> bool;

    /// Enumerate services and their characteristics.
    async fn list_services(&self) -> Result<Vec<ServiceSpec>>;

    /// Subscribe to a notify characteristic, delivering every fragment to
    /// `handler` until unsubscribed or disconnected.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
        handler: NotificationHandler,
    ) -> Result<()>;

    async fn unsubscribe(&self, service: Uuid, characteristic: Uuid) -> Result<()>;

    /// Single write-without-response carrying `payload`.
    async fn write(&self, service: Uuid, characteristic: Uuid, payload: &[u8]) -> Result<()>;
}

// ── Scripted mock for lifecycle tests ─────────────────────────────────────────

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::protocol::{NOTIFY_CHARACTERISTIC, WRITE_CHARACTERISTIC};

    pub const MOCK_SERVICE: Uuid = Uuid::from_u128(0xfffe0001_b5a3_f393_e0a9_e50e24dcca9e);

    pub struct MockTransport {
        adapters: Vec<Arc<dyn BleAdapter>>,
    }

    impl MockTransport {
        pub fn single(adapter: Arc<MockAdapter>) -> Self {
            Self {
                adapters: vec![adapter],
            }
        }

        pub fn empty() -> Self {
            Self { adapters: vec![] }
        }
    }

    #[async_trait]
    impl BleTransport for MockTransport {
        async fn adapters(&self) -> Result<Vec<Arc<dyn BleAdapter>>> {
            Ok(self.adapters.clone())
        }
    }

    /// Adapter delivering a scripted set of peripherals, each after its own
    /// delay from scan start.
    pub struct MockAdapter {
        scheduled: Mutex<Vec<(Duration, Arc<MockPeripheral>)>>,
        pub scanning: AtomicBool,
    }

    impl MockAdapter {
        pub fn new() -> Self {
            Self {
                scheduled: Mutex::new(Vec::new()),
                scanning: AtomicBool::new(false),
            }
        }

        pub fn discover_after(self: &Arc<Self>, delay: Duration, p: Arc<MockPeripheral>) {
            self.scheduled.lock().unwrap().push((delay, p));
        }
    }

    #[async_trait]
    impl BleAdapter for MockAdapter {
        async fn start_scan(&self) -> Result<()> {
            self.scanning.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_scan(&self) -> Result<()> {
            self.scanning.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn discoveries(&self) -> Result<mpsc::Receiver<Arc<dyn BlePeripheral>>> {
            let (tx, rx) = mpsc::channel(16);
            let scheduled: Vec<_> = self.scheduled.lock().unwrap().clone();
            tokio::spawn(async move {
                for (delay, p) in scheduled {
                    tokio::time::sleep(delay).await;
                    if tx.send(p as Arc<dyn BlePeripheral>).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        }
    }

    /// Scripted peripheral recording every transport call it receives.
    pub struct MockPeripheral {
        address: String,
        name: Option<String>,
        services: Vec<ServiceSpec>,
        /// Number of leading `connect` calls that fail.
        connect_failures: AtomicUsize,
        /// Number of leading `unsubscribe` calls that fail.
        unsubscribe_failures: AtomicUsize,
        fail_subscribe: AtomicBool,
        connected: AtomicBool,
        handler: Mutex<Option<NotificationHandler>>,
        pub writes: Mutex<Vec<Vec<u8>>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockPeripheral {
        pub fn new(address: &str, name: Option<&str>) -> Arc<Self> {
            Self::with_services(
                address,
                name,
                vec![ServiceSpec {
                    uuid: MOCK_SERVICE,
                    characteristics: vec![WRITE_CHARACTERISTIC, NOTIFY_CHARACTERISTIC],
                }],
            )
        }

        pub fn with_services(
            address: &str,
            name: Option<&str>,
            services: Vec<ServiceSpec>,
        ) -> Arc<Self> {
            Arc::new(Self {
                address: address.to_owned(),
                name: name.map(str::to_owned),
                services,
                connect_failures: AtomicUsize::new(0),
                unsubscribe_failures: AtomicUsize::new(0),
                fail_subscribe: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                handler: Mutex::new(None),
                writes: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn fail_connects(self: &Arc<Self>, n: usize) -> Arc<Self> {
            self.connect_failures.store(n, Ordering::SeqCst);
            Arc::clone(self)
        }

        pub fn fail_unsubscribes(self: &Arc<Self>, n: usize) -> Arc<Self> {
            self.unsubscribe_failures.store(n, Ordering::SeqCst);
            Arc::clone(self)
        }

        pub fn fail_subscribe(self: &Arc<Self>) -> Arc<Self> {
            self.fail_subscribe.store(true, Ordering::SeqCst);
            Arc::clone(self)
        }

        /// Deliver a notification fragment through the captured handler, as
        /// the transport would from its own task.
        pub fn notify(&self, bytes: &[u8]) {
            if let Some(handler) = self.handler.lock().unwrap().as_mut() {
                handler(bytes);
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn count_calls(&self, name: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_owned());
        }
    }

    #[async_trait]
    impl BlePeripheral for MockPeripheral {
        fn address(&self) -> String {
            self.address.clone()
        }

        fn local_name(&self) -> Option<String> {
            self.name.clone()
        }

        async fn connect(&self) -> Result<()> {
            self.record("connect");
            if self.connect_failures.load(Ordering::SeqCst) > 0 {
                self.connect_failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("mock connect refused");
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            self.record("disconnect");
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn list_services(&self) -> Result<Vec<ServiceSpec>> {
            self.record("list_services");
            Ok(self.services.clone())
        }

        async fn subscribe(
            &self,
            _service: Uuid,
            _characteristic: Uuid,
            handler: NotificationHandler,
        ) -> Result<()> {
            self.record("subscribe");
            if self.fail_subscribe.load(Ordering::SeqCst) {
                anyhow::bail!("mock subscribe refused");
            }
            *self.handler.lock().unwrap() = Some(handler);
            Ok(())
        }

        async fn unsubscribe(&self, _service: Uuid, _characteristic: Uuid) -> Result<()> {
            self.record("unsubscribe");
            if self.unsubscribe_failures.load(Ordering::SeqCst) > 0 {
                self.unsubscribe_failures.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("mock unsubscribe refused");
            }
            *self.handler.lock().unwrap() = None;
            Ok(())
        }

        async fn write(&self, _service: Uuid, _characteristic: Uuid, payload: &[u8]) -> Result<()> {
            self.record("write");
            self.writes.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }
}
