//! Connection lifecycle for Explore Pro devices.
//!
//! [`ExploreBoard`] drives the abstract BLE transport through discovery,
//! bounded connect retries, service resolution, and subscription, then hands
//! reassembled frames to the [`SampleSink`]. Teardown is ordered and
//! best-effort: unsubscribe always precedes releasing the connection handle,
//! and transport failures on the way down are logged, never escalated.
//!
//! The board is one concrete implementation of the [`Board`] lifecycle
//! contract; other device families plug into the same acquisition pipeline
//! by implementing the same trait over their own transports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, info, trace, warn};
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::ExploreError;
use crate::frame::{FrameHandler, FrameReassembler};
use crate::protocol::{
    encode_config, CONNECT_ATTEMPTS, DEFAULT_DISCOVERY_TIMEOUT_SECS, DEVICE_NAME_PREFIX,
    NOTIFY_CHARACTERISTIC, UNSUBSCRIBE_ATTEMPTS, WRITE_CHARACTERISTIC,
};
use crate::sink::SampleSink;
use crate::transport::{BleAdapter, BlePeripheral, BleTransport, NotificationHandler};

// ── Timestamp helper ──────────────────────────────────────────────────────────

fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before Unix epoch")
        .as_secs_f64()
        * 1000.0
}

// ── Board contract ────────────────────────────────────────────────────────────

/// Common lifecycle contract shared by all acquisition boards.
///
/// `prepare` → `start` → (stream) → `stop` → `release`, with `config_board`
/// available once prepared.
#[async_trait]
pub trait Board: Send {
    async fn prepare_session(&mut self) -> Result<(), ExploreError>;
    async fn start_stream(
        &mut self,
        buffer_size: usize,
        streamer_params: Option<&str>,
    ) -> Result<(), ExploreError>;
    async fn stop_stream(&mut self) -> Result<(), ExploreError>;
    async fn release_session(&mut self) -> Result<(), ExploreError>;
    async fn config_board(&mut self, config: &str) -> Result<(), ExploreError>;
}

// ── Configuration ─────────────────────────────────────────────────────────────

/// Configuration for [`ExploreBoard`].
#[derive(Debug, Clone)]
pub struct ExploreConfig {
    /// Exact MAC address of the target device. Takes precedence over every
    /// other matching strategy when non-empty.
    pub mac_address: String,
    /// Exact advertised serial/name of the target device. Used only when
    /// `mac_address` is empty.
    pub serial_number: String,
    /// Discovery timeout in seconds. `0` falls back to the 5 s default.
    pub timeout_secs: u64,
    /// Delay between connect attempts. Default: 1 s.
    pub connect_retry_delay: Duration,
    /// Pause before unsubscribing during teardown, letting in-flight
    /// notification delivery drain. Default: 2 s.
    pub drain_delay: Duration,
    /// Reassembly buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Validate frame trailer content (see
    /// [`FrameReassembler::validate_trailer`]). Default: off.
    pub validate_trailer: bool,
}

impl Default for ExploreConfig {
    fn default() -> Self {
        Self {
            mac_address: String::new(),
            serial_number: String::new(),
            timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            connect_retry_delay: Duration::from_secs(1),
            drain_delay: Duration::from_secs(2),
            buffer_capacity: FrameReassembler::DEFAULT_CAPACITY,
            validate_trailer: false,
        }
    }
}

// ── Device identity ───────────────────────────────────────────────────────────

/// How the target peripheral is recognized among scan results.
///
/// Exactly one strategy is active per session, chosen by precedence:
/// MAC address if configured, else serial number, else the fixed
/// [`DEVICE_NAME_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdentity {
    MacAddress(String),
    SerialNumber(String),
    NamePrefix(&'static str),
}

impl DeviceIdentity {
    pub fn from_config(config: &ExploreConfig) -> Self {
        if !config.mac_address.is_empty() {
            Self::MacAddress(config.mac_address.clone())
        } else if !config.serial_number.is_empty() {
            Self::SerialNumber(config.serial_number.clone())
        } else {
            Self::NamePrefix(DEVICE_NAME_PREFIX)
        }
    }

    /// Evaluate the single active strategy against one discovered peripheral.
    pub fn matches(&self, peripheral: &dyn BlePeripheral) -> bool {
        match self {
            Self::MacAddress(mac) => peripheral.address().eq_ignore_ascii_case(mac),
            Self::SerialNumber(serial) => {
                peripheral.local_name().as_deref() == Some(serial.as_str())
            }
            Self::NamePrefix(prefix) => peripheral
                .local_name()
                .is_some_and(|name| name.starts_with(prefix)),
        }
    }
}

// ── Session state ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Streaming,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Scanning,
    Connecting,
    ResolvingServices,
    Subscribed(StreamState),
    Releasing,
    Closed,
}

// ── ExploreBoard ──────────────────────────────────────────────────────────────

/// Acquisition driver for one Explore Pro device.
///
/// Owns the connection handle exclusively from the moment discovery matches
/// until [`release_session`](Board::release_session) drops it. Callers should
/// release the session before dropping the board; teardown is async and
/// cannot run from `Drop`.
pub struct ExploreBoard {
    config: ExploreConfig,
    identity: DeviceIdentity,
    transport: Arc<dyn BleTransport>,
    sink: Arc<dyn SampleSink>,
    state: SessionState,
    initialized: bool,
    adapter: Option<Arc<dyn BleAdapter>>,
    peripheral: Option<Arc<dyn BlePeripheral>>,
    write_pair: Option<(Uuid, Uuid)>,
    notify_pair: Option<(Uuid, Uuid)>,
    reassembler: Option<Arc<Mutex<FrameReassembler>>>,
    /// Read by the frame handler on the notification path.
    streaming: Arc<AtomicBool>,
    /// Set when teardown begins; makes post-teardown deliveries no-ops.
    closed: Arc<AtomicBool>,
}

impl ExploreBoard {
    pub fn new(
        config: ExploreConfig,
        transport: Arc<dyn BleTransport>,
        sink: Arc<dyn SampleSink>,
    ) -> Self {
        let identity = DeviceIdentity::from_config(&config);
        Self {
            config,
            identity,
            transport,
            sink,
            state: SessionState::Idle,
            initialized: false,
            adapter: None,
            peripheral: None,
            write_pair: None,
            notify_pair: None,
            reassembler: None,
            streaming: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Bytes currently sitting in the reassembly buffer.
    pub fn buffered_bytes(&self) -> usize {
        self.reassembler
            .as_ref()
            .and_then(|r| r.lock().ok().map(|r| r.buffered()))
            .unwrap_or(0)
    }

    /// Reassembly-buffer overruns since the session was prepared.
    pub fn overruns(&self) -> u64 {
        self.reassembler
            .as_ref()
            .and_then(|r| r.lock().ok().map(|r| r.overruns()))
            .unwrap_or(0)
    }

    // ── Discovery and connection ─────────────────────────────────────────────

    async fn try_prepare(&mut self, discovery_timeout: Duration) -> Result<(), ExploreError> {
        // Fresh flags per session so a handler left over from an earlier
        // subscription can never be re-armed.
        self.streaming = Arc::new(AtomicBool::new(false));
        self.closed = Arc::new(AtomicBool::new(false));

        self.state = SessionState::Scanning;
        let adapters = self
            .transport
            .adapters()
            .await
            .map_err(|e| ExploreError::DeviceNotFound {
                reason: format!("adapter enumeration failed: {e:#}"),
            })?;
        let adapter = adapters
            .into_iter()
            .next()
            .ok_or_else(|| ExploreError::DeviceNotFound {
                reason: "no BLE adapters found".into(),
            })?;
        self.adapter = Some(Arc::clone(&adapter));

        // Open the discovery stream before scanning so no early match is lost.
        let mut discoveries =
            adapter
                .discoveries()
                .await
                .map_err(|e| ExploreError::DeviceNotFound {
                    reason: format!("discovery stream unavailable: {e:#}"),
                })?;
        adapter
            .start_scan()
            .await
            .map_err(|e| ExploreError::DeviceNotFound {
                reason: format!("failed to start scan: {e:#}"),
            })?;
        info!("scanning for {:?}", self.identity);

        let identity = self.identity.clone();
        let found = timeout(discovery_timeout, async {
            while let Some(peripheral) = discoveries.recv().await {
                trace!(
                    "discovered {} ({:?})",
                    peripheral.address(),
                    peripheral.local_name()
                );
                if identity.matches(peripheral.as_ref()) {
                    return Some(peripheral);
                }
                // Non-matching peripherals are released right here by drop.
            }
            None
        })
        .await;

        // Scanning stops unconditionally once the wait resolves.
        if let Err(e) = adapter.stop_scan().await {
            warn!("failed to stop scan: {e:#}");
        }

        let peripheral = match found {
            Ok(Some(p)) => {
                info!("found Explore device {}", p.address());
                p
            }
            Ok(None) | Err(_) => {
                return Err(ExploreError::DeviceNotFound {
                    reason: format!("no identity match within {discovery_timeout:?}"),
                });
            }
        };

        self.state = SessionState::Connecting;
        self.peripheral = Some(Arc::clone(&peripheral));

        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match peripheral.connect().await {
                Ok(()) => {
                    info!(
                        "connected to {} on attempt {attempt}/{CONNECT_ATTEMPTS}",
                        peripheral.address()
                    );
                    last_err = None;
                    break;
                }
                Err(e) => {
                    warn!("connect attempt {attempt}/{CONNECT_ATTEMPTS} failed: {e:#}");
                    last_err = Some(e);
                    if attempt < CONNECT_ATTEMPTS {
                        tokio::time::sleep(self.config.connect_retry_delay).await;
                    }
                }
            }
        }
        if let Some(source) = last_err {
            return Err(ExploreError::ConnectFailed {
                attempts: CONNECT_ATTEMPTS,
                source,
            });
        }

        self.state = SessionState::ResolvingServices;
        self.resolve_characteristics(&peripheral).await?;
        self.initialized = true;
        self.state = SessionState::Subscribed(StreamState::Stopped);
        Ok(())
    }

    // ── Service resolution ───────────────────────────────────────────────────

    /// Walk every service/characteristic, record the write pair, and
    /// subscribe the notify pair. A ready session has both.
    async fn resolve_characteristics(
        &mut self,
        peripheral: &Arc<dyn BlePeripheral>,
    ) -> Result<(), ExploreError> {
        let services =
            peripheral
                .list_services()
                .await
                .map_err(|e| ExploreError::ResolutionFailed {
                    reason: format!("service enumeration failed: {e:#}"),
                })?;

        for service in &services {
            trace!("found service {}", service.uuid);
            for &characteristic in &service.characteristics {
                trace!("found characteristic {characteristic}");
                if characteristic == WRITE_CHARACTERISTIC {
                    info!("found write characteristic");
                    self.write_pair = Some((service.uuid, characteristic));
                }
                if characteristic == NOTIFY_CHARACTERISTIC {
                    self.subscribe_notifications(peripheral, service.uuid, characteristic)
                        .await?;
                    self.notify_pair = Some((service.uuid, characteristic));
                }
            }
        }

        if self.notify_pair.is_none() {
            return Err(ExploreError::ResolutionFailed {
                reason: format!("notify characteristic {NOTIFY_CHARACTERISTIC} not found"),
            });
        }
        if self.write_pair.is_none() {
            return Err(ExploreError::ResolutionFailed {
                reason: format!("write characteristic {WRITE_CHARACTERISTIC} not found"),
            });
        }
        Ok(())
    }

    fn frame_handler(&self) -> FrameHandler {
        let sink = Arc::clone(&self.sink);
        let streaming = Arc::clone(&self.streaming);
        Box::new(move |frame| {
            if streaming.load(Ordering::SeqCst) {
                sink.push(&frame, now_ms());
            } else {
                trace!(
                    "frame kind=0x{:02x} count={} dropped while stream is stopped",
                    frame.header.kind,
                    frame.header.count
                );
            }
        })
    }

    async fn subscribe_notifications(
        &mut self,
        peripheral: &Arc<dyn BlePeripheral>,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), ExploreError> {
        let reassembler = Arc::new(Mutex::new(
            FrameReassembler::with_capacity(self.config.buffer_capacity, self.frame_handler())
                .validate_trailer(self.config.validate_trailer),
        ));

        let shared = Arc::clone(&reassembler);
        let closed = Arc::clone(&self.closed);
        let handler: NotificationHandler = Box::new(move |bytes| {
            if closed.load(Ordering::SeqCst) {
                return;
            }
            if let Ok(mut reassembler) = shared.lock() {
                reassembler.append(bytes);
            }
        });

        peripheral
            .subscribe(service, characteristic, handler)
            .await
            .map_err(|e| ExploreError::ResolutionFailed {
                reason: format!("subscribe failed for {service} {characteristic}: {e:#}"),
            })?;
        info!("subscribed to notify characteristic");
        self.reassembler = Some(reassembler);
        Ok(())
    }
}

// ── Lifecycle operations ──────────────────────────────────────────────────────

#[async_trait]
impl Board for ExploreBoard {
    /// Discover, connect, resolve, and subscribe. Idempotent once prepared.
    ///
    /// On any failure the partially acquired resources are unwound through
    /// the regular teardown path before the error is returned, so a failed
    /// prepare leaves nothing held.
    async fn prepare_session(&mut self) -> Result<(), ExploreError> {
        if self.initialized {
            info!("session is already prepared");
            return Ok(());
        }
        let timeout_secs = if self.config.timeout_secs == 0 {
            DEFAULT_DISCOVERY_TIMEOUT_SECS
        } else {
            self.config.timeout_secs
        };
        info!("using discovery timeout of {timeout_secs} s");

        match self.try_prepare(Duration::from_secs(timeout_secs)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = self.release_session().await;
                Err(e)
            }
        }
    }

    async fn start_stream(
        &mut self,
        buffer_size: usize,
        streamer_params: Option<&str>,
    ) -> Result<(), ExploreError> {
        if !self.initialized {
            return Err(ExploreError::NotReady);
        }
        self.sink
            .prepare_acquisition(buffer_size, streamer_params)
            .map_err(ExploreError::Acquisition)?;
        self.streaming.store(true, Ordering::SeqCst);
        self.state = SessionState::Subscribed(StreamState::Streaming);
        debug!("streaming started (buffer_size={buffer_size})");
        Ok(())
    }

    /// Idempotent; succeeds whenever a connection handle exists.
    async fn stop_stream(&mut self) -> Result<(), ExploreError> {
        if self.peripheral.is_none() {
            return Err(ExploreError::NotReady);
        }
        self.streaming.store(false, Ordering::SeqCst);
        if self.initialized {
            self.state = SessionState::Subscribed(StreamState::Stopped);
        }
        debug!("streaming stopped");
        Ok(())
    }

    /// Ordered, best-effort teardown. Always succeeds; transport failures on
    /// the way down are logged and swallowed so cleanup never masks the
    /// failure that led here. Each resource is released at most once, and
    /// calling this without a connection is a no-op on the connection steps.
    async fn release_session(&mut self) -> Result<(), ExploreError> {
        self.state = SessionState::Releasing;
        self.closed.store(true, Ordering::SeqCst);

        // A subscription is live from the moment the notify pair is recorded,
        // even when resolution later failed on the write pair, and it must be
        // torn down before the connection handle is released.
        if let (Some(peripheral), Some((service, characteristic))) =
            (self.peripheral.clone(), self.notify_pair)
        {
            self.streaming.store(false, Ordering::SeqCst);
            // Let in-flight notification delivery drain before unsubscribing;
            // pulling the subscription out from under an active delivery can
            // crash deeper transport layers.
            tokio::time::sleep(self.config.drain_delay).await;

            for attempt in 1..=UNSUBSCRIBE_ATTEMPTS {
                match peripheral.unsubscribe(service, characteristic).await {
                    Ok(()) => break,
                    Err(e) => warn!(
                        "unsubscribe attempt {attempt}/{UNSUBSCRIBE_ATTEMPTS} failed \
                         for {service} {characteristic}: {e:#}"
                    ),
                }
            }
            self.sink.free_buffered_packages();
        }
        self.initialized = false;

        if let Some(peripheral) = self.peripheral.take() {
            if peripheral.is_connected().await {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("disconnect failed: {e:#}");
                }
            }
            // Handle released here by drop.
        }
        self.write_pair = None;
        self.notify_pair = None;
        self.reassembler = None;
        self.adapter = None;
        self.state = SessionState::Closed;
        Ok(())
    }

    /// Encode a hex config string and write it to the device's write
    /// characteristic as a single write. Transport failure is surfaced as
    /// [`ExploreError::Write`], not retried.
    async fn config_board(&mut self, config: &str) -> Result<(), ExploreError> {
        if !self.initialized {
            return Err(ExploreError::NotReady);
        }
        let payload = encode_config(config)?;
        let (peripheral, (service, characteristic)) = match (&self.peripheral, self.write_pair) {
            (Some(p), Some(pair)) => (p, pair),
            _ => return Err(ExploreError::NotReady),
        };
        peripheral
            .write(service, characteristic, &payload)
            .await
            .map_err(ExploreError::Write)?;
        debug!("sent config command {config:?} ({} bytes)", payload.len());
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
