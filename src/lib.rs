//! # explore-rs
//!
//! Async Rust driver for streaming biosignal data from
//! [Mentalab Explore Pro](https://mentalab.com/) devices over Bluetooth Low
//! Energy.
//!
//! The driver handles the full acquisition lifecycle — scanning, bounded
//! connect retries, GATT service resolution, notification subscription, frame
//! reassembly, and ordered teardown — and delivers decoded frames to a
//! pluggable [`sink::SampleSink`]. Payload interpretation beyond the frame
//! header is deliberately out of scope; consumers get the raw payload bytes
//! with device and host timestamps attached.
//!
//! ## Quick start
//!
//! ```no_run
//! use explore_rs::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (sink, mut rx) = ChannelSink::new();
//!     let mut board = ExploreBoard::new(
//!         ExploreConfig::default(),
//!         Arc::new(BtleplugTransport::new()),
//!         Arc::new(sink),
//!     );
//!     board.prepare_session().await?;
//!     board.start_stream(1024, None).await?;
//!
//!     while let Some(pkg) = rx.recv().await {
//!         println!("kind=0x{:02x} count={} {} bytes", pkg.kind, pkg.count, pkg.payload.len());
//!     }
//!     board.release_session().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`explore_board`] | Connection lifecycle: prepare, stream, configure, release |
//! | [`frame`] | Frame reassembly and header decoding |
//! | [`transport`] | Abstract BLE capability the lifecycle layer drives |
//! | [`btleplug_transport`] | btleplug-backed transport implementation |
//! | [`sink`] | Frame delivery to the consuming acquisition pipeline |
//! | [`protocol`] | GATT UUIDs, frame-layout constants, and config encoding |
//! | [`error`] | The [`error::ExploreError`] taxonomy |

pub mod btleplug_transport;
pub mod error;
pub mod explore_board;
pub mod frame;
pub mod protocol;
pub mod sink;
pub mod transport;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Lifecycle ─────────────────────────────────────────────────────────────
    pub use crate::explore_board::{
        Board, DeviceIdentity, ExploreBoard, ExploreConfig, SessionState, StreamState,
    };

    // ── Transport ─────────────────────────────────────────────────────────────
    pub use crate::btleplug_transport::BtleplugTransport;
    pub use crate::transport::{BleAdapter, BlePeripheral, BleTransport, ServiceSpec};

    // ── Frames and delivery ───────────────────────────────────────────────────
    pub use crate::frame::{DecodedFrame, FrameHeader, FrameReassembler};
    pub use crate::sink::{ChannelSink, SamplePackage, SampleSink};

    // ── Errors and protocol constants ─────────────────────────────────────────
    pub use crate::error::ExploreError;
    pub use crate::protocol::{DEVICE_NAME_PREFIX, NOTIFY_CHARACTERISTIC, WRITE_CHARACTERISTIC};
}
