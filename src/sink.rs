//! Sample sink capability — the hand-off point between the driver and a
//! generic acquisition pipeline.
//!
//! The driver does not interpret frame payloads beyond the header; it pushes
//! each decoded frame, stamped with the host wall clock, into whatever
//! implements [`SampleSink`]. [`ChannelSink`] is the bundled implementation:
//! it forwards packages into a tokio channel for an async consumer.

use log::debug;
use tokio::sync::mpsc;

use crate::frame::DecodedFrame;

/// Consumer of decoded frames.
///
/// `push` is called from the notification-delivery path and must not block.
pub trait SampleSink: Send + Sync {
    /// Called once from `start_stream`, before any frame is pushed.
    /// `buffer_size` and `streamer_params` come straight from the caller.
    fn prepare_acquisition(
        &self,
        buffer_size: usize,
        streamer_params: Option<&str>,
    ) -> anyhow::Result<()> {
        let _ = (buffer_size, streamer_params);
        Ok(())
    }

    /// Deliver one decoded frame. `timestamp_ms` is the host wall clock in
    /// milliseconds since Unix epoch at delivery time.
    fn push(&self, frame: &DecodedFrame, timestamp_ms: f64);

    /// Release any packages the sink still buffers. Called during teardown.
    fn free_buffered_packages(&self);
}

/// One delivered frame plus its host timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePackage {
    pub kind: u8,
    pub count: u8,
    /// Device timestamp from the frame header.
    pub device_timestamp: u32,
    /// Host wall clock, ms since Unix epoch.
    pub host_timestamp_ms: f64,
    /// Opaque payload bytes; per-channel decoding is the consumer's concern.
    pub payload: Vec<u8>,
}

/// [`SampleSink`] that forwards packages into an unbounded tokio channel.
///
/// Unbounded because `push` runs on the notification path and must never
/// block; a consumer that stops receiving sheds the whole channel when the
/// receiver drops.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SamplePackage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SamplePackage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SampleSink for ChannelSink {
    fn push(&self, frame: &DecodedFrame, timestamp_ms: f64) {
        let package = SamplePackage {
            kind: frame.header.kind,
            count: frame.header.count,
            device_timestamp: frame.header.timestamp,
            host_timestamp_ms: timestamp_ms,
            payload: frame.payload.clone(),
        };
        if self.tx.send(package).is_err() {
            debug!("sample receiver dropped; discarding package");
        }
    }

    fn free_buffered_packages(&self) {
        // Nothing retained on this side; the channel drains with its receiver.
        debug!("free_buffered_packages: channel sink holds no packages");
    }
}
