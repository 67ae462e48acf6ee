//! Frame reassembly and header decoding for the Explore notification stream.
//!
//! BLE notifications arrive as arbitrarily sized fragments with no alignment
//! to frame boundaries. [`FrameReassembler`] accumulates fragments in a
//! bounded buffer, cuts complete length-prefixed frames out of it, and hands
//! each one to [`decode_frame`]; leftover bytes are compacted to the front of
//! the buffer and wait for the next fragment.
//!
//! Nothing in this module knows about BLE: `append` takes plain byte slices
//! and is equally usable from a notification callback or a unit test.

use log::{trace, warn};

use crate::protocol::{FRAME_HEADER_SIZE, FRAME_TRAILER, FRAME_TRAILER_SIZE};

// ── Decoded frame ─────────────────────────────────────────────────────────────

/// Fixed-size header at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Packet kind discriminator. Opaque at this layer; payload semantics
    /// per kind are left to the consumer.
    pub kind: u8,
    /// Device-side sequence count.
    pub count: u8,
    /// Payload length in bytes (excludes header and trailer).
    pub payload_len: u16,
    /// Device timestamp, little-endian on the wire.
    pub timestamp: u32,
}

/// One complete application-level frame: decoded header plus payload bytes.
///
/// The trailer is consumed by the reassembler's length arithmetic and is not
/// carried here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Decode a complete frame. Pure function of its input.
///
/// `bytes` must start at a frame boundary and hold at least
/// `FRAME_HEADER_SIZE + payload_len` bytes; the reassembler guarantees this.
/// Returns `None` on a short slice rather than indexing out of bounds.
pub fn decode_frame(bytes: &[u8]) -> Option<DecodedFrame> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return None;
    }
    let payload_len = u16::from_le_bytes([bytes[2], bytes[3]]);
    let payload_end = FRAME_HEADER_SIZE + payload_len as usize;
    if bytes.len() < payload_end {
        return None;
    }
    Some(DecodedFrame {
        header: FrameHeader {
            kind: bytes[0],
            count: bytes[1],
            payload_len,
            timestamp: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        },
        payload: bytes[FRAME_HEADER_SIZE..payload_end].to_vec(),
    })
}

// ── Reassembler ───────────────────────────────────────────────────────────────

/// Handler invoked once per complete frame, in arrival order.
pub type FrameHandler = Box<dyn FnMut(DecodedFrame) + Send>;

/// Accumulates notification fragments into complete frames.
///
/// The buffer has a fixed capacity. If appending a fragment would exceed it,
/// the whole buffer is discarded and the fragment dropped: the stream has no
/// backpressure signal to the peer, so the only safe local response to a
/// sustained overrun is to bound memory and resynchronize on the next frame
/// boundary. Overruns are logged and counted, never fatal.
pub struct FrameReassembler {
    buf: Vec<u8>,
    capacity: usize,
    validate_trailer: bool,
    overruns: u64,
    handler: FrameHandler,
}

impl FrameReassembler {
    /// Default buffer capacity in bytes. Comfortably above the largest frame
    /// the 16-bit length field can describe a realistic device sending.
    pub const DEFAULT_CAPACITY: usize = 8192;

    pub fn new(handler: FrameHandler) -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY, handler)
    }

    pub fn with_capacity(capacity: usize, handler: FrameHandler) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            validate_trailer: false,
            overruns: 0,
            handler,
        }
    }

    /// Enable or disable trailer content validation.
    ///
    /// Off by default: the device protocol's terminator semantics are not
    /// confirmed, so only the trailer's presence (via length arithmetic) is
    /// relied upon. When enabled, a frame whose trailer differs from
    /// [`FRAME_TRAILER`] is dropped with a warning; the cursor still advances
    /// past it.
    pub fn validate_trailer(mut self, enabled: bool) -> Self {
        self.validate_trailer = enabled;
        self
    }

    /// Bytes currently buffered and not yet part of an emitted frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffer overruns since construction.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// Append one notification fragment and emit every frame it completes.
    ///
    /// Never blocks and never fails; a would-be overflow resets the buffer
    /// (see type-level docs). Runs the parse loop to a fixed point, then
    /// compacts the undecoded remainder to the buffer start — O(remainder),
    /// not O(total traffic).
    pub fn append(&mut self, chunk: &[u8]) {
        if self.buf.len() + chunk.len() > self.capacity {
            warn!(
                "reassembly buffer overrun ({} buffered + {} incoming > {} capacity); \
                 dropping buffer and fragment",
                self.buf.len(),
                chunk.len(),
                self.capacity
            );
            self.buf.clear();
            self.overruns += 1;
            return;
        }
        self.buf.extend_from_slice(chunk);

        let mut offset = 0;
        while self.buf.len() - offset >= FRAME_HEADER_SIZE {
            let payload_len =
                u16::from_le_bytes([self.buf[offset + 2], self.buf[offset + 3]]) as usize;
            let frame_size = FRAME_HEADER_SIZE + payload_len + FRAME_TRAILER_SIZE;
            if self.buf.len() - offset < frame_size {
                // Incomplete frame: keep it buffered and wait for more data.
                break;
            }
            let frame = &self.buf[offset..offset + frame_size];
            if self.validate_trailer && frame[frame_size - FRAME_TRAILER_SIZE..] != FRAME_TRAILER {
                warn!(
                    "frame kind=0x{:02x} count={} has a bad trailer; dropping",
                    frame[0], frame[1]
                );
            } else if let Some(decoded) = decode_frame(frame) {
                trace!(
                    "frame kind=0x{:02x} count={} len={} ts={}",
                    decoded.header.kind,
                    decoded.header.count,
                    decoded.header.payload_len,
                    decoded.header.timestamp
                );
                (self.handler)(decoded);
            }
            offset += frame_size;
        }

        if offset > 0 {
            self.buf.drain(..offset);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Build a complete frame with the given header fields and payload.
    fn frame_bytes(kind: u8, count: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![kind, count];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(&FRAME_TRAILER);
        out
    }

    fn collecting_reassembler(capacity: usize) -> (FrameReassembler, Arc<Mutex<Vec<DecodedFrame>>>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        let r = FrameReassembler::with_capacity(
            capacity,
            Box::new(move |f| sink.lock().unwrap().push(f)),
        );
        (r, frames)
    }

    #[test]
    fn decode_frame_extracts_header_fields() {
        let bytes = frame_bytes(0x0D, 42, 0x01020304, &[9, 8, 7]);
        let decoded = decode_frame(&bytes).unwrap();
        assert_eq!(decoded.header.kind, 0x0D);
        assert_eq!(decoded.header.count, 42);
        assert_eq!(decoded.header.payload_len, 3);
        assert_eq!(decoded.header.timestamp, 0x01020304);
        assert_eq!(decoded.payload, vec![9, 8, 7]);
    }

    #[test]
    fn decode_frame_rejects_short_input() {
        assert!(decode_frame(&[1, 2, 3]).is_none());
        // Header claims 4 payload bytes that are not there.
        assert!(decode_frame(&[1, 2, 4, 0, 0, 0, 0, 0]).is_none());
    }

    #[test]
    fn whole_frame_in_one_chunk() {
        let (mut r, frames) = collecting_reassembler(256);
        r.append(&frame_bytes(1, 2, 3, &[0xAA; 4]));
        assert_eq!(frames.lock().unwrap().len(), 1);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn framing_is_chunking_independent() {
        let bytes = frame_bytes(0x90, 7, 1000, &[1, 2, 3, 4, 5]);

        let (mut whole, whole_frames) = collecting_reassembler(256);
        whole.append(&bytes);

        let (mut trickle, trickle_frames) = collecting_reassembler(256);
        for b in &bytes {
            trickle.append(std::slice::from_ref(b));
        }

        assert_eq!(*whole_frames.lock().unwrap(), *trickle_frames.lock().unwrap());
        assert_eq!(whole.buffered(), 0);
        assert_eq!(trickle.buffered(), 0);
    }

    #[test]
    fn incomplete_frame_is_retained_not_discarded() {
        let bytes = frame_bytes(5, 6, 7, &[0; 10]);
        let (mut r, frames) = collecting_reassembler(256);
        r.append(&bytes[..bytes.len() - 1]);
        assert!(frames.lock().unwrap().is_empty());
        assert_eq!(r.buffered(), bytes.len() - 1);

        r.append(&bytes[bytes.len() - 1..]);
        assert_eq!(frames.lock().unwrap().len(), 1);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn two_frames_in_one_chunk_emit_in_order() {
        let mut bytes = frame_bytes(1, 0, 10, &[0xA0]);
        bytes.extend_from_slice(&frame_bytes(2, 1, 11, &[0xB0, 0xB1]));
        let (mut r, frames) = collecting_reassembler(256);
        r.append(&bytes);
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.count, 0);
        assert_eq!(frames[1].header.count, 1);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn overrun_resets_buffer_and_drops_fragment() {
        let (mut r, frames) = collecting_reassembler(16);
        // Header claiming a payload far larger than capacity: fills the
        // buffer without ever completing a frame.
        r.append(&[0x01, 0x00, 0xFF, 0x00, 0, 0, 0, 0, 1, 2, 3, 4]);
        assert_eq!(r.buffered(), 12);

        r.append(&[0u8; 8]); // 12 + 8 > 16
        assert_eq!(r.buffered(), 0);
        assert_eq!(r.overruns(), 1);
        assert!(frames.lock().unwrap().is_empty());

        // Recovered: a well-formed frame decodes after the reset.
        r.append(&frame_bytes(3, 4, 5, &[]));
        assert_eq!(frames.lock().unwrap().len(), 1);
        assert_eq!(r.buffered(), 0);
    }

    #[test]
    fn buffered_never_exceeds_capacity() {
        let (mut r, _frames) = collecting_reassembler(32);
        // Stream garbage headers in varying chunk sizes; the invariant must
        // hold after every append.
        let junk = [0x7Fu8; 11];
        for _ in 0..50 {
            r.append(&junk);
            assert!(r.buffered() <= 32);
        }
        assert!(r.overruns() > 0);
    }

    #[test]
    fn bad_trailer_is_dropped_only_when_validation_enabled() {
        let mut bytes = frame_bytes(1, 2, 3, &[0xCC]);
        let n = bytes.len();
        bytes[n - 1] = 0x00; // corrupt the terminator

        let (mut lax, lax_frames) = collecting_reassembler(256);
        lax.append(&bytes);
        assert_eq!(lax_frames.lock().unwrap().len(), 1);

        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        let mut strict =
            FrameReassembler::with_capacity(256, Box::new(move |f| sink.lock().unwrap().push(f)))
                .validate_trailer(true);
        strict.append(&bytes);
        assert!(frames.lock().unwrap().is_empty());
        // Cursor still advanced past the bad frame.
        assert_eq!(strict.buffered(), 0);
    }
}
