//! GATT UUIDs, frame-layout constants, and the config-command codec for
//! Explore Pro devices.
//!
//! All characteristic UUIDs belong to the Explore vendor namespace
//! `fffeXXXX-b5a3-f393-e0a9-e50e24dcca9e`.

use uuid::Uuid;

use crate::error::ExploreError;

// ── Characteristics ───────────────────────────────────────────────────────────

/// Write-capable characteristic — the command path.
///
/// Configuration byte strings encoded by [`encode_config`] are written here
/// as a single write-without-response.
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0xfffe0002_b5a3_f393_e0a9_e50e24dcca9e);

/// Notify-capable characteristic — the streaming path.
///
/// The device delivers frame fragments as notifications on this
/// characteristic; fragments carry no alignment guarantee and are
/// reassembled by [`crate::frame::FrameReassembler`].
pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0xfffe0003_b5a3_f393_e0a9_e50e24dcca9e);

// ── Device identity ───────────────────────────────────────────────────────────

/// Advertised-name prefix shared by all Explore devices (e.g. `"Explore_ABCD"`).
///
/// Used as the fallback matching strategy when neither a MAC address nor a
/// serial number is configured.
pub const DEVICE_NAME_PREFIX: &str = "Explore_";

// ── Frame layout ──────────────────────────────────────────────────────────────
//
// One application-level frame on the notify characteristic:
//
// ```text
// byte 0      : packet kind
// byte 1      : sequence count
// bytes 2..4  : payload length, u16 little-endian
// bytes 4..8  : device timestamp, u32 little-endian
// bytes 8..N  : payload (`payload length` bytes)
// last 4 bytes: terminator
// ```

/// Fixed frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Fixed frame trailer size in bytes.
pub const FRAME_TRAILER_SIZE: usize = 4;

/// Terminator bytes closing every frame.
///
/// Presence is accounted for by length arithmetic in the reassembler;
/// content validation is optional (see
/// [`crate::frame::FrameReassembler::validate_trailer`]).
pub const FRAME_TRAILER: [u8; FRAME_TRAILER_SIZE] = [0xAF, 0xBE, 0xAD, 0xDE];

// ── Timeouts and retry policy ─────────────────────────────────────────────────

/// Default discovery timeout in seconds, applied when the configured value
/// is zero.
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 5;

/// Number of transport-level connect attempts before giving up.
pub const CONNECT_ATTEMPTS: usize = 3;

/// Number of unsubscribe attempts during teardown.
pub const UNSUBSCRIBE_ATTEMPTS: usize = 2;

// ── Config commands ───────────────────────────────────────────────────────────

/// Encode a hex-digit configuration string into the byte array written to
/// the device.
///
/// Each output byte consumes exactly two hex characters, so the input must
/// have even length and contain only hex digits; anything else fails with
/// [`ExploreError::InvalidEncoding`] instead of panicking mid-parse.
///
/// # Example
///
/// ```
/// # use explore_rs::protocol::encode_config;
/// assert_eq!(encode_config("0A1B").unwrap(), vec![0x0A, 0x1B]);
/// assert!(encode_config("0A1").is_err());
/// ```
pub fn encode_config(config: &str) -> Result<Vec<u8>, ExploreError> {
    hex::decode(config).map_err(|e| ExploreError::InvalidEncoding {
        config: config.to_owned(),
        reason: e.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_config_decodes_hex_pairs() {
        assert_eq!(encode_config("0A1B").unwrap(), vec![0x0A, 0x1B]);
        assert_eq!(encode_config("ff00").unwrap(), vec![0xFF, 0x00]);
        assert_eq!(encode_config("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn encode_config_rejects_odd_length() {
        let err = encode_config("0A1").unwrap_err();
        assert!(matches!(err, ExploreError::InvalidEncoding { .. }));
    }

    #[test]
    fn encode_config_rejects_non_hex() {
        let err = encode_config("zz").unwrap_err();
        assert!(matches!(err, ExploreError::InvalidEncoding { .. }));
    }
}
