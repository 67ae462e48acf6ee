//! Error taxonomy for the Explore driver.
//!
//! Everything a caller can observe is a variant of [`ExploreError`].
//! Transport-level failures during teardown are logged and swallowed rather
//! than surfaced here, and a reassembly-buffer overrun is recovered locally
//! by the reassembler (logged and counted, never propagated).

use thiserror::Error;

/// Failures surfaced by [`crate::explore_board::ExploreBoard`] operations.
#[derive(Debug, Error)]
pub enum ExploreError {
    /// An operation was attempted before the session was prepared and
    /// subscribed.
    #[error("session is not prepared; call prepare_session first")]
    NotReady,

    /// No peripheral matching the configured device identity was discovered.
    /// Covers the discovery timeout as well as a host without usable BLE
    /// adapters.
    #[error("no matching Explore device found: {reason}")]
    DeviceNotFound { reason: String },

    /// All connect attempts to the matched peripheral failed.
    #[error("failed to connect after {attempts} attempts")]
    ConnectFailed {
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },

    /// Service/characteristic enumeration failed, a required characteristic
    /// was missing, or subscribing to the notify characteristic failed.
    #[error("service resolution failed: {reason}")]
    ResolutionFailed { reason: String },

    /// The sink refused to set up for acquisition when the stream was
    /// started. The session stays prepared; streaming is not entered.
    #[error("sink rejected acquisition")]
    Acquisition(#[source] anyhow::Error),

    /// The transport write carrying a config command failed. Not retried.
    #[error("failed to write command to device")]
    Write(#[source] anyhow::Error),

    /// A config string was not a valid even-length hex digit sequence.
    #[error("invalid config string {config:?}: {reason}")]
    InvalidEncoding { config: String, reason: String },
}
