//! # Error Types
//!
//! This module defines error types used throughout the thermolink library.
//!
//! ## Taxonomy
//!
//! Errors fall into three families with different retry semantics:
//!
//! - **Configuration-shape errors** (`InvalidAddress`, `UnsupportedCombination`):
//!   detected before any I/O and never retried.
//! - **Transport/pairing errors** (`DeviceNotFound`, `PairingTimeout`,
//!   `PairingFailed`, `BindFailure`, `ConnectionLost`): recoverable at the
//!   session level via reconnect + retry; surfaced unmodified once retries
//!   are exhausted.
//! - **Data errors** (`EncodingError`): the job itself is malformed;
//!   retrying the same job cannot succeed.

use thiserror::Error;

/// Main error type for thermolink operations
#[derive(Debug, Error)]
pub enum PrinterError {
    /// Malformed Bluetooth MAC address; no connection was attempted
    #[error("Invalid MAC address format: {0}")]
    InvalidAddress(String),

    /// Transport/protocol pairing not implemented; no I/O was attempted
    #[error("Unsupported combination: {transport} + {protocol}")]
    UnsupportedCombination {
        transport: &'static str,
        protocol: &'static str,
    },

    /// USB auto-detect exhausted its candidates, or the Bluetooth target
    /// never became visible during a scan
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The interactive pairing session did not reach a success marker in time
    #[error("Pairing timed out after {0} seconds")]
    PairingTimeout(u64),

    /// The pairing agent reported failure, or never became ready
    #[error("Pairing failed: {0}")]
    PairingFailed(String),

    /// RFCOMM bind was rejected or the device node never materialized
    #[error("RFCOMM bind failed: {0}")]
    BindFailure(String),

    /// A verified-connected link later failed a write or re-verify
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The print job's bitmap is malformed or empty
    #[error("Encoding error: {0}")]
    EncodingError(String),

    /// Transport-level errors that don't fit a narrower variant
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration file could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrinterError {
    /// Whether a session retry loop may attempt this operation again.
    ///
    /// Configuration-shape and data errors are final; transport errors are
    /// worth another connect + write cycle.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidAddress(_)
                | Self::UnsupportedCombination { .. }
                | Self::EncodingError(_)
                | Self::Config(_)
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_shape_errors_not_retryable() {
        assert!(!PrinterError::InvalidAddress("nope".into()).is_retryable());
        assert!(
            !PrinterError::UnsupportedCombination {
                transport: "usb",
                protocol: "startsp",
            }
            .is_retryable()
        );
        assert!(!PrinterError::EncodingError("empty bitmap".into()).is_retryable());
    }

    #[test]
    fn test_transport_errors_retryable() {
        assert!(PrinterError::ConnectionLost("write failed".into()).is_retryable());
        assert!(PrinterError::BindFailure("rfcomm busy".into()).is_retryable());
        assert!(PrinterError::PairingTimeout(30).is_retryable());
        assert!(PrinterError::DeviceNotFound("no usb printer".into()).is_retryable());
    }

    #[test]
    fn test_unsupported_combination_message() {
        let err = PrinterError::UnsupportedCombination {
            transport: "usb",
            protocol: "startsp",
        };
        assert_eq!(err.to_string(), "Unsupported combination: usb + startsp");
    }
}
