//! # Printer Protocol Layer
//!
//! This module provides wire-format encoders for the two supported thermal
//! printer command protocols.
//!
//! ## Available Protocols
//!
//! - [`escpos`]: ESC/POS raster image transfer (Epson-style, widely cloned)
//! - [`star`]: Star Micronics line-mode raster dialect
//!
//! An [`Encoder`] turns a [`PrintJob`](crate::job::PrintJob) into the byte
//! stream for one complete print, with no transport framing beyond the
//! protocol's own sequences. A truncated or reordered stream is a protocol
//! violation: retries restart encoding from the original bitmap, never
//! resume a partial transfer.

pub mod escpos;
pub mod star;

use serde::{Deserialize, Serialize};

use crate::error::PrinterError;
use crate::job::PrintJob;
use crate::transport::TransportKind;

pub use escpos::EscPosEncoder;
pub use star::StarRasterEncoder;

/// Wire protocol selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[serde(rename = "escpos")]
    EscPos,
    #[serde(rename = "startsp")]
    StarTsp,
}

impl ProtocolKind {
    /// Whether this protocol is implemented over the given transport.
    ///
    /// The check is combination-based, not transport-only: USB + StarTsp is
    /// the one unsupported pairing today, but future protocols may restrict
    /// differently.
    pub fn supports(&self, transport: TransportKind) -> bool {
        !matches!((self, transport), (Self::StarTsp, TransportKind::Usb))
    }

    /// Config/CLI string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EscPos => "escpos",
            Self::StarTsp => "startsp",
        }
    }

    /// Parse from the config/CLI string form.
    pub fn parse(s: &str) -> Result<Self, PrinterError> {
        match s.to_lowercase().as_str() {
            "escpos" => Ok(Self::EscPos),
            "startsp" => Ok(Self::StarTsp),
            other => Err(PrinterError::Config(format!(
                "Unknown protocol '{other}'. Use 'escpos' or 'startsp'"
            ))),
        }
    }

    /// Build the encoder for this protocol.
    pub fn encoder(&self) -> Box<dyn Encoder> {
        match self {
            Self::EscPos => Box::new(EscPosEncoder::new()),
            Self::StarTsp => Box::new(StarRasterEncoder::new()),
        }
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializes print jobs into one protocol's byte stream.
pub trait Encoder: Send {
    /// Which protocol this encoder speaks.
    fn kind(&self) -> ProtocolKind;

    /// Serialize a complete print: image transfer, padding, cut policy.
    ///
    /// Deterministic: the same job always yields byte-identical output.
    fn encode(&self, job: &PrintJob) -> Result<Vec<u8>, PrinterError>;

    /// A fixed human-readable status page using the printer's text-mode
    /// commands, bypassing the bitmap path entirely.
    fn test_page(&self) -> Vec<u8>;

    /// Liveness probe bytes: a status query, or an initialize command where
    /// status queries are unsupported.
    fn probe(&self) -> Vec<u8>;
}

// ============================================================================
// TESTS
// ============================================================================
