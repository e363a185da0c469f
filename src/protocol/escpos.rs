//! # ESC/POS Protocol
//!
//! Command builders and the print-job encoder for ESC/POS, the
//! escape-prefixed command protocol used by Epson-style thermal printers
//! (and cloned by most no-name receipt printers).
//!
//! ## Escape Sequence Structure
//!
//! Commands follow these patterns:
//! - Single byte: `LF`
//! - Two bytes: `ESC @`
//! - Multi-byte with parameters: `GS v 0 m xL xH yL yH data...`
//!
//! ## Byte Order
//!
//! Multi-byte integers use **little-endian** encoding: `u16` value 0x0240
//! is sent as bytes `[0x40, 0x02]`.

use crate::error::PrinterError;
use crate::job::{Bitmap, PrintJob};
use crate::protocol::{Encoder, ProtocolKind};

/// ESC (Escape) - Command prefix byte
pub const ESC: u8 = 0x1B;

/// GS (Group Separator) - Extended command prefix
pub const GS: u8 = 0x1D;

/// DLE (Data Link Escape) - Real-time command prefix
pub const DLE: u8 = 0x10;

/// LF (Line Feed) - Print buffer and advance one line
pub const LF: u8 = 0x0A;

// ============================================================================
// COMMAND BUILDERS
// ============================================================================

/// # Initialize Printer (ESC @)
///
/// Resets the printer to its power-on default state.
///
/// | Format  | Bytes |
/// |---------|-------|
/// | ASCII   | ESC @ |
/// | Hex     | 1B 40 |
///
/// Clears the print buffer and resets formatting; does not touch stored
/// graphics or configuration.
#[inline]
pub fn init() -> Vec<u8> {
    vec![ESC, b'@']
}

/// # Real-Time Status Query (DLE EOT 1)
///
/// Asks the printer to transmit its status byte. Used as a liveness probe:
/// a printer that accepts this write is present and addressable.
///
/// | Format  | Bytes    |
/// |---------|----------|
/// | ASCII   | DLE EOT 1|
/// | Hex     | 10 04 01 |
#[inline]
pub fn status_query() -> Vec<u8> {
    vec![DLE, 0x04, 0x01]
}

/// # Feed and Partial Cut (GS V B 0)
///
/// Feeds paper to the cut position, then performs a partial cut, leaving a
/// small hinge so the receipt doesn't fall.
///
/// | Format  | Bytes       |
/// |---------|-------------|
/// | ASCII   | GS V B 0    |
/// | Hex     | 1D 56 42 00 |
#[inline]
pub fn cut() -> Vec<u8> {
    vec![GS, b'V', b'B', 0]
}

/// # Select Justification (ESC a n)
///
/// n = 0 left, 1 center, 2 right. Applies to subsequent lines.
#[inline]
pub fn align(n: u8) -> Vec<u8> {
    vec![ESC, b'a', n]
}

/// # Emphasis On/Off (ESC E n)
#[inline]
pub fn bold(on: bool) -> Vec<u8> {
    vec![ESC, b'E', on as u8]
}

/// # Raster Bit Image (GS v 0)
///
/// Transfers a packed monochrome bitmap in normal density.
///
/// | Format | Bytes                        |
/// |--------|------------------------------|
/// | ASCII  | GS v 0 m xL xH yL yH d1...dk |
/// | Hex    | 1D 76 30 00 ...              |
///
/// ## Parameters
///
/// - `width_bytes`: bytes per raster line (xL xH, little-endian)
/// - `height`: number of raster lines (yL yH, little-endian)
/// - `data`: exactly `width_bytes * height` packed bytes, MSB first,
///   set bit = printed dot
#[inline]
pub fn raster_image(width_bytes: u16, height: u16, data: &[u8]) -> Vec<u8> {
    debug_assert_eq!(data.len(), width_bytes as usize * height as usize);
    let mut out = Vec::with_capacity(8 + data.len());
    out.extend_from_slice(&[GS, b'v', b'0', 0x00]);
    out.extend_from_slice(&u16_le(width_bytes));
    out.extend_from_slice(&u16_le(height));
    out.extend_from_slice(data);
    out
}

/// Encode a u16 value as little-endian bytes [low, high]
#[inline]
pub const fn u16_le(value: u16) -> [u8; 2] {
    [value as u8, (value >> 8) as u8]
}

// ============================================================================
// ENCODER
// ============================================================================

/// ESC/POS print-job encoder. Usable over either transport.
#[derive(Debug, Default)]
pub struct EscPosEncoder;

impl EscPosEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder for EscPosEncoder {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::EscPos
    }

    /// Emit: raster image (padding appended as blank rows), a line feed,
    /// and the cut command when requested.
    fn encode(&self, job: &PrintJob) -> Result<Vec<u8>, PrinterError> {
        job.validate()?;

        let bitmap = Bitmap::from_luma(&job.image);
        let total_rows = bitmap.height as u64 + job.bottom_padding_px as u64;
        if bitmap.row_bytes > u16::MAX as usize || total_rows > u16::MAX as u64 {
            return Err(PrinterError::EncodingError(format!(
                "bitmap exceeds raster command limits ({}x{} rows)",
                bitmap.row_bytes, total_rows
            )));
        }

        let mut data = bitmap.data.clone();
        data.resize(bitmap.row_bytes * total_rows as usize, 0x00);

        let mut out = raster_image(bitmap.row_bytes as u16, total_rows as u16, &data);
        out.push(LF);
        if job.cut {
            out.extend_from_slice(&cut());
        }
        Ok(out)
    }

    /// Fixed diagnostic page in text mode: centered bold title, then ruled
    /// status/protocol/width lines, feed, cut.
    fn test_page(&self) -> Vec<u8> {
        const RULE: &[u8] = b"================================\n";

        let mut out = init();
        out.extend_from_slice(&align(1));
        out.extend_from_slice(&bold(true));
        out.extend_from_slice(b"Thermal Printer Test\n");
        out.extend_from_slice(&align(0));
        out.extend_from_slice(&bold(false));
        out.extend_from_slice(RULE);
        out.extend_from_slice(b"Status: OK\n");
        out.extend_from_slice(b"Protocol: ESC/POS\n");
        out.extend_from_slice(b"Width: 83mm (600px @ 203 DPI)\n");
        out.extend_from_slice(RULE);
        out.extend_from_slice(b"\n\n\n");
        out.extend_from_slice(&cut());
        out
    }

    /// DLE EOT 1 status query. Models that reject it still accept ESC @, so
    /// the session falls back to `init()` via the transport's leniency path.
    fn probe(&self) -> Vec<u8> {
        status_query()
    }
}

// ============================================================================
// TESTS
// ============================================================================
