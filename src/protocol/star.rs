//! # Star Line-Mode Raster Protocol
//!
//! Bit-exact builder for the Star Micronics line-mode raster dialect used
//! by TSP100/TSP650-class printers. Interoperability depends on this byte
//! layout, so it is specified here exactly.
//!
//! ## Stream Layout
//!
//! ```text
//! ┌──────────────┬──────────────────┬───────────────┬─────────────┬──────────────┐
//! │ ESC * r A    │ ESC * r P 0 NUL  │ ESC * r e 1   │  b 48 00 +  │ ESC * r B    │
//! │ enter raster │ continuous page  │ NUL (no-cut,  │  72 bytes   │ exit raster  │
//! │ mode         │ mode             │ only if !cut) │  per row    │ mode         │
//! └──────────────┴──────────────────┴───────────────┴─────────────┴──────────────┘
//! ```
//!
//! Cutting is the raster-mode default terminator, so a cut is requested by
//! *omitting* the no-cut EOT sequence.
//!
//! ## Dot Convention
//!
//! The printer burns where a bit is set, which is the photographic negative
//! of a white-background framebuffer. Source images are thresholded and
//! packed dark = 1 (see [`Bitmap`]), then each row is shipped verbatim.
//!
//! ## Line Width
//!
//! Every transfer line is exactly [`LINE_BYTES`] (72) bytes = 576 dots.
//! Source bitmaps are resized to that width preserving aspect ratio.

use image::GrayImage;
use image::imageops::{self, FilterType};

use crate::error::PrinterError;
use crate::job::{Bitmap, PrintJob};
use crate::protocol::{Encoder, ProtocolKind};

/// Raster line width in dots (576 = 72mm at 203 DPI).
pub const LINE_DOTS: u32 = 576;

/// Raster line width in bytes. Every transfer-data command carries exactly
/// this many bitmap bytes.
pub const LINE_BYTES: usize = 72;

/// Enter raster mode (ESC * r A).
pub const RASTER_ENTER: [u8; 4] = [0x1B, 0x2A, 0x72, 0x41];

/// Set continuous page mode (ESC * r P 0 NUL) — no page length, print as
/// data arrives.
pub const RASTER_CONTINUOUS: [u8; 6] = [0x1B, 0x2A, 0x72, 0x50, 0x30, 0x00];

/// End-of-transmission without cutting (ESC * r e 1 NUL). Sent only when the
/// job asks for no cut; the raster-mode default EOT performs a cut.
pub const RASTER_EOT_NO_CUT: [u8; 6] = [0x1B, 0x2A, 0x72, 0x65, 0x31, 0x00];

/// Exit raster mode (ESC * r B).
pub const RASTER_EXIT: [u8; 4] = [0x1B, 0x2A, 0x72, 0x42];

/// Transfer-data command prefix: `b` plus the little-endian line byte count,
/// fixed at 72.
pub const RASTER_LINE_HEADER: [u8; 3] = [0x62, LINE_BYTES as u8, 0x00];

/// Star real-time status request (ESC ENQ 1), used as a liveness probe.
pub const STATUS_REQUEST: [u8; 3] = [0x1B, 0x05, 0x01];

// ============================================================================
// ENCODER
// ============================================================================

/// Star raster print-job encoder.
///
/// Bluetooth only — the USB side of this dialect is deliberately
/// unimplemented, and the session rejects the combination before any I/O.
#[derive(Debug, Default)]
pub struct StarRasterEncoder;

impl StarRasterEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Resize to the fixed raster width, preserving aspect ratio.
    fn fit_to_line_width(image: &GrayImage) -> GrayImage {
        if image.width() == LINE_DOTS {
            return image.clone();
        }
        let height = ((image.height() as u64 * LINE_DOTS as u64) / image.width() as u64).max(1);
        imageops::resize(image, LINE_DOTS, height as u32, FilterType::Triangle)
    }
}

impl Encoder for StarRasterEncoder {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::StarTsp
    }

    /// Serialize the full raster stream. Deterministic: identical jobs yield
    /// byte-identical output, and output length is
    /// `4 + 6 [+ 6] + rows * (3 + 72) + 4`.
    fn encode(&self, job: &PrintJob) -> Result<Vec<u8>, PrinterError> {
        job.validate()?;

        let resized = Self::fit_to_line_width(&job.image);
        let bitmap = Bitmap::from_luma(&resized);
        debug_assert_eq!(bitmap.row_bytes, LINE_BYTES);

        let rows = bitmap.height as usize + job.bottom_padding_px as usize;
        let mut out =
            Vec::with_capacity(20 + rows * (RASTER_LINE_HEADER.len() + LINE_BYTES));

        out.extend_from_slice(&RASTER_ENTER);
        out.extend_from_slice(&RASTER_CONTINUOUS);
        if !job.cut {
            out.extend_from_slice(&RASTER_EOT_NO_CUT);
        }

        for y in 0..bitmap.height {
            out.extend_from_slice(&RASTER_LINE_HEADER);
            out.extend_from_slice(bitmap.row(y));
        }

        // Padding rows carry no printing dots; they advance the paper past
        // the cut point without a hardware feed command.
        for _ in 0..job.bottom_padding_px {
            out.extend_from_slice(&RASTER_LINE_HEADER);
            out.extend_from_slice(&[0x00; LINE_BYTES]);
        }

        out.extend_from_slice(&RASTER_EXIT);
        Ok(out)
    }

    /// Diagnostic raster page: a frame with a bar pattern inside. Text-mode
    /// commands are not part of this dialect's raster path, so the page is
    /// drawn as a bitmap.
    fn test_page(&self) -> Vec<u8> {
        let width = LINE_DOTS;
        let height = 400u32;
        let image = GrayImage::from_fn(width, height, |x, y| {
            let border = x < 8 || x >= width - 8 || y < 8 || y >= height - 8;
            // Vertical bars across the middle band expose missing columns.
            let bar = (120..280).contains(&y) && (x / 24) % 2 == 0;
            if border || bar {
                image::Luma([0u8])
            } else {
                image::Luma([255u8])
            }
        });

        let job = PrintJob::new(image).with_bottom_padding(48);
        // Infallible: the pattern is non-empty and already line-width.
        self.encode(&job).unwrap_or_default()
    }

    fn probe(&self) -> Vec<u8> {
        STATUS_REQUEST.to_vec()
    }
}

// ============================================================================
// TESTS
// ============================================================================
