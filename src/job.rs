//! # Print Jobs
//!
//! A [`PrintJob`] is the unit of work handed to a session: a print-ready
//! monochrome bitmap plus cut/padding policy. The upstream image pipeline
//! (dithering, scaling beyond the protocol's own line-width step) is out of
//! scope — the job arrives already prepared.
//!
//! [`Bitmap`] is the packed 1-bit-per-pixel form both encoders consume.
//!
//! ## Bit Convention
//!
//! A set bit means a **dark** source pixel, i.e. a dot the printer burns.
//! Thermal protocols transfer dots-to-burn, which is the photographic
//! negative of a white-background framebuffer; packing with dark = 1 is that
//! inversion.

use image::GrayImage;

use crate::error::PrinterError;

/// Luma threshold separating dark (burned) from light (blank) pixels.
pub const MONO_THRESHOLD: u8 = 128;

/// One print job: bitmap, cut flag, and bottom padding.
///
/// Immutable once handed to a session. `bottom_padding_px` appends blank
/// rows after the image — used to advance paper past the cut point without
/// a hardware feed command.
#[derive(Debug, Clone)]
pub struct PrintJob {
    pub image: GrayImage,
    pub cut: bool,
    pub bottom_padding_px: u32,
}

impl PrintJob {
    /// A job with the default policy: cut after printing, no padding.
    pub fn new(image: GrayImage) -> Self {
        Self {
            image,
            cut: true,
            bottom_padding_px: 0,
        }
    }

    pub fn with_cut(mut self, cut: bool) -> Self {
        self.cut = cut;
        self
    }

    pub fn with_bottom_padding(mut self, px: u32) -> Self {
        self.bottom_padding_px = px;
        self
    }

    /// Reject jobs that cannot produce any raster output.
    pub fn validate(&self) -> Result<(), PrinterError> {
        if self.image.width() == 0 || self.image.height() == 0 {
            return Err(PrinterError::EncodingError(format!(
                "empty bitmap ({}x{})",
                self.image.width(),
                self.image.height()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// PACKED BITMAP
// ============================================================================

/// A packed 1-bpp raster: MSB-first within each byte, dark pixel = set bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Bytes per row: `ceil(width / 8)`.
    pub row_bytes: usize,
    pub data: Vec<u8>,
}

impl Bitmap {
    /// Pack a grayscale image, thresholding each pixel against
    /// [`MONO_THRESHOLD`]. Pixels darker than the threshold become set bits.
    pub fn from_luma(image: &GrayImage) -> Self {
        let width = image.width();
        let height = image.height();
        let row_bytes = width.div_ceil(8) as usize;
        let mut data = vec![0u8; row_bytes * height as usize];

        for y in 0..height {
            let row_start = y as usize * row_bytes;
            for x in 0..width {
                if image.get_pixel(x, y)[0] < MONO_THRESHOLD {
                    data[row_start + (x / 8) as usize] |= 0x80 >> (x % 8);
                }
            }
        }

        Self {
            width,
            height,
            row_bytes,
            data,
        }
    }

    /// One packed row, top-to-bottom indexing.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.row_bytes;
        &self.data[start..start + self.row_bytes]
    }
}

// ============================================================================
// TESTS
// ============================================================================
