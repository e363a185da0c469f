//! # USB Printer Link
//!
//! Opens a USB thermal printer over libusb bulk endpoints and proves it is
//! alive before handing it to a session.
//!
//! ## Detection Order
//!
//! Auto-detection walks a fixed, ordered table of known vendor/product ID
//! pairs. The order is a deliberate tie-break — earlier entries win when
//! several candidates are present — and must be preserved for
//! reproducibility.
//!
//! ## Endpoint Strategy
//!
//! Most supported printers expose bulk OUT 0x03 / IN 0x82. Those explicit
//! endpoints are tried first; when a model deviates, the active config
//! descriptor is walked for the first bulk OUT endpoint instead.
//!
//! ## Verification Leniency
//!
//! Verification writes a DLE EOT 1 status query. Some printers reject the
//! transfer with an endpoint-class libusb error yet print fine; that error
//! class is downgraded to a pass. Known false-positive risk: a printer that
//! is genuinely wedged can also fail this way and will still report
//! connected until a real write fails.

use std::time::Duration;

use rusb::{DeviceHandle, Direction, GlobalContext, TransferType};
use tracing::{debug, info, warn};

use crate::device::DeviceDescriptor;
use crate::error::PrinterError;
use crate::protocol::escpos;
use crate::transport::{Link, LinkState, TransportKind};

/// Known thermal printer vendor/product IDs, in detection order.
pub const KNOWN_PRINTER_IDS: &[(u16, u16)] = &[
    (0x0FE6, 0x811E), // Gprinter GP-58
    (0x0416, 0x5011), // Winbond common clone ID
    (0x04B8, 0x0E15), // Epson
    (0x0DD4, 0x0205), // Generic
    (0x1FC9, 0x2016), // Generic
];

/// Default bulk OUT endpoint on supported printers.
pub const DEFAULT_OUT_ENDPOINT: u8 = 0x03;

/// Default bulk IN endpoint on supported printers.
pub const DEFAULT_IN_ENDPOINT: u8 = 0x82;

/// Bulk write timeout per transfer.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a libusb error belongs to the "invalid endpoint" class that some
/// working printers produce on status queries.
fn endpoint_quirk(err: &rusb::Error) -> bool {
    matches!(err, rusb::Error::NotFound | rusb::Error::InvalidParam)
}

/// An opened, claimed printer handle plus the endpoint writes go to.
struct OpenPrinter {
    handle: DeviceHandle<GlobalContext>,
    out_endpoint: u8,
}

impl OpenPrinter {
    /// Open and claim a device, resolving the bulk OUT endpoint: explicit
    /// default first, descriptor discovery as fallback.
    fn open(vendor_id: u16, product_id: u16) -> Result<Self, PrinterError> {
        let handle =
            rusb::open_device_with_vid_pid(vendor_id, product_id).ok_or_else(|| {
                PrinterError::DeviceNotFound(format!(
                    "no USB device {vendor_id:04x}:{product_id:04x}"
                ))
            })?;

        // Detach a kernel printer-class driver if one holds the interface.
        // Not supported on all platforms; failure is not fatal.
        let _ = handle.set_auto_detach_kernel_driver(true);

        handle.claim_interface(0).map_err(|e| {
            PrinterError::Transport(format!(
                "failed to claim interface on {vendor_id:04x}:{product_id:04x}: {e}"
            ))
        })?;

        let out_endpoint = match handle.write_bulk(DEFAULT_OUT_ENDPOINT, &[], WRITE_TIMEOUT) {
            Ok(_) => DEFAULT_OUT_ENDPOINT,
            Err(e) if endpoint_quirk(&e) => {
                debug!("default OUT endpoint rejected ({e}), discovering from descriptor");
                Self::discover_out_endpoint(&handle).unwrap_or(DEFAULT_OUT_ENDPOINT)
            }
            // A zero-length probe write failing any other way still tells us
            // nothing about the endpoint layout; keep the default.
            Err(_) => DEFAULT_OUT_ENDPOINT,
        };

        Ok(Self {
            handle,
            out_endpoint,
        })
    }

    /// First bulk OUT endpoint in the active configuration.
    fn discover_out_endpoint(handle: &DeviceHandle<GlobalContext>) -> Option<u8> {
        let config = handle.device().active_config_descriptor().ok()?;
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                for endpoint in descriptor.endpoint_descriptors() {
                    if endpoint.direction() == Direction::Out
                        && endpoint.transfer_type() == TransferType::Bulk
                    {
                        debug!("discovered bulk OUT endpoint 0x{:02x}", endpoint.address());
                        return Some(endpoint.address());
                    }
                }
            }
        }
        None
    }

    /// Send the ESC/POS status query as a liveness probe.
    fn verify(&self) -> bool {
        match self
            .handle
            .write_bulk(self.out_endpoint, &escpos::status_query(), WRITE_TIMEOUT)
        {
            Ok(_) => {
                debug!("USB printer verification successful");
                true
            }
            Err(e) if endpoint_quirk(&e) => {
                // Device opened and is addressable; status query semantics
                // differ per model. Deliberate leniency, see module docs.
                debug!("USB verification skipped (endpoint quirk, device accessible): {e}");
                true
            }
            Err(e) => {
                debug!("USB printer verification failed: {e}");
                false
            }
        }
    }

    fn close(self) {
        if let Err(e) = self.handle.release_interface(0) {
            debug!("error releasing USB interface (ignored): {e}");
        }
        // Handle closes on drop.
    }
}

// ============================================================================
// LINK
// ============================================================================

/// USB link configuration, extracted from [`PrinterSettings`].
///
/// [`PrinterSettings`]: crate::config::PrinterSettings
#[derive(Debug, Clone, Copy, Default)]
pub struct UsbOptions {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub auto_detect: bool,
}

/// A USB printer connection.
pub struct UsbLink {
    options: UsbOptions,
    printer: Option<OpenPrinter>,
    descriptor: Option<DeviceDescriptor>,
    state: LinkState,
}

impl UsbLink {
    pub fn new(options: UsbOptions) -> Self {
        Self {
            options,
            printer: None,
            descriptor: None,
            state: LinkState::Disconnected,
        }
    }

    /// Probe the known-ID table in order; the first candidate that opens and
    /// verifies wins.
    pub fn detect() -> Result<DeviceDescriptor, PrinterError> {
        info!(
            "auto-detecting USB printer across {} known IDs",
            KNOWN_PRINTER_IDS.len()
        );
        for &(vendor_id, product_id) in KNOWN_PRINTER_IDS {
            debug!("trying USB ID {vendor_id:04x}:{product_id:04x}");
            match OpenPrinter::open(vendor_id, product_id) {
                Ok(printer) => {
                    let alive = printer.verify();
                    printer.close();
                    if alive {
                        info!("USB printer detected: {vendor_id:04x}:{product_id:04x}");
                        return Ok(DeviceDescriptor::Usb {
                            vendor_id,
                            product_id,
                        });
                    }
                }
                Err(e) => debug!("candidate {vendor_id:04x}:{product_id:04x} failed: {e}"),
            }
        }
        Err(PrinterError::DeviceNotFound(format!(
            "no USB printer found among {} known IDs",
            KNOWN_PRINTER_IDS.len()
        )))
    }

    /// Which IDs to open: explicit settings beat auto-detect.
    fn resolve_ids(&self) -> Result<(u16, u16), PrinterError> {
        match (self.options.vendor_id, self.options.product_id) {
            (Some(vid), Some(pid)) => Ok((vid, pid)),
            _ if self.options.auto_detect => match Self::detect()? {
                DeviceDescriptor::Usb {
                    vendor_id,
                    product_id,
                } => Ok((vendor_id, product_id)),
                DeviceDescriptor::Bluetooth { .. } => unreachable!(),
            },
            _ => Err(PrinterError::Config(
                "no vendor_id/product_id configured and auto_detect is disabled".into(),
            )),
        }
    }
}

impl Link for UsbLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Usb
    }

    fn connect(&mut self) -> Result<(), PrinterError> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = LinkState::Connecting;
        let (vendor_id, product_id) = self.resolve_ids().inspect_err(|e| {
            self.state = LinkState::Failed(e.to_string());
        })?;

        let printer = match OpenPrinter::open(vendor_id, product_id) {
            Ok(p) => p,
            Err(e) => {
                self.state = LinkState::Failed(e.to_string());
                return Err(e);
            }
        };

        self.state = LinkState::Verifying;
        if !printer.verify() {
            printer.close();
            let msg = format!("printer verification failed for {vendor_id:04x}:{product_id:04x}");
            self.state = LinkState::Failed(msg.clone());
            return Err(PrinterError::Transport(msg));
        }

        info!("connected to USB printer {vendor_id:04x}:{product_id:04x}");
        self.printer = Some(printer);
        self.descriptor = Some(DeviceDescriptor::Usb {
            vendor_id,
            product_id,
        });
        self.state = LinkState::Connected;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), PrinterError> {
        let printer = self.printer.as_ref().ok_or_else(|| {
            PrinterError::ConnectionLost("USB printer not connected".into())
        })?;

        let mut written = 0;
        while written < data.len() {
            match printer
                .handle
                .write_bulk(printer.out_endpoint, &data[written..], WRITE_TIMEOUT)
            {
                Ok(0) => {
                    return Err(PrinterError::ConnectionLost(
                        "USB bulk write made no progress".into(),
                    ));
                }
                Ok(n) => written += n,
                Err(e) => {
                    return Err(PrinterError::ConnectionLost(format!(
                        "USB bulk write failed after {written} bytes: {e}"
                    )));
                }
            }
        }
        debug!("wrote {} bytes to USB printer", data.len());
        Ok(())
    }

    fn verify(&mut self) -> bool {
        match &self.printer {
            Some(printer) => printer.verify(),
            None => false,
        }
    }

    fn disconnect(&mut self) {
        if let Some(printer) = self.printer.take() {
            printer.close();
            info!("USB printer disconnected");
        }
        self.descriptor = None;
        self.state = LinkState::Disconnected;
    }

    fn is_connected(&mut self) -> bool {
        if self.printer.is_none() {
            return false;
        }
        if !self.verify() {
            warn!("USB device no longer accessible, marking as disconnected");
            self.disconnect();
            return false;
        }
        true
    }

    fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.descriptor
    }

    fn state(&self) -> LinkState {
        self.state.clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================
