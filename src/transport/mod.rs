//! # Printer Transport Layer
//!
//! Communication backends for reaching a physical printer:
//!
//! - [`usb`]: libusb bulk endpoints via `rusb`
//! - [`bluetooth`]: RFCOMM serial binding over a paired radio link (Linux)
//! - [`pairing`]: the interactive agent-driven pairing state machine
//! - [`scan`]: Bluetooth device discovery and printer heuristics
//!
//! A [`Link`] is one live connection attempt's worth of state. Links are not
//! reentrant and not shared: each owns its [`LinkState`] exclusively, and a
//! session tears one down fully before constructing the next.

pub mod bluetooth;
pub mod pairing;
pub mod scan;
pub mod usb;

use serde::{Deserialize, Serialize};

use crate::device::DeviceDescriptor;
use crate::error::PrinterError;

pub use bluetooth::BluetoothLink;
pub use usb::UsbLink;

/// Physical transport selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Usb,
    Bluetooth,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Bluetooth => "bluetooth",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle of one link.
///
/// Owned exclusively by the link; mutated only by the link's own methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Verifying,
    Connected,
    Failed(String),
}

/// One transport connection to one printer.
///
/// Implementations block (hardware I/O with bounded timeouts); callers
/// serialize access. All methods execute strictly in call order.
pub trait Link: Send {
    /// Which transport this link uses.
    fn kind(&self) -> TransportKind;

    /// Establish the connection, including any pairing/binding the transport
    /// needs. Idempotent when already connected.
    fn connect(&mut self) -> Result<(), PrinterError>;

    /// Write a complete byte stream to the printer.
    fn write_all(&mut self, data: &[u8]) -> Result<(), PrinterError>;

    /// Liveness check against the open handle. Implementations downgrade
    /// known-benign low-level failures to a pass (see the USB link).
    fn verify(&mut self) -> bool;

    /// Close the connection. Errors during close are logged, never
    /// propagated — closing an absent device is not a failure.
    fn disconnect(&mut self);

    /// Live connectivity: a handle exists and still verifies. A failed
    /// re-verify transitions to disconnected rather than raising.
    fn is_connected(&mut self) -> bool;

    /// Where this link points, once known.
    fn descriptor(&self) -> Option<DeviceDescriptor>;

    /// Current lifecycle state snapshot.
    fn state(&self) -> LinkState;
}
