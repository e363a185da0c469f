//! # Device Identity Types
//!
//! Addressing and discovery types shared by both transports:
//!
//! - [`MacAddress`]: validated 6-byte Bluetooth address with a canonical
//!   `XX:XX:XX:XX:XX:XX` form
//! - [`DeviceDescriptor`]: how to reach one printer, discriminated by transport
//! - [`DeviceInfo`]: one Bluetooth scan result, with printer heuristics
//!
//! ## MAC Validation
//!
//! Input accepts colon- or dash-separated hex pairs, case-insensitive.
//! Anything else is rejected up front — a malformed address is a validation
//! error, never a connection attempt.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PrinterError;

/// Bluetooth device class value for Imaging/Printer devices.
///
/// The lower 13 bits of the class field encode major/minor device class;
/// 0x1680 is Imaging with the Printer minor bit set.
pub const PRINTER_DEVICE_CLASS: u32 = 0x1680;

/// Mask selecting the major/minor class bits of a device class field.
pub const DEVICE_CLASS_MASK: u32 = 0x1FFF;

/// Device-name substrings that identify thermal printers when the class
/// field is missing or wrong. Matched case-insensitively.
const PRINTER_NAME_KEYWORDS: &[&str] = &["PRINTER", "TSP", "STAR", "EPSON", "CITIZEN"];

// ============================================================================
// MAC ADDRESS
// ============================================================================

/// A validated 6-byte Bluetooth MAC address.
///
/// ## Example
///
/// ```
/// use thermolink::device::MacAddress;
///
/// let mac: MacAddress = "aa-bb-cc-dd-ee-ff".parse().unwrap();
/// assert_eq!(mac.to_string(), "AA:BB:CC:DD:EE:FF");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Raw address bytes, most significant first.
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = PrinterError;

    /// Parse from colon- or dash-separated hex, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sep = if s.contains(':') {
            ':'
        } else if s.contains('-') {
            '-'
        } else {
            return Err(PrinterError::InvalidAddress(s.to_string()));
        };

        let parts: Vec<&str> = s.split(sep).collect();
        if parts.len() != 6 {
            return Err(PrinterError::InvalidAddress(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            if part.len() != 2 {
                return Err(PrinterError::InvalidAddress(s.to_string()));
            }
            octets[i] = u8::from_str_radix(part, 16)
                .map_err(|_| PrinterError::InvalidAddress(s.to_string()))?;
        }

        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    /// Canonical form: uppercase, colon-separated.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Serialize for MacAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// DEVICE DESCRIPTOR
// ============================================================================

/// How to reach one printer, discriminated by transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum DeviceDescriptor {
    /// A USB printer endpoint.
    Usb { vendor_id: u16, product_id: u16 },
    /// A Bluetooth printer bound to a local RFCOMM channel.
    Bluetooth { mac: MacAddress, rfcomm_port: u8 },
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb {
                vendor_id,
                product_id,
            } => write!(f, "usb {vendor_id:04x}:{product_id:04x}"),
            Self::Bluetooth { mac, rfcomm_port } => {
                write!(f, "bluetooth {mac} port {rfcomm_port}")
            }
        }
    }
}

// ============================================================================
// SCAN RESULTS
// ============================================================================

/// One Bluetooth device discovered during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub mac: MacAddress,
    pub name: String,
    /// Raw device class field as reported by the controller (0 if unknown).
    pub device_class: u32,
    /// Heuristic: class matches the imaging/printer range, or the name
    /// contains a known printer-brand keyword. Either signal is sufficient.
    pub looks_like_printer: bool,
    pub is_paired: bool,
    /// RSSI in dBm, present only while the device is in range.
    pub signal_strength: Option<i32>,
}

impl DeviceInfo {
    /// Apply the printer heuristic to a class field and device name.
    pub fn printer_heuristic(device_class: u32, name: &str) -> bool {
        if (device_class & DEVICE_CLASS_MASK) == PRINTER_DEVICE_CLASS {
            return true;
        }
        let upper = name.to_uppercase();
        PRINTER_NAME_KEYWORDS.iter().any(|kw| upper.contains(kw))
    }
}

// ============================================================================
// TESTS
// ============================================================================
