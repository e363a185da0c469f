//! # Printer Settings
//!
//! Persistent configuration for the connectivity layer, stored as JSON.
//!
//! ## Layout
//!
//! ```json
//! {
//!   "transport": "auto",
//!   "protocol": "startsp",
//!   "bluetooth_mac": "00:11:62:0A:0B:0C",
//!   "bluetooth_port": 1,
//!   "auto_detect": true,
//!   "retry_attempts": 3
//! }
//! ```
//!
//! ## Timing Constants
//!
//! The pairing sub-protocol's waits (agent ready, discovery window, overall
//! pairing timeout) were tuned empirically against one controller/agent
//! combination. They live in [`PairingTimings`] as configurable values with
//! those defaults rather than derived numbers.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::MacAddress;
use crate::error::PrinterError;
use crate::protocol::ProtocolKind;

/// Transport selection policy.
///
/// `Auto` tries Bluetooth first, then USB — Bluetooth printers are assumed
/// battery-powered/portable and preferred when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportChoice {
    Usb,
    Bluetooth,
    Auto,
}

impl TransportChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Usb => "usb",
            Self::Bluetooth => "bluetooth",
            Self::Auto => "auto",
        }
    }

    /// Parse from the CLI/config string form.
    pub fn parse(s: &str) -> Result<Self, PrinterError> {
        match s.to_lowercase().as_str() {
            "usb" => Ok(Self::Usb),
            "bluetooth" => Ok(Self::Bluetooth),
            "auto" => Ok(Self::Auto),
            other => Err(PrinterError::Config(format!(
                "Unknown transport '{other}'. Use 'usb', 'bluetooth' or 'auto'"
            ))),
        }
    }
}

// ============================================================================
// PAIRING TIMINGS
// ============================================================================

/// Timing knobs for the interactive pairing session, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingTimings {
    /// Wait for the agent prompt / "Agent registered" after session start.
    #[serde(default = "default_agent_ready_ms")]
    pub agent_ready_ms: u64,
    /// Settle delay after each setup command (power on, agent on, ...).
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Fixed discovery window for the target to become visible.
    #[serde(default = "default_discovery_ms")]
    pub discovery_ms: u64,
    /// Per-read poll interval while draining buffered output.
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,
    /// Window for the device-list output to finish.
    #[serde(default = "default_device_list_ms")]
    pub device_list_ms: u64,
    /// Overall bound on the pair command reaching a success/failure marker.
    #[serde(default = "default_pair_ms")]
    pub pair_ms: u64,
}

fn default_agent_ready_ms() -> u64 {
    5_000
}
fn default_settle_ms() -> u64 {
    500
}
fn default_discovery_ms() -> u64 {
    15_000
}
fn default_drain_poll_ms() -> u64 {
    100
}
fn default_device_list_ms() -> u64 {
    3_000
}
fn default_pair_ms() -> u64 {
    30_000
}

impl Default for PairingTimings {
    fn default() -> Self {
        Self {
            agent_ready_ms: default_agent_ready_ms(),
            settle_ms: default_settle_ms(),
            discovery_ms: default_discovery_ms(),
            drain_poll_ms: default_drain_poll_ms(),
            device_list_ms: default_device_list_ms(),
            pair_ms: default_pair_ms(),
        }
    }
}

impl PairingTimings {
    /// Timings shrunk to near-zero for unit tests with scripted sessions.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            agent_ready_ms: 50,
            settle_ms: 0,
            discovery_ms: 0,
            drain_poll_ms: 1,
            device_list_ms: 50,
            pair_ms: 100,
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Persistent printer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterSettings {
    /// Transport selection: usb, bluetooth, or auto.
    #[serde(default = "default_transport")]
    pub transport: TransportChoice,

    /// Wire protocol: escpos or startsp.
    #[serde(default = "default_protocol")]
    pub protocol: ProtocolKind,

    /// Bluetooth printer address. Required for Bluetooth connects.
    #[serde(default)]
    pub bluetooth_mac: Option<MacAddress>,

    /// RFCOMM channel on the remote device (1 is standard for SPP).
    #[serde(default = "default_bluetooth_port")]
    pub bluetooth_port: u8,

    /// Explicit USB IDs. When absent and `auto_detect` is on, the known-ID
    /// table is probed in order.
    #[serde(default)]
    pub vendor_id: Option<u16>,
    #[serde(default)]
    pub product_id: Option<u16>,

    /// Probe the known vendor/product ID table when no explicit IDs are set.
    #[serde(default = "default_auto_detect")]
    pub auto_detect: bool,

    /// Print attempts before giving up (reconnect counts as an attempt).
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed backoff between failed print attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub pairing: PairingTimings,
}

fn default_transport() -> TransportChoice {
    TransportChoice::Auto
}
fn default_protocol() -> ProtocolKind {
    ProtocolKind::EscPos
}
fn default_bluetooth_port() -> u8 {
    1
}
fn default_auto_detect() -> bool {
    true
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    2_000
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            protocol: default_protocol(),
            bluetooth_mac: None,
            bluetooth_port: default_bluetooth_port(),
            vendor_id: None,
            product_id: None,
            auto_detect: default_auto_detect(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            pairing: PairingTimings::default(),
        }
    }
}

impl PrinterSettings {
    /// Load settings from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PrinterError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            PrinterError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            PrinterError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Save settings to a JSON file (pretty-printed).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PrinterError> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| PrinterError::Config(format!("Failed to serialize settings: {e}")))?;
        fs::write(path, contents).map_err(|e| {
            PrinterError::Config(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
