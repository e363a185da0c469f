//! # Thermolink - Thermal Printer Connectivity Library
//!
//! Thermolink connects applications to thermal receipt printers over USB or
//! Bluetooth and speaks their wire protocols. It provides:
//!
//! - **Transports**: USB bulk endpoints and Bluetooth RFCOMM, including
//!   OS-level pairing driven through an interactive agent session
//! - **Protocols**: ESC/POS raster transfer and the Star line-mode raster
//!   dialect, as bit-exact encoders
//! - **Sessions**: retry/reconnect policy wrapped around one link and one
//!   encoder
//! - **Management**: automatic transport selection, hot protocol/transport
//!   switching, simulation mode, persistent settings
//!
//! ## Quick Start
//!
//! ```no_run
//! use thermolink::{PrinterManager, PrintJob};
//! use thermolink::config::PrinterSettings;
//!
//! let mut manager = PrinterManager::new(PrinterSettings::default());
//!
//! let image = image::open("receipt.png")
//!     .map_err(|e| thermolink::PrinterError::EncodingError(e.to_string()))?
//!     .to_luma8();
//! manager.print(&PrintJob::new(image))?;
//!
//! # Ok::<(), thermolink::PrinterError>(())
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | ESC/POS and Star raster encoders |
//! | [`transport`] | USB and Bluetooth links, pairing, discovery |
//! | [`session`] | Retry/reconnect policy over one link |
//! | [`manager`] | Transport selection, switching, simulation |
//! | [`job`] | Print jobs and monochrome bitmap packing |
//! | [`device`] | Addresses, descriptors, scan results |
//! | [`config`] | Persistent settings |
//! | [`error`] | Error taxonomy |
//!
//! ## Supported Hardware
//!
//! Tested against ESC/POS receipt printers (Epson TM-class and clones with
//! known USB IDs) and Star TSP650II over Bluetooth SPP. Other printers
//! speaking either protocol should work with explicit configuration.

pub mod config;
pub mod device;
pub mod error;
pub mod job;
pub mod manager;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use error::PrinterError;
pub use job::PrintJob;
pub use manager::PrinterManager;
pub use session::PrinterSession;
