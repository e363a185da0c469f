//! # Thermolink CLI
//!
//! Command-line interface for printer connectivity management.
//!
//! ## Usage
//!
//! ```bash
//! # Show configuration and connection status
//! thermolink status
//!
//! # Print an image
//! thermolink print receipt.png
//! thermolink print --no-cut --padding 48 receipt.png
//!
//! # Print the protocol's diagnostic page
//! thermolink test
//!
//! # Bluetooth management
//! thermolink scan
//! thermolink pair 00:11:62:0A:0B:0C
//! thermolink unpair 00:11:62:0A:0B:0C
//!
//! # Switch protocol or transport (persisted to the config file)
//! thermolink protocol startsp
//! thermolink transport bluetooth
//!
//! # Dry-run against a simulated printer
//! thermolink --simulate test
//! ```
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (e.g. `RUST_LOG=thermolink=debug`).

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use thermolink::config::TransportChoice;
use thermolink::device::MacAddress;
use thermolink::protocol::ProtocolKind;
use thermolink::{PrintJob, PrinterError, PrinterManager};

/// Thermolink - thermal printer connectivity utility
#[derive(Parser, Debug)]
#[command(name = "thermolink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (created on first change)
    #[arg(long, default_value = "thermolink.json", global = true)]
    config: PathBuf,

    /// Run against a simulated printer instead of hardware
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show configuration and connection status
    Status,

    /// Connect to the printer without printing
    Connect,

    /// Print an image file
    Print {
        /// Image to print (any format the image crate reads)
        image: PathBuf,

        /// Skip the cut at the end of the job
        #[arg(long)]
        no_cut: bool,

        /// Blank rows to feed after the image
        #[arg(long, default_value = "0")]
        padding: u32,
    },

    /// Print the active protocol's diagnostic page
    Test,

    /// Scan for nearby Bluetooth devices
    Scan {
        /// Scan duration in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Pair a Bluetooth printer and remember it
    Pair {
        /// Device address (XX:XX:XX:XX:XX:XX)
        mac: String,

        /// Overall pairing timeout in seconds (default from config)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Remove a Bluetooth pairing
    Unpair {
        /// Device address (XX:XX:XX:XX:XX:XX)
        mac: String,
    },

    /// Switch the wire protocol (escpos or startsp)
    Protocol { protocol: String },

    /// Switch the transport policy (usb, bluetooth, or auto)
    Transport { transport: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), PrinterError> {
    let cli = Cli::parse();

    let mut manager = PrinterManager::from_config_file(&cli.config)?;
    manager.set_simulation(cli.simulate);

    match cli.command {
        Commands::Status => {
            let status = manager.status();
            let json = serde_json::to_string_pretty(&status)
                .map_err(|e| PrinterError::Config(format!("Failed to render status: {e}")))?;
            println!("{json}");
        }

        Commands::Connect => {
            manager.connect()?;
            println!("Connected.");
        }

        Commands::Print {
            image,
            no_cut,
            padding,
        } => {
            let gray = ::image::open(&image)
                .map_err(|e| {
                    PrinterError::EncodingError(format!(
                        "Failed to load {}: {e}",
                        image.display()
                    ))
                })?
                .to_luma8();

            let job = PrintJob::new(gray)
                .with_cut(!no_cut)
                .with_bottom_padding(padding);
            manager.print(&job)?;
            println!("Printed {}.", image.display());
        }

        Commands::Test => {
            manager.test_print()?;
            println!("Test page sent.");
        }

        Commands::Scan { timeout } => {
            println!("Scanning for Bluetooth devices...");
            let devices = manager.scan(Duration::from_secs(timeout))?;
            if devices.is_empty() {
                println!("No devices found.");
            }
            for device in devices {
                let marker = if device.looks_like_printer { "*" } else { " " };
                let paired = if device.is_paired { "paired" } else { "      " };
                let rssi = device
                    .signal_strength
                    .map(|dbm| format!("{dbm} dBm"))
                    .unwrap_or_default();
                println!("{marker} {}  {paired}  {:24} {rssi}", device.mac, device.name);
            }
            println!("\n* likely a printer");
        }

        Commands::Pair { mac, timeout } => {
            let mac: MacAddress = mac.parse()?;
            manager.pair(mac, timeout.map(Duration::from_secs))?;
            manager.set_bluetooth_printer(mac)?;
            println!("Paired with {mac}.");
        }

        Commands::Unpair { mac } => {
            let mac: MacAddress = mac.parse()?;
            manager.unpair(mac)?;
            println!("Unpaired {mac}.");
        }

        Commands::Protocol { protocol } => {
            let protocol = ProtocolKind::parse(&protocol)?;
            manager.switch_protocol(protocol)?;
            println!("Protocol set to {protocol}.");
        }

        Commands::Transport { transport } => {
            let transport = TransportChoice::parse(&transport)?;
            manager.switch_transport(transport)?;
            println!("Transport set to {}.", transport.as_str());
        }
    }

    Ok(())
}
