//! End-to-end pipeline tests: manager -> session -> encoder -> link, with
//! scripted links substituted at the factory seam. Byte expectations are
//! spelled out against the protocol documentation rather than recomputed
//! through the encoders.

use std::sync::{Arc, Mutex};

use image::{GrayImage, Luma};
use pretty_assertions::assert_eq;

use thermolink::config::{PrinterSettings, TransportChoice};
use thermolink::device::DeviceDescriptor;
use thermolink::error::PrinterError;
use thermolink::manager::{LinkFactory, PrinterManager};
use thermolink::protocol::ProtocolKind;
use thermolink::transport::{Link, LinkState, TransportKind};
use thermolink::PrintJob;

// ============================================================================
// SCRIPTED TRANSPORT
// ============================================================================

type WriteLog = Arc<Mutex<Vec<(TransportKind, Vec<u8>)>>>;

struct ScriptedLink {
    kind: TransportKind,
    connected: bool,
    /// Remaining connect attempts that should fail.
    connect_failures: Arc<Mutex<u32>>,
    log: WriteLog,
}

impl Link for ScriptedLink {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn connect(&mut self) -> Result<(), PrinterError> {
        let mut failures = self.connect_failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err(PrinterError::ConnectionLost("scripted outage".into()));
        }
        self.connected = true;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), PrinterError> {
        self.log.lock().unwrap().push((self.kind, data.to_vec()));
        Ok(())
    }

    fn verify(&mut self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn descriptor(&self) -> Option<DeviceDescriptor> {
        match self.kind {
            TransportKind::Bluetooth => Some(DeviceDescriptor::Bluetooth {
                mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
                rfcomm_port: 1,
            }),
            TransportKind::Usb => None,
        }
    }

    fn state(&self) -> LinkState {
        if self.connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }
}

#[derive(Clone, Default)]
struct ScriptedFactory {
    bluetooth_outages: Arc<Mutex<u32>>,
    usb_outages: Arc<Mutex<u32>>,
    log: WriteLog,
}

impl ScriptedFactory {
    fn writes(&self) -> Vec<(TransportKind, Vec<u8>)> {
        self.log.lock().unwrap().clone()
    }
}

impl LinkFactory for ScriptedFactory {
    fn bluetooth(&self, _settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError> {
        Ok(Box::new(ScriptedLink {
            kind: TransportKind::Bluetooth,
            connected: false,
            connect_failures: Arc::clone(&self.bluetooth_outages),
            log: Arc::clone(&self.log),
        }))
    }

    fn usb(&self, _settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError> {
        Ok(Box::new(ScriptedLink {
            kind: TransportKind::Usb,
            connected: false,
            connect_failures: Arc::clone(&self.usb_outages),
            log: Arc::clone(&self.log),
        }))
    }
}

fn settings(transport: TransportChoice, protocol: ProtocolKind) -> PrinterSettings {
    let mut settings = PrinterSettings::default();
    settings.transport = transport;
    settings.protocol = protocol;
    settings.retry_attempts = 1;
    settings.retry_backoff_ms = 0;
    settings
}

fn manager_with(
    transport: TransportChoice,
    protocol: ProtocolKind,
) -> (PrinterManager, ScriptedFactory) {
    let factory = ScriptedFactory::default();
    let manager =
        PrinterManager::with_factory(settings(transport, protocol), Box::new(factory.clone()));
    (manager, factory)
}

fn dark_image(width: u32, height: u32) -> GrayImage {
    GrayImage::from_pixel(width, height, Luma([0u8]))
}

// ============================================================================
// GOLDEN BYTE STREAMS
// ============================================================================

#[test]
fn test_escpos_print_produces_documented_stream() {
    let (mut manager, factory) = manager_with(TransportChoice::Usb, ProtocolKind::EscPos);

    // 16x2 all-dark: 2 bytes/row, 2 rows.
    manager.print(&PrintJob::new(dark_image(16, 2))).unwrap();

    let writes = factory.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, TransportKind::Usb);

    let mut expected = vec![
        0x1D, 0x76, 0x30, 0x00, // GS v 0, normal density
        0x02, 0x00, // 2 bytes per row, little-endian
        0x02, 0x00, // 2 rows
        0xFF, 0xFF, 0xFF, 0xFF, // packed bitmap, dark = set
        0x0A, // LF
    ];
    expected.extend_from_slice(&[0x1D, 0x56, 0x42, 0x00]); // GS V B 0 cut
    assert_eq!(writes[0].1, expected);
}

#[test]
fn test_star_print_produces_documented_stream() {
    let (mut manager, factory) = manager_with(TransportChoice::Bluetooth, ProtocolKind::StarTsp);

    // Full line width, one row, no resize involved.
    manager.print(&PrintJob::new(dark_image(576, 1))).unwrap();

    let writes = factory.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, TransportKind::Bluetooth);

    let stream = &writes[0].1;
    assert_eq!(&stream[..4], &[0x1B, 0x2A, 0x72, 0x41]); // enter raster mode
    assert_eq!(&stream[4..10], &[0x1B, 0x2A, 0x72, 0x50, 0x30, 0x00]); // continuous
    assert_eq!(&stream[10..13], &[0x62, 72, 0x00]); // one 72-byte line
    assert_eq!(&stream[13..85], &[0xFF; 72][..]);
    assert_eq!(&stream[85..], &[0x1B, 0x2A, 0x72, 0x42]); // exit raster mode
}

#[test]
fn test_star_no_cut_inserts_eot_sequence() {
    let (mut manager, factory) = manager_with(TransportChoice::Bluetooth, ProtocolKind::StarTsp);

    manager
        .print(&PrintJob::new(dark_image(576, 1)).with_cut(false))
        .unwrap();

    let stream = &factory.writes()[0].1;
    assert_eq!(&stream[10..16], &[0x1B, 0x2A, 0x72, 0x65, 0x31, 0x00]);
}

// ============================================================================
// TRANSPORT POLICY
// ============================================================================

#[test]
fn test_auto_falls_back_to_usb_and_prints() {
    let factory = ScriptedFactory::default();
    *factory.bluetooth_outages.lock().unwrap() = u32::MAX;
    let mut manager = PrinterManager::with_factory(
        settings(TransportChoice::Auto, ProtocolKind::EscPos),
        Box::new(factory.clone()),
    );

    manager.print(&PrintJob::new(dark_image(16, 2))).unwrap();

    let writes = factory.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, TransportKind::Usb);
}

#[test]
fn test_retry_recovers_from_transient_outage() {
    let factory = ScriptedFactory::default();
    *factory.usb_outages.lock().unwrap() = 2;
    let mut cfg = settings(TransportChoice::Usb, ProtocolKind::EscPos);
    cfg.retry_attempts = 3;
    let mut manager = PrinterManager::with_factory(cfg, Box::new(factory.clone()));

    manager.print(&PrintJob::new(dark_image(16, 2))).unwrap();
    assert_eq!(factory.writes().len(), 1);
}

#[test]
fn test_retry_gives_up_after_budget() {
    let factory = ScriptedFactory::default();
    *factory.usb_outages.lock().unwrap() = 3;
    let mut cfg = settings(TransportChoice::Usb, ProtocolKind::EscPos);
    cfg.retry_attempts = 3;
    let mut manager = PrinterManager::with_factory(cfg, Box::new(factory.clone()));

    assert!(matches!(
        manager.print(&PrintJob::new(dark_image(16, 2))),
        Err(PrinterError::ConnectionLost(_))
    ));
    assert!(factory.writes().is_empty());
}

#[test]
fn test_configured_star_bluetooth_printer_connects_and_reports() {
    let (mut manager, _factory) = manager_with(TransportChoice::Bluetooth, ProtocolKind::StarTsp);

    manager.connect().unwrap();

    let session = manager.status().session.unwrap();
    assert!(session.connected);
    assert_eq!(session.transport, TransportKind::Bluetooth);
    assert_eq!(session.protocol, ProtocolKind::StarTsp);
    assert_eq!(
        session.descriptor,
        Some(DeviceDescriptor::Bluetooth {
            mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            rfcomm_port: 1,
        })
    );
}

#[test]
fn test_auto_enters_simulation_when_no_hardware_responds() {
    let factory = ScriptedFactory::default();
    *factory.bluetooth_outages.lock().unwrap() = u32::MAX;
    *factory.usb_outages.lock().unwrap() = u32::MAX;
    let mut manager = PrinterManager::with_factory(
        settings(TransportChoice::Auto, ProtocolKind::EscPos),
        Box::new(factory.clone()),
    );

    // No hardware: printing reports success, nothing is written anywhere,
    // and only status() reveals the simulation fallback.
    manager.print(&PrintJob::new(dark_image(16, 2))).unwrap();

    assert!(factory.writes().is_empty());
    assert!(manager.status().simulation);
}

#[test]
fn test_bluetooth_session_released_after_print() {
    let (mut manager, _factory) = manager_with(TransportChoice::Bluetooth, ProtocolKind::EscPos);

    manager.print(&PrintJob::new(dark_image(16, 2))).unwrap();

    let status = manager.status();
    let session = status.session.unwrap();
    assert_eq!(session.transport, TransportKind::Bluetooth);
    assert!(!session.connected);
}

#[test]
fn test_usb_session_stays_connected_after_print() {
    let (mut manager, _factory) = manager_with(TransportChoice::Usb, ProtocolKind::EscPos);

    manager.print(&PrintJob::new(dark_image(16, 2))).unwrap();

    assert!(manager.status().session.unwrap().connected);
}

// ============================================================================
// HOT SWITCHING
// ============================================================================

#[test]
fn test_protocol_switch_changes_the_stream() {
    let (mut manager, factory) = manager_with(TransportChoice::Bluetooth, ProtocolKind::EscPos);

    manager.print(&PrintJob::new(dark_image(576, 1))).unwrap();
    manager.switch_protocol(ProtocolKind::StarTsp).unwrap();
    manager.print(&PrintJob::new(dark_image(576, 1))).unwrap();

    let writes = factory.writes();
    assert_eq!(writes.len(), 2);
    // First job is ESC/POS (GS v 0), second is Star raster (ESC * r A).
    assert_eq!(&writes[0].1[..2], &[0x1D, 0x76]);
    assert_eq!(&writes[1].1[..4], &[0x1B, 0x2A, 0x72, 0x41]);
}

#[test]
fn test_config_survives_a_manager_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermolink.json");

    let mut manager = PrinterManager::from_config_file(&path).unwrap();
    manager.switch_transport(TransportChoice::Bluetooth).unwrap();
    manager.switch_protocol(ProtocolKind::StarTsp).unwrap();
    drop(manager);

    let manager = PrinterManager::from_config_file(&path).unwrap();
    assert_eq!(manager.settings().transport, TransportChoice::Bluetooth);
    assert_eq!(manager.settings().protocol, ProtocolKind::StarTsp);
}

#[test]
fn test_simulation_accepts_jobs_without_hardware() {
    let mut manager = PrinterManager::from_config_file(
        tempfile::tempdir().unwrap().path().join("sim.json"),
    )
    .unwrap();
    manager.set_simulation(true);

    manager.print(&PrintJob::new(dark_image(576, 10))).unwrap();
    manager.test_print().unwrap();

    let status = manager.status();
    assert!(status.simulation);
    assert!(status.session.is_some());
}
