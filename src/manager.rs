//! # Printer Manager
//!
//! The top-level handle applications talk to. Owns the persistent settings,
//! builds [`PrinterSession`]s on demand, and implements the policy that
//! doesn't belong in any single transport:
//!
//! - **Automatic transport selection**: with `transport = auto`, Bluetooth
//!   is tried first and USB is the fallback
//! - **Hot switching**: protocol and transport can change at runtime; the
//!   live session is torn down and the new choice persisted
//! - **Simulation mode**: a loopback link that accepts every job. Entered
//!   explicitly for development, or silently when automatic selection finds
//!   no reachable hardware — callers keep working, `status()` tells the truth
//! - **Pairing passthrough**: scan / pair / unpair / pairing checks without
//!   going through a session
//!
//! Link construction goes through the [`LinkFactory`] seam so the selection
//! and switching logic is testable without a radio or a USB bus.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{PrinterSettings, TransportChoice};
use crate::device::{DeviceDescriptor, DeviceInfo, MacAddress};
use crate::error::PrinterError;
use crate::job::PrintJob;
use crate::protocol::ProtocolKind;
use crate::session::{PrinterSession, SessionConfig, SessionStatus};
use crate::transport::bluetooth::{self, BluetoothLink, BluetoothOptions};
use crate::transport::pairing::{self, BluetoothctlSession};
use crate::transport::scan;
use crate::transport::usb::{UsbLink, UsbOptions};
use crate::transport::{Link, LinkState, TransportKind};

// ============================================================================
// LINK FACTORY
// ============================================================================

/// Builds transport links from settings. The production implementation
/// talks to hardware; tests substitute scripted links.
pub trait LinkFactory: Send {
    fn bluetooth(&self, settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError>;
    fn usb(&self, settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError>;
}

/// Factory producing real hardware links.
#[derive(Debug, Default)]
pub struct HardwareLinkFactory;

impl LinkFactory for HardwareLinkFactory {
    fn bluetooth(&self, settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError> {
        let mac = settings.bluetooth_mac.ok_or_else(|| {
            PrinterError::Config("No bluetooth_mac configured for the bluetooth transport".into())
        })?;
        Ok(Box::new(BluetoothLink::new(BluetoothOptions {
            mac,
            remote_port: settings.bluetooth_port,
            timings: settings.pairing,
        })))
    }

    fn usb(&self, settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError> {
        Ok(Box::new(UsbLink::new(UsbOptions {
            vendor_id: settings.vendor_id,
            product_id: settings.product_id,
            auto_detect: settings.auto_detect,
        })))
    }
}

// ============================================================================
// SIMULATED LINK
// ============================================================================

/// Loopback link for development without hardware: connects instantly,
/// accepts every write, logs what it swallows.
pub struct SimulatedLink {
    kind: TransportKind,
    connected: bool,
    bytes_accepted: u64,
}

impl SimulatedLink {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            connected: false,
            bytes_accepted: 0,
        }
    }
}

impl Link for SimulatedLink {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn connect(&mut self) -> Result<(), PrinterError> {
        self.connected = true;
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), PrinterError> {
        self.bytes_accepted += data.len() as u64;
        info!(
            "simulation: accepted {} bytes ({} total this link)",
            data.len(),
            self.bytes_accepted
        );
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
        None
    }

    fn state(&self) -> LinkState {
        if self.connected {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }
}

// ============================================================================
// MANAGER
// ============================================================================

/// Manager-level status snapshot.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ManagerStatus {
    pub transport: TransportChoice,
    pub protocol: ProtocolKind,
    pub simulation: bool,
    /// Present once a session has been established.
    pub session: Option<SessionStatus>,
}

/// Top-level printer handle: settings, session lifecycle, transport policy.
pub struct PrinterManager {
    settings: PrinterSettings,
    config_path: Option<PathBuf>,
    factory: Box<dyn LinkFactory>,
    session: Option<PrinterSession>,
    simulation: bool,
}

impl PrinterManager {
    pub fn new(settings: PrinterSettings) -> Self {
        Self::with_factory(settings, Box::new(HardwareLinkFactory))
    }

    pub fn with_factory(settings: PrinterSettings, factory: Box<dyn LinkFactory>) -> Self {
        Self {
            settings,
            config_path: None,
            factory,
            session: None,
            simulation: false,
        }
    }

    /// Load settings from `path`, falling back to defaults when the file
    /// doesn't exist yet. Changes made through the manager are saved back.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self, PrinterError> {
        let path = path.as_ref();
        let settings = if path.exists() {
            PrinterSettings::load(path)?
        } else {
            debug!("no config at {}, using defaults", path.display());
            PrinterSettings::default()
        };
        let mut manager = Self::new(settings);
        manager.config_path = Some(path.to_path_buf());
        Ok(manager)
    }

    pub fn settings(&self) -> &PrinterSettings {
        &self.settings
    }

    /// Toggle simulation mode. Tears down any live session; the next
    /// operation builds a loopback one.
    pub fn set_simulation(&mut self, on: bool) {
        if self.simulation != on {
            info!("simulation mode {}", if on { "on" } else { "off" });
            self.teardown();
            self.simulation = on;
        }
    }

    pub fn simulation(&self) -> bool {
        self.simulation
    }

    // ------------------------------------------------------------------
    // Printing
    // ------------------------------------------------------------------

    pub fn connect(&mut self) -> Result<(), PrinterError> {
        self.establish()?.connect()
    }

    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.disconnect();
        }
    }

    pub fn print(&mut self, job: &PrintJob) -> Result<(), PrinterError> {
        self.establish()?.print(job)
    }

    pub fn test_print(&mut self) -> Result<(), PrinterError> {
        self.establish()?.test_print()
    }

    /// Current status. Never initiates a connection: an unestablished
    /// session is reported as absent rather than probed into existence.
    pub fn status(&mut self) -> ManagerStatus {
        ManagerStatus {
            transport: self.settings.transport,
            protocol: self.settings.protocol,
            simulation: self.simulation,
            session: self.session.as_mut().map(PrinterSession::status),
        }
    }

    // ------------------------------------------------------------------
    // Hot switching
    // ------------------------------------------------------------------

    /// Switch wire protocol. Rejects combinations the fixed transport can't
    /// carry, tears down the live session, persists the new choice.
    pub fn switch_protocol(&mut self, protocol: ProtocolKind) -> Result<(), PrinterError> {
        if protocol == self.settings.protocol {
            return Ok(());
        }
        if let TransportChoice::Usb = self.settings.transport {
            if !protocol.supports(TransportKind::Usb) {
                return Err(PrinterError::UnsupportedCombination {
                    transport: TransportKind::Usb.as_str(),
                    protocol: protocol.as_str(),
                });
            }
        }

        info!("switching protocol to {protocol}");
        self.teardown();
        self.settings.protocol = protocol;
        self.persist()
    }

    /// Switch transport policy. Same combination rules as
    /// [`switch_protocol`](Self::switch_protocol), from the other side.
    pub fn switch_transport(&mut self, transport: TransportChoice) -> Result<(), PrinterError> {
        if transport == self.settings.transport {
            return Ok(());
        }
        if let TransportChoice::Usb = transport {
            if !self.settings.protocol.supports(TransportKind::Usb) {
                return Err(PrinterError::UnsupportedCombination {
                    transport: TransportKind::Usb.as_str(),
                    protocol: self.settings.protocol.as_str(),
                });
            }
        }

        info!("switching transport to {}", transport.as_str());
        self.teardown();
        self.settings.transport = transport;
        self.persist()
    }

    /// Record the Bluetooth printer to use and persist it.
    pub fn set_bluetooth_printer(&mut self, mac: MacAddress) -> Result<(), PrinterError> {
        self.teardown();
        self.settings.bluetooth_mac = Some(mac);
        self.persist()
    }

    // ------------------------------------------------------------------
    // Bluetooth management passthrough
    // ------------------------------------------------------------------

    /// Scan for nearby devices, blocking for roughly `timeout`.
    pub fn scan(&self, timeout: Duration) -> Result<Vec<DeviceInfo>, PrinterError> {
        scan::scan_devices(timeout)
    }

    /// Pair a device through the interactive agent session. `timeout`
    /// overrides the configured overall pairing bound when given.
    pub fn pair(&self, mac: MacAddress, timeout: Option<Duration>) -> Result<(), PrinterError> {
        let mut timings = self.settings.pairing;
        if let Some(timeout) = timeout {
            timings.pair_ms = timeout.as_millis() as u64;
        }
        let mut session = BluetoothctlSession::spawn()?;
        pairing::pair_device(&mut session, mac, &timings)?;
        Ok(())
    }

    pub fn unpair(&mut self, mac: MacAddress) -> Result<(), PrinterError> {
        // The live link may be bound to the device being unpaired.
        self.teardown();
        bluetooth::unpair(mac)
    }

    pub fn check_pairing(&self, mac: MacAddress) -> Result<bool, PrinterError> {
        bluetooth::check_pairing(mac)
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("tearing down live session");
            session.disconnect();
        }
    }

    fn establish(&mut self) -> Result<&mut PrinterSession, PrinterError> {
        if self.session.is_none() {
            let session = self.build_session()?;
            self.session = Some(session);
        }
        // The Option was just filled on the None path.
        self.session
            .as_mut()
            .ok_or_else(|| PrinterError::Transport("session vanished during setup".into()))
    }

    fn build_session(&mut self) -> Result<PrinterSession, PrinterError> {
        let config = SessionConfig::from(&self.settings);

        if self.simulation {
            let kind = self.simulated_kind();
            let link: Box<dyn Link> = Box::new(SimulatedLink::new(kind));
            return PrinterSession::new(link, self.settings.protocol.encoder(), config);
        }

        match self.settings.transport {
            TransportChoice::Bluetooth => {
                let link = self.factory.bluetooth(&self.settings)?;
                PrinterSession::new(link, self.settings.protocol.encoder(), config)
            }
            TransportChoice::Usb => {
                let link = self.factory.usb(&self.settings)?;
                PrinterSession::new(link, self.settings.protocol.encoder(), config)
            }
            TransportChoice::Auto => self.build_auto_session(config),
        }
    }

    /// Automatic selection: Bluetooth first (portable printers are the
    /// common case), USB as fallback. Selection requires a live connect;
    /// a session that can't connect isn't selected. When no transport is
    /// reachable at all, the manager drops into simulation mode instead of
    /// raising — discoverable only through [`status`](Self::status).
    fn build_auto_session(&mut self, config: SessionConfig) -> Result<PrinterSession, PrinterError> {
        match self.try_transport(TransportKind::Bluetooth, config) {
            Ok(session) => {
                info!("auto-selected bluetooth transport");
                return Ok(session);
            }
            Err(e) => warn!("bluetooth unavailable ({e}), trying usb"),
        }

        match self.try_transport(TransportKind::Usb, config) {
            Ok(session) => {
                info!("auto-selected usb transport");
                Ok(session)
            }
            // Shape errors (unsupported combination, bad config) cannot be
            // papered over by simulation; hardware absence can.
            Err(e) if !e.is_retryable() => Err(e),
            Err(e) => {
                warn!("no printer reachable ({e}), entering simulation mode");
                self.simulation = true;
                let link: Box<dyn Link> = Box::new(SimulatedLink::new(self.simulated_kind()));
                PrinterSession::new(link, self.settings.protocol.encoder(), config)
            }
        }
    }

    fn try_transport(
        &mut self,
        kind: TransportKind,
        config: SessionConfig,
    ) -> Result<PrinterSession, PrinterError> {
        let link = match kind {
            TransportKind::Bluetooth => self.factory.bluetooth(&self.settings)?,
            TransportKind::Usb => self.factory.usb(&self.settings)?,
        };
        let mut session = PrinterSession::new(link, self.settings.protocol.encoder(), config)?;
        session.connect()?;
        Ok(session)
    }

    /// Which transport a simulated session pretends to be. Mirrors the auto
    /// preference without touching hardware.
    fn simulated_kind(&self) -> TransportKind {
        match self.settings.transport {
            TransportChoice::Usb => TransportKind::Usb,
            TransportChoice::Bluetooth => TransportKind::Bluetooth,
            TransportChoice::Auto => {
                if self.settings.bluetooth_mac.is_some() {
                    TransportKind::Bluetooth
                } else {
                    TransportKind::Usb
                }
            }
        }
    }

    fn persist(&self) -> Result<(), PrinterError> {
        if let Some(path) = &self.config_path {
            self.settings.save(path)?;
            debug!("settings saved to {}", path.display());
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Per-transport scripted behavior for the factory seam.
    #[derive(Clone)]
    struct FakeFactory {
        bluetooth_connects: bool,
        usb_connects: bool,
        built: Arc<Mutex<Vec<TransportKind>>>,
    }

    impl FakeFactory {
        fn new(bluetooth_connects: bool, usb_connects: bool) -> Self {
            Self {
                bluetooth_connects,
                usb_connects,
                built: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn built(&self) -> Vec<TransportKind> {
            self.built.lock().unwrap().clone()
        }
    }

    struct FakeLink {
        kind: TransportKind,
        connects: bool,
        connected: bool,
    }

    impl Link for FakeLink {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn connect(&mut self) -> Result<(), PrinterError> {
            if !self.connects {
                return Err(PrinterError::ConnectionLost("fake device absent".into()));
            }
            self.connected = true;
            Ok(())
        }

        fn write_all(&mut self, _data: &[u8]) -> Result<(), PrinterError> {
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
            None
        }

        fn state(&self) -> LinkState {
            if self.connected {
                LinkState::Connected
            } else {
                LinkState::Disconnected
            }
        }
    }

    impl LinkFactory for FakeFactory {
        fn bluetooth(&self, _settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError> {
            self.built.lock().unwrap().push(TransportKind::Bluetooth);
            Ok(Box::new(FakeLink {
                kind: TransportKind::Bluetooth,
                connects: self.bluetooth_connects,
                connected: false,
            }))
        }

        fn usb(&self, _settings: &PrinterSettings) -> Result<Box<dyn Link>, PrinterError> {
            self.built.lock().unwrap().push(TransportKind::Usb);
            Ok(Box::new(FakeLink {
                kind: TransportKind::Usb,
                connects: self.usb_connects,
                connected: false,
            }))
        }
    }

    fn auto_settings() -> PrinterSettings {
        let mut settings = PrinterSettings::default();
        settings.transport = TransportChoice::Auto;
        settings.retry_attempts = 1;
        settings.retry_backoff_ms = 0;
        settings
    }

    #[test]
    fn test_auto_prefers_bluetooth() {
        let factory = FakeFactory::new(true, true);
        let built = factory.clone();
        let mut manager = PrinterManager::with_factory(auto_settings(), Box::new(factory));

        manager.connect().unwrap();

        assert_eq!(built.built(), vec![TransportKind::Bluetooth]);
        let status = manager.status();
        assert_eq!(
            status.session.unwrap().transport,
            TransportKind::Bluetooth
        );
    }

    #[test]
    fn test_auto_falls_back_to_usb() {
        let factory = FakeFactory::new(false, true);
        let built = factory.clone();
        let mut manager = PrinterManager::with_factory(auto_settings(), Box::new(factory));

        manager.connect().unwrap();

        assert_eq!(
            built.built(),
            vec![TransportKind::Bluetooth, TransportKind::Usb]
        );
        assert_eq!(
            manager.status().session.unwrap().transport,
            TransportKind::Usb
        );
    }

    #[test]
    fn test_auto_enters_simulation_when_nothing_connects() {
        let factory = FakeFactory::new(false, false);
        let mut manager = PrinterManager::with_factory(auto_settings(), Box::new(factory));

        // No transport reachable: printing still succeeds, and only the
        // status reveals the fallback.
        let job = PrintJob::new(image::GrayImage::from_pixel(16, 2, image::Luma([0u8])));
        manager.print(&job).unwrap();

        let status = manager.status();
        assert!(status.simulation);
        assert!(status.session.is_some());
    }

    #[test]
    fn test_auto_with_star_protocol_never_reaches_usb() {
        // Star raster over USB is unsupported, so auto's USB fallback must
        // fail the combination check instead of probing hardware.
        let mut settings = auto_settings();
        settings.protocol = ProtocolKind::StarTsp;
        let factory = FakeFactory::new(false, true);
        let mut manager = PrinterManager::with_factory(settings, Box::new(factory));

        assert!(matches!(
            manager.connect(),
            Err(PrinterError::UnsupportedCombination { .. })
        ));
    }

    #[test]
    fn test_switch_protocol_tears_down_session() {
        let factory = FakeFactory::new(true, true);
        let mut manager = PrinterManager::with_factory(auto_settings(), Box::new(factory));

        manager.connect().unwrap();
        assert!(manager.status().session.is_some());

        manager.switch_protocol(ProtocolKind::StarTsp).unwrap();
        assert!(manager.status().session.is_none());
        assert_eq!(manager.settings().protocol, ProtocolKind::StarTsp);
    }

    #[test]
    fn test_switch_protocol_rejects_star_on_usb() {
        let mut settings = auto_settings();
        settings.transport = TransportChoice::Usb;
        let mut manager =
            PrinterManager::with_factory(settings, Box::new(FakeFactory::new(true, true)));

        assert!(matches!(
            manager.switch_protocol(ProtocolKind::StarTsp),
            Err(PrinterError::UnsupportedCombination {
                transport: "usb",
                protocol: "startsp",
            })
        ));
        // Settings unchanged after the rejection.
        assert_eq!(manager.settings().protocol, ProtocolKind::EscPos);
    }

    #[test]
    fn test_switch_transport_rejects_usb_under_star() {
        let mut settings = auto_settings();
        settings.protocol = ProtocolKind::StarTsp;
        let mut manager =
            PrinterManager::with_factory(settings, Box::new(FakeFactory::new(true, true)));

        assert!(matches!(
            manager.switch_transport(TransportChoice::Usb),
            Err(PrinterError::UnsupportedCombination { .. })
        ));
        assert_eq!(manager.settings().transport, TransportChoice::Auto);
    }

    #[test]
    fn test_switch_persists_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer.json");

        let mut manager = PrinterManager::from_config_file(&path).unwrap();
        manager.switch_transport(TransportChoice::Bluetooth).unwrap();
        manager.switch_protocol(ProtocolKind::StarTsp).unwrap();

        let reloaded = PrinterSettings::load(&path).unwrap();
        assert_eq!(reloaded.transport, TransportChoice::Bluetooth);
        assert_eq!(reloaded.protocol, ProtocolKind::StarTsp);
    }

    #[test]
    fn test_missing_config_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PrinterManager::from_config_file(dir.path().join("absent.json")).unwrap();
        assert_eq!(manager.settings().transport, TransportChoice::Auto);
    }

    #[test]
    fn test_simulation_never_touches_the_factory() {
        let factory = FakeFactory::new(false, false);
        let built = factory.clone();
        let mut manager = PrinterManager::with_factory(auto_settings(), Box::new(factory));

        manager.set_simulation(true);
        let job = PrintJob::new(image::GrayImage::from_pixel(16, 2, image::Luma([0u8])));
        manager.print(&job).unwrap();
        manager.test_print().unwrap();

        assert!(built.built().is_empty());
        assert!(manager.status().simulation);
    }

    #[test]
    fn test_simulation_honors_combination_rules() {
        let mut settings = auto_settings();
        settings.transport = TransportChoice::Usb;
        settings.protocol = ProtocolKind::StarTsp;
        let mut manager =
            PrinterManager::with_factory(settings, Box::new(FakeFactory::new(true, true)));
        manager.set_simulation(true);

        assert!(matches!(
            manager.connect(),
            Err(PrinterError::UnsupportedCombination { .. })
        ));
    }

    #[test]
    fn test_toggling_simulation_drops_session() {
        let mut manager = PrinterManager::with_factory(
            auto_settings(),
            Box::new(FakeFactory::new(true, true)),
        );
        manager.connect().unwrap();

        manager.set_simulation(true);
        assert!(manager.status().session.is_none());
    }

    #[test]
    fn test_set_bluetooth_printer_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printer.json");
        let mut manager = PrinterManager::from_config_file(&path).unwrap();

        let mac: MacAddress = "00:11:62:0A:0B:0C".parse().unwrap();
        manager.set_bluetooth_printer(mac).unwrap();

        let reloaded = PrinterSettings::load(&path).unwrap();
        assert_eq!(reloaded.bluetooth_mac, Some(mac));
    }
}
