//! # Bluetooth RFCOMM Transport
//!
//! Reaches a thermal printer over Bluetooth Serial Port Profile (SPP) via a
//! local RFCOMM binding.
//!
//! ## Connection Sequence
//!
//! 1. Check OS-level pairing (`bluetoothctl info`); pair interactively via
//!    [`pairing`](super::pairing) when the device is unknown
//! 2. Release any stale binding, then `rfcomm bind <channel> <MAC> <port>`
//! 3. Poll for the `/dev/rfcommN` node (up to 1s)
//! 4. Open the node as a raw serial device
//!
//! ## TTY Configuration
//!
//! The RFCOMM node is a TTY, so it must be switched to raw mode before any
//! binary traffic:
//!
//! - **No input processing**: IGNBRK, BRKINT, PARMRK, ISTRIP, etc. cleared
//! - **No software flow control**: IXON/IXOFF/IXANY cleared — 0x11 (XON) and
//!   0x13 (XOFF) appear in raster data
//! - **No output processing**: OPOST cleared (no CR/LF translation)
//! - **8N1 at 9600 baud**: CS8, no parity
//! - **Bounded reads**: VMIN=0, VTIME=100 (10s read timeout)
//!
//! ## Chunked Writes
//!
//! Raster jobs outrun the RFCOMM buffer. Writes are split into 4096-byte
//! chunks with a 2ms pause between chunks.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PairingTimings;
use crate::device::{DeviceDescriptor, MacAddress};
use crate::error::PrinterError;
use crate::transport::pairing::{self, BluetoothctlSession};
use crate::transport::{Link, LinkState, TransportKind};

/// Local RFCOMM channel number used for the binding (the `/dev/rfcommN` N).
pub const RFCOMM_CHANNEL: u8 = 0;

/// Chunk size for serial writes (bytes).
const CHUNK_SIZE: usize = 4096;

/// Delay between chunks (milliseconds).
const CHUNK_DELAY_MS: u64 = 2;

/// How long to wait for the device node after `rfcomm bind`.
const BIND_WAIT: Duration = Duration::from_secs(1);

/// Poll interval while waiting for the device node.
const BIND_POLL: Duration = Duration::from_millis(50);

/// Serial read timeout in VTIME units (deciseconds): 100 = 10 seconds.
const READ_TIMEOUT_DECISECONDS: u8 = 100;

// ============================================================================
// PAIRING STATE HELPERS
// ============================================================================

/// Whether the OS already knows (has paired) this device.
///
/// `bluetoothctl info` exits non-zero for unknown devices on recent BlueZ,
/// but older versions exit zero with an error line, so the output is checked
/// too.
pub fn check_pairing(mac: MacAddress) -> Result<bool, PrinterError> {
    let output = Command::new("bluetoothctl")
        .arg("info")
        .arg(mac.to_string())
        .output()
        .map_err(|e| PrinterError::Transport(format!("Failed to run bluetoothctl: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(info_indicates_known(output.status.success(), &stdout))
}

/// Remove the OS-level pairing for a device. Idempotent: an already-absent
/// device is success, and BlueZ's ambiguous exit codes are tolerated — only
/// a failure to run the tool at all is an error.
pub fn unpair(mac: MacAddress) -> Result<(), PrinterError> {
    if !check_pairing(mac)? {
        debug!("{mac} not paired, nothing to remove");
        return Ok(());
    }

    let output = Command::new("bluetoothctl")
        .arg("remove")
        .arg(mac.to_string())
        .output()
        .map_err(|e| PrinterError::Transport(format!("Failed to run bluetoothctl: {e}")))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if output.status.success() || stdout.contains("removed") {
        info!("unpaired {mac}");
    } else {
        warn!("ambiguous unpair result for {mac}: {}", stdout.trim());
    }
    Ok(())
}

/// `bluetoothctl info` output analysis, split out for testing.
fn info_indicates_known(status_ok: bool, stdout: &str) -> bool {
    status_ok && stdout.contains("Device") && !stdout.contains("not available")
}

/// Run a short blocking discovery pass so an unpaired device becomes known
/// to the controller before the interactive pairing session starts.
/// Best-effort: failures are logged and ignored.
fn quick_scan() {
    debug!("running quick discovery pass");
    match Command::new("bluetoothctl")
        .args(["--timeout", "5", "scan", "on"])
        .output()
    {
        Ok(_) => {}
        Err(e) => warn!("quick scan failed: {e}"),
    }
}

// ============================================================================
// RFCOMM BINDING
// ============================================================================

fn rfcomm_device_path(channel: u8) -> String {
    format!("/dev/rfcomm{channel}")
}

/// Release an RFCOMM binding. Errors are ignored: releasing a channel that
/// was never bound fails, and that is the common case.
fn release_rfcomm(channel: u8) {
    match Command::new("rfcomm")
        .arg("release")
        .arg(channel.to_string())
        .output()
    {
        Ok(output) if !output.status.success() => {
            debug!("rfcomm release {channel}: nothing to release");
        }
        Ok(_) => debug!("released rfcomm{channel}"),
        Err(e) => warn!("could not run rfcomm release: {e}"),
    }
}

/// Bind a local RFCOMM channel to the printer and wait for the device node.
///
/// Requires root privileges (or an rfcomm udev rule).
fn bind_rfcomm(channel: u8, mac: MacAddress, remote_port: u8) -> Result<String, PrinterError> {
    // A stale binding from a previous run makes bind fail; clear it first.
    release_rfcomm(channel);

    let output = Command::new("rfcomm")
        .arg("bind")
        .arg(channel.to_string())
        .arg(mac.to_string())
        .arg(remote_port.to_string())
        .output()
        .map_err(|e| PrinterError::BindFailure(format!("Failed to run rfcomm bind: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PrinterError::BindFailure(format!(
            "rfcomm bind {channel} {mac} {remote_port} failed: {}",
            stderr.trim()
        )));
    }

    let path = rfcomm_device_path(channel);
    let deadline = Instant::now() + BIND_WAIT;
    while !Path::new(&path).exists() {
        if Instant::now() >= deadline {
            return Err(PrinterError::BindFailure(format!(
                "{path} did not appear after bind"
            )));
        }
        thread::sleep(BIND_POLL);
    }

    debug!("bound {path} to {mac} port {remote_port}");
    Ok(path)
}

// ============================================================================
// SERIAL PORT
// ============================================================================

/// Open the RFCOMM node as a raw 9600-8N1 serial device with a bounded read
/// timeout.
fn open_serial(path: &str) -> Result<File, PrinterError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| PrinterError::Transport(format!("Failed to open {path}: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        configure_tty_raw(file.as_raw_fd())?;
    }

    Ok(file)
}

/// Configure a file descriptor for raw binary serial communication.
///
/// Disables all line discipline processing so escape-heavy raster data
/// passes through unmodified. XON/XOFF flow control in particular must be
/// off: 0x11 and 0x13 occur freely in bitmap payloads.
#[cfg(unix)]
fn configure_tty_raw(fd: i32) -> Result<(), PrinterError> {
    use std::mem::MaybeUninit;

    let mut termios = MaybeUninit::uninit();
    let result = unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) };
    if result != 0 {
        return Err(PrinterError::Transport(format!(
            "tcgetattr failed: {}",
            io::Error::last_os_error()
        )));
    }
    let mut termios = unsafe { termios.assume_init() };

    // Input flags: no break handling, no CR/LF mangling, no flow control
    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);

    // Output flags: no post-processing
    termios.c_oflag &= !libc::OPOST;

    // Local flags: no echo, no canonical mode, no signals
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);

    // Control flags: 8 data bits, no parity
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    // Bounded reads: return whatever arrived within the timeout
    termios.c_cc[libc::VMIN] = 0;
    termios.c_cc[libc::VTIME] = READ_TIMEOUT_DECISECONDS;

    unsafe {
        libc::cfsetispeed(&mut termios, libc::B9600);
        libc::cfsetospeed(&mut termios, libc::B9600);
    }

    let result = unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) };
    if result != 0 {
        return Err(PrinterError::Transport(format!(
            "tcsetattr failed: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Write in bounded chunks with an inter-chunk pause, then flush.
fn write_chunked<W: Write>(
    writer: &mut W,
    data: &[u8],
    chunk_size: usize,
    delay: Duration,
) -> io::Result<()> {
    if data.len() <= chunk_size {
        writer.write_all(data)?;
    } else {
        let mut chunks = data.chunks(chunk_size).peekable();
        while let Some(chunk) = chunks.next() {
            writer.write_all(chunk)?;
            if chunks.peek().is_some() && !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }
    writer.flush()
}

// ============================================================================
// LINK
// ============================================================================

/// Construction parameters for a [`BluetoothLink`].
#[derive(Debug, Clone)]
pub struct BluetoothOptions {
    pub mac: MacAddress,
    /// RFCOMM channel on the remote device (1 is standard for SPP).
    pub remote_port: u8,
    pub timings: PairingTimings,
}

/// One Bluetooth RFCOMM connection to one printer.
pub struct BluetoothLink {
    options: BluetoothOptions,
    device_path: String,
    serial: Option<File>,
    state: LinkState,
}

impl BluetoothLink {
    pub fn new(options: BluetoothOptions) -> Self {
        Self {
            options,
            device_path: rfcomm_device_path(RFCOMM_CHANNEL),
            serial: None,
            state: LinkState::Disconnected,
        }
    }

    /// Pair the printer if the OS doesn't already know it.
    fn ensure_paired(&self) -> Result<(), PrinterError> {
        let mac = self.options.mac;
        if check_pairing(mac)? {
            debug!("{mac} already paired");
            return Ok(());
        }

        info!("{mac} not paired, starting pairing session");
        // Discovery primes the controller's device cache so the interactive
        // session's `devices` listing can see the target.
        quick_scan();

        let mut session = BluetoothctlSession::spawn()?;
        pairing::pair_device(&mut session, mac, &self.options.timings)?;
        Ok(())
    }

    fn fail(&mut self, err: PrinterError) -> PrinterError {
        self.state = LinkState::Failed(err.to_string());
        self.serial = None;
        err
    }
}

impl Link for BluetoothLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Bluetooth
    }

    fn connect(&mut self) -> Result<(), PrinterError> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = LinkState::Connecting;

        if let Err(e) = self.ensure_paired() {
            return Err(self.fail(e));
        }

        self.device_path = match bind_rfcomm(RFCOMM_CHANNEL, self.options.mac, self.options.remote_port)
        {
            Ok(path) => path,
            Err(e) => return Err(self.fail(e)),
        };

        let serial = match open_serial(&self.device_path) {
            Ok(file) => file,
            Err(e) => {
                release_rfcomm(RFCOMM_CHANNEL);
                return Err(self.fail(e));
            }
        };
        self.serial = Some(serial);

        self.state = LinkState::Verifying;
        if !self.verify() {
            let err = PrinterError::ConnectionLost(format!(
                "{} vanished right after open",
                self.device_path
            ));
            release_rfcomm(RFCOMM_CHANNEL);
            return Err(self.fail(err));
        }

        self.state = LinkState::Connected;
        info!(
            "connected to {} via {}",
            self.options.mac, self.device_path
        );
        Ok(())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), PrinterError> {
        let Some(serial) = self.serial.as_mut() else {
            return Err(PrinterError::ConnectionLost(
                "bluetooth link is not connected".into(),
            ));
        };

        debug!("writing {} bytes over {}", data.len(), self.device_path);
        write_chunked(
            serial,
            data,
            CHUNK_SIZE,
            Duration::from_millis(CHUNK_DELAY_MS),
        )
        .map_err(|e| {
            let err = PrinterError::ConnectionLost(format!(
                "write to {} failed: {e}",
                self.device_path
            ));
            self.fail(err)
        })
    }

    /// A serial handle is held and the device node still exists. The node
    /// disappears when the radio link drops, which is the failure mode this
    /// transport actually sees.
    fn verify(&mut self) -> bool {
        self.serial.is_some() && Path::new(&self.device_path).exists()
    }

    fn disconnect(&mut self) {
        if self.serial.take().is_some() {
            debug!("closing {}", self.device_path);
        }
        release_rfcomm(RFCOMM_CHANNEL);
        self.state = LinkState::Disconnected;
    }

    fn is_connected(&mut self) -> bool {
        if self.serial.is_none() {
            return false;
        }
        if self.verify() {
            true
        } else {
            warn!("{} no longer present, dropping link", self.device_path);
            self.serial = None;
            self.state = LinkState::Disconnected;
            false
        }
    }

    fn descriptor(&self) -> Option<DeviceDescriptor> {
        Some(DeviceDescriptor::Bluetooth {
            mac: self.options.mac,
            rfcomm_port: self.options.remote_port,
        })
    }

    fn state(&self) -> LinkState {
        self.state.clone()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BluetoothOptions {
        BluetoothOptions {
            mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            remote_port: 1,
            timings: PairingTimings::immediate(),
        }
    }

    /// Records the size of each write call.
    struct RecordingWriter {
        writes: Vec<usize>,
        flushed: bool,
    }

    impl Write for RecordingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.len());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    fn recording() -> RecordingWriter {
        RecordingWriter {
            writes: Vec::new(),
            flushed: false,
        }
    }

    #[test]
    fn test_small_write_is_single_chunk() {
        let mut w = recording();
        write_chunked(&mut w, &[0u8; 100], 4096, Duration::ZERO).unwrap();
        assert_eq!(w.writes, vec![100]);
        assert!(w.flushed);
    }

    #[test]
    fn test_exact_chunk_size_is_single_write() {
        let mut w = recording();
        write_chunked(&mut w, &[0u8; 4096], 4096, Duration::ZERO).unwrap();
        assert_eq!(w.writes, vec![4096]);
    }

    #[test]
    fn test_large_write_is_chunked() {
        let mut w = recording();
        write_chunked(&mut w, &[0u8; 10_000], 4096, Duration::ZERO).unwrap();
        assert_eq!(w.writes, vec![4096, 4096, 1808]);
        assert!(w.flushed);
    }

    #[test]
    fn test_info_output_analysis() {
        let known = "Device AA:BB:CC:DD:EE:FF (public)\n\tName: TSP650II\n\tPaired: yes";
        assert!(info_indicates_known(true, known));

        // Non-zero exit always means unknown.
        assert!(!info_indicates_known(false, known));

        // Old BlueZ: zero exit with an error line.
        assert!(!info_indicates_known(true, "Device AA:BB:CC:DD:EE:FF not available"));
        assert!(!info_indicates_known(true, ""));
    }

    #[test]
    fn test_device_path_format() {
        assert_eq!(rfcomm_device_path(0), "/dev/rfcomm0");
        assert_eq!(rfcomm_device_path(3), "/dev/rfcomm3");
    }

    #[test]
    fn test_fresh_link_is_disconnected() {
        let mut link = BluetoothLink::new(options());
        assert_eq!(link.state(), LinkState::Disconnected);
        assert_eq!(link.kind(), TransportKind::Bluetooth);
        assert!(!link.is_connected());
    }

    #[test]
    fn test_descriptor_reports_target() {
        let link = BluetoothLink::new(options());
        assert_eq!(
            link.descriptor(),
            Some(DeviceDescriptor::Bluetooth {
                mac: "AA:BB:CC:DD:EE:FF".parse().unwrap(),
                rfcomm_port: 1,
            })
        );
    }

    #[test]
    fn test_write_without_connection_is_connection_lost() {
        let mut link = BluetoothLink::new(options());
        assert!(matches!(
            link.write_all(&[0x1B, 0x40]),
            Err(PrinterError::ConnectionLost(_))
        ));
    }
}
