//! # Interactive Pairing State Machine
//!
//! OS-level Bluetooth pairing is driven through `bluetoothctl`, which exposes
//! no structured API — the only contract is line-oriented text over an
//! interactive session. This module models that handshake as an explicit
//! finite-state machine over an injected line-I/O abstraction, so the
//! protocol logic is unit-testable against a scripted fake session.
//!
//! ## Protocol
//!
//! ```text
//! Idle ─ spawn ─► SessionStarting ─ prompt/agent ─► AgentReady
//!   AgentReady ─ power on, agent on, default-agent, scan on ─► Scanning
//!   Scanning ─ discovery window, `devices` lists target ─► DeviceVisible
//!   DeviceVisible ─ `pair <MAC>` ─► Pairing
//!   Pairing ─ success marker ─► Paired ─ `trust <MAC>` (best-effort) ─► Trusted
//! ```
//!
//! Any step may land in `Failed(reason)` instead. The session is torn down
//! unconditionally (quit, bounded wait, kill) whatever the outcome; the
//! state is transient and never outlives the run.
//!
//! Output from the agent arrives interleaved and delayed, so every consuming
//! step uses bounded polling rather than fixed sleeps, except the discovery
//! window itself, which is a deliberate fixed-duration wait.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::PairingTimings;
use crate::device::MacAddress;
use crate::error::PrinterError;

/// Poll interval while waiting on agent output.
const READ_POLL: Duration = Duration::from_millis(100);

/// Grace period for the agent to exit after `quit` before it is killed.
const QUIT_GRACE: Duration = Duration::from_secs(3);

/// Pairing lifecycle. Exists only during one pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingState {
    Idle,
    SessionStarting,
    AgentReady,
    Scanning,
    DeviceVisible,
    Pairing,
    Paired,
    Trusted,
    Failed(String),
}

// ============================================================================
// LINE I/O ABSTRACTION
// ============================================================================

/// Line-oriented I/O against a pairing agent session.
///
/// The production implementation wraps a `bluetoothctl` child process; tests
/// substitute a scripted session.
pub trait PairingIo {
    /// Write one command line to the agent.
    fn send_line(&mut self, line: &str) -> Result<(), PrinterError>;

    /// Read one output line, waiting at most `timeout`. `None` means no
    /// output arrived in time (or the session ended).
    fn read_line(&mut self, timeout: Duration) -> Option<String>;

    /// Terminate the session: ask it to quit, wait briefly, kill if needed.
    /// Must be safe to call more than once.
    fn shutdown(&mut self);
}

/// A live `bluetoothctl` child process with a reader thread feeding lines
/// through a channel, so reads can be bounded without blocking forever.
pub struct BluetoothctlSession {
    child: Child,
    lines: mpsc::Receiver<String>,
    finished: bool,
}

impl BluetoothctlSession {
    pub fn spawn() -> Result<Self, PrinterError> {
        let mut child = Command::new("bluetoothctl")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PrinterError::PairingFailed(format!("failed to start bluetoothctl: {e}")))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            PrinterError::PairingFailed("bluetoothctl spawned without stdout".into())
        })?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            child,
            lines: rx,
            finished: false,
        })
    }
}

impl PairingIo for BluetoothctlSession {
    fn send_line(&mut self, line: &str) -> Result<(), PrinterError> {
        debug!("bluetoothctl <- {line}");
        let stdin = self.child.stdin.as_mut().ok_or_else(|| {
            PrinterError::PairingFailed("bluetoothctl stdin closed".into())
        })?;
        writeln!(stdin, "{line}")
            .and_then(|_| stdin.flush())
            .map_err(|e| PrinterError::PairingFailed(format!("write to bluetoothctl failed: {e}")))
    }

    fn read_line(&mut self, timeout: Duration) -> Option<String> {
        match self.lines.recv_timeout(timeout) {
            Ok(line) => {
                debug!("bluetoothctl -> {line}");
                Some(line)
            }
            Err(_) => None,
        }
    }

    fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if let Some(stdin) = self.child.stdin.as_mut() {
            let _ = writeln!(stdin, "quit");
            let _ = stdin.flush();
        }

        let deadline = Instant::now() + QUIT_GRACE;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() < deadline => thread::sleep(READ_POLL),
                _ => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    break;
                }
            }
        }
        debug!("bluetoothctl session closed");
    }
}

impl Drop for BluetoothctlSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

/// Pair `mac` through an already-started agent session.
///
/// The session is shut down before returning, success or failure.
pub fn pair_device(
    io: &mut dyn PairingIo,
    mac: MacAddress,
    timings: &PairingTimings,
) -> Result<PairingState, PrinterError> {
    let mut machine = PairingMachine::new();
    let result = machine.drive(io, mac, timings);
    io.shutdown();
    result.map(|_| machine.state)
}

struct PairingMachine {
    state: PairingState,
}

impl PairingMachine {
    fn new() -> Self {
        Self {
            state: PairingState::Idle,
        }
    }

    fn drive(
        &mut self,
        io: &mut dyn PairingIo,
        mac: MacAddress,
        timings: &PairingTimings,
    ) -> Result<(), PrinterError> {
        self.state = PairingState::SessionStarting;
        self.wait_for_agent(io, timings)?;

        // Controller setup. Short settle delays keep commands from landing
        // before the agent processed the previous one.
        let settle = Duration::from_millis(timings.settle_ms);
        for command in ["power on", "agent on", "default-agent"] {
            io.send_line(command)?;
            thread::sleep(settle);
        }

        io.send_line("scan on")?;
        self.state = PairingState::Scanning;
        info!("scanning for {mac} ({}ms window)", timings.discovery_ms);
        thread::sleep(Duration::from_millis(timings.discovery_ms));

        self.drain(io, timings);
        io.send_line("scan off")?;
        thread::sleep(settle);
        self.drain(io, timings);

        if !self.target_visible(io, mac, timings)? {
            let msg = format!("device {mac} not found after scan");
            self.state = PairingState::Failed(msg.clone());
            return Err(PrinterError::DeviceNotFound(msg));
        }
        self.state = PairingState::DeviceVisible;
        info!("device {mac} visible, pairing...");

        self.pair(io, mac, timings)?;
        self.state = PairingState::Paired;
        info!("paired with {mac}");

        // Trust so future reconnects skip pairing. Best-effort: pairing
        // already succeeded, a trust failure is not fatal.
        if io.send_line(&format!("trust {mac}")).is_err() {
            warn!("could not mark {mac} as trusted");
        } else {
            thread::sleep(settle);
            self.state = PairingState::Trusted;
        }

        Ok(())
    }

    /// Wait for the agent prompt or registration line.
    fn wait_for_agent(
        &mut self,
        io: &mut dyn PairingIo,
        timings: &PairingTimings,
    ) -> Result<(), PrinterError> {
        let deadline = Instant::now() + Duration::from_millis(timings.agent_ready_ms);
        while Instant::now() < deadline {
            if let Some(line) = io.read_line(READ_POLL) {
                if line.contains("[bluetooth") || line.contains("Agent registered") {
                    self.state = PairingState::AgentReady;
                    debug!("pairing agent ready");
                    return Ok(());
                }
            }
        }
        let msg = "bluetoothctl did not become ready (is bluetoothd running?)".to_string();
        self.state = PairingState::Failed(msg.clone());
        Err(PrinterError::PairingFailed(msg))
    }

    /// Consume buffered output non-blockingly.
    fn drain(&self, io: &mut dyn PairingIo, timings: &PairingTimings) {
        let poll = Duration::from_millis(timings.drain_poll_ms.max(1));
        while io.read_line(poll).is_some() {}
    }

    /// Request the device list and look for the target MAC in the drained
    /// output. The list ends at the next prompt line or when the window
    /// elapses.
    fn target_visible(
        &self,
        io: &mut dyn PairingIo,
        mac: MacAddress,
        timings: &PairingTimings,
    ) -> Result<bool, PrinterError> {
        io.send_line("devices")?;

        let needle = mac.to_string();
        let deadline = Instant::now() + Duration::from_millis(timings.device_list_ms);
        let mut seen = false;
        while Instant::now() < deadline {
            let Some(line) = io.read_line(READ_POLL) else {
                // No more buffered output; if we got anything, the list is done.
                if seen {
                    break;
                }
                continue;
            };
            seen = true;
            if line.to_uppercase().contains(&needle) {
                return Ok(true);
            }
            if is_prompt(&line) {
                break;
            }
        }
        Ok(false)
    }

    /// Issue the pair command and poll for a success or failure marker.
    fn pair(
        &mut self,
        io: &mut dyn PairingIo,
        mac: MacAddress,
        timings: &PairingTimings,
    ) -> Result<(), PrinterError> {
        io.send_line(&format!("pair {mac}"))?;
        self.state = PairingState::Pairing;

        let deadline = Instant::now() + Duration::from_millis(timings.pair_ms);
        while Instant::now() < deadline {
            let Some(line) = io.read_line(READ_POLL) else {
                continue;
            };
            let lower = line.to_lowercase();
            if line.contains("Pairing successful") || lower.contains("paired successfully") {
                return Ok(());
            }
            if line.contains("Failed to pair") || lower.contains("pairing failed") {
                let msg = format!("agent reported failure for {mac}: {line}");
                self.state = PairingState::Failed(msg.clone());
                return Err(PrinterError::PairingFailed(msg));
            }
        }

        let secs = timings.pair_ms.div_ceil(1000);
        self.state = PairingState::Failed(format!("no pairing result within {secs}s"));
        Err(PrinterError::PairingTimeout(secs))
    }
}

/// An interactive prompt line, e.g. `[bluetooth]>` — marks the end of a
/// command's output.
fn is_prompt(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.contains("[bluetooth") && trimmed.ends_with('>')
}

// ============================================================================
// TESTS
// ============================================================================
