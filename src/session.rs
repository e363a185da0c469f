//! # Printer Session
//!
//! Pairs one [`Link`] with one [`Encoder`] and layers the reliability
//! policy on top: connect-on-demand, bounded retries with a fixed backoff,
//! and transport-appropriate teardown after each job.
//!
//! ## Retry Policy
//!
//! A print is attempted up to `retry_attempts` times. After a retryable
//! failure the link is torn down, the session sleeps for the backoff, and
//! the next attempt reconnects from scratch. Non-retryable errors (bad
//! address, unsupported combination, encoding) abort immediately — retrying
//! cannot fix them.
//!
//! ## Post-Print Behavior
//!
//! Bluetooth links are disconnected after every successful job: holding an
//! RFCOMM link keeps the printer's radio busy and drains battery-powered
//! models. USB links stay connected, reconnecting there is cheap but
//! pointless.

use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PrinterSettings;
use crate::device::DeviceDescriptor;
use crate::error::PrinterError;
use crate::job::PrintJob;
use crate::protocol::{Encoder, ProtocolKind};
use crate::transport::{Link, LinkState, TransportKind};

/// Reliability knobs for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Total print attempts before giving up (reconnect counts as part of
    /// an attempt).
    pub retry_attempts: u32,
    /// Fixed pause between failed attempts.
    pub retry_backoff: Duration,
    /// Reconnect between attempts. Off, a failure that drops the link ends
    /// the job even with attempts remaining.
    pub auto_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            auto_reconnect: true,
        }
    }
}

impl From<&PrinterSettings> for SessionConfig {
    fn from(settings: &PrinterSettings) -> Self {
        Self {
            retry_attempts: settings.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(settings.retry_backoff_ms),
            auto_reconnect: true,
        }
    }
}

/// Point-in-time session snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub transport: TransportKind,
    pub protocol: ProtocolKind,
    pub connected: bool,
    pub descriptor: Option<DeviceDescriptor>,
}

/// One printer connection with its wire protocol and retry policy.
pub struct PrinterSession {
    link: Box<dyn Link>,
    encoder: Box<dyn Encoder>,
    config: SessionConfig,
}

impl PrinterSession {
    /// Build a session, rejecting transport/protocol combinations the
    /// encoders don't implement before any I/O happens.
    pub fn new(
        link: Box<dyn Link>,
        encoder: Box<dyn Encoder>,
        config: SessionConfig,
    ) -> Result<Self, PrinterError> {
        if !encoder.kind().supports(link.kind()) {
            return Err(PrinterError::UnsupportedCombination {
                transport: link.kind().as_str(),
                protocol: encoder.kind().as_str(),
            });
        }
        Ok(Self {
            link,
            encoder,
            config,
        })
    }

    pub fn transport(&self) -> TransportKind {
        self.link.kind()
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.encoder.kind()
    }

    /// Establish the link without printing anything.
    pub fn connect(&mut self) -> Result<(), PrinterError> {
        self.link.connect()
    }

    pub fn disconnect(&mut self) {
        self.link.disconnect();
    }

    /// Print a job with the session's retry policy.
    ///
    /// The job is encoded once up front; encoding failures are terminal.
    /// Identical jobs produce identical byte streams, so retries resend the
    /// same bytes.
    pub fn print(&mut self, job: &PrintJob) -> Result<(), PrinterError> {
        let bytes = self.encoder.encode(job)?;
        self.send_with_retry(&bytes)?;
        self.finish_job();
        Ok(())
    }

    /// Print the protocol's built-in diagnostic page. Single attempt: a
    /// test print exists to expose failures, masking them with retries
    /// defeats it.
    pub fn test_print(&mut self) -> Result<(), PrinterError> {
        let bytes = self.encoder.test_page();
        self.link.connect()?;
        self.link.write_all(&bytes)?;
        info!("test page sent over {}", self.link.kind());
        self.finish_job();
        Ok(())
    }

    /// Live status: re-verifies the link rather than reporting a cached flag.
    pub fn status(&mut self) -> SessionStatus {
        SessionStatus {
            transport: self.link.kind(),
            protocol: self.encoder.kind(),
            connected: self.link.is_connected(),
            descriptor: self.link.descriptor(),
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    fn send_with_retry(&mut self, bytes: &[u8]) -> Result<(), PrinterError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            match self.try_send(bytes) {
                Ok(()) => {
                    if attempt > 1 {
                        info!("print succeeded on attempt {attempt}/{attempts}");
                    }
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("print attempt {attempt}/{attempts} failed: {e}");
                    // Reconnect from scratch: a failed write leaves the link
                    // in an unknown state.
                    self.link.disconnect();
                    if !self.config.auto_reconnect {
                        return Err(e);
                    }
                    last_err = Some(e);
                    if attempt < attempts && !self.config.retry_backoff.is_zero() {
                        thread::sleep(self.config.retry_backoff);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            PrinterError::Transport("print failed with no attempts made".into())
        }))
    }

    fn try_send(&mut self, bytes: &[u8]) -> Result<(), PrinterError> {
        self.link.connect()?;
        debug!("sending {} byte job", bytes.len());
        self.link.write_all(bytes)
    }

    /// Transport-appropriate teardown after a successful job.
    fn finish_job(&mut self) {
        if self.link.kind() == TransportKind::Bluetooth {
            debug!("job done, releasing bluetooth link");
            self.link.disconnect();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
