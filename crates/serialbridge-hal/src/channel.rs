//! [`SerialChannel`] – the single shared connection to the microcontroller.
//!
//! The channel owns the device handle and splits it into independent read
//! and write halves, each behind its own lock:
//!
//! * the **read half** is used by the inbound poller, one line at a time;
//! * the **write half** is used by the outbound dispatcher, one full frame at
//!   a time.  Concurrent writers queue on the write lock, so bytes of two
//!   frames never interleave.
//!
//! Reads and writes never wait on each other; the serial link is full-duplex.
//!
//! # Lifecycle
//!
//! ```text
//!            open()                 I/O error
//!   ──────────────────▶ Open ───────────────────▶ Failed
//!                        │  ◀─────────────────────  │
//!                        │     next success         │
//!                        │ close()                  │ close()
//!                        ▼                          ▼
//!                      Closed ◀─────────────────────┘
//! ```
//!
//! `Failed` records that the last operation hit a device error.  The handle
//! is kept and the next read or write is still attempted; the first one that
//! succeeds moves the channel back to `Open`.  Only a `Closed` channel
//! refuses work, with [`BridgeError::NotOpen`].

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialbridge_types::{BridgeError, ChannelState};
use tracing::{debug, info, warn};

/// Upper bound on the bytes a single [`SerialChannel::read_line`] consumes.
pub const MAX_LINE_LEN: usize = 4096;

type ReadHalf = BufReader<Box<dyn Read + Send>>;
type WriteHalf = Box<dyn Write + Send>;

/// Exclusively-owned serial connection shared by reference between the
/// poller and the dispatcher.
pub struct SerialChannel {
    device: String,
    state: Mutex<ChannelState>,
    reader: Mutex<Option<ReadHalf>>,
    writer: Mutex<Option<WriteHalf>>,
}

impl SerialChannel {
    /// Open `path` at `baud`, with `read_timeout` bounding every read.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when the device cannot be
    /// acquired.  No reconnection is attempted.
    pub fn open(path: &str, baud: u32, read_timeout: Duration) -> Result<Self, BridgeError> {
        let connection_error = |e: serialport::Error| BridgeError::Connection {
            device: path.to_string(),
            reason: e.to_string(),
        };

        let port = serialport::new(path, baud)
            .timeout(read_timeout)
            .open()
            .map_err(connection_error)?;
        let writer = port.try_clone().map_err(connection_error)?;

        info!(device = %path, baud, timeout_ms = read_timeout.as_millis() as u64, "serial channel opened");
        Ok(Self::from_io(path, port, writer))
    }

    /// Build an `Open` channel over an arbitrary read/write pair.
    ///
    /// The reader should report an exhausted read timeout as
    /// [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`]; any
    /// other error is treated as a device failure.
    pub fn from_io<R, W>(device: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            device: device.into(),
            state: Mutex::new(ChannelState::Open),
            reader: Mutex::new(Some(BufReader::new(Box::new(reader)))),
            writer: Mutex::new(Some(Box::new(writer))),
        }
    }

    /// Device path (or label) this channel was opened on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        *lock(&self.state)
    }

    /// `true` while no device error is outstanding.
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// Read one line, blocking at most for the configured read timeout.
    ///
    /// Returns the bytes up to (excluding) the next `\n`, with a trailing
    /// `\r` also removed.  A timeout yields whatever arrived before it,
    /// which is an empty buffer when the link was idle.  At most
    /// [`MAX_LINE_LEN`] bytes are consumed per call, so a device streaming
    /// without terminators cannot stall the caller.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::NotOpen`] – the channel is `Closed`.
    /// * [`BridgeError::Io`] – device-level failure; the channel becomes
    ///   `Failed`.
    pub fn read_line(&self) -> Result<Vec<u8>, BridgeError> {
        self.ensure_usable()?;
        let mut guard = lock(&self.reader);
        let reader = guard
            .as_mut()
            .ok_or(BridgeError::NotOpen(ChannelState::Closed))?;

        let mut line = Vec::new();
        match reader.by_ref().take(MAX_LINE_LEN as u64).read_until(b'\n', &mut line) {
            Ok(n) if n == MAX_LINE_LEN && line.last() != Some(&b'\n') => {
                warn!(device = %self.device, bytes = n, "line exceeds length limit; returning it unterminated");
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {
                if !line.is_empty() {
                    debug!(device = %self.device, bytes = line.len(), "read timed out mid-line");
                }
            }
            Err(e) => {
                self.mark_failed();
                return Err(BridgeError::Io(format!("read from {}: {e}", self.device)));
            }
        }
        self.mark_recovered();

        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Write the whole of `buf` and flush it.
    ///
    /// Short writes are retried internally; the caller only ever sees the
    /// complete frame written or an error.  Concurrent callers are
    /// serialised on the write lock.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::NotOpen`] – the channel is `Closed`.
    /// * [`BridgeError::Io`] – device-level failure; the channel becomes
    ///   `Failed`.
    pub fn write_bytes(&self, buf: &[u8]) -> Result<(), BridgeError> {
        self.ensure_usable()?;
        let mut guard = lock(&self.writer);
        let writer = guard
            .as_mut()
            .ok_or(BridgeError::NotOpen(ChannelState::Closed))?;

        if let Err(e) = writer.write_all(buf).and_then(|()| writer.flush()) {
            self.mark_failed();
            return Err(BridgeError::Io(format!("write to {}: {e}", self.device)));
        }
        self.mark_recovered();
        Ok(())
    }

    /// Release the device handle.
    ///
    /// Idempotent, and safe on a `Failed` channel.  Waits for an in-flight
    /// read or write to finish before dropping the handle.
    pub fn close(&self) {
        {
            let mut state = lock(&self.state);
            if *state == ChannelState::Closed {
                return;
            }
            *state = ChannelState::Closed;
        }
        lock(&self.writer).take();
        lock(&self.reader).take();
        info!(device = %self.device, "serial channel closed");
    }

    fn ensure_usable(&self) -> Result<(), BridgeError> {
        match self.state() {
            ChannelState::Closed => Err(BridgeError::NotOpen(ChannelState::Closed)),
            ChannelState::Open | ChannelState::Failed => Ok(()),
        }
    }

    fn mark_failed(&self) {
        let mut state = lock(&self.state);
        if *state == ChannelState::Open {
            *state = ChannelState::Failed;
            warn!(device = %self.device, "serial channel marked failed");
        }
    }

    fn mark_recovered(&self) {
        let mut state = lock(&self.state);
        if *state == ChannelState::Failed {
            *state = ChannelState::Open;
            info!(device = %self.device, "serial channel recovered");
        }
    }
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("device", &self.device)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}
