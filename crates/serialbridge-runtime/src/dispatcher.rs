//! [`OutboundDispatcher`] – the event-driven bus → serial path.
//!
//! Each [`CommandRecord`] received on [`Topic::Commands`] is packed into an
//! outbound frame and written through the shared [`SerialChannel`].  There
//! is no internal queue: a command either goes out immediately (waiting only
//! on the channel's write lock) or is logged and discarded.
//!
//! [`Topic::Commands`]: serialbridge_middleware::Topic::Commands

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serialbridge_hal::{SerialChannel, codec};
use serialbridge_middleware::{EventBus, TopicReceiver};
use serialbridge_types::{BridgeError, ChannelState, CommandRecord, Event, EventPayload};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use crate::fault::{self, FAULT_SERIAL_WRITE};

/// Result of dispatching one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The full frame was written.
    Written,
    /// The channel was closed; the command was dropped.
    Discarded,
    /// The device rejected the write; the command was dropped.
    WriteFailed,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub frames_written: u64,
    pub write_errors: u64,
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    frames_written: AtomicU64,
    write_errors: AtomicU64,
    discarded: AtomicU64,
}

/// Packs motion commands and writes them to the serial link.
pub struct OutboundDispatcher {
    channel: Arc<SerialChannel>,
    alerts: Option<EventBus>,
    counters: Counters,
}

impl OutboundDispatcher {
    pub fn new(channel: Arc<SerialChannel>) -> Self {
        Self {
            channel,
            alerts: None,
            counters: Counters::default(),
        }
    }

    /// Also raise a bridge fault on `bus` whenever a write fails.
    pub fn with_alerts(mut self, bus: EventBus) -> Self {
        self.alerts = Some(bus);
        self
    }

    /// Encode `cmd` and write it.  Safe to call from several threads at
    /// once; frames are serialised by the channel's write lock.
    pub fn dispatch(&self, cmd: &CommandRecord) -> DispatchOutcome {
        if self.channel.is_closed() {
            return self.discard(self.channel.state());
        }

        let frame = codec::encode(cmd);
        match self.channel.write_bytes(frame.as_ref()) {
            Ok(()) => {
                info!(
                    x = cmd.linear_x,
                    y = cmd.linear_y,
                    z = cmd.angular_z,
                    "Sent frame to microcontroller"
                );
                self.counters.frames_written.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Written
            }
            Err(BridgeError::NotOpen(state)) => self.discard(state),
            Err(e) => {
                error!(device = %self.channel.device(), error = %e, "Error sending frame to microcontroller");
                self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
                fault::raise(self.alerts.as_ref(), "dispatcher", FAULT_SERIAL_WRITE, &e);
                DispatchOutcome::WriteFailed
            }
        }
    }

    /// Dispatch every command arriving on `commands` until `shutdown` flips
    /// to `true` or the bus closes.
    ///
    /// Writes run on the blocking pool and are awaited before the next
    /// command is taken, so no write is in flight once this future returns.
    pub async fn run(self: Arc<Self>, mut commands: TopicReceiver, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                received = commands.recv() => match received {
                    Ok(Event { payload: EventPayload::Command(cmd), .. }) => {
                        let dispatcher = Arc::clone(&self);
                        if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.dispatch(&cmd)).await {
                            error!(error = %e, "dispatch panicked");
                        }
                    }
                    Ok(event) => {
                        debug!(source = %event.source, "ignoring non-command event on commands topic");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(topic = ?commands.topic(), lagged_by = n, "subscriber lagged; commands lost on the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("outbound dispatcher stopped");
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            frames_written: self.counters.frames_written.load(Ordering::Relaxed),
            write_errors: self.counters.write_errors.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    fn discard(&self, state: ChannelState) -> DispatchOutcome {
        warn!(device = %self.channel.device(), %state, "Serial connection is closed; discarding command");
        self.counters.discarded.fetch_add(1, Ordering::Relaxed);
        DispatchOutcome::Discarded
    }
}
